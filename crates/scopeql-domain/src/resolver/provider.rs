//! Permission provider interface and built-in providers.

use std::collections::BTreeSet;
use std::fmt;

use crate::model::Row;
use crate::query::Predicate;

use super::request::RequestContext;

/// Top-level action on a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Action {
    Create,
    Read,
    Update,
    Delete,
    BulkCreate,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Action::Create => "create",
            Action::Read => "read",
            Action::Update => "update",
            Action::Delete => "delete",
            Action::BulkCreate => "bulk_create",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub type ActionSet = BTreeSet<Action>;

/// Every action, for providers that grant everything.
pub fn all_actions() -> ActionSet {
    [
        Action::Create,
        Action::Read,
        Action::Update,
        Action::Delete,
        Action::BulkCreate,
    ]
    .into_iter()
    .collect()
}

/// Field-level operation a fields set is resolved for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FieldOperation {
    Read,
    Create,
    Update,
}

impl FieldOperation {
    /// Action a provider must grant before its field set counts.
    pub fn required_action(self) -> Action {
        match self {
            FieldOperation::Read => Action::Read,
            FieldOperation::Create => Action::Create,
            FieldOperation::Update => Action::Update,
        }
    }
}

/// Fields a provider grants for one operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldSet {
    /// Every field the model exposes. Resolved against the model before it
    /// leaves the resolver.
    All,
    Only(BTreeSet<String>),
}

impl FieldSet {
    pub fn none() -> Self {
        FieldSet::Only(BTreeSet::new())
    }

    pub fn only<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        FieldSet::Only(fields.into_iter().map(Into::into).collect())
    }
}

/// A policy unit answering action, field and row questions for one model.
///
/// The resolver composes providers as follows:
/// - actions and fields: union across providers
/// - [`filter_rows`](Self::filter_rows): ORed together first
/// - [`exclude_rows`](Self::exclude_rows): then each removes rows in turn
///
/// A provider that only wants to veto rows returns [`Predicate::Nothing`]
/// from `filter_rows` and does its vetoing in `exclude_rows`.
pub trait PermissionProvider: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    fn allowed_actions(&self, request: &RequestContext, model: &str) -> ActionSet;

    fn allowed_fields(
        &self,
        request: &RequestContext,
        model: &str,
        operation: FieldOperation,
    ) -> FieldSet;

    /// Rows this provider grants access to.
    fn filter_rows(&self, _request: &RequestContext, _model: &str) -> Predicate {
        Predicate::All
    }

    /// Rows this provider removes regardless of who granted them.
    fn exclude_rows(&self, _request: &RequestContext, _model: &str) -> Predicate {
        Predicate::Nothing
    }

    fn allowed_object_actions(&self, request: &RequestContext, model: &str, row: &Row)
        -> ActionSet;

    /// Whether `action` may be applied to all of `rows` at once.
    fn bulk_operation_allowed(
        &self,
        request: &RequestContext,
        model: &str,
        action: Action,
        rows: &[Row],
    ) -> bool {
        rows.iter()
            .all(|row| self.allowed_object_actions(request, model, row).contains(&action))
    }
}

/// Grants everything to everyone.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAllPermission;

impl PermissionProvider for AllowAllPermission {
    fn name(&self) -> &str {
        "AllowAllPermission"
    }

    fn allowed_actions(&self, _request: &RequestContext, _model: &str) -> ActionSet {
        all_actions()
    }

    fn allowed_fields(&self, _: &RequestContext, _: &str, _: FieldOperation) -> FieldSet {
        FieldSet::All
    }

    fn allowed_object_actions(&self, _: &RequestContext, _: &str, _: &Row) -> ActionSet {
        all_actions()
    }
}

/// Grants everything to authenticated callers, nothing to anonymous ones.
#[derive(Debug, Clone, Copy, Default)]
pub struct IsAuthenticatedPermission;

impl PermissionProvider for IsAuthenticatedPermission {
    fn name(&self) -> &str {
        "IsAuthenticatedPermission"
    }

    fn allowed_actions(&self, request: &RequestContext, _model: &str) -> ActionSet {
        gated(request.identity.is_authenticated)
    }

    fn allowed_fields(&self, request: &RequestContext, _: &str, _: FieldOperation) -> FieldSet {
        gated_fields(request.identity.is_authenticated)
    }

    fn filter_rows(&self, request: &RequestContext, _model: &str) -> Predicate {
        gated_rows(request.identity.is_authenticated)
    }

    fn allowed_object_actions(&self, request: &RequestContext, _: &str, _: &Row) -> ActionSet {
        gated(request.identity.is_authenticated)
    }
}

/// Grants everything to staff, nothing to anyone else.
#[derive(Debug, Clone, Copy, Default)]
pub struct IsStaffPermission;

impl PermissionProvider for IsStaffPermission {
    fn name(&self) -> &str {
        "IsStaffPermission"
    }

    fn allowed_actions(&self, request: &RequestContext, _model: &str) -> ActionSet {
        gated(request.identity.is_staff)
    }

    fn allowed_fields(&self, request: &RequestContext, _: &str, _: FieldOperation) -> FieldSet {
        gated_fields(request.identity.is_staff)
    }

    fn filter_rows(&self, request: &RequestContext, _model: &str) -> Predicate {
        gated_rows(request.identity.is_staff)
    }

    fn allowed_object_actions(&self, request: &RequestContext, _: &str, _: &Row) -> ActionSet {
        gated(request.identity.is_staff)
    }
}

fn gated(open: bool) -> ActionSet {
    if open {
        all_actions()
    } else {
        ActionSet::new()
    }
}

fn gated_fields(open: bool) -> FieldSet {
    if open {
        FieldSet::All
    } else {
        FieldSet::none()
    }
}

fn gated_rows(open: bool) -> Predicate {
    if open {
        Predicate::All
    } else {
        Predicate::Nothing
    }
}
