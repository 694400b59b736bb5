//! Per-request caller context.

use serde_json::Value;

/// Who is making the request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Identity {
    /// Primary key of the caller's user row, if any.
    pub id: Option<Value>,
    pub is_authenticated: bool,
    pub is_staff: bool,
}

impl Identity {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn user(id: impl Into<Value>) -> Self {
        Self {
            id: Some(id.into()),
            is_authenticated: true,
            is_staff: false,
        }
    }

    pub fn staff(id: impl Into<Value>) -> Self {
        Self {
            is_staff: true,
            ..Self::user(id)
        }
    }
}

/// Request-scoped context handed to providers, hooks and the cache.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestContext {
    pub identity: Identity,
    /// Caller-supplied transaction/canonical id. Without one, results are
    /// never cached.
    pub txn_id: Option<String>,
    /// Correlates lifecycle events with the operation that caused them.
    pub operation_id: Option<String>,
}

impl RequestContext {
    pub fn new(identity: Identity) -> Self {
        Self {
            identity,
            txn_id: None,
            operation_id: None,
        }
    }

    pub fn anonymous() -> Self {
        Self::new(Identity::anonymous())
    }

    pub fn with_txn_id(mut self, txn_id: impl Into<String>) -> Self {
        self.txn_id = Some(txn_id.into());
        self
    }

    pub fn with_operation_id(mut self, operation_id: impl Into<String>) -> Self {
        self.operation_id = Some(operation_id.into());
        self
    }

    pub fn user_id(&self) -> Option<&Value> {
        self.identity.id.as_ref()
    }
}
