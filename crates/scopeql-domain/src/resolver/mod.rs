//! Permission resolution.
//!
//! # Composition rules
//!
//! - **Actions**: union over providers. No providers, no actions.
//! - **Fields**: union over the providers that grant the operation's
//!   action. "All fields" short-circuits and is replaced by the model's
//!   concrete field set, so the sentinel never reaches a cached set.
//! - **Rows**: grants are ORed, then exclusions are ANDed in provider order.
//!
//! Everything is memoized per request inside [`PermissionResolver`].

mod config;
mod fields_map;
mod permissions;
mod provider;
mod request;

#[cfg(test)]
mod fields_map_proptest;

pub use config::{ResolverConfig, UnknownFieldPolicy};
pub use fields_map::FieldsMap;
pub use permissions::PermissionResolver;
pub use provider::{
    all_actions, Action, ActionSet, AllowAllPermission, FieldOperation, FieldSet,
    IsAuthenticatedPermission, IsStaffPermission, PermissionProvider,
};
pub use request::{Identity, RequestContext};
