//! Deterministic cache keys.

use std::fmt;

use sha2::{Digest, Sha256};

use crate::query::RenderedQuery;

/// Identity of one cached result.
///
/// Derived from the rendered, permission-scoped query plus its parameters,
/// never from the inbound AST. Two ASTs that render identically share a
/// key; two callers whose row scopes differ never do.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub const PREFIX: &'static str = "scopeql:query:";

    /// Builds the key for `query` within transaction `txn_id`.
    ///
    /// `context` separates results that share a row scope but differ in
    /// post-processing, such as the aggregate function or requested fields.
    pub fn new(query: &RenderedQuery, txn_id: &str, context: &str) -> Self {
        let params = query.params_json();
        let mut hasher = Sha256::new();
        for part in [query.text.as_str(), params.as_str(), txn_id, context] {
            hash_part(&mut hasher, part);
        }
        Self(format!("{}{}", Self::PREFIX, hex::encode(hasher.finalize())))
    }

    /// Like [`CacheKey::new`], but only when the request carries a
    /// transaction id. Requests without one are never cached.
    pub fn for_request(query: &RenderedQuery, txn_id: Option<&str>, context: &str) -> Option<Self> {
        txn_id.map(|txn| Self::new(query, txn, context))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Feeds one length-prefixed component, so no component can absorb its
/// neighbour's bytes.
fn hash_part(hasher: &mut Sha256, part: &str) {
    hasher.update((part.len() as u64).to_le_bytes());
    hasher.update(part.as_bytes());
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
