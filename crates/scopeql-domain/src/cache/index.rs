//! Dependency index for write invalidation.
//!
//! Every cached entry is linked under `(transaction id, model)` for each
//! model its result depends on. Entries are tagged with the generation of
//! the `put` that recorded them, so a late eviction notice for a replaced
//! value cannot unlink the newer one.

use std::collections::{BTreeSet, HashSet};

use dashmap::DashMap;

use super::key::CacheKey;

type Scope = (String, String);

#[derive(Debug)]
struct Indexed {
    generation: u64,
    scopes: Vec<Scope>,
}

#[derive(Debug, Default)]
pub(crate) struct ScopeIndex {
    keys: DashMap<Scope, HashSet<CacheKey>>,
    entries: DashMap<CacheKey, Indexed>,
}

impl ScopeIndex {
    pub fn record(&self, key: &CacheKey, generation: u64, txn_id: &str, models: &BTreeSet<String>) {
        let scopes: Vec<Scope> = models
            .iter()
            .map(|model| (txn_id.to_string(), model.clone()))
            .collect();

        let previous = self.entries.insert(
            key.clone(),
            Indexed {
                generation,
                scopes: scopes.clone(),
            },
        );
        if let Some(previous) = previous {
            self.unlink(key, &previous.scopes);
        }
        for scope in scopes {
            self.keys.entry(scope).or_default().insert(key.clone());
        }
    }

    /// Removes every key linked under `(txn_id, model)` from the index and
    /// returns them.
    pub fn take(&self, txn_id: &str, model: &str) -> HashSet<CacheKey> {
        let keys = self
            .keys
            .remove(&(txn_id.to_string(), model.to_string()))
            .map(|(_, keys)| keys)
            .unwrap_or_default();
        for key in &keys {
            self.forget(key);
        }
        keys
    }

    pub fn forget(&self, key: &CacheKey) {
        if let Some((_, indexed)) = self.entries.remove(key) {
            self.unlink(key, &indexed.scopes);
        }
    }

    /// Forgets `key` only if it is still indexed at `generation`.
    pub fn forget_generation(&self, key: &CacheKey, generation: u64) {
        if let Some((_, indexed)) = self
            .entries
            .remove_if(key, |_, indexed| indexed.generation == generation)
        {
            self.unlink(key, &indexed.scopes);
        }
    }

    fn unlink(&self, key: &CacheKey, scopes: &[Scope]) {
        for scope in scopes {
            let now_empty = match self.keys.get_mut(scope) {
                Some(mut keys) => {
                    keys.remove(key);
                    keys.is_empty()
                }
                None => false,
            };
            if now_empty {
                self.keys.remove_if(scope, |_, keys| keys.is_empty());
            }
        }
    }

    /// Number of `(transaction id, model)` scopes with live keys.
    pub fn scope_count(&self) -> usize {
        self.keys.len()
    }

    /// Number of indexed keys.
    pub fn key_count(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::query::{Predicate, QueryHandle};

    fn key(value: i64) -> CacheKey {
        let rendered = QueryHandle::new("book")
            .filter(Predicate::eq("id", json!(value)))
            .render();
        CacheKey::new(&rendered, "t1", "read")
    }

    fn models(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn test_take_unlinks_key_from_its_other_scopes() {
        let index = ScopeIndex::default();
        index.record(&key(1), 0, "t1", &models(&["author", "book"]));

        let taken = index.take("t1", "author");

        assert!(taken.contains(&key(1)));
        assert_eq!(index.scope_count(), 0);
        assert_eq!(index.key_count(), 0);
    }

    #[test]
    fn test_stale_generation_does_not_unlink_newer_entry() {
        let index = ScopeIndex::default();
        index.record(&key(1), 0, "t1", &models(&["book"]));
        index.record(&key(1), 1, "t1", &models(&["book"]));

        index.forget_generation(&key(1), 0);
        assert_eq!(index.key_count(), 1);

        index.forget_generation(&key(1), 1);
        assert_eq!(index.key_count(), 0);
        assert_eq!(index.scope_count(), 0);
    }

    #[test]
    fn test_re_recording_moves_key_to_new_scopes() {
        let index = ScopeIndex::default();
        index.record(&key(1), 0, "t1", &models(&["author", "book"]));
        index.record(&key(1), 1, "t1", &models(&["book"]));

        assert!(index.take("t1", "author").is_empty());
        assert!(index.take("t1", "book").contains(&key(1)));
    }
}
