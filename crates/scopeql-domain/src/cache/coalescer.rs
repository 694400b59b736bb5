//! Request coalescing for cache misses.
//!
//! The first task to miss on a key becomes the leader and computes the
//! result. Tasks that miss on the same key while the leader is running
//! become followers: they wait for the leader's signal and then re-read the
//! cache. A follower never waits longer than the configured bound, and a
//! leader that fails or panics simply closes the channel, so followers fall
//! back to computing on their own.

use std::hash::Hash;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::broadcast;

/// Outcome of trying to claim a key.
pub enum CoalesceSlot {
    /// Caller computes the entry and must release the slot afterwards.
    Leader,
    /// Another task holds the key; resolves once it releases.
    Follower(broadcast::Receiver<()>),
}

/// Tracks keys whose results are currently being computed.
#[derive(Debug)]
pub struct Coalescer<K>
where
    K: Hash + Eq + Clone,
{
    in_flight: DashMap<K, broadcast::Sender<()>>,
}

impl<K> Coalescer<K>
where
    K: Hash + Eq + Clone,
{
    pub fn new() -> Self {
        Self {
            in_flight: DashMap::new(),
        }
    }

    /// Atomically claims `key` or subscribes to the task that holds it.
    pub fn acquire(&self, key: K) -> CoalesceSlot {
        match self.in_flight.entry(key) {
            Entry::Occupied(entry) => CoalesceSlot::Follower(entry.get().subscribe()),
            Entry::Vacant(entry) => {
                let (tx, _rx) = broadcast::channel(1);
                entry.insert(tx);
                CoalesceSlot::Leader
            }
        }
    }

    /// Releases `key` and wakes its followers.
    pub fn release(&self, key: &K) {
        if let Some((_, tx)) = self.in_flight.remove(key) {
            // No receivers is fine.
            let _ = tx.send(());
        }
    }

    /// Releases `key` without signalling success; followers see the
    /// channel close.
    fn abandon(&self, key: &K) {
        self.in_flight.remove(key);
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }
}

impl<K> Default for Coalescer<K>
where
    K: Hash + Eq + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Releases a leader's slot on drop, even if the computation panicked.
pub struct LeaderGuard<'a, K>
where
    K: Hash + Eq + Clone,
{
    coalescer: &'a Coalescer<K>,
    key: K,
    released: bool,
}

impl<'a, K> LeaderGuard<'a, K>
where
    K: Hash + Eq + Clone,
{
    pub fn new(coalescer: &'a Coalescer<K>, key: K) -> Self {
        Self {
            coalescer,
            key,
            released: false,
        }
    }

    /// The entry was populated; wake the followers.
    pub fn release(mut self) {
        self.coalescer.release(&self.key);
        self.released = true;
    }
}

impl<K> Drop for LeaderGuard<'_, K>
where
    K: Hash + Eq + Clone,
{
    fn drop(&mut self) {
        if !self.released {
            self.coalescer.abandon(&self.key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_caller_leads_and_second_follows() {
        let coalescer: Coalescer<String> = Coalescer::new();

        assert!(matches!(coalescer.acquire("k".into()), CoalesceSlot::Leader));
        assert!(matches!(
            coalescer.acquire("k".into()),
            CoalesceSlot::Follower(_)
        ));
        assert!(matches!(coalescer.acquire("other".into()), CoalesceSlot::Leader));
    }

    #[tokio::test]
    async fn test_release_wakes_followers() {
        let coalescer: Coalescer<String> = Coalescer::new();
        let _ = coalescer.acquire("k".into());
        let CoalesceSlot::Follower(mut rx) = coalescer.acquire("k".into()) else {
            panic!("expected follower");
        };

        LeaderGuard::new(&coalescer, "k".to_string()).release();

        assert!(rx.recv().await.is_ok());
        assert_eq!(coalescer.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_dropped_guard_closes_channel_without_signal() {
        let coalescer: Coalescer<String> = Coalescer::new();
        let _ = coalescer.acquire("k".into());
        let CoalesceSlot::Follower(mut rx) = coalescer.acquire("k".into()) else {
            panic!("expected follower");
        };

        drop(LeaderGuard::new(&coalescer, "k".to_string()));

        assert!(rx.recv().await.is_err());
        assert!(matches!(coalescer.acquire("k".into()), CoalesceSlot::Leader));
    }
}
