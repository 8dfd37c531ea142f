//! TTL cache with size-pressure eviction
//!
//! Entries expire after their own TTL. When a `set` finds the cache full it
//! first drops every expired entry and, if that frees nothing, evicts the
//! tenth of entries closest to expiry. There is no LRU bookkeeping.
//!
//! The cache is not synchronized; owners shared across tasks wrap it in a
//! mutex and never hold the lock across an await.

use crate::clock::{expires_at, Clock};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    expires_at: DateTime<Utc>,
}

/// String-keyed TTL cache
pub struct TtlCache<V> {
    entries: HashMap<String, CacheEntry<V>>,
    max_size: usize,
    default_ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl<V: Clone> TtlCache<V> {
    /// Create a cache holding at most `max_size` entries.
    #[must_use]
    pub fn new(max_size: usize, default_ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: HashMap::new(),
            max_size: max_size.max(1),
            default_ttl,
            clock,
        }
    }

    /// Returns the cached value, or `None` if absent or expired.
    ///
    /// Expired entries are removed on read.
    pub fn get(&mut self, key: &str) -> Option<V> {
        let now = self.clock.now();
        match self.entries.get(key) {
            Some(entry) if entry.expires_at > now => Some(entry.value.clone()),
            Some(_) => {
                self.entries.remove(key);
                None
            }
            None => None,
        }
    }

    /// Stores a value for `ttl`.
    pub fn set(&mut self, key: impl Into<String>, value: V, ttl: Duration) {
        let key = key.into();
        let now = self.clock.now();

        if !self.entries.contains_key(&key) && self.entries.len() >= self.max_size {
            self.make_room(now);
        }

        self.entries.insert(
            key,
            CacheEntry {
                value,
                expires_at: expires_at(now, ttl),
            },
        );
    }

    /// Stores a value for the default TTL.
    pub fn set_default(&mut self, key: impl Into<String>, value: V) {
        let ttl = self.default_ttl;
        self.set(key, value, ttl);
    }

    /// Removes an entry, returning its value if it was still live.
    pub fn remove(&mut self, key: &str) -> Option<V> {
        let now = self.clock.now();
        self.entries
            .remove(key)
            .filter(|entry| entry.expires_at > now)
            .map(|entry| entry.value)
    }

    /// Number of stored entries, including ones not yet purged.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drops every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    fn make_room(&mut self, now: DateTime<Utc>) {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.expires_at > now);
        if self.entries.len() < self.max_size {
            debug!(purged = before - self.entries.len(), "Cache purged expired entries");
            return;
        }

        let evict = (self.max_size / 10).max(1);
        let mut by_expiry: Vec<(String, DateTime<Utc>)> = self
            .entries
            .iter()
            .map(|(key, entry)| (key.clone(), entry.expires_at))
            .collect();
        by_expiry.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));

        for (key, _) in by_expiry.into_iter().take(evict) {
            self.entries.remove(&key);
        }
        debug!(evicted = evict, "Cache evicted entries closest to expiry");
    }
}
