//! Flood guard for senders outside the allow-list.
//!
//! Each rejected user gets at most one denial per cooldown; attempts in
//! between are only counted.

use moka::future::Cache;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Tracks which rejected users were recently told so
#[derive(Clone)]
pub struct RejectionCache {
    /// user_id -> () while the user is in cooldown
    cache: Cache<i64, ()>,
    cooldown: Duration,
    silenced_count: Arc<AtomicU64>,
}

impl RejectionCache {
    /// Creates a cache with a `cooldown_secs` quiet period per user, holding
    /// at most `max_capacity` users.
    #[must_use]
    pub fn new(cooldown_secs: u64, max_capacity: u64) -> Self {
        let cooldown = Duration::from_secs(cooldown_secs);
        let cache = Cache::builder()
            .max_capacity(max_capacity)
            .time_to_live(cooldown)
            .build();

        Self {
            cache,
            cooldown,
            silenced_count: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Returns `true` if the user should get a denial message now.
    ///
    /// Silenced attempts are counted and every 100th one is logged.
    pub async fn should_send(&self, user_id: i64) -> bool {
        if self.cache.get(&user_id).await.is_none() {
            return true;
        }

        let count = self.silenced_count.fetch_add(1, Ordering::Relaxed) + 1;
        if count.is_multiple_of(100) {
            debug!(silenced = count, user_id, "Silenced rejected senders");
        }
        false
    }

    /// Starts the cooldown after a denial was delivered.
    pub async fn mark_sent(&self, user_id: i64) {
        self.cache.insert(user_id, ()).await;
    }

    /// Users currently in cooldown
    #[must_use]
    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }

    /// Attempts that got no reply
    #[must_use]
    pub fn silenced_count(&self) -> u64 {
        self.silenced_count.load(Ordering::Relaxed)
    }

    /// Configured quiet period
    #[must_use]
    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_first_attempt_should_send() {
        let cache = RejectionCache::new(60, 100);
        assert!(cache.should_send(12345).await);
    }

    #[tokio::test]
    async fn test_cooldown_blocks_second_attempt() {
        let cache = RejectionCache::new(60, 100);

        assert!(cache.should_send(12345).await);
        cache.mark_sent(12345).await;

        assert!(!cache.should_send(12345).await);
        assert!(cache.should_send(777).await);
    }

    #[tokio::test]
    async fn test_cooldown_expires() {
        let cache = RejectionCache::new(1, 100);
        cache.mark_sent(12345).await;
        assert!(!cache.should_send(12345).await);

        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert!(cache.should_send(12345).await);
    }

    #[tokio::test]
    async fn test_silenced_count_and_entries() {
        let cache = RejectionCache::new(60, 100);
        cache.mark_sent(111).await;
        cache.mark_sent(222).await;

        for _ in 0..5 {
            cache.should_send(111).await;
        }
        assert_eq!(cache.silenced_count(), 5);

        cache.cache.run_pending_tasks().await;
        assert_eq!(cache.entry_count(), 2);
    }
}
