//! Per-sender daily quota
//!
//! Counters live in the key-value store under one key per sender, skill and
//! UTC day, so a new day starts from zero without any reset job.

use super::Tier;
use crate::clock::Clock;
use crate::storage::{self, quota_key, KeyValueStore, StorageError};
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

/// Daily ceilings per tier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaLimits {
    /// Free-tier ceiling
    pub free: u32,
    /// Premium ceiling, `None` for unlimited
    pub premium: Option<u32>,
}

impl QuotaLimits {
    /// Create limits
    #[must_use]
    pub const fn new(free: u32, premium: Option<u32>) -> Self {
        Self { free, premium }
    }

    /// Ceiling for `tier`, `None` for unlimited
    #[must_use]
    pub const fn for_tier(&self, tier: Tier) -> Option<u32> {
        match tier {
            Tier::Free => Some(self.free),
            Tier::Premium => self.premium,
        }
    }
}

/// Counter state after a successful consume
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaUsage {
    /// Actions consumed today, including this one
    pub used: u32,
    /// Ceiling that applied
    pub limit: Option<u32>,
}

impl QuotaUsage {
    /// Actions left today, `None` for unlimited
    #[must_use]
    pub fn remaining(&self) -> Option<u32> {
        self.limit.map(|limit| limit.saturating_sub(self.used))
    }
}

/// Quota rejection or counter failure
#[derive(Error, Debug)]
pub enum QuotaError {
    /// The sender used up today's allowance
    #[error("Daily limit reached ({limit}/day).")]
    Exceeded {
        /// Ceiling that applied
        limit: u32,
        /// Tier the ceiling belongs to
        tier: Tier,
    },
    /// The counter could not be read or written
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Daily action counter for one skill
pub struct QuotaTracker {
    skill: &'static str,
    limits: QuotaLimits,
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
}

impl QuotaTracker {
    /// Create a tracker whose counters are namespaced by `skill`
    #[must_use]
    pub fn new(
        skill: &'static str,
        limits: QuotaLimits,
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            skill,
            limits,
            store,
            clock,
        }
    }

    /// Configured limits
    #[must_use]
    pub const fn limits(&self) -> QuotaLimits {
        self.limits
    }

    /// Consume one action for `sender`.
    ///
    /// # Errors
    ///
    /// Returns `Exceeded` when today's count already reached the tier's
    /// ceiling (nothing is recorded), or `Storage` if the counter fails.
    pub async fn consume(&self, sender: &str, tier: Tier) -> Result<QuotaUsage, QuotaError> {
        let key = quota_key(self.skill, sender, &self.clock.today());
        let used: u32 = storage::load(self.store.as_ref(), &key)
            .await?
            .unwrap_or(0);
        let limit = self.limits.for_tier(tier);

        if let Some(limit) = limit {
            if used >= limit {
                info!(
                    skill = self.skill,
                    sender = %crate::utils::truncate_str(sender, 20),
                    limit,
                    %tier,
                    "Daily quota exhausted"
                );
                return Err(QuotaError::Exceeded { limit, tier });
            }
        }

        let used = used + 1;
        storage::save(self.store.as_ref(), &key, &used).await?;
        Ok(QuotaUsage { used, limit })
    }

    /// Today's usage for `sender` without consuming anything.
    ///
    /// # Errors
    ///
    /// Returns an error if the counter cannot be read.
    pub async fn peek(&self, sender: &str, tier: Tier) -> Result<QuotaUsage, StorageError> {
        let key = quota_key(self.skill, sender, &self.clock.today());
        let used = storage::load(self.store.as_ref(), &key)
            .await?
            .unwrap_or(0);
        Ok(QuotaUsage {
            used,
            limit: self.limits.for_tier(tier),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::storage::{MemoryStore, MockKeyValueStore};
    use chrono::{TimeZone, Utc};
    use std::time::Duration;

    fn tracker(limits: QuotaLimits) -> (QuotaTracker, Arc<ManualClock>) {
        let start = Utc
            .with_ymd_and_hms(2026, 5, 10, 22, 0, 0)
            .single()
            .expect("valid timestamp");
        let clock = Arc::new(ManualClock::new(start));
        let tracker = QuotaTracker::new(
            "test",
            limits,
            Arc::new(MemoryStore::new()),
            clock.clone(),
        );
        (tracker, clock)
    }

    #[tokio::test]
    async fn test_nth_succeeds_next_rejected_next_day_resets() {
        let (tracker, clock) = tracker(QuotaLimits::new(3, Some(10)));

        for expected in 1..=3 {
            let usage = tracker.consume("alice", Tier::Free).await.expect("within quota");
            assert_eq!(usage.used, expected);
        }
        assert!(matches!(
            tracker.consume("alice", Tier::Free).await,
            Err(QuotaError::Exceeded { limit: 3, tier: Tier::Free })
        ));

        clock.advance(Duration::from_secs(3 * 3600));
        let usage = tracker.consume("alice", Tier::Free).await.expect("new day");
        assert_eq!(usage.used, 1);
        assert_eq!(usage.remaining(), Some(2));
    }

    #[tokio::test]
    async fn test_premium_gets_higher_or_unlimited_ceiling() {
        let (premium, _) = tracker(QuotaLimits::new(1, Some(2)));
        assert!(premium.consume("p", Tier::Premium).await.is_ok());
        assert!(premium.consume("p", Tier::Premium).await.is_ok());
        assert!(premium.consume("p", Tier::Premium).await.is_err());

        let (unlimited, _) = tracker(QuotaLimits::new(1, None));
        for _ in 0..25 {
            assert!(unlimited.consume("whale", Tier::Premium).await.is_ok());
        }
        let usage = unlimited.peek("whale", Tier::Premium).await.expect("peek");
        assert_eq!(usage.used, 25);
        assert_eq!(usage.remaining(), None);
    }

    #[tokio::test]
    async fn test_rejection_does_not_write() {
        let mut store = MockKeyValueStore::new();
        store
            .expect_get_json()
            .returning(|_| Ok(Some(serde_json::json!(5))));
        store.expect_set_json().never();

        let clock = Arc::new(ManualClock::new(Utc::now()));
        let tracker = QuotaTracker::new("test", QuotaLimits::new(5, None), Arc::new(store), clock);
        assert!(matches!(
            tracker.consume("s", Tier::Free).await,
            Err(QuotaError::Exceeded { .. })
        ));
    }
}
