//! Premium tier resolution
//!
//! A sender is premium while they hold at least the configured amount of the
//! premium token. The agent owner is always premium, whatever their sender
//! id looks like. Answers are cached briefly; lookup failures degrade to
//! [`Tier::Free`] and are not cached so the next message retries.

use super::Tier;
use crate::cache::TtlCache;
use crate::clock::Clock;
use crate::config::{AgentSettings, TIER_CACHE_TTL_SECS};
use crate::upstream::MarketData;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::warn;

const TIER_CACHE_MAX_SIZE: usize = 10_000;

/// Resolves and caches sender tiers
pub struct TierResolver {
    market: Arc<dyn MarketData>,
    premium_token: Option<String>,
    owner: Option<String>,
    threshold: f64,
    cache: Mutex<TtlCache<Tier>>,
}

impl TierResolver {
    /// Create a resolver; with no `premium_token` everyone is free.
    #[must_use]
    pub fn new(
        market: Arc<dyn MarketData>,
        premium_token: Option<String>,
        threshold: f64,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            market,
            premium_token: premium_token.filter(|t| !t.is_empty()),
            owner: None,
            threshold,
            cache: Mutex::new(TtlCache::new(
                TIER_CACHE_MAX_SIZE,
                Duration::from_secs(TIER_CACHE_TTL_SECS),
                clock,
            )),
        }
    }

    /// Treat `owner` as premium without a balance lookup
    #[must_use]
    pub fn with_owner(mut self, owner: Option<String>) -> Self {
        self.owner = owner.filter(|o| !o.is_empty());
        self
    }

    /// Create a resolver from agent settings
    #[must_use]
    pub fn from_settings(
        settings: &AgentSettings,
        market: Arc<dyn MarketData>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self::new(
            market,
            settings.premium_token_address.clone(),
            settings.premium_token_threshold,
            clock,
        )
        .with_owner(settings.agent_owner.clone())
    }

    /// Balance required for the premium tier
    #[must_use]
    pub const fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Tier of `sender`
    pub async fn tier(&self, sender: &str) -> Tier {
        if self.owner.as_deref() == Some(sender) {
            return Tier::Premium;
        }
        let Some(token) = self.premium_token.as_deref() else {
            return Tier::Free;
        };

        let cached = self
            .cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(sender);
        if let Some(tier) = cached {
            return tier;
        }

        match self.market.holder_balance(token, sender).await {
            Ok(balance) => {
                let tier = if balance >= self.threshold {
                    Tier::Premium
                } else {
                    Tier::Free
                };
                self.cache
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .set_default(sender, tier);
                tier
            }
            Err(e) => {
                warn!(
                    sender = %crate::utils::truncate_str(sender, 20),
                    error = %e,
                    "Tier lookup failed, using free tier"
                );
                Tier::Free
            }
        }
    }
}
