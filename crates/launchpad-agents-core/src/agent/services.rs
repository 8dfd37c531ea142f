//! Shared service container
//!
//! Everything a skill touches outside its own state is injected through
//! [`Services`], built once at startup and cloned into each skill.

use crate::clock::{Clock, SystemClock};
use crate::config::AgentSettings;
use crate::gate::{QuotaLimits, QuotaTracker, TierResolver};
use crate::health::Health;
use crate::storage::{KeyValueStore, MemoryStore, R2Store, StorageError};
use crate::upstream::{
    CachedGenerator, CachedMarketData, InferenceClient, LaunchpadClient, MarketData, TextGenerator,
};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Process-wide collaborators
#[derive(Clone)]
pub struct Services {
    /// Loaded settings
    pub settings: Arc<AgentSettings>,
    /// Time source
    pub clock: Arc<dyn Clock>,
    /// Persistent key-value store
    pub store: Arc<dyn KeyValueStore>,
    /// Market data (cached)
    pub market: Arc<dyn MarketData>,
    /// Text generation (cached)
    pub generator: Arc<dyn TextGenerator>,
    /// Sender tier lookup
    pub tiers: Arc<TierResolver>,
    /// Request counters
    pub health: Arc<Health>,
}

impl Services {
    /// Assemble services from explicit collaborators
    #[must_use]
    pub fn new(
        settings: AgentSettings,
        clock: Arc<dyn Clock>,
        store: Arc<dyn KeyValueStore>,
        market: Arc<dyn MarketData>,
        generator: Arc<dyn TextGenerator>,
    ) -> Self {
        let tiers = Arc::new(TierResolver::from_settings(
            &settings,
            market.clone(),
            clock.clone(),
        ));
        let health = Arc::new(Health::new(clock.clone()));
        Self {
            settings: Arc::new(settings),
            clock,
            store,
            market,
            generator,
            tiers,
            health,
        }
    }

    /// Build the production services: R2 storage when configured (memory
    /// otherwise), cached launch-platform and inference clients.
    ///
    /// # Errors
    ///
    /// Returns an error if R2 is configured but cannot be initialized.
    pub async fn connect(settings: AgentSettings) -> Result<Self, StorageError> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        let store: Arc<dyn KeyValueStore> = if R2Store::is_configured(&settings) {
            info!("Using R2 storage");
            let store = R2Store::new(&settings).await?;
            if store.check_connection().await.is_err() {
                // Details already logged by check_connection
                error!("R2 storage connection check failed, continuing");
            }
            Arc::new(store)
        } else {
            warn!("R2 storage is not configured, state will not survive restarts");
            Arc::new(MemoryStore::new())
        };

        let market = Arc::new(CachedMarketData::new(
            LaunchpadClient::from_settings(&settings),
            clock.clone(),
        ));
        let generator = Arc::new(CachedGenerator::new(
            InferenceClient::from_settings(&settings),
            clock.clone(),
        ));

        Ok(Self::new(settings, clock, store, market, generator))
    }

    /// Daily quota tracker for `skill`
    #[must_use]
    pub fn quota(&self, skill: &'static str, limits: QuotaLimits) -> QuotaTracker {
        QuotaTracker::new(skill, limits, self.store.clone(), self.clock.clone())
    }
}
