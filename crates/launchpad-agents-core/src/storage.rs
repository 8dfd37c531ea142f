//! Storage layer for skill state
//!
//! Skills persist watches, quota counters and faucet ledgers as JSON values
//! under string keys. [`MemoryStore`] keeps them in process; [`R2Store`]
//! persists them to Cloudflare R2 / AWS S3 with a write-through cache.

use crate::config::AgentSettings;
use async_trait::async_trait;
use aws_credential_types::Credentials;
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::operation::get_object::GetObjectError;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use aws_types::region::Region;
use moka::future::Cache;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};

/// Errors that can occur during storage operations
#[derive(Error, Debug)]
pub enum StorageError {
    /// Error retrieving object from S3
    #[error("S3 Get error: {0}")]
    S3Get(Box<SdkError<GetObjectError>>),
    /// Error putting or deleting an object in S3
    #[error("S3 put error: {0}")]
    S3Put(String),
    /// Error during JSON serialization or deserialization
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    /// Standard I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// Configuration error (missing credentials, etc.)
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Interface for key-value storage backends
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Load the value stored under `key`
    async fn get_json(&self, key: &str) -> Result<Option<Value>, StorageError>;
    /// Store `value` under `key`, replacing any previous value
    async fn set_json(&self, key: &str, value: Value) -> Result<(), StorageError>;
    /// Remove `key`; missing keys are not an error
    async fn delete(&self, key: &str) -> Result<(), StorageError>;
    /// Check connection to storage
    async fn check_connection(&self) -> Result<(), String>;
}

/// Load and deserialize a typed value.
///
/// # Errors
///
/// Returns an error if the backend fails or the stored JSON does not match `T`.
pub async fn load<T: DeserializeOwned>(
    store: &dyn KeyValueStore,
    key: &str,
) -> Result<Option<T>, StorageError> {
    match store.get_json(key).await? {
        Some(value) => Ok(Some(serde_json::from_value(value)?)),
        None => Ok(None),
    }
}

/// Serialize and store a typed value.
///
/// # Errors
///
/// Returns an error if serialization or the backend fails.
pub async fn save<T: Serialize + Sync>(
    store: &dyn KeyValueStore,
    key: &str,
    data: &T,
) -> Result<(), StorageError> {
    store.set_json(key, serde_json::to_value(data)?).await
}

/// Process-local storage
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, Value>>,
}

impl MemoryStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn values(&self) -> std::sync::MutexGuard<'_, HashMap<String, Value>> {
        self.values.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get_json(&self, key: &str) -> Result<Option<Value>, StorageError> {
        Ok(self.values().get(key).cloned())
    }

    async fn set_json(&self, key: &str, value: Value) -> Result<(), StorageError> {
        self.values().insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.values().remove(key);
        Ok(())
    }

    async fn check_connection(&self) -> Result<(), String> {
        Ok(())
    }
}

/// R2-backed storage implementation
pub struct R2Store {
    client: Client,
    bucket: String,
    cache: Cache<String, Arc<Vec<u8>>>,
}

impl R2Store {
    /// Create a new R2 storage instance
    ///
    /// # Errors
    ///
    /// Returns an error if R2 configuration is missing.
    pub async fn new(settings: &AgentSettings) -> Result<Self, StorageError> {
        let endpoint_url = settings
            .r2_endpoint_url
            .as_ref()
            .ok_or_else(|| StorageError::Config("R2_ENDPOINT_URL is missing".into()))?;
        let access_key = settings
            .r2_access_key_id
            .as_ref()
            .ok_or_else(|| StorageError::Config("R2_ACCESS_KEY_ID is missing".into()))?;
        let secret_key = settings
            .r2_secret_access_key
            .as_ref()
            .ok_or_else(|| StorageError::Config("R2_SECRET_ACCESS_KEY is missing".into()))?;
        let bucket = settings
            .r2_bucket_name
            .as_ref()
            .ok_or_else(|| StorageError::Config("R2_BUCKET_NAME is missing".into()))?;

        let credentials = Credentials::new(access_key, secret_key, None, None, "r2-storage");

        let sdk_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .credentials_provider(credentials)
            .region(Region::new("auto"))
            .load()
            .await;

        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .endpoint_url(endpoint_url)
            .force_path_style(true)
            .build();

        let cache = Cache::builder()
            .max_capacity(10_000)
            .time_to_live(Duration::from_secs(60 * 60))
            .time_to_idle(Duration::from_secs(30 * 60))
            .build();

        Ok(Self {
            client: Client::from_conf(s3_config),
            bucket: bucket.clone(),
            cache,
        })
    }

    /// Returns `true` when every R2 setting is present.
    #[must_use]
    pub fn is_configured(settings: &AgentSettings) -> bool {
        settings.r2_endpoint_url.is_some()
            && settings.r2_access_key_id.is_some()
            && settings.r2_secret_access_key.is_some()
            && settings.r2_bucket_name.is_some()
    }
}

#[async_trait]
impl KeyValueStore for R2Store {
    async fn get_json(&self, key: &str) -> Result<Option<Value>, StorageError> {
        let object_key = object_key(key);

        // Read-through
        if let Some(cached) = self.cache.get(&object_key).await {
            match serde_json::from_slice(&cached) {
                Ok(value) => return Ok(Some(value)),
                Err(e) => {
                    warn!("Cache deserialization failed for {}: {}", object_key, e);
                    self.cache.invalidate(&object_key).await;
                }
            }
        }

        let result = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&object_key)
            .send()
            .await;

        match result {
            Ok(output) => {
                let data = output
                    .body
                    .collect()
                    .await
                    .map_err(|e| StorageError::Io(std::io::Error::other(e)))?
                    .into_bytes();

                self.cache
                    .insert(object_key, Arc::new(data.to_vec()))
                    .await;

                Ok(Some(serde_json::from_slice(&data)?))
            }
            Err(SdkError::ServiceError(err)) if err.err().is_no_such_key() => Ok(None),
            Err(e) => Err(StorageError::S3Get(Box::new(e))),
        }
    }

    async fn set_json(&self, key: &str, value: Value) -> Result<(), StorageError> {
        let object_key = object_key(key);
        let body_bytes = serde_json::to_vec(&value)?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&object_key)
            .body(ByteStream::from(body_bytes.clone()))
            .content_type("application/json")
            .send()
            .await
            .map_err(|e| StorageError::S3Put(e.to_string()))?;

        // Write-through, only once the object is persisted
        self.cache.insert(object_key, Arc::new(body_bytes)).await;

        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let object_key = object_key(key);
        self.cache.invalidate(&object_key).await;

        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(object_key)
            .send()
            .await
            .map_err(|e| StorageError::S3Put(e.to_string()))?;

        Ok(())
    }

    async fn check_connection(&self) -> Result<(), String> {
        match self.client.list_buckets().send().await {
            Ok(_) => {
                info!("Successfully connected to R2 storage.");
                Ok(())
            }
            Err(e) => {
                let err_msg = format!("R2 connectivity test failed: {e:#?}");
                error!("{}", err_msg);
                Err(err_msg)
            }
        }
    }
}

fn object_key(key: &str) -> String {
    format!("agents/{key}.json")
}

/// Key of a sender's daily quota counter for one skill
#[must_use]
pub fn quota_key(skill: &str, sender: &str, day: &str) -> String {
    format!("quota/{skill}/{sender}/{day}")
}

/// Key of a sender's watch list
#[must_use]
pub fn watches_key(sender: &str) -> String {
    format!("watches/{sender}")
}

/// Key of the set of senders that own watches
pub const WATCH_OWNERS_KEY: &str = "watch_owners";

/// Key of the per-token sweep samples used for anomaly detection
pub const WATCH_TRACKS_KEY: &str = "watch_tracks";

/// Key of a token's recorded price history
#[must_use]
pub fn price_history_key(address: &str) -> String {
    format!("price_history/{}", address.to_lowercase())
}

/// Key of a skill's counters (`alerts_created`, `checks_run`, ...)
#[must_use]
pub fn stats_key(skill: &str) -> String {
    format!("stats/{skill}")
}

/// Key of the faucet's welcome-claim ledger
pub const GIFTER_WELCOME_CLAIMS_KEY: &str = "gifter/welcome_claims";
/// Key of the faucet's referral counters
pub const GIFTER_REFERRAL_COUNTS_KEY: &str = "gifter/referral_counts";
/// Key of the faucet's referred-to-referrer map
pub const GIFTER_REFERRAL_MAP_KEY: &str = "gifter/referral_map";
/// Key of the faucet's builder-claim ledger
pub const GIFTER_BUILDER_CLAIMS_KEY: &str = "gifter/builder_claims";
/// Key of the faucet's undelivered gas transfers
pub const GIFTER_GAS_PENDING_KEY: &str = "gifter/gas_pending";

/// Key of the faucet's per-day welcome-claim counter
#[must_use]
pub fn gifter_daily_key(day: &str) -> String {
    format!("gifter/daily/{day}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Sample {
        count: u32,
    }

    #[tokio::test]
    async fn test_memory_store_roundtrip_and_delete() {
        let store = MemoryStore::new();
        assert!(load::<Sample>(&store, "k").await.expect("load").is_none());

        save(&store, "k", &Sample { count: 3 }).await.expect("save");
        assert_eq!(
            load::<Sample>(&store, "k").await.expect("load"),
            Some(Sample { count: 3 })
        );

        store.delete("k").await.expect("delete");
        store.delete("k").await.expect("deleting a missing key is fine");
        assert!(store.get_json("k").await.expect("get").is_none());
    }

    #[tokio::test]
    async fn test_load_rejects_mismatched_shape() {
        let store = MemoryStore::new();
        store
            .set_json("k", serde_json::json!({"count": "three"}))
            .await
            .expect("set");
        assert!(matches!(
            load::<Sample>(&store, "k").await,
            Err(StorageError::Json(_))
        ));
    }

    #[tokio::test]
    async fn test_r2_requires_configuration() {
        let settings = AgentSettings::default();
        assert!(!R2Store::is_configured(&settings));
        assert!(matches!(
            R2Store::new(&settings).await,
            Err(StorageError::Config(_))
        ));
    }

    #[test]
    fn test_keys() {
        assert_eq!(quota_key("market", "tg:1", "2026-01-02"), "quota/market/tg:1/2026-01-02");
        assert_eq!(watches_key("tg:1"), "watches/tg:1");
        assert_eq!(gifter_daily_key("2026-01-02"), "gifter/daily/2026-01-02");
        assert_eq!(object_key("watch_owners"), "agents/watch_owners.json");
    }
}
