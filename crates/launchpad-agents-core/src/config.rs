//! Configuration and settings management
//!
//! Loads settings from config files and environment variables and defines
//! the tunable limits shared by every skill.

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

/// Agent settings loaded from config files and environment variables
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AgentSettings {
    /// Skill served by this process (`watchlist`, `market`, `analyst`, `content`, `gifter`)
    #[serde(default = "default_agent_skill")]
    pub agent_skill: String,
    /// Base URL of the token-launch REST API
    #[serde(default = "default_launch_api_url")]
    pub agent_launch_api_url: String,
    /// API key sent as `X-API-Key` to the launch API
    pub agent_launch_api_key: Option<String>,
    /// Frontend base URL used to build handoff links
    #[serde(default = "default_launch_frontend_url")]
    pub agent_launch_frontend_url: String,

    /// Base URL of the inference API
    #[serde(default = "default_inference_api_url")]
    pub inference_api_url: String,
    /// Model identifier appended to `/models/`
    #[serde(default = "default_inference_model")]
    pub inference_model: String,
    /// `HuggingFace` API key
    pub huggingface_api_key: Option<String>,

    /// Address the skill tokenizes itself under
    pub agent_address: Option<String>,
    /// Sender id allowed to run owner-only commands
    pub agent_owner: Option<String>,
    /// Ticker shown in upgrade hints (e.g. `$WATCH`)
    #[serde(default = "default_agent_ticker")]
    pub agent_ticker: String,
    /// Token whose holders get the premium tier
    pub premium_token_address: Option<String>,
    /// Minimum balance of the premium token for the premium tier
    #[serde(default = "default_premium_token_threshold")]
    pub premium_token_threshold: f64,

    /// JSON-RPC endpoint of the chain node
    pub chain_rpc_url: Option<String>,
    /// Chain id used for transfers and tokenization
    #[serde(default = "default_chain_id")]
    pub chain_id: u64,
    /// Treasury account managed by the node signer
    pub treasury_address: Option<String>,
    /// ERC-20 contract distributed by the faucet
    pub gift_token_address: Option<String>,

    /// R2 Storage access key ID
    pub r2_access_key_id: Option<String>,
    /// R2 Storage secret access key
    pub r2_secret_access_key: Option<String>,
    /// R2 Storage endpoint URL
    pub r2_endpoint_url: Option<String>,
    /// R2 Storage bucket name
    pub r2_bucket_name: Option<String>,
}

fn default_agent_skill() -> String {
    "watchlist".to_string()
}

fn default_launch_api_url() -> String {
    "https://agent-launch.ai/api".to_string()
}

fn default_launch_frontend_url() -> String {
    "https://agent-launch.ai".to_string()
}

fn default_inference_api_url() -> String {
    "https://api-inference.huggingface.co".to_string()
}

fn default_inference_model() -> String {
    "mistralai/Mistral-7B-Instruct-v0.2".to_string()
}

fn default_agent_ticker() -> String {
    "$AGENT".to_string()
}

const fn default_premium_token_threshold() -> f64 {
    1000.0
}

const fn default_chain_id() -> u64 {
    97
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            agent_skill: default_agent_skill(),
            agent_launch_api_url: default_launch_api_url(),
            agent_launch_api_key: None,
            agent_launch_frontend_url: default_launch_frontend_url(),
            inference_api_url: default_inference_api_url(),
            inference_model: default_inference_model(),
            huggingface_api_key: None,
            agent_address: None,
            agent_owner: None,
            agent_ticker: default_agent_ticker(),
            premium_token_address: None,
            premium_token_threshold: default_premium_token_threshold(),
            chain_rpc_url: None,
            chain_id: default_chain_id(),
            treasury_address: None,
            gift_token_address: None,
            r2_access_key_id: None,
            r2_secret_access_key: None,
            r2_endpoint_url: None,
            r2_bucket_name: None,
        }
    }
}

/// Build the layered configuration shared by all settings structs.
///
/// Sources, later ones winning: `config/default`, `config/{RUN_MODE}`,
/// `config/local`, `APP__`-prefixed env vars, plain env vars.
///
/// # Errors
///
/// Returns a `ConfigError` if a source cannot be read.
pub fn build_config() -> Result<Config, ConfigError> {
    let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

    Config::builder()
        .add_source(File::with_name("config/default").required(false))
        .add_source(File::with_name(&format!("config/{run_mode}")).required(false))
        // Not checked into git
        .add_source(File::with_name("config/local").required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        // UPPER_SNAKE_CASE maps to snake_case; empty vars count as unset
        .add_source(Environment::default().ignore_empty(true))
        .build()
}

impl AgentSettings {
    /// Create new settings by loading from environment and files
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if loading fails.
    pub fn new() -> Result<Self, ConfigError> {
        build_config()?.try_deserialize()
    }

    /// Returns `true` when the sender may run owner-only commands.
    #[must_use]
    pub fn is_owner(&self, sender: &str) -> bool {
        self.agent_owner
            .as_deref()
            .is_some_and(|owner| !owner.is_empty() && owner == sender)
    }

    /// Returns the handoff link for a created token.
    #[must_use]
    pub fn handoff_link(&self, token_id: &str) -> String {
        format!(
            "{}/deploy/{token_id}",
            self.agent_launch_frontend_url.trim_end_matches('/')
        )
    }
}

// Gate configuration
/// Messages accepted per sender per rolling minute
pub const RATE_LIMIT_PER_MINUTE: usize = 20;
/// Maximum accepted message length in characters
pub const MAX_INPUT_CHARS: usize = 2000;
/// Seconds a premium/free tier decision is cached
pub const TIER_CACHE_TTL_SECS: u64 = 300;

// Cache configuration
/// Maximum entries held by a response cache
pub const RESPONSE_CACHE_MAX_SIZE: usize = 1000;
/// Default TTL for cached responses
pub const RESPONSE_CACHE_TTL_SECS: u64 = 300;

// Upstream configuration
/// Timeout for market-data requests
pub const UPSTREAM_HTTP_TIMEOUT_SECS: u64 = 10;
/// Timeout for inference requests
pub const INFERENCE_HTTP_TIMEOUT_SECS: u64 = 30;
/// Maximum tokens generated per completion
pub const INFERENCE_MAX_NEW_TOKENS: u32 = 500;
/// Sampling temperature for completions
pub const INFERENCE_TEMPERATURE: f64 = 0.7;

// Background tasks
/// Interval between watchlist sweeps
pub const SWEEP_INTERVAL_SECS: u64 = 300;
/// Interval between health log lines
pub const HEALTH_LOG_INTERVAL_SECS: u64 = 3600;

// Transport retry configuration
/// Maximum retries for transport API calls
pub const TRANSPORT_API_MAX_RETRIES: usize = 3;
/// Initial backoff for transport retries
pub const TRANSPORT_API_INITIAL_BACKOFF_MS: u64 = 500;
/// Maximum backoff for transport retries
pub const TRANSPORT_API_MAX_BACKOFF_MS: u64 = 4000;

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

/// Get the per-minute rate limit from env or default.
///
/// Environment variable: `RATE_LIMIT_PER_MINUTE`.
#[must_use]
pub fn get_rate_limit_per_minute() -> usize {
    env_or("RATE_LIMIT_PER_MINUTE", RATE_LIMIT_PER_MINUTE)
}

/// Get the maximum input length from env or default.
///
/// Environment variable: `MAX_INPUT_CHARS`.
#[must_use]
pub fn get_max_input_chars() -> usize {
    env_or("MAX_INPUT_CHARS", MAX_INPUT_CHARS)
}

/// Get the upstream HTTP timeout from env or default.
///
/// Environment variable: `UPSTREAM_HTTP_TIMEOUT_SECS`.
#[must_use]
pub fn get_upstream_http_timeout_secs() -> u64 {
    env_or("UPSTREAM_HTTP_TIMEOUT_SECS", UPSTREAM_HTTP_TIMEOUT_SECS)
}

/// Get the inference HTTP timeout from env or default.
///
/// Environment variable: `INFERENCE_HTTP_TIMEOUT_SECS`.
#[must_use]
pub fn get_inference_http_timeout_secs() -> u64 {
    env_or("INFERENCE_HTTP_TIMEOUT_SECS", INFERENCE_HTTP_TIMEOUT_SECS)
}

/// Get the sweep interval from env or default.
///
/// Environment variable: `SWEEP_INTERVAL_SECS`.
#[must_use]
pub fn get_sweep_interval_secs() -> u64 {
    env_or("SWEEP_INTERVAL_SECS", SWEEP_INTERVAL_SECS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    // Single test so env mutations never race
    #[test]
    fn test_config_env_loading() -> Result<(), Box<dyn std::error::Error>> {
        env::set_var("AGENT_SKILL", "analyst");
        env::set_var("PREMIUM_TOKEN_THRESHOLD", "250");
        env::set_var("R2_ENDPOINT_URL", "");

        let settings = AgentSettings::new()?;
        assert_eq!(settings.agent_skill, "analyst");
        assert!((settings.premium_token_threshold - 250.0).abs() < f64::EPSILON);
        assert_eq!(settings.r2_endpoint_url, None);
        assert_eq!(settings.chain_id, 97);

        env::remove_var("AGENT_SKILL");
        env::remove_var("PREMIUM_TOKEN_THRESHOLD");
        env::remove_var("R2_ENDPOINT_URL");

        env::set_var("RATE_LIMIT_PER_MINUTE", "not-a-number");
        assert_eq!(get_rate_limit_per_minute(), RATE_LIMIT_PER_MINUTE);
        env::set_var("RATE_LIMIT_PER_MINUTE", "7");
        assert_eq!(get_rate_limit_per_minute(), 7);
        env::remove_var("RATE_LIMIT_PER_MINUTE");
        Ok(())
    }

    #[test]
    fn test_owner_and_handoff_link() {
        let settings = AgentSettings {
            agent_owner: Some("tg:42".to_string()),
            agent_launch_frontend_url: "https://launch.example/".to_string(),
            ..AgentSettings::default()
        };

        assert!(settings.is_owner("tg:42"));
        assert!(!settings.is_owner("tg:43"));
        assert_eq!(
            settings.handoff_link("17"),
            "https://launch.example/deploy/17"
        );

        let no_owner = AgentSettings::default();
        assert!(!no_owner.is_owner(""));
    }
}
