//! Telegram transport settings.

use config::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Telegram transport settings loaded from environment variables.
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct TelegramSettings {
    /// Telegram Bot API token.
    pub telegram_token: String,
    /// Comma-separated list of user IDs allowed to talk to the skill.
    /// Unset or empty means everyone is allowed.
    #[serde(rename = "allowed_users")]
    pub allowed_users_str: Option<String>,
}

impl TelegramSettings {
    /// Create new settings by loading from environment and files.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if loading fails or `TELEGRAM_TOKEN` is missing.
    pub fn new() -> Result<Self, ConfigError> {
        launchpad_agents_core::config::build_config()?.try_deserialize()
    }

    /// Returns the set of allowed user IDs.
    #[must_use]
    pub fn allowed_users(&self) -> HashSet<i64> {
        self.allowed_users_str
            .as_ref()
            .map(|s| {
                s.split(|c: char| c == ',' || c == ';' || c.is_whitespace())
                    .filter(|token| !token.is_empty())
                    .filter_map(|id| id.parse::<i64>().ok())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Whether `user_id` may use the bot.
    #[must_use]
    pub fn is_allowed(&self, user_id: i64) -> bool {
        let allowed = self.allowed_users();
        allowed.is_empty() || allowed.contains(&user_id)
    }
}

/// Cooldown period (seconds) between denial messages for the same user.
/// Default: 20 minutes.
pub const REJECTION_COOLDOWN_SECS: u64 = 1200;
/// Maximum number of users tracked by the rejection cache.
pub const REJECTION_CACHE_MAX_SIZE: u64 = 10_000;
/// Longest text sent in one Telegram message.
pub const MAX_MESSAGE_CHARS: usize = 4000;
/// Bot API limit on one message, markup included.
pub const TELEGRAM_MESSAGE_LIMIT: usize = 4096;

/// Get the rejection cooldown from env or default.
///
/// Environment variable: `REJECTION_COOLDOWN_SECS`.
#[must_use]
pub fn get_rejection_cooldown() -> u64 {
    std::env::var("REJECTION_COOLDOWN_SECS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(REJECTION_COOLDOWN_SECS)
}

/// Get the rejection cache size from env or default.
///
/// Environment variable: `REJECTION_CACHE_MAX_SIZE`.
#[must_use]
pub fn get_rejection_cache_max_size() -> u64 {
    std::env::var("REJECTION_CACHE_MAX_SIZE")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(REJECTION_CACHE_MAX_SIZE)
}
