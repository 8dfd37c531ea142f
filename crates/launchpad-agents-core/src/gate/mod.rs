//! Rate, quota and tier gating
//!
//! [`RateGate`] runs before intent classification on every message.
//! [`QuotaTracker`] runs after classification and only for metered intents,
//! with limits that depend on the sender's [`Tier`].

/// Per-sender daily quota
pub mod quota;
/// Sliding-window rate limit and input validation
pub mod rate_limit;
/// Premium tier resolution
pub mod tier;

pub use quota::{QuotaError, QuotaLimits, QuotaTracker, QuotaUsage};
pub use rate_limit::RateGate;
pub use tier::TierResolver;

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Access level derived from the sender's premium-token balance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// Default access
    Free,
    /// Holds at least the premium threshold
    Premium,
}

impl Tier {
    /// Returns `true` for [`Tier::Premium`]
    #[must_use]
    pub const fn is_premium(self) -> bool {
        matches!(self, Self::Premium)
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Free => f.write_str("free"),
            Self::Premium => f.write_str("premium"),
        }
    }
}

/// Rejection by the rate gate; the message is shown to the sender as is
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GateError {
    /// Too many messages in the trailing window
    #[error("Rate limit exceeded. Please wait a moment.")]
    RateLimited,
    /// Blank message
    #[error("Empty message.")]
    Empty,
    /// Message longer than the configured maximum
    #[error("Message too long (max {max} chars).")]
    TooLong {
        /// Maximum accepted length in characters
        max: usize,
    },
}
