//! External API clients
//!
//! Every call wrapper returns a typed [`UpstreamError`] so call sites can
//! tell retryable failures from permanent ones. Nothing here retries.

use thiserror::Error;

/// HTTP helpers shared by the clients
pub mod http;
/// Text-generation client and prompt cache
pub mod inference;
/// Token-launch / market-data client
pub mod launchpad;
/// Token record normalization
pub mod normalize;

pub use inference::{CachedGenerator, InferenceClient, TextGenerator};
pub use launchpad::{
    find_token, CachedMarketData, LaunchpadClient, MarketData, TokenizeRequest, TokenizeResponse,
};
pub use normalize::TokenSnapshot;

/// Failure of an external call
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UpstreamError {
    /// The request did not complete within the client timeout
    #[error("Upstream timed out")]
    Timeout,
    /// Connection failure or non-success status
    #[error("Upstream HTTP error (status: {status:?}): {message}")]
    Http {
        /// Status code, if a response was received
        status: Option<u16>,
        /// Summarized error body or transport message
        message: String,
    },
    /// The response body was not the expected JSON
    #[error("Upstream parse error: {0}")]
    Parse(String),
}

impl UpstreamError {
    /// Returns `true` for failures worth retrying later (timeouts, 429, 5xx,
    /// connection errors).
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout => true,
            Self::Http { status: None, .. } => true,
            Self::Http {
                status: Some(code), ..
            } => *code == 429 || *code >= 500,
            Self::Parse(_) => false,
        }
    }

    /// Returns `true` for a 404 response.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Http { status: Some(404), .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(UpstreamError::Timeout.is_retryable());
        assert!(UpstreamError::Http {
            status: Some(503),
            message: String::new()
        }
        .is_retryable());
        assert!(UpstreamError::Http {
            status: Some(429),
            message: String::new()
        }
        .is_retryable());
        assert!(UpstreamError::Http {
            status: None,
            message: "connection refused".into()
        }
        .is_retryable());
        assert!(!UpstreamError::Http {
            status: Some(404),
            message: String::new()
        }
        .is_retryable());
        assert!(!UpstreamError::Parse("bad".into()).is_retryable());
    }
}
