//! Utility functions
//!
//! Text helpers shared by skills and transports, plus the retry wrapper
//! used for transport API calls.

use crate::config::{
    TRANSPORT_API_INITIAL_BACKOFF_MS, TRANSPORT_API_MAX_BACKOFF_MS, TRANSPORT_API_MAX_RETRIES,
};
use anyhow::Result;
use std::time::Duration;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::Retry;
use tracing::warn;
use unicode_segmentation::UnicodeSegmentation;

/// Truncates a string to at most `max_chars` characters.
#[must_use]
pub fn truncate_str(s: impl AsRef<str>, max_chars: usize) -> String {
    let s = s.as_ref();
    s.char_indices()
        .nth(max_chars)
        .map_or_else(|| s.to_string(), |(pos, _)| s[..pos].to_string())
}

/// Shortens an address to `0x12345678...abcdef` form.
#[must_use]
pub fn short_address(address: &str) -> String {
    let chars: Vec<char> = address.chars().collect();
    if chars.len() <= 16 {
        return address.to_string();
    }
    let head: String = chars[..10].iter().collect();
    let tail: String = chars[chars.len() - 6..].iter().collect();
    format!("{head}...{tail}")
}

/// First 12 characters of an identifier followed by an ellipsis.
#[must_use]
pub fn short_id(id: &str) -> String {
    if id.chars().count() <= 12 {
        return id.to_string();
    }
    format!("{}...", truncate_str(id, 12))
}

/// Formats a price with precision that keeps tiny bonding-curve prices readable.
#[must_use]
pub fn format_price(price: f64) -> String {
    if price == 0.0 {
        "0".to_string()
    } else if price.abs() < 0.01 {
        format!("{price:.8}")
    } else {
        format!("{price:.4}")
    }
}

/// Formats large amounts as `1.2K` / `3.4M`.
#[must_use]
pub fn format_compact(value: f64) -> String {
    let abs = value.abs();
    if abs >= 1_000_000.0 {
        format!("{:.1}M", value / 1_000_000.0)
    } else if abs >= 1_000.0 {
        format!("{:.1}K", value / 1_000.0)
    } else {
        format!("{value:.0}")
    }
}

/// Splits a message into chunks of at most `max_length` characters.
///
/// Prefers line boundaries; falls back to grapheme boundaries for very long lines.
#[must_use]
pub fn split_long_message(message: &str, max_length: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for line in message.split_inclusive('\n') {
        let line_len = line.chars().count();
        if current_len + line_len <= max_length {
            current.push_str(line);
            current_len += line_len;
            continue;
        }
        if !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
            current_len = 0;
        }
        if line_len <= max_length {
            current.push_str(line);
            current_len = line_len;
            continue;
        }
        for grapheme in line.graphemes(true) {
            let len = grapheme.chars().count();
            if current_len + len > max_length && !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
                current_len = 0;
            }
            current.push_str(grapheme);
            current_len += len;
        }
    }

    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Retries a transport API operation with exponential backoff and jitter.
///
/// # Examples
///
/// ```no_run
/// # use launchpad_agents_core::utils::retry_transport_operation;
/// # async fn send() -> anyhow::Result<()> { Ok(()) }
/// # async fn example() -> anyhow::Result<()> {
/// retry_transport_operation(|| async { send().await }).await?;
/// # Ok(())
/// # }
/// ```
///
/// # Errors
///
/// Returns the last error once all retries are exhausted.
pub async fn retry_transport_operation<F, Fut, T>(operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let retry_strategy = ExponentialBackoff::from_millis(TRANSPORT_API_INITIAL_BACKOFF_MS)
        .max_delay(Duration::from_millis(TRANSPORT_API_MAX_BACKOFF_MS))
        .map(jitter)
        .take(TRANSPORT_API_MAX_RETRIES);

    Retry::spawn(retry_strategy, operation).await.map_err(|e| {
        warn!(
            "Transport API operation failed after {} attempts: {}",
            TRANSPORT_API_MAX_RETRIES, e
        );
        e
    })
}
