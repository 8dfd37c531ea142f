#![deny(missing_docs)]
//! Telegram transport adapter for the launchpad agents.

/// Telegram-specific helpers (retrying sends, rejection cache).
pub mod bot;
/// Telegram transport configuration.
pub mod config;
/// `Outbox` implementation over the Bot API.
pub mod outbox;
/// Telegram runtime entrypoint.
pub mod runner;

pub use bot::RejectionCache;
pub use outbox::TelegramOutbox;
