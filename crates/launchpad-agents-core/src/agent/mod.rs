//! Skill contract
//!
//! A skill turns one gated [`Turn`] into a [`Reply`]. It never talks to the
//! transport directly: replies and extra [`Notification`]s are delivered by
//! the runtime, which also owns acknowledgement, rate gating and error
//! recovery.

/// Shared service container
pub mod services;

pub use services::Services;

use crate::chain::ChainError;
use crate::storage::StorageError;
use crate::upstream::UpstreamError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Static description of a skill
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SkillProfile {
    /// Stable id used in storage keys and `AGENT_SKILL`
    pub id: &'static str,
    /// Display name
    pub name: &'static str,
    /// Semantic version
    pub version: &'static str,
    /// One-line description
    pub description: &'static str,
    /// Command lines shown by `help`
    pub commands: &'static [&'static str],
}

/// One inbound message that passed the rate gate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    /// Transport-qualified sender id
    pub sender: String,
    /// Trimmed message text
    pub text: String,
    /// When the message was received
    pub received_at: DateTime<Utc>,
}

impl Turn {
    /// Build a turn
    #[must_use]
    pub fn new(sender: impl Into<String>, text: impl Into<String>, received_at: DateTime<Utc>) -> Self {
        Self {
            sender: sender.into(),
            text: text.into(),
            received_at,
        }
    }
}

/// Message for someone other than the current sender
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// Recipient id
    pub recipient: String,
    /// Message text
    pub text: String,
    /// Whether the message ends the recipient's session
    pub end_session: bool,
}

/// Answer to a turn
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// Text sent back to the sender
    pub text: String,
    /// Whether the conversation is complete
    pub end_session: bool,
    /// Extra messages delivered after the reply
    pub notifications: Vec<Notification>,
}

impl Reply {
    /// Reply that keeps the session open
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            end_session: false,
            notifications: Vec::new(),
        }
    }

    /// Reply that ends the session
    #[must_use]
    pub fn ending(text: impl Into<String>) -> Self {
        Self {
            end_session: true,
            ..Self::text(text)
        }
    }

    /// Attach a notification
    #[must_use]
    pub fn with_notification(mut self, notification: Notification) -> Self {
        self.notifications.push(notification);
        self
    }
}

/// Failure a skill could not turn into a user-facing answer itself
#[derive(Error, Debug)]
pub enum SkillError {
    /// External API failure
    #[error("Upstream error: {0}")]
    Upstream(#[from] UpstreamError),
    /// Key-value store failure
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
    /// Chain RPC failure
    #[error("Chain error: {0}")]
    Chain(#[from] ChainError),
    /// Anything else
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A conversational skill
#[async_trait]
pub trait Skill: Send + Sync {
    /// Static description
    fn profile(&self) -> &SkillProfile;

    /// Answer one turn
    async fn handle(&self, turn: &Turn) -> Result<Reply, SkillError>;

    /// Periodic background check; most skills have none
    async fn sweep(&self) -> Result<Vec<Notification>, SkillError> {
        Ok(Vec::new())
    }
}
