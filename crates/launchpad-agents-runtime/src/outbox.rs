use anyhow::Result;
use async_trait::async_trait;
use launchpad_agents_core::reply::OutboundMessage;

/// Message received from a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Transport-qualified sender id, also used as the reply address.
    pub sender: String,
    /// Raw message text.
    pub text: String,
    /// Transport message id, echoed in the acknowledgement.
    pub msg_id: String,
}

impl InboundMessage {
    /// Build an inbound message.
    pub fn new(
        sender: impl Into<String>,
        text: impl Into<String>,
        msg_id: impl Into<String>,
    ) -> Self {
        Self {
            sender: sender.into(),
            text: text.into(),
            msg_id: msg_id.into(),
        }
    }
}

/// Transport adapter used by the runtime to reach senders.
#[async_trait]
pub trait Outbox: Send + Sync + 'static {
    /// Deliver one message to `recipient`.
    async fn send(&self, recipient: &str, message: OutboundMessage) -> Result<()>;
}
