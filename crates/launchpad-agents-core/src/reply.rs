//! Outbound message formatting
//!
//! Transport-neutral envelopes: every inbound message is acknowledged with an
//! [`OutboundMessage::Ack`], and every answer is an [`OutboundMessage::Chat`]
//! whose content optionally ends with [`ChatContent::EndSession`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One item of chat content
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "text", rename_all = "snake_case")]
pub enum ChatContent {
    /// Plain text
    Text(String),
    /// Marks the logical conversation as finished
    EndSession,
}

/// Message handed to the transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OutboundMessage {
    /// Receipt for an inbound message
    Ack {
        /// Id of the acknowledged inbound message
        acknowledged_msg_id: String,
        /// When the acknowledgement was produced
        timestamp: DateTime<Utc>,
    },
    /// Answer or notification
    Chat {
        /// Fresh message id
        msg_id: Uuid,
        /// When the message was produced
        timestamp: DateTime<Utc>,
        /// Ordered content items
        content: Vec<ChatContent>,
    },
}

/// Acknowledge inbound message `msg_id`.
#[must_use]
pub fn acknowledge(msg_id: &str, at: DateTime<Utc>) -> OutboundMessage {
    OutboundMessage::Ack {
        acknowledged_msg_id: msg_id.to_string(),
        timestamp: at,
    }
}

/// Build a chat message stamped with the current time.
#[must_use]
pub fn render(text: &str, end_session: bool) -> OutboundMessage {
    render_at(text, end_session, Utc::now())
}

/// Build a chat message stamped with `at`; `end_session` appends the
/// session-termination marker.
#[must_use]
pub fn render_at(text: &str, end_session: bool, at: DateTime<Utc>) -> OutboundMessage {
    let mut content = vec![ChatContent::Text(text.to_string())];
    if end_session {
        content.push(ChatContent::EndSession);
    }
    OutboundMessage::Chat {
        msg_id: Uuid::new_v4(),
        timestamp: at,
        content,
    }
}

impl OutboundMessage {
    /// Concatenated text content; empty for acknowledgements
    #[must_use]
    pub fn text(&self) -> String {
        match self {
            Self::Ack { .. } => String::new(),
            Self::Chat { content, .. } => content
                .iter()
                .filter_map(|c| match c {
                    ChatContent::Text(text) => Some(text.as_str()),
                    ChatContent::EndSession => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }

    /// Returns `true` when the message ends the session
    #[must_use]
    pub fn ends_session(&self) -> bool {
        matches!(self, Self::Chat { content, .. } if content.contains(&ChatContent::EndSession))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_end_session_marker() {
        let open = render("hello", false);
        assert_eq!(open.text(), "hello");
        assert!(!open.ends_session());

        let closed = render("bye", true);
        assert_eq!(closed.text(), "bye");
        assert!(closed.ends_session());
        match closed {
            OutboundMessage::Chat { content, .. } => {
                assert_eq!(content.last(), Some(&ChatContent::EndSession));
            }
            OutboundMessage::Ack { .. } => panic!("expected chat message"),
        }
    }

    #[test]
    fn test_acknowledge() {
        let at = Utc::now();
        let ack = acknowledge("msg-1", at);
        assert_eq!(
            ack,
            OutboundMessage::Ack {
                acknowledged_msg_id: "msg-1".to_string(),
                timestamp: at,
            }
        );
        assert!(ack.text().is_empty());
        assert!(!ack.ends_session());
    }

    #[test]
    fn test_fresh_message_ids() {
        let at = Utc::now();
        let (a, b) = (render_at("x", false, at), render_at("x", false, at));
        assert_ne!(a, b);
    }
}
