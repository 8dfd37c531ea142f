//! Delivery of runtime messages over the Bot API.
//!
//! Recipients are `tg:{chat_id}`. Acknowledgements become a typing
//! indicator, chat text is split into Telegram-sized chunks and a finished
//! session removes the reply keyboard on the last chunk.

use crate::bot::resilient::{send_message_resilient, send_typing_resilient};
use crate::config::{MAX_MESSAGE_CHARS, TELEGRAM_MESSAGE_LIMIT};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use launchpad_agents_core::reply::OutboundMessage;
use launchpad_agents_core::utils::split_long_message;
use launchpad_agents_runtime::Outbox;
use lazy_regex::regex_replace_all;
use teloxide::prelude::*;
use teloxide::types::{ChatId, ParseMode};

const SENDER_PREFIX: &str = "tg:";

/// Sender id for a Telegram chat
#[must_use]
pub fn sender_id(chat_id: ChatId) -> String {
    format!("{SENDER_PREFIX}{}", chat_id.0)
}

/// Chat a sender id refers to; `None` for non-Telegram recipients
#[must_use]
pub fn chat_id_for(recipient: &str) -> Option<ChatId> {
    recipient
        .strip_prefix(SENDER_PREFIX)
        .and_then(|id| id.parse::<i64>().ok())
        .map(ChatId)
}

/// Converts skill markup (`**bold**`, `` `code` ``) to Telegram HTML.
#[must_use]
pub fn to_telegram_html(text: &str) -> String {
    let escaped = html_escape::encode_text(text);
    let bold = regex_replace_all!(r"\*\*([^*\n]+)\*\*", &escaped, "<b>$1</b>");
    regex_replace_all!(r"`([^`\n]+)`", &bold, "<code>$1</code>").into_owned()
}

/// Splits `text` into Telegram HTML messages of at most
/// [`TELEGRAM_MESSAGE_LIMIT`] characters.
///
/// Chunks are cut from the plain text, so tags and entities stay whole. A
/// chunk that grows past the limit once escaped is cut again at half size.
#[must_use]
pub fn html_chunks(text: &str) -> Vec<String> {
    let mut chunks = Vec::new();
    push_html_chunks(text, MAX_MESSAGE_CHARS, &mut chunks);
    chunks
}

fn push_html_chunks(text: &str, max_chars: usize, out: &mut Vec<String>) {
    for chunk in split_long_message(text, max_chars) {
        let html = to_telegram_html(&chunk);
        if max_chars <= 1 || html.chars().count() <= TELEGRAM_MESSAGE_LIMIT {
            out.push(html);
        } else {
            push_html_chunks(&chunk, max_chars / 2, out);
        }
    }
}

/// [`Outbox`] backed by a teloxide [`Bot`]
#[derive(Clone)]
pub struct TelegramOutbox {
    bot: Bot,
}

impl TelegramOutbox {
    /// Wrap a bot handle
    #[must_use]
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

#[async_trait]
impl Outbox for TelegramOutbox {
    async fn send(&self, recipient: &str, message: OutboundMessage) -> Result<()> {
        let chat_id = chat_id_for(recipient)
            .ok_or_else(|| anyhow!("Recipient {recipient} is not reachable over Telegram"))?;

        if matches!(message, OutboundMessage::Ack { .. }) {
            return send_typing_resilient(&self.bot, chat_id).await;
        }

        let end_session = message.ends_session();
        let chunks = html_chunks(&message.text());
        let last = chunks.len().saturating_sub(1);
        for (i, chunk) in chunks.into_iter().enumerate() {
            send_message_resilient(
                &self.bot,
                chat_id,
                chunk,
                Some(ParseMode::Html),
                end_session && i == last,
            )
            .await?;
        }
        Ok(())
    }
}
