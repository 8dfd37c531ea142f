//! Telegram API calls wrapped in the shared transport retry policy.
//!
//! Transient failures are retried with exponential backoff and jitter via
//! [`launchpad_agents_core::utils::retry_transport_operation`].

use anyhow::Result;
use teloxide::prelude::*;
use teloxide::types::{ChatAction, ChatId, KeyboardRemove, Message, ParseMode};

/// Send a message, retrying on network failures.
///
/// `remove_keyboard` attaches a [`KeyboardRemove`] markup, which is how a
/// finished session is signalled to the client.
///
/// # Errors
///
/// Returns the last error after all retries are exhausted.
pub async fn send_message_resilient(
    bot: &Bot,
    chat_id: ChatId,
    text: impl Into<String>,
    parse_mode: Option<ParseMode>,
    remove_keyboard: bool,
) -> Result<Message> {
    let text = text.into();
    launchpad_agents_core::utils::retry_transport_operation(|| async {
        let mut req = bot.send_message(chat_id, text.clone());
        if let Some(pm) = parse_mode {
            req = req.parse_mode(pm);
        }
        if remove_keyboard {
            req = req.reply_markup(KeyboardRemove::new());
        }
        req.await
            .map_err(|e| anyhow::anyhow!("Telegram send error: {e}"))
    })
    .await
}

/// Show the "typing" indicator, retrying on network failures.
///
/// # Errors
///
/// Returns the last error after all retries are exhausted.
pub async fn send_typing_resilient(bot: &Bot, chat_id: ChatId) -> Result<()> {
    launchpad_agents_core::utils::retry_transport_operation(|| async {
        bot.send_chat_action(chat_id, ChatAction::Typing)
            .await
            .map(|_| ())
            .map_err(|e| anyhow::anyhow!("Telegram chat action error: {e}"))
    })
    .await
}
