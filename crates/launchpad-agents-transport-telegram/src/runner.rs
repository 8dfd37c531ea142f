use crate::bot::resilient::send_message_resilient;
use crate::bot::RejectionCache;
use crate::config::{get_rejection_cache_max_size, get_rejection_cooldown, TelegramSettings};
use crate::outbox::sender_id;
use launchpad_agents_runtime::{AgentRuntime, InboundMessage};
use std::sync::Arc;
use teloxide::dispatching::UpdateHandler;
use teloxide::prelude::*;
use tracing::{error, info};

/// Run the Telegram dispatcher until Ctrl-C.
///
/// Text messages from allowed users go to [`AgentRuntime::handle_inbound`];
/// everyone else gets one denial per cooldown.
pub async fn run_bot(bot: Bot, settings: Arc<TelegramSettings>, runtime: Arc<AgentRuntime>) {
    let rejections = init_rejection_cache();
    let handler = setup_handler();

    info!(skill = runtime.skill().profile().id, "Bot is running...");

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![settings, runtime, rejections])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;
}

fn init_rejection_cache() -> Arc<RejectionCache> {
    let cooldown = get_rejection_cooldown();
    let max_size = get_rejection_cache_max_size();
    info!(cooldown, max_size, "Initializing RejectionCache");
    Arc::new(RejectionCache::new(cooldown, max_size))
}

fn user_id(msg: &Message) -> i64 {
    msg.from.as_ref().map_or(0, |u| u.id.0.cast_signed())
}

fn setup_handler() -> UpdateHandler<teloxide::RequestError> {
    dptree::entry()
        .branch(
            Update::filter_message()
                .filter(|msg: Message, settings: Arc<TelegramSettings>| {
                    settings.is_allowed(user_id(&msg))
                })
                .filter(|msg: Message| msg.text().is_some())
                .endpoint(handle_text),
        )
        .branch(
            Update::filter_message()
                .filter(|msg: Message, settings: Arc<TelegramSettings>| {
                    settings.is_allowed(user_id(&msg))
                })
                .endpoint(handle_unsupported),
        )
        .branch(Update::filter_message().endpoint(handle_rejected))
}

/// Maps bot commands onto skill phrases: `/start` becomes `help`, other
/// commands lose the slash and any `@botname` suffix.
#[must_use]
pub fn normalize_command(text: &str) -> String {
    let trimmed = text.trim();
    let Some(command) = trimmed.strip_prefix('/') else {
        return trimmed.to_string();
    };
    let (head, rest) = command.split_once(char::is_whitespace).unwrap_or((command, ""));
    let name = head.split('@').next().unwrap_or(head);
    let name = if name.eq_ignore_ascii_case("start") {
        "help"
    } else {
        name
    };
    format!("{name} {}", rest.trim()).trim_end().to_string()
}

async fn handle_text(msg: Message, runtime: Arc<AgentRuntime>) -> Result<(), teloxide::RequestError> {
    if let Some(text) = msg.text() {
        let inbound = InboundMessage::new(
            sender_id(msg.chat.id),
            normalize_command(text),
            msg.id.0.to_string(),
        );
        runtime.handle_inbound(inbound).await;
    }
    respond(())
}

async fn handle_unsupported(bot: Bot, msg: Message) -> Result<(), teloxide::RequestError> {
    if let Err(e) = send_message_resilient(
        &bot,
        msg.chat.id,
        "I only understand text messages. Say 'help' to see what I can do.",
        None,
        false,
    )
    .await
    {
        error!(chat_id = msg.chat.id.0, error = %e, "Failed to answer non-text message");
    }
    respond(())
}

async fn handle_rejected(
    bot: Bot,
    msg: Message,
    cache: Arc<RejectionCache>,
) -> Result<(), teloxide::RequestError> {
    let user_id = user_id(&msg);
    if cache.should_send(user_id).await {
        info!(user_id, "Rejected sender, sending denial");
        if let Err(e) = bot.send_message(msg.chat.id, "Access denied").await {
            error!(user_id, error = %e, "Failed to send denial");
        } else {
            cache.mark_sent(user_id).await;
        }
    }
    respond(())
}

#[cfg(test)]
mod tests {
    use super::normalize_command;

    #[test]
    fn test_normalize_command() {
        assert_eq!(normalize_command("/start"), "help");
        assert_eq!(normalize_command("/price@LaunchBot  ALP "), "price ALP");
        assert_eq!(normalize_command("/rank 5"), "rank 5");
        assert_eq!(normalize_command("  watch $FET above 1 "), "watch $FET above 1");
    }
}
