//! Resilient messaging utilities with automatic retry for Telegram API
//! operations.
//!
//! Wrappers around send/edit that retry on transient network failures using
//! exponential backoff with jitter, and degrade gracefully on the expected
//! edit errors ("message is not modified", "message to edit not found").

use anyhow::Result;
use teloxide::prelude::*;
use teloxide::types::{ChatId, Message, MessageId, ParseMode};
use tracing::{debug, warn};

/// Send a message with automatic retry on network failures.
///
/// # Errors
///
/// Returns an error after all retries are exhausted.
pub async fn send_message_resilient(
    bot: &Bot,
    chat_id: ChatId,
    text: impl Into<String>,
    parse_mode: Option<ParseMode>,
) -> Result<Message> {
    let text = text.into();
    crate::utils::retry_telegram_operation(|| async {
        let mut req = bot.send_message(chat_id, text.clone());
        if let Some(pm) = parse_mode {
            req = req.parse_mode(pm);
        }
        req.await
            .map_err(|e| anyhow::anyhow!("Telegram send error: {e}"))
    })
    .await
}

/// Edit a message with automatic retry on network failures.
///
/// # Errors
///
/// Returns an error after all retries are exhausted.
pub async fn edit_message_resilient(
    bot: &Bot,
    chat_id: ChatId,
    msg_id: MessageId,
    text: impl Into<String>,
    parse_mode: Option<ParseMode>,
) -> Result<Message> {
    let text = text.into();
    crate::utils::retry_telegram_operation(|| async {
        let mut req = bot.edit_message_text(chat_id, msg_id, text.clone());
        if let Some(pm) = parse_mode {
            req = req.parse_mode(pm);
        }
        req.await
            .map_err(|e| anyhow::anyhow!("Telegram edit error: {e}"))
    })
    .await
}

/// Edit a status message with graceful degradation and automatic retry.
///
/// Truncates overlong text, retries transient errors, and treats
/// "not modified" / "not found" as a skipped update rather than a failure.
/// Returns whether the edit went through.
pub async fn edit_message_safe_resilient(
    bot: &Bot,
    chat_id: ChatId,
    msg_id: MessageId,
    text: &str,
) -> bool {
    const ERROR_NOT_MODIFIED: &str = "message is not modified";
    const ERROR_NOT_FOUND: &str = "message to edit not found";

    // Telegram's limit is 4096; 4000 leaves headroom for HTML tags.
    let truncated = if text.chars().count() > 4000 {
        format!("{}...", crate::utils::truncate_str(text, 4000))
    } else {
        text.to_string()
    };

    match edit_message_resilient(bot, chat_id, msg_id, truncated, Some(ParseMode::Html)).await {
        Ok(_) => true,
        Err(e) => {
            let err_msg = e.to_string();
            if err_msg.contains(ERROR_NOT_MODIFIED) || err_msg.contains(ERROR_NOT_FOUND) {
                debug!("Status update skipped: {err_msg}");
            } else {
                warn!("Failed to edit status message after retries: {e}");
            }
            false
        }
    }
}
