//! Telegram-backed upload sink and progress reporter.

use crate::bot::resilient::edit_message_safe_resilient;
use crate::relay::{ProgressReporter, TransferPhase, UploadSink};
use crate::utils::format_size;
use async_trait::async_trait;
use std::path::Path;
use teloxide::prelude::*;
use teloxide::types::{ChatId, InputFile, MessageId};

/// Delivers staged files to a chat via `send_document`.
pub struct TelegramUploadSink {
    bot: Bot,
    chat_id: ChatId,
}

impl TelegramUploadSink {
    /// Create a sink bound to one chat.
    #[must_use]
    pub const fn new(bot: Bot, chat_id: ChatId) -> Self {
        Self { bot, chat_id }
    }
}

#[async_trait]
impl UploadSink for TelegramUploadSink {
    async fn upload(&self, filename: &str, path: &Path, caption: &str) -> anyhow::Result<()> {
        let document = InputFile::file(path.to_path_buf()).file_name(filename.to_string());
        self.bot
            .send_document(self.chat_id, document)
            .caption(caption.to_string())
            .await?;
        Ok(())
    }
}

/// Reports transfer progress by editing one status message in place.
///
/// Edits go through the resilient helper, which bounds retry latency and
/// swallows "not modified", so a slow status channel cannot stall the
/// transfer loop.
pub struct TelegramProgress {
    bot: Bot,
    chat_id: ChatId,
    status_msg_id: MessageId,
    filename: String,
}

impl TelegramProgress {
    /// Bind progress reporting to an existing status message.
    #[must_use]
    pub const fn new(bot: Bot, chat_id: ChatId, status_msg_id: MessageId, filename: String) -> Self {
        Self {
            bot,
            chat_id,
            status_msg_id,
            filename,
        }
    }
}

#[async_trait]
impl ProgressReporter for TelegramProgress {
    async fn report(&self, phase: TransferPhase, bytes_transferred: u64, total_bytes: u64) {
        let name = html_escape::encode_text(&self.filename);
        let text = match phase {
            TransferPhase::Downloading => {
                let amount = if total_bytes > 0 {
                    format!(
                        "{} / {}",
                        format_size(bytes_transferred),
                        format_size(total_bytes)
                    )
                } else {
                    format_size(bytes_transferred)
                };
                format!("⬇️ Downloading <b>{name}</b>…\n{amount}")
            }
            TransferPhase::Uploading => {
                format!(
                    "📤 Uploading <b>{name}</b> ({}) to Telegram…",
                    format_size(bytes_transferred)
                )
            }
            _ => return,
        };

        edit_message_safe_resilient(&self.bot, self.chat_id, self.status_msg_id, &text).await;
    }
}
