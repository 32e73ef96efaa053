//! Command and message routing.
//!
//! Thin glue: maps inbound text (commands or bare share links) to a
//! resolve+relay invocation. All resolution and relay errors are turned into
//! user-visible status edits here; nothing from a single request may crash
//! the dispatcher.

use crate::bot::resilient::{edit_message_safe_resilient, send_message_resilient};
use crate::bot::sink::{TelegramProgress, TelegramUploadSink};
use crate::relay::RelayPipeline;
use crate::resolver::{LinkResolver, ResolveError};
use anyhow::Result;
use std::sync::Arc;
use teloxide::prelude::*;
use teloxide::types::{ParseMode, Update, UpdateKind};
use teloxide::utils::command::BotCommands;
use tracing::{debug, error, info};

/// Substrings identifying a share link in a plain text message.
const LINK_MARKERS: &[&str] = &["terabox", "1024tera"];

/// Supported bot commands.
#[derive(BotCommands, Clone, Debug, PartialEq, Eq)]
#[command(rename_rule = "lowercase")]
pub enum Command {
    /// Show the welcome message
    Start,
    /// Relay the file behind a share link
    Leech(String),
}

/// Routes inbound updates to the resolver and relay pipeline.
///
/// Holds only shared read-only services; each update is handled on its own
/// task, so one slow relay never blocks the others.
pub struct RequestDispatcher {
    bot: Bot,
    resolver: Arc<LinkResolver>,
    pipeline: Arc<RelayPipeline>,
    bot_username: String,
}

impl RequestDispatcher {
    /// Create a dispatcher over shared resolver and pipeline services.
    #[must_use]
    pub const fn new(
        bot: Bot,
        resolver: Arc<LinkResolver>,
        pipeline: Arc<RelayPipeline>,
        bot_username: String,
    ) -> Self {
        Self {
            bot,
            resolver,
            pipeline,
            bot_username,
        }
    }

    /// Handle one inbound update. Errors are logged, never propagated.
    pub async fn handle_update(&self, update: Update) {
        let UpdateKind::Message(msg) = update.kind else {
            return;
        };
        if let Err(e) = self.handle_message(msg).await {
            error!("Message handler error: {e}");
        }
    }

    async fn handle_message(&self, msg: Message) -> Result<()> {
        let Some(text) = msg.text() else {
            return Ok(());
        };

        if let Ok(cmd) = Command::parse(text, self.bot_username.as_str()) {
            return self.handle_command(&msg, cmd).await;
        }

        let lowered = text.to_lowercase();
        if LINK_MARKERS.iter().any(|m| lowered.contains(m)) {
            return self.process_link(&msg, text).await;
        }

        debug!(chat_id = %msg.chat.id, "Ignoring message without share link");
        Ok(())
    }

    async fn handle_command(&self, msg: &Message, cmd: Command) -> Result<()> {
        match cmd {
            Command::Start => {
                let welcome = "🤖 <b>TeraBox Leech Bot</b>\n\n\
                    Send me a TeraBox link and I'll download it for you!\n\
                    You can also use /leech [url].";
                send_message_resilient(&self.bot, msg.chat.id, welcome, Some(ParseMode::Html))
                    .await?;
            }
            Command::Leech(url) => {
                let url = url.trim();
                if url.is_empty() {
                    send_message_resilient(
                        &self.bot,
                        msg.chat.id,
                        "❌ Please provide a TeraBox link.\nUsage: /leech [your_terabox_link]",
                        None,
                    )
                    .await?;
                    return Ok(());
                }
                self.process_link(msg, url).await?;
            }
        }
        Ok(())
    }

    /// Resolve a share link and relay the file, narrating every phase on a
    /// single status message.
    async fn process_link(&self, msg: &Message, link: &str) -> Result<()> {
        let chat_id = msg.chat.id;
        info!(chat_id = %chat_id, "Processing share link");

        let status = send_message_resilient(
            &self.bot,
            chat_id,
            "🔄 Processing your TeraBox link...",
            None,
        )
        .await?;

        let descriptor = match self.resolver.resolve(link).await {
            Ok(d) => d,
            Err(e) => {
                let message = e.to_string();
                let detail = html_escape::encode_text(&message);
                let prefix = match e {
                    ResolveError::Network(_) => "❌ Could not reach the resolver",
                    ResolveError::UpstreamRejected(_) => "❌ Failed to get direct link",
                };
                edit_message_safe_resilient(
                    &self.bot,
                    chat_id,
                    status.id,
                    &format!("{prefix}:\n<code>{detail}</code>"),
                )
                .await;
                return Ok(());
            }
        };

        let info_text = format!(
            "<b>File Name:</b> <code>{}</code>\n<b>Status:</b> Starting download...",
            html_escape::encode_text(&descriptor.filename)
        );
        edit_message_safe_resilient(&self.bot, chat_id, status.id, &info_text).await;

        let progress = TelegramProgress::new(
            self.bot.clone(),
            chat_id,
            status.id,
            descriptor.filename.clone(),
        );
        let sink = TelegramUploadSink::new(self.bot.clone(), chat_id);

        match self.pipeline.relay(&descriptor, &progress, &sink).await {
            Ok(outcome) => {
                info!(
                    chat_id = %chat_id,
                    bytes = outcome.bytes_transferred,
                    "Relay delivered"
                );
                edit_message_safe_resilient(
                    &self.bot,
                    chat_id,
                    status.id,
                    "✅ Download completed successfully!",
                )
                .await;
            }
            Err(e) => {
                let message = e.to_string();
                let detail = html_escape::encode_text(&message);
                edit_message_safe_resilient(
                    &self.bot,
                    chat_id,
                    status.id,
                    &format!("❌ <code>{detail}</code>"),
                )
                .await;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_parsing() {
        assert!(matches!(
            Command::parse("/start", "leechbot"),
            Ok(Command::Start)
        ));
        match Command::parse("/leech https://terabox.com/s/abc", "leechbot") {
            Ok(Command::Leech(url)) => assert_eq!(url, "https://terabox.com/s/abc"),
            other => panic!("unexpected parse result: {other:?}"),
        }
        assert!(Command::parse("hello", "leechbot").is_err());
    }

    #[test]
    fn test_link_markers_are_case_insensitive() {
        let detect = |text: &str| {
            let lowered = text.to_lowercase();
            LINK_MARKERS.iter().any(|m| lowered.contains(m))
        };
        assert!(detect("https://TeraBox.com/s/abc"));
        assert!(detect("check https://1024tera.com/s/xyz out"));
        assert!(!detect("just a normal message"));
    }
}
