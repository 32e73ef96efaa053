use dotenvy::dotenv;
use regex::Regex;
use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;
use teloxide::prelude::*;
use teraleech::bot::RequestDispatcher;
use teraleech::config::{Settings, POLL_BASE_BACKOFF_SECS, POLL_MAX_ATTEMPTS};
use teraleech::health;
use teraleech::poll::{poll_session, PollSupervisor};
use teraleech::relay::RelayPipeline;
use teraleech::resolver::LinkResolver;
use tracing::{error, info};
use tracing_subscriber::{prelude::*, EnvFilter};

/// Regex patterns for redacting the bot token from log output
struct RedactionPatterns {
    token_in_url: Regex,
    bare_token: Regex,
    token_after_bot: Regex,
}

impl RedactionPatterns {
    /// Initialize all regex patterns
    ///
    /// # Errors
    ///
    /// Returns an error if any regex pattern is invalid
    fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            token_in_url: Regex::new(r"(https?://[^/]+/bot)([0-9]+:[A-Za-z0-9_-]+)(/['\s]*)")?,
            bare_token: Regex::new(r"([0-9]{8,10}:[A-Za-z0-9_-]{35})")?,
            token_after_bot: Regex::new(r"(bot[0-9]{8,10}:)[A-Za-z0-9_-]+")?,
        })
    }

    fn redact(&self, input: &str) -> String {
        let mut output = input.to_string();
        output = self
            .token_in_url
            .replace_all(&output, "$1[TELEGRAM_TOKEN]$3")
            .to_string();
        output = self
            .bare_token
            .replace_all(&output, "[TELEGRAM_TOKEN]")
            .to_string();
        output = self
            .token_after_bot
            .replace_all(&output, "$1[TELEGRAM_TOKEN]")
            .to_string();
        output
    }
}

struct RedactingWriter<W: Write> {
    inner: W,
    patterns: Arc<RedactionPatterns>,
}

impl<W: Write> RedactingWriter<W> {
    const fn new(inner: W, patterns: Arc<RedactionPatterns>) -> Self {
        Self { inner, patterns }
    }
}

impl<W: Write> Write for RedactingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let s = String::from_utf8_lossy(buf);
        let redacted = self.patterns.redact(&s);
        self.inner.write_all(redacted.as_bytes())?;
        // Report the original length to satisfy the contract even when the
        // redacted string length differs.
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

struct RedactingMakeWriter<F> {
    make_inner: F,
    patterns: Arc<RedactionPatterns>,
}

impl<F> RedactingMakeWriter<F> {
    const fn new(make_inner: F, patterns: Arc<RedactionPatterns>) -> Self {
        Self {
            make_inner,
            patterns,
        }
    }
}

impl<'a, F, W> tracing_subscriber::fmt::MakeWriter<'a> for RedactingMakeWriter<F>
where
    F: Fn() -> W + 'static,
    W: Write,
{
    type Writer = RedactingWriter<W>;

    fn make_writer(&'a self) -> Self::Writer {
        RedactingWriter::new((self.make_inner)(), self.patterns.clone())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env file
    dotenv().ok();

    // Redaction must exist before the first log line
    let patterns = Arc::new(RedactionPatterns::new().map_err(|e| {
        eprintln!("Failed to compile regex patterns: {e}");
        e
    })?);
    init_logging(patterns);

    info!("Starting TeraBox Leech Bot...");

    let settings = init_settings();
    if let Some(owner) = &settings.owner_id {
        info!("Configured owner: {owner}");
    }

    // Liveness endpoint runs independently for external supervisors
    tokio::spawn(health::serve(settings.health_port()));

    let bot = Bot::new(settings.bot_token.clone());
    let me = match bot.get_me().await {
        Ok(me) => me,
        Err(e) => {
            error!("Failed to authenticate with Telegram, check BOT_TOKEN: {e}");
            std::process::exit(1);
        }
    };
    let bot_username = me.username().to_string();
    info!("Authenticated as @{bot_username}");

    let resolver = Arc::new(LinkResolver::new(settings.resolver_api_url.clone()));
    let pipeline = Arc::new(RelayPipeline::new(
        settings.download_dir.clone(),
        settings.max_file_size(),
    ));
    let dispatcher = Arc::new(RequestDispatcher::new(
        bot.clone(),
        resolver,
        pipeline,
        bot_username,
    ));

    info!("Bot is running...");

    let supervisor = PollSupervisor::new(
        Duration::from_secs(POLL_BASE_BACKOFF_SECS),
        POLL_MAX_ATTEMPTS,
    );
    let polling = supervisor.run(|handle| poll_session(bot.clone(), dispatcher.clone(), handle));

    tokio::select! {
        result = polling => {
            if let Err(e) = result {
                error!("Polling stopped: {e}");
                std::process::exit(1);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Bot stopped by user");
        }
    }

    Ok(())
}

fn init_logging(patterns: Arc<RedactionPatterns>) {
    let make_writer = RedactingMakeWriter::new(io::stderr, patterns);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(make_writer))
        .init();
}

fn init_settings() -> Arc<Settings> {
    match Settings::new() {
        Ok(s) => {
            info!("Configuration loaded successfully.");
            Arc::new(s)
        }
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    }
}
