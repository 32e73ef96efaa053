//! Configuration and settings management
//!
//! Loads settings from environment variables and defines tunable constants.

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

/// Default resolver API endpoint.
pub const DEFAULT_RESOLVER_API_URL: &str = "https://wdzone-terabox-api.vercel.app/api";

/// Default staging directory for in-flight downloads.
pub const DEFAULT_DOWNLOAD_DIR: &str = "downloads";

/// Default maximum file size accepted for relaying (2000 MiB).
pub const DEFAULT_MAX_FILE_SIZE: u64 = 2000 * 1024 * 1024;

/// Default port for the liveness endpoint.
pub const DEFAULT_HEALTH_PORT: u16 = 8000;

/// Timeout for resolver API calls.
pub const RESOLVER_TIMEOUT_SECS: u64 = 30;

/// Minimum number of downloaded bytes between two progress reports.
pub const PROGRESS_INTERVAL_BYTES: u64 = 5 * 1024 * 1024;

/// Long-poll request timeout passed to the Telegram backend.
pub const POLL_TIMEOUT_SECS: u64 = 10;

/// Base backoff after a long-poll connection conflict.
pub const POLL_BASE_BACKOFF_SECS: u64 = 2;

/// Connection conflict attempts before the supervisor gives up.
pub const POLL_MAX_ATTEMPTS: u32 = 5;

/// Initial backoff for Telegram API retries (milliseconds).
pub const TELEGRAM_API_INITIAL_BACKOFF_MS: u64 = 500;
/// Maximum backoff for Telegram API retries (milliseconds).
pub const TELEGRAM_API_MAX_BACKOFF_MS: u64 = 4000;
/// Maximum retry attempts for Telegram API operations.
pub const TELEGRAM_API_MAX_RETRIES: usize = 3;

/// Placeholder token value that must never reach production.
const TOKEN_PLACEHOLDER: &str = "YOUR_BOT_TOKEN_HERE";

/// Application settings loaded from environment variables
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    /// Telegram Bot API token
    pub bot_token: String,

    /// Resolver API endpoint translating share links into direct URLs
    #[serde(default = "default_resolver_api_url")]
    pub resolver_api_url: String,

    /// Staging directory for in-flight downloads
    #[serde(default = "default_download_dir")]
    pub download_dir: String,

    /// Maximum relayed file size in bytes, as free text from the environment
    #[serde(rename = "max_file_size")]
    pub max_file_size_str: Option<String>,

    /// Liveness endpoint port, as free text from the environment
    #[serde(rename = "health_port")]
    pub health_port_str: Option<String>,

    /// Owner Telegram ID (informational, not enforced by the core)
    pub owner_id: Option<String>,
}

fn default_resolver_api_url() -> String {
    DEFAULT_RESOLVER_API_URL.to_string()
}

fn default_download_dir() -> String {
    DEFAULT_DOWNLOAD_DIR.to_string()
}

impl Settings {
    /// Create new settings by loading from environment and files
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if loading fails or the bot token is
    /// missing/left at its placeholder value.
    pub fn new() -> Result<Self, ConfigError> {
        let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{run_mode}")).required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(Environment::with_prefix("APP").separator("__"))
            // Environment::default() auto-converts UPPER_SNAKE_CASE to snake_case;
            // ignore_empty treats empty env vars as unset
            .add_source(Environment::default().ignore_empty(true))
            .build()?;

        let settings: Self = s.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Rejects configurations that would start the bot in a broken state.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.bot_token.trim().is_empty() || self.bot_token == TOKEN_PLACEHOLDER {
            return Err(ConfigError::Message(
                "BOT_TOKEN is not set; refusing to start without credentials".to_string(),
            ));
        }
        Ok(())
    }

    /// Maximum accepted file size in bytes.
    #[must_use]
    pub fn max_file_size(&self) -> u64 {
        self.max_file_size_str
            .as_deref()
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(DEFAULT_MAX_FILE_SIZE)
    }

    /// Port the liveness endpoint listens on.
    #[must_use]
    pub fn health_port(&self) -> u16 {
        self.health_port_str
            .as_deref()
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(DEFAULT_HEALTH_PORT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings_with_token(token: &str) -> Settings {
        Settings {
            bot_token: token.to_string(),
            resolver_api_url: default_resolver_api_url(),
            download_dir: default_download_dir(),
            max_file_size_str: None,
            health_port_str: None,
            owner_id: None,
        }
    }

    #[test]
    fn test_validate_rejects_placeholder_token() {
        assert!(settings_with_token("YOUR_BOT_TOKEN_HERE")
            .validate()
            .is_err());
        assert!(settings_with_token("").validate().is_err());
        assert!(settings_with_token("  ").validate().is_err());
        assert!(settings_with_token("123456:ABC-DEF").validate().is_ok());
    }

    #[test]
    fn test_max_file_size_parsing() {
        let mut settings = settings_with_token("dummy");
        assert_eq!(settings.max_file_size(), DEFAULT_MAX_FILE_SIZE);

        settings.max_file_size_str = Some("1048576".to_string());
        assert_eq!(settings.max_file_size(), 1_048_576);

        // Garbage falls back to the default
        settings.max_file_size_str = Some("lots".to_string());
        assert_eq!(settings.max_file_size(), DEFAULT_MAX_FILE_SIZE);
    }

    #[test]
    fn test_health_port_parsing() {
        let mut settings = settings_with_token("dummy");
        assert_eq!(settings.health_port(), DEFAULT_HEALTH_PORT);

        settings.health_port_str = Some("9090".to_string());
        assert_eq!(settings.health_port(), 9090);
    }
}
