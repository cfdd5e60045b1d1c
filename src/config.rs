//! Configuration and settings management
//!
//! Loads settings from config files and environment variables and defines
//! transfer constants.

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Application settings loaded from environment variables
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Settings {
    /// Telegram Bot API token
    #[serde(default)]
    pub telegram_token: String,

    /// Telegram id of the single operator allowed to use the bot
    pub admin_id: Option<i64>,

    /// R2 Storage access key ID
    pub r2_access_key_id: Option<String>,
    /// R2 Storage secret access key
    pub r2_secret_access_key: Option<String>,
    /// R2 Storage endpoint URL
    pub r2_endpoint_url: Option<String>,
    /// Cloudflare account id, used to derive the endpoint when no URL is given
    pub r2_account_id: Option<String>,
    /// R2 Storage bucket name
    pub r2_bucket_name: Option<String>,
    /// Public base URL under which uploaded objects are served
    pub r2_public_base: Option<String>,

    /// Directory for staging files between download and upload
    #[serde(default = "default_staging_dir")]
    pub staging_dir: PathBuf,

    /// Public URL for the webhook. Long polling is used when unset.
    pub webhook_url: Option<String>,
    /// Local address the webhook listener binds to
    #[serde(default = "default_webhook_addr")]
    pub webhook_addr: String,
}

fn default_staging_dir() -> PathBuf {
    PathBuf::from("staging")
}

fn default_webhook_addr() -> String {
    "0.0.0.0:8080".to_string()
}

/// Legacy variable names accepted when the primary key is absent.
const ENV_FALLBACKS: &[(&str, &str)] = &[
    ("telegram_token", "BOT_TOKEN"),
    ("r2_access_key_id", "R2_ACCESS_KEY"),
    ("r2_secret_access_key", "R2_SECRET_KEY"),
    ("r2_bucket_name", "R2_BUCKET"),
];

impl Settings {
    /// Create new settings by loading from environment and files
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use oxide_relay::config::Settings;
    ///
    /// let settings = Settings::new().expect("Failed to load configuration");
    /// ```
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if loading fails.
    pub fn new() -> Result<Self, ConfigError> {
        let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{run_mode}")).required(false))
            // Local overrides, not checked into git
            .add_source(File::with_name("config/local").required(false))
            // `APP__R2_BUCKET_NAME=...` style overrides
            .add_source(Environment::with_prefix("APP").separator("__"))
            // Plain UPPER_SNAKE_CASE variables; empty values count as unset
            .add_source(Environment::default().ignore_empty(true))
            .build()?;

        let mut settings: Self = s.try_deserialize()?;
        settings.apply_env_fallbacks();
        Ok(settings)
    }

    fn apply_env_fallbacks(&mut self) {
        for (field, var) in ENV_FALLBACKS {
            let Some(val) = std::env::var(var).ok().filter(|v| !v.is_empty()) else {
                continue;
            };
            match *field {
                "telegram_token" if self.telegram_token.is_empty() => self.telegram_token = val,
                "r2_access_key_id" if self.r2_access_key_id.is_none() => {
                    self.r2_access_key_id = Some(val);
                }
                "r2_secret_access_key" if self.r2_secret_access_key.is_none() => {
                    self.r2_secret_access_key = Some(val);
                }
                "r2_bucket_name" if self.r2_bucket_name.is_none() => {
                    self.r2_bucket_name = Some(val);
                }
                _ => {}
            }
        }
    }

    /// Check that every required key is present.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError::Message` naming all missing keys at once.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut missing = Vec::new();
        if self.telegram_token.is_empty() {
            missing.push("TELEGRAM_TOKEN");
        }
        if self.admin_id.is_none() {
            missing.push("ADMIN_ID");
        }
        if self.r2_access_key_id.is_none() {
            missing.push("R2_ACCESS_KEY_ID");
        }
        if self.r2_secret_access_key.is_none() {
            missing.push("R2_SECRET_ACCESS_KEY");
        }
        if self.r2_bucket_name.is_none() {
            missing.push("R2_BUCKET_NAME");
        }
        if self.r2_public_base.is_none() {
            missing.push("R2_PUBLIC_BASE");
        }
        if self.r2_endpoint().is_none() {
            missing.push("R2_ENDPOINT_URL or R2_ACCOUNT_ID");
        }

        if missing.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Message(format!(
                "Missing env vars: {}",
                missing.join(", ")
            )))
        }
    }

    /// Returns the S3 endpoint, deriving it from the account id if needed
    #[must_use]
    pub fn r2_endpoint(&self) -> Option<String> {
        self.r2_endpoint_url.clone().or_else(|| {
            self.r2_account_id
                .as_ref()
                .map(|account| format!("https://{account}.r2.cloudflarestorage.com"))
        })
    }

    /// Returns `true` if the given Telegram id is the operator
    #[must_use]
    pub fn is_admin(&self, user_id: i64) -> bool {
        self.admin_id == Some(user_id)
    }

    /// Public base URL without a trailing slash
    #[must_use]
    pub fn public_base(&self) -> String {
        self.r2_public_base
            .as_deref()
            .unwrap_or_default()
            .trim_end_matches('/')
            .to_string()
    }
}

// Transfer configuration
/// Size of a single download chunk (1 MiB)
pub const TRANSFER_CHUNK_SIZE: usize = 1024 * 1024;
/// Size of a single multipart upload part (8 MiB, S3 minimum is 5 MiB)
pub const UPLOAD_PART_SIZE: usize = 8 * 1024 * 1024;
/// Timeout for a single Bot API request or connection attempt
pub const TELEGRAM_API_TIMEOUT_SECS: u64 = 10;
/// Read timeout while streaming a download body
pub const DOWNLOAD_READ_TIMEOUT_SECS: u64 = 60;
/// Time to wait for running transfers on shutdown
pub const SHUTDOWN_GRACE_SECS: u64 = 30;

// Telegram API retry configuration
/// Initial backoff for retried Bot API calls
pub const TELEGRAM_API_INITIAL_BACKOFF_MS: u64 = 500;
/// Upper bound for a single backoff delay
pub const TELEGRAM_API_MAX_BACKOFF_MS: u64 = 4000;
/// Number of retries after the first attempt
pub const TELEGRAM_API_MAX_RETRIES: usize = 3;

// Published view cache
/// How long a published status view stays restorable
pub const PUBLISHED_CACHE_TTL_SECS: u64 = 24 * 60 * 60;
/// Maximum number of cached published views
pub const PUBLISHED_CACHE_MAX_SIZE: u64 = 10_000;

/// Number of object keys per page in the files menu
pub const FILES_PAGE_SIZE: usize = 10;
