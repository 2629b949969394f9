//! Configuration management for CrossPost

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ConfigError, Result};

/// BlueSky server used when an account does not name one
pub const BLUESKY_DEFAULT_SERVER: &str = "bsky.social";

const DEFAULT_TIMEOUT: &str = "5s";

/// Commented example configuration, printed by `crosspost --dump-config`
const TEMPLATE: &str = r#"# CrossPost configuration
#
# Per-request HTTP timeout (humantime format).
timeout = "5s"

[log]
# error, warn, info, debug or trace
level = "info"
# text, json or pretty
format = "text"
# Optional: also append plain-text log lines to this file.
# file = "~/.local/state/crosspost/crosspost.log"

[[accounts]]
# Optional: appended to every post as "<prefix>/<status id>".
prefix = "https://short.example/post"

[accounts.mastodon]
server = "https://mastodon.example"
client_id = "client_id_value"
client_secret = "client_secret_value"
access_token = "access_token_value"

[accounts.bluesky]
# server defaults to "bsky.social"
username = "bluesky_handle_or_email"
password = "bluesky_app_password"

[accounts.twitter]
consumer_key = "consumer_key_value"
consumer_secret = "consumer_secret_value"
access_token = "access_token_value"
access_secret = "access_secret_value"

# Optional case-sensitive find/replace rules applied to the post text.
[accounts.replace]
":blobcat:" = "🐱"
"#;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_timeout")]
    pub timeout: String,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub accounts: Vec<AccountConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            file: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountConfig {
    pub mastodon: Option<MastodonConfig>,
    pub bluesky: Option<BlueskyConfig>,
    pub twitter: Option<TwitterConfig>,
    #[serde(default)]
    pub prefix: Option<String>,
    #[serde(default)]
    pub replace: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MastodonConfig {
    pub server: String,
    pub client_id: String,
    pub client_secret: String,
    pub access_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlueskyConfig {
    #[serde(default)]
    pub server: String,
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TwitterConfig {
    pub consumer_key: String,
    pub consumer_secret: String,
    pub access_token: String,
    pub access_secret: String,
}

fn default_timeout() -> String {
    DEFAULT_TIMEOUT.to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

impl Config {
    /// Load configuration from the default location
    pub fn load() -> Result<Self> {
        let config_path = resolve_config_path()?;
        Self::load_from_path(&config_path)
    }

    /// Load and validate configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadError)?;
        Self::from_toml(&content)
    }

    /// Parse and validate configuration text
    pub fn from_toml(content: &str) -> Result<Self> {
        let mut config: Config = toml::from_str(content).map_err(ConfigError::ParseError)?;
        config.validate()?;
        Ok(config)
    }

    /// The commented example configuration
    pub fn template() -> &'static str {
        TEMPLATE
    }

    /// Per-request HTTP timeout
    pub fn timeout(&self) -> Result<Duration> {
        let timeout = humantime::parse_duration(self.timeout.trim()).map_err(|e| {
            ConfigError::InvalidValue {
                field: "timeout".to_string(),
                reason: e.to_string(),
            }
        })?;
        if timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "timeout".to_string(),
                reason: "must be greater than zero".to_string(),
            }
            .into());
        }
        Ok(timeout)
    }

    /// Check every account and fill in defaults
    ///
    /// Each account needs a complete `mastodon` block and at least one of
    /// `bluesky` or `twitter`. A BlueSky block without a server gets
    /// [`BLUESKY_DEFAULT_SERVER`].
    pub fn validate(&mut self) -> Result<()> {
        if self.accounts.is_empty() {
            return Err(ConfigError::MissingField("accounts".to_string()).into());
        }
        self.timeout()?;

        for (i, account) in self.accounts.iter_mut().enumerate() {
            let mastodon = account
                .mastodon
                .as_ref()
                .ok_or_else(|| ConfigError::MissingField(format!("accounts[{}].mastodon", i)))?;
            require(i, "mastodon.server", &mastodon.server)?;
            require(i, "mastodon.client_id", &mastodon.client_id)?;
            require(i, "mastodon.client_secret", &mastodon.client_secret)?;
            require(i, "mastodon.access_token", &mastodon.access_token)?;

            if account.bluesky.is_none() && account.twitter.is_none() {
                return Err(ConfigError::MissingField(format!(
                    "accounts[{}].bluesky or accounts[{}].twitter",
                    i, i
                ))
                .into());
            }

            if let Some(bluesky) = account.bluesky.as_mut() {
                if bluesky.server.trim().is_empty() {
                    bluesky.server = BLUESKY_DEFAULT_SERVER.to_string();
                }
                require(i, "bluesky.username", &bluesky.username)?;
                require(i, "bluesky.password", &bluesky.password)?;
            }

            if let Some(twitter) = account.twitter.as_ref() {
                require(i, "twitter.consumer_key", &twitter.consumer_key)?;
                require(i, "twitter.consumer_secret", &twitter.consumer_secret)?;
                require(i, "twitter.access_token", &twitter.access_token)?;
                require(i, "twitter.access_secret", &twitter.access_secret)?;
            }

            if account.replace.keys().any(|k| k.is_empty()) {
                return Err(ConfigError::InvalidValue {
                    field: format!("accounts[{}].replace", i),
                    reason: "find strings cannot be empty".to_string(),
                }
                .into());
            }
        }

        Ok(())
    }
}

fn require(index: usize, field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(ConfigError::MissingField(format!("accounts[{}].{}", index, field)).into());
    }
    Ok(())
}

/// Resolve the configuration file path following XDG Base Directory spec
pub fn resolve_config_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("CROSSPOST_CONFIG") {
        return Ok(PathBuf::from(shellexpand::tilde(&path).to_string()));
    }

    let config_dir = dirs::config_dir()
        .ok_or_else(|| ConfigError::MissingField("config directory".to_string()))?;

    Ok(config_dir.join("crosspost").join("config.toml"))
}
