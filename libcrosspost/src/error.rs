//! Error types for CrossPost

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CrosspostError>;

#[derive(Error, Debug)]
pub enum CrosspostError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Platform error: {0}")]
    Platform(#[from] PlatformError),

    #[error("Media error: {0}")]
    Media(#[from] MediaError),

    #[error("Signal handling error: {0}")]
    Signal(String),
}

impl CrosspostError {
    /// Returns the appropriate exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            CrosspostError::Config(_) => 2,
            CrosspostError::Platform(_) => 1,
            CrosspostError::Media(_) => 1,
            CrosspostError::Signal(_) => 1,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

#[derive(Error, Debug, Clone)]
pub enum PlatformError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Posting failed: {0}")]
    Posting(String),

    #[error("Media upload failed: {0}")]
    Upload(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Rate limit exceeded: {0}")]
    RateLimit(String),
}

/// Map a non-success HTTP response status onto a [`PlatformError`]
///
/// `context` names the operation (e.g. "bluesky createRecord") and `body` is
/// the response text, kept so remote error payloads reach the log.
pub fn map_status_error(status: reqwest::StatusCode, context: &str, body: &str) -> PlatformError {
    let detail = format!("{} returned HTTP {}: {}", context, status.as_u16(), body.trim());
    match status.as_u16() {
        401 | 403 => PlatformError::Authentication(detail),
        429 => PlatformError::RateLimit(detail),
        500..=599 => PlatformError::Network(detail),
        _ => PlatformError::Posting(detail),
    }
}

/// Map a transport-level reqwest failure onto a [`PlatformError`]
pub fn map_transport_error(error: reqwest::Error, context: &str) -> PlatformError {
    if let Some(status) = error.status() {
        return map_status_error(status, context, &error.to_string());
    }
    if error.is_timeout() {
        return PlatformError::Network(format!("{} timed out: {}", context, error));
    }
    if error.is_decode() {
        return PlatformError::Posting(format!("{} returned an unreadable response: {}", context, error));
    }
    PlatformError::Network(format!("{} failed: {}", context, error))
}

#[derive(Error, Debug)]
pub enum MediaError {
    #[error("Media IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Media download failed: {0}")]
    Download(String),

    #[error("Media decode failed: {0}")]
    Image(#[from] image::ImageError),

    #[error("Media file \"{path}\" ({size}b) cannot be resized smaller")]
    TooLarge { path: String, size: u64 },
}
