//! Logging setup for the CrossPost daemon
//!
//! Events always go to stderr in the chosen format. When `log.file` is set
//! the same events are also appended to that file as plain text, so the file
//! survives restarts and stays readable without a terminal. `RUST_LOG`
//! overrides the configured level when set.
//!
//! # Examples
//!
//! ```no_run
//! use libcrosspost::config::LogConfig;
//! use libcrosspost::logging::LoggingConfig;
//!
//! let logging = LoggingConfig::from_config(&LogConfig::default(), Some("json"), false)?;
//! logging.init()?;
//! # Ok::<(), libcrosspost::CrosspostError>(())
//! ```

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::Subscriber;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

use crate::config::LogConfig;
use crate::error::{ConfigError, CrosspostError, Result};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Output format on stderr
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// One line per event, no colors
    Text,
    /// One JSON object per line
    Json,
    /// Multi-line with colors and source locations
    Pretty,
}

/// Resolved logging settings, ready to install
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    pub format: LogFormat,
    pub level: String,
    pub verbose: bool,
    pub file: Option<PathBuf>,
}

impl LoggingConfig {
    /// Combine the `[log]` section with command-line flags
    ///
    /// `format_override` comes from `--log-format` and wins over the file.
    /// `verbose` forces the debug level unless `RUST_LOG` is set.
    pub fn from_config(
        config: &LogConfig,
        format_override: Option<&str>,
        verbose: bool,
    ) -> Result<Self> {
        let name = format_override.unwrap_or(&config.format);
        let format = match name.to_lowercase().as_str() {
            "text" => LogFormat::Text,
            "json" => LogFormat::Json,
            "pretty" => LogFormat::Pretty,
            _ => {
                return Err(ConfigError::InvalidValue {
                    field: "log.format".to_string(),
                    reason: format!("'{}' is not one of text, json, pretty", name),
                }
                .into());
            }
        };

        let file = config
            .file
            .as_deref()
            .map(|path| PathBuf::from(shellexpand::tilde(&path.to_string_lossy()).as_ref()));

        Ok(Self {
            format,
            level: config.level.clone(),
            verbose,
            file,
        })
    }

    /// Install the subscriber globally
    ///
    /// # Errors
    ///
    /// Fails when the log file cannot be opened for appending or when a
    /// global subscriber is already installed.
    pub fn init(&self) -> Result<()> {
        self.subscriber()?.try_init().map_err(|e| {
            CrosspostError::from(ConfigError::InvalidValue {
                field: "log".to_string(),
                reason: format!("logging already initialised: {}", e),
            })
        })
    }

    /// Build the subscriber without installing it
    pub fn subscriber(&self) -> Result<impl Subscriber + Send + Sync + 'static> {
        let mut layers: Vec<BoxedLayer> = vec![self.stderr_layer()];
        if let Some(path) = &self.file {
            layers.push(file_layer(open_append(path)?, self.filter()));
        }
        Ok(tracing_subscriber::registry().with(layers))
    }

    fn filter(&self) -> EnvFilter {
        let level = if self.verbose { "debug" } else { self.level.as_str() };
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
    }

    fn stderr_layer(&self) -> BoxedLayer {
        let layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
        match self.format {
            LogFormat::Json => layer
                .json()
                .with_current_span(true)
                .with_span_list(true)
                .flatten_event(true)
                .with_filter(self.filter())
                .boxed(),
            LogFormat::Pretty => layer
                .pretty()
                .with_line_number(true)
                .with_file(true)
                .with_filter(self.filter())
                .boxed(),
            LogFormat::Text => layer
                .with_target(false)
                .with_filter(self.filter())
                .boxed(),
        }
    }
}

fn open_append(path: &Path) -> Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| {
            CrosspostError::from(ConfigError::InvalidValue {
                field: "log.file".to_string(),
                reason: format!("cannot open {} for appending: {}", path.display(), e),
            })
        })
}

fn file_layer(file: File, filter: EnvFilter) -> BoxedLayer {
    tracing_subscriber::fmt::layer()
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .with_target(false)
        .with_filter(filter)
        .boxed()
}
