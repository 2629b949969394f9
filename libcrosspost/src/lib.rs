//! CrossPost - mirror Mastodon posts to Twitter and BlueSky
//!
//! Each configured account runs a pipeline: the Mastodon user stream is
//! filtered down to the account's own direct, original posts, which are
//! converted to plain text, have their media downloaded, and are handed to
//! every configured publisher through a bounded queue.

pub mod config;
pub mod error;
pub mod ingest;
pub mod logging;
pub mod media;
pub mod pipeline;
pub mod publishers;
pub mod queue;
pub mod service;
pub mod shutdown;
pub mod stream;
pub mod transform;
pub mod types;

// Re-export commonly used types
pub use config::Config;
pub use error::{CrosspostError, Result};
pub use service::CrossPost;
pub use shutdown::{shutdown_channel, Shutdown, ShutdownTrigger};
pub use types::{MediaItem, MediaKind, NormalizedPost, SourceStatus, StreamEvent};
