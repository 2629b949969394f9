//! Outbound publishers
//!
//! Every destination implements [`Publisher`]. A pipeline holds zero or more
//! of them as trait objects and calls each in turn for every post, so adding
//! a destination never touches the queue or ingestion code.
//!
//! # Examples
//!
//! ```no_run
//! use libcrosspost::publishers::{Publisher, mock::MockPublisher};
//! use libcrosspost::types::NormalizedPost;
//!
//! # async fn example() -> libcrosspost::error::Result<()> {
//! let publisher = MockPublisher::success("mock");
//! let post = NormalizedPost::new("1".to_string(), "Hello".to_string(), Vec::new());
//! let remote_id = publisher.publish(&post).await?;
//! println!("{} accepted the post as {}", publisher.name(), remote_id);
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use tracing::debug;

use crate::config::AccountConfig;
use crate::error::Result;
use crate::types::NormalizedPost;

pub mod bluesky;
pub mod twitter;

// Available outside tests so integration tests can build pipelines with it
pub mod mock;

/// A destination platform for mirrored posts
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Lowercase platform identifier used in logs (e.g. "twitter", "bluesky")
    fn name(&self) -> &str;

    /// Upload the post's media and create the remote post
    ///
    /// Returns the platform's identifier for the new post. The post's media
    /// files are only read; deleting them is the caller's job.
    ///
    /// # Errors
    ///
    /// Any failure aborts this publisher's attempt for this post only.
    async fn publish(&self, post: &NormalizedPost) -> Result<String>;
}

/// Build the publishers configured for one account
///
/// BlueSky logs in here, so bad credentials fail pipeline setup.
pub async fn build_publishers(
    account: &AccountConfig,
    http: &reqwest::Client,
) -> Result<Vec<Box<dyn Publisher>>> {
    let mut publishers: Vec<Box<dyn Publisher>> = Vec::new();

    if let Some(config) = &account.twitter {
        debug!("Setting up Twitter publisher");
        publishers.push(Box::new(twitter::TwitterPublisher::new(config, http.clone())));
    }

    if let Some(config) = &account.bluesky {
        debug!("Setting up BlueSky publisher for {}", config.username);
        publishers.push(Box::new(
            bluesky::BlueskyPublisher::connect(config, http.clone()).await?,
        ));
    }

    Ok(publishers)
}
