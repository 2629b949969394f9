//! Mock publisher for testing
//!
//! A configurable [`Publisher`] that can succeed, fail, stall on a delay or
//! block on a semaphore gate. Clones share their counters and records, so a
//! test keeps one handle while the pipeline owns a boxed clone.

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::sleep;

use super::Publisher;
use crate::error::{PlatformError, Result};
use crate::types::{MediaKind, NormalizedPost};

/// What the mock saw for one publish call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedPost {
    pub source_id: String,
    pub content: String,
    pub media: Vec<PublishedMedia>,
}

/// A media item as seen by the mock at publish time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMedia {
    pub path: PathBuf,
    pub kind: MediaKind,
    pub alt_text: Option<String>,
    /// Whether the file was on disk when publish ran
    pub existed: bool,
}

/// Configuration for mock publisher behavior
#[derive(Debug, Clone)]
pub struct MockConfig {
    /// Publisher name reported through `Publisher::name`
    pub name: String,

    /// Whether publishing should succeed
    pub publish_succeeds: bool,

    /// Error to return on publishing failure
    pub publish_error: Option<String>,

    /// Delay before completing a publish (simulates network latency)
    pub delay: Duration,

    /// Each publish waits for and consumes one permit when set
    pub gate: Option<Arc<Semaphore>>,

    /// Number of times publish has been entered
    pub publish_call_count: Arc<Mutex<usize>>,

    /// Posts that have been published (for verification)
    pub published: Arc<Mutex<Vec<PublishedPost>>>,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            name: "mock".to_string(),
            publish_succeeds: true,
            publish_error: None,
            delay: Duration::from_millis(0),
            gate: None,
            publish_call_count: Arc::new(Mutex::new(0)),
            published: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

/// Mock publisher for testing
#[derive(Debug, Clone)]
pub struct MockPublisher {
    config: MockConfig,
}

impl MockPublisher {
    pub fn new(config: MockConfig) -> Self {
        Self { config }
    }

    /// Create a mock publisher that always succeeds
    pub fn success(name: &str) -> Self {
        Self::new(MockConfig {
            name: name.to_string(),
            ..Default::default()
        })
    }

    /// Create a mock publisher that always fails
    pub fn failure(name: &str, error: &str) -> Self {
        Self::new(MockConfig {
            name: name.to_string(),
            publish_succeeds: false,
            publish_error: Some(error.to_string()),
            ..Default::default()
        })
    }

    /// Create a mock publisher with a delay
    pub fn with_delay(name: &str, delay: Duration) -> Self {
        Self::new(MockConfig {
            name: name.to_string(),
            delay,
            ..Default::default()
        })
    }

    /// Create a mock publisher that blocks until `gate` hands out a permit
    pub fn gated(name: &str, gate: Arc<Semaphore>) -> Self {
        Self::new(MockConfig {
            name: name.to_string(),
            gate: Some(gate),
            ..Default::default()
        })
    }

    /// Get the number of times publish was entered
    pub fn publish_call_count(&self) -> usize {
        *self.config.publish_call_count.lock().unwrap()
    }

    /// Get every post that was published successfully, in order
    pub fn published(&self) -> Vec<PublishedPost> {
        self.config.published.lock().unwrap().clone()
    }

    /// Contents of successfully published posts, in order
    pub fn published_content(&self) -> Vec<String> {
        self.published().into_iter().map(|p| p.content).collect()
    }
}

#[async_trait]
impl Publisher for MockPublisher {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn publish(&self, post: &NormalizedPost) -> Result<String> {
        let call = {
            let mut count = self.config.publish_call_count.lock().unwrap();
            *count += 1;
            *count
        };

        if let Some(gate) = &self.config.gate {
            let permit = gate
                .acquire()
                .await
                .map_err(|_| PlatformError::Posting("Mock gate closed".to_string()))?;
            permit.forget();
        }

        if !self.config.delay.is_zero() {
            sleep(self.config.delay).await;
        }

        if !self.config.publish_succeeds {
            let error_msg = self
                .config
                .publish_error
                .clone()
                .unwrap_or_else(|| "Mock publishing failed".to_string());
            return Err(PlatformError::Posting(error_msg).into());
        }

        let media = post
            .media
            .iter()
            .map(|item| PublishedMedia {
                path: item.path().to_path_buf(),
                kind: item.kind,
                alt_text: item.alt_text.clone(),
                existed: item.path().exists(),
            })
            .collect();
        self.config.published.lock().unwrap().push(PublishedPost {
            source_id: post.source_id.clone(),
            content: post.content.clone(),
            media,
        });

        Ok(format!("{}:mock-{}", self.config.name, call))
    }
}
