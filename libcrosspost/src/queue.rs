//! Bounded publish queue and the task that drains it

use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::publishers::Publisher;
use crate::shutdown::Shutdown;
use crate::types::NormalizedPost;

/// Posts buffered between ingestion and publishing per pipeline
pub const PUBLISH_QUEUE_CAPACITY: usize = 16;

pub fn publish_queue() -> (mpsc::Sender<NormalizedPost>, mpsc::Receiver<NormalizedPost>) {
    mpsc::channel(PUBLISH_QUEUE_CAPACITY)
}

/// Result of handing one post to one publisher
#[derive(Debug, Clone)]
pub struct PublishResult {
    /// Publisher name (e.g., "twitter", "bluesky")
    pub publisher: String,
    /// Whether the post was created
    pub success: bool,
    /// Remote id of the created post (if successful)
    pub remote_id: Option<String>,
    /// Error message (if failed)
    pub error: Option<String>,
}

/// Sends every queued post to each of a pipeline's publishers
pub struct PublishLoop {
    name: String,
    publishers: Vec<Box<dyn Publisher>>,
}

impl PublishLoop {
    pub fn new(name: String, publishers: Vec<Box<dyn Publisher>>) -> Self {
        Self { name, publishers }
    }

    pub fn publisher_names(&self) -> Vec<&str> {
        self.publishers.iter().map(|p| p.name()).collect()
    }

    /// Hand `post` to every publisher in order
    ///
    /// A failing publisher is logged and does not stop the next one.
    pub async fn publish_all(&self, post: &NormalizedPost) -> Vec<PublishResult> {
        let mut results = Vec::with_capacity(self.publishers.len());
        for publisher in &self.publishers {
            let result = match publisher.publish(post).await {
                Ok(remote_id) => {
                    debug!(
                        "[{}]: {} accepted status {} as {}",
                        self.name,
                        publisher.name(),
                        post.source_id,
                        remote_id
                    );
                    PublishResult {
                        publisher: publisher.name().to_string(),
                        success: true,
                        remote_id: Some(remote_id),
                        error: None,
                    }
                }
                Err(e) => {
                    error!(
                        "[{}]: Failed to publish status {} to {}: {}",
                        self.name,
                        post.source_id,
                        publisher.name(),
                        e
                    );
                    PublishResult {
                        publisher: publisher.name().to_string(),
                        success: false,
                        remote_id: None,
                        error: Some(e.to_string()),
                    }
                }
            };
            results.push(result);
        }
        results
    }

    /// Drain `queue` until shutdown or until every sender is gone
    ///
    /// An in-flight post finishes publishing; posts still queued at shutdown
    /// are dropped without being published.
    pub async fn run(&self, mut queue: mpsc::Receiver<NormalizedPost>, mut shutdown: Shutdown) {
        debug!(
            "[{}]: Publishing to {:?}",
            self.name,
            self.publisher_names()
        );
        loop {
            let post = tokio::select! {
                biased;
                _ = shutdown.triggered() => break,
                post = queue.recv() => match post {
                    Some(post) => post,
                    None => break,
                },
            };

            let results = self.publish_all(&post).await;
            let succeeded = results.iter().filter(|r| r.success).count();
            info!(
                "[{}]: Status {} published to {}/{} platforms",
                self.name,
                post.source_id,
                succeeded,
                results.len()
            );
            // Dropping the post deletes its media files
            drop(post);
        }

        queue.close();
        let mut discarded = 0;
        while queue.try_recv().is_ok() {
            discarded += 1;
        }
        if discarded > 0 {
            debug!("[{}]: Discarded {} queued posts", self.name, discarded);
        }
        debug!("[{}]: Publishing stopped", self.name);
    }
}
