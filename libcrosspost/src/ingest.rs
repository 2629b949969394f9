//! Stream ingestion and filtering
//!
//! Reads events from a [`StatusSource`], keeps the account's own direct,
//! original, non-empty statuses and turns them into [`NormalizedPost`]s on
//! the publish queue.

use std::fmt;
use tokio::sync::mpsc;
use tracing::{debug, error, trace};

use crate::media::MediaDownloader;
use crate::shutdown::Shutdown;
use crate::stream::StatusSource;
use crate::transform::ContentTransformer;
use crate::types::{NormalizedPost, SourceStatus, StreamEvent, Visibility};

/// Why a status was not forwarded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    OtherAuthor,
    NotDirect,
    Reblog,
    Reply,
    EmptyContent,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            Rejection::OtherAuthor => "posted by another account",
            Rejection::NotDirect => "visibility is not direct",
            Rejection::Reblog => "is a reblog",
            Rejection::Reply => "is a reply",
            Rejection::EmptyContent => "has no content",
        };
        f.write_str(reason)
    }
}

/// Decide whether a status is mirrored for the account `identity`
///
/// Checks run in a fixed order and the first failing one is reported.
pub fn check_status(status: &SourceStatus, identity: &str) -> Result<(), Rejection> {
    if status.account_id != identity {
        return Err(Rejection::OtherAuthor);
    }
    if status.visibility != Visibility::Direct {
        return Err(Rejection::NotDirect);
    }
    if status.is_reblog {
        return Err(Rejection::Reblog);
    }
    if status.in_reply_to_id.is_some() || status.in_reply_to_account_id.is_some() {
        return Err(Rejection::Reply);
    }
    if status.content.is_empty() {
        return Err(Rejection::EmptyContent);
    }
    Ok(())
}

/// Turns accepted statuses into queued posts for one pipeline
pub struct Ingestor {
    name: String,
    identity: String,
    transformer: ContentTransformer,
    downloader: MediaDownloader,
}

impl Ingestor {
    pub fn new(
        name: String,
        identity: String,
        transformer: ContentTransformer,
        downloader: MediaDownloader,
    ) -> Self {
        Self {
            name,
            identity,
            transformer,
            downloader,
        }
    }

    /// Download media and transform the content of a status
    ///
    /// Returns `None` for statuses that do not pass [`check_status`].
    pub async fn prepare(&self, status: SourceStatus) -> Option<NormalizedPost> {
        if let Err(reason) = check_status(&status, &self.identity) {
            debug!("[{}]: Ignoring status {}: {}", self.name, status.id, reason);
            return None;
        }

        let media = self
            .downloader
            .download_all(&status.id, &status.attachments)
            .await;
        let content = self.transformer.transform(&status.id, &status.content);
        debug!(
            "[{}]: Status {} ready with {} media",
            self.name,
            status.id,
            media.len()
        );
        Some(NormalizedPost::new(status.id, content, media))
    }

    /// Read `source` until it ends or shutdown is signalled
    ///
    /// Blocks on `queue` while it is full. A post waiting for queue space
    /// when shutdown arrives is dropped along with its media.
    pub async fn run<S>(
        &self,
        mut source: S,
        queue: mpsc::Sender<NormalizedPost>,
        mut shutdown: Shutdown,
    ) where
        S: StatusSource,
    {
        debug!("[{}]: Ingestion started", self.name);
        loop {
            let event = tokio::select! {
                biased;
                _ = shutdown.triggered() => break,
                event = source.next_event() => event,
            };

            let status = match event {
                None => {
                    debug!("[{}]: Stream source ended", self.name);
                    break;
                }
                Some(StreamEvent::Error(message)) => {
                    error!("[{}]: Stream error: {}", self.name, message);
                    continue;
                }
                Some(StreamEvent::Other) => {
                    trace!("[{}]: Ignoring stream control message", self.name);
                    continue;
                }
                Some(StreamEvent::Update(status)) => status,
            };

            let Some(post) = self.prepare(status).await else {
                continue;
            };

            let source_id = post.source_id.clone();
            tokio::select! {
                biased;
                _ = shutdown.triggered() => {
                    debug!("[{}]: Dropping status {} on shutdown", self.name, source_id);
                    break;
                }
                sent = queue.send(post) => {
                    if sent.is_err() {
                        debug!("[{}]: Publish queue closed", self.name);
                        break;
                    }
                    trace!("[{}]: Queued status {}", self.name, source_id);
                }
            }
        }
        debug!("[{}]: Ingestion stopped", self.name);
    }
}
