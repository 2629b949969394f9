//! Inbound status streams
//!
//! Ingestion reads [`StreamEvent`]s through the [`StatusSource`] trait so the
//! pipeline does not depend on a particular streaming client. The Mastodon
//! user stream is provided by [`mastodon::MastodonSource`]; a plain
//! `mpsc::Receiver<StreamEvent>` is also a source, which is what tests use.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::types::StreamEvent;

pub mod mastodon;

/// A long-lived sequence of stream events
#[async_trait]
pub trait StatusSource: Send {
    /// Wait for the next event
    ///
    /// Returns `None` once the source is exhausted and will never yield again.
    async fn next_event(&mut self) -> Option<StreamEvent>;
}

#[async_trait]
impl StatusSource for mpsc::Receiver<StreamEvent> {
    async fn next_event(&mut self) -> Option<StreamEvent> {
        self.recv().await
    }
}
