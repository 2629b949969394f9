//! Per-account pipeline: one ingestion task and one publish task joined by a
//! bounded queue

use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, info_span, Instrument};

use crate::config::AccountConfig;
use crate::error::{PlatformError, Result};
use crate::ingest::Ingestor;
use crate::media::MediaDownloader;
use crate::publishers::{build_publishers, Publisher};
use crate::queue::{publish_queue, PublishLoop};
use crate::shutdown::Shutdown;
use crate::stream::mastodon::{MastodonConnection, MastodonSource};
use crate::stream::StatusSource;
use crate::transform::ContentTransformer;

/// HTTP client shared by a pipeline's media downloads and publishers
pub fn build_http_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("crosspost/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| PlatformError::Network(format!("Cannot build HTTP client: {}", e)).into())
}

/// A configured account, ready to start
pub struct AccountPipeline<S> {
    name: String,
    ingestor: Ingestor,
    publisher: PublishLoop,
    source: S,
}

impl AccountPipeline<MastodonSource> {
    /// Resolve the Mastodon identity, log in to publishers and open the stream
    ///
    /// # Errors
    ///
    /// Fails on invalid rewrite rules, rejected credentials or an
    /// unreachable Mastodon server.
    pub async fn connect(account: &AccountConfig, timeout: Duration) -> Result<Self> {
        let http = build_http_client(timeout)?;
        let transformer =
            ContentTransformer::from_config(&account.replace, account.prefix.as_deref())?;

        let mastodon = account.mastodon.as_ref().ok_or_else(|| {
            crate::error::ConfigError::MissingField("mastodon".to_string())
        })?;
        let connection = MastodonConnection::connect(mastodon).await?;
        let identity = connection.account().clone();
        info!(
            "Mirroring {} (id {}) from {}",
            identity.username, identity.id, mastodon.server
        );

        let publishers = build_publishers(account, &http).await?;
        Ok(Self::new(
            identity.username,
            identity.id,
            transformer,
            publishers,
            http,
            connection.into_source(),
        ))
    }
}

impl<S> AccountPipeline<S>
where
    S: StatusSource + 'static,
{
    pub fn new(
        name: String,
        identity: String,
        transformer: ContentTransformer,
        publishers: Vec<Box<dyn Publisher>>,
        http: reqwest::Client,
        source: S,
    ) -> Self {
        Self {
            ingestor: Ingestor::new(
                name.clone(),
                identity,
                transformer,
                MediaDownloader::new(http),
            ),
            publisher: PublishLoop::new(name.clone(), publishers),
            name,
            source,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Spawn the ingestion and publish tasks
    pub fn start(self, shutdown: Shutdown) -> PipelineHandle {
        let (sender, receiver) = publish_queue();
        let span = info_span!("pipeline", account = %self.name);

        let ingestor = self.ingestor;
        let source = self.source;
        let ingest_shutdown = shutdown.clone();
        let ingest = tokio::spawn(
            async move { ingestor.run(source, sender, ingest_shutdown).await }
                .instrument(span.clone()),
        );

        let publisher = self.publisher;
        let publish = tokio::spawn(
            async move { publisher.run(receiver, shutdown).await }.instrument(span),
        );

        PipelineHandle {
            name: self.name,
            ingest,
            publish,
        }
    }
}

/// Join handles of a running pipeline
pub struct PipelineHandle {
    name: String,
    ingest: JoinHandle<()>,
    publish: JoinHandle<()>,
}

impl PipelineHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Wait for both tasks to finish
    pub async fn wait(self) {
        let (ingest, publish) = tokio::join!(self.ingest, self.publish);
        if let Err(e) = ingest {
            error!("[{}]: Ingestion task failed: {}", self.name, e);
        }
        if let Err(e) = publish {
            error!("[{}]: Publish task failed: {}", self.name, e);
        }
    }
}
