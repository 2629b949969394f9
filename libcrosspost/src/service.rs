//! Service facade running every configured account
//!
//! # Example
//!
//! ```no_run
//! use libcrosspost::service::CrossPost;
//! use libcrosspost::shutdown::shutdown_channel;
//! use libcrosspost::Config;
//!
//! # async fn example() -> libcrosspost::Result<()> {
//! let config = Config::load()?;
//! let service = CrossPost::connect(&config).await?;
//!
//! let (trigger, shutdown) = shutdown_channel();
//! tokio::spawn(async move {
//!     tokio::signal::ctrl_c().await.ok();
//!     trigger.trigger();
//! });
//! service.run(shutdown).await;
//! # Ok(())
//! # }
//! ```

use futures::future::join_all;
use tracing::{error, info};

use crate::config::Config;
use crate::error::Result;
use crate::pipeline::AccountPipeline;
use crate::shutdown::Shutdown;
use crate::stream::mastodon::MastodonSource;
use crate::stream::StatusSource;

/// All account pipelines of one process
pub struct CrossPost {
    pipelines: Vec<AccountPipeline<MastodonSource>>,
}

impl CrossPost {
    /// Set up every account in `config`
    ///
    /// # Errors
    ///
    /// The first account that fails to set up aborts the whole service.
    pub async fn connect(config: &Config) -> Result<Self> {
        let timeout = config.timeout()?;
        let mut pipelines = Vec::with_capacity(config.accounts.len());
        for (index, account) in config.accounts.iter().enumerate() {
            let pipeline = AccountPipeline::connect(account, timeout)
                .await
                .inspect_err(|e| error!("Account #{} setup failed: {}", index, e))?;
            pipelines.push(pipeline);
        }
        Ok(Self { pipelines })
    }

    pub fn len(&self) -> usize {
        self.pipelines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pipelines.is_empty()
    }

    /// Run until shutdown, then wait for every pipeline task
    pub async fn run(self, shutdown: Shutdown) {
        run_pipelines(self.pipelines, shutdown).await
    }
}

/// Start `pipelines`, wait for shutdown and then for all their tasks
pub async fn run_pipelines<S>(pipelines: Vec<AccountPipeline<S>>, mut shutdown: Shutdown)
where
    S: StatusSource + 'static,
{
    let handles: Vec<_> = pipelines
        .into_iter()
        .map(|pipeline| {
            info!("Starting pipeline {}", pipeline.name());
            pipeline.start(shutdown.clone())
        })
        .collect();
    info!("{} pipelines running", handles.len());

    shutdown.triggered().await;
    info!("Shutting down, waiting for {} pipelines", handles.len());

    join_all(handles.into_iter().map(|handle| handle.wait())).await;
    info!("All pipelines stopped");
}
