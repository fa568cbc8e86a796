use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use sftpsync_core::{Credentials, RemoteError, RemoteStore, SftpStore};
use tokio_util::sync::CancellationToken;

use crate::config::SyncConfig;
use crate::sync::backoff::RetryPolicy;
use crate::sync::{Coordinator, FolderProcessor, RunReport};

const RETRY_BASE_DELAY: Duration = Duration::from_secs(1);
const RETRY_MAX_DELAY: Duration = Duration::from_secs(10);

/// One configured run: a connected store plus the settings to drive it.
pub struct App<S> {
    config: SyncConfig,
    store: Arc<S>,
}

impl App<SftpStore> {
    /// Opens the session pool, retrying refused or dropped connections.
    /// Authentication failures are not retried.
    pub async fn bootstrap(config: SyncConfig, credentials: &Credentials) -> anyhow::Result<Self> {
        let policy = RetryPolicy::new(
            config.connect_attempts,
            RETRY_BASE_DELAY,
            RETRY_MAX_DELAY,
            true,
        );
        let options = config.sftp_options();
        tracing::info!(
            server = %credentials.address(),
            user = %credentials.username,
            sessions = options.pool_size,
            "connecting"
        );
        let store = policy
            .retry(
                |_| SftpStore::connect(credentials, options),
                |err: &RemoteError| !matches!(err, RemoteError::Auth { .. }),
            )
            .await
            .with_context(|| format!("failed to connect to {}", credentials.address()))?;
        tracing::info!(server = %store.address(), "connected");
        Ok(Self::with_store(config, Arc::new(store)))
    }
}

impl<S: RemoteStore + 'static> App<S> {
    pub fn with_store(config: SyncConfig, store: Arc<S>) -> Self {
        Self { config, store }
    }

    /// Runs one reconciliation pass and closes the sessions afterwards,
    /// whatever the outcome. `shutdown` stops scheduling and cancels
    /// transfers in progress.
    pub async fn run(self, shutdown: CancellationToken) -> anyhow::Result<RunReport> {
        if self.config.force_download {
            tracing::debug!("force_download is set but has no effect");
        }
        let processor = FolderProcessor::new(
            Arc::clone(&self.store),
            self.config.processor_config(),
            shutdown.clone(),
        );
        let coordinator = Coordinator::new(
            processor,
            &self.config.local_root,
            self.config.workers,
            shutdown,
        );

        let result = coordinator.run().await;
        if let Err(err) = self.store.close().await {
            tracing::warn!(error = %err, "failed to close remote sessions");
        }
        result.with_context(|| {
            format!(
                "cannot reconcile local root {}",
                self.config.local_root.display()
            )
        })
    }
}

/// Emits the failed folders (warn) and the summary block (info).
pub fn log_report(report: &RunReport) {
    for (folder, failure) in &report.failures {
        tracing::warn!(
            folder = %folder.display(),
            kind = %failure.kind,
            error = %failure.message,
            "folder finished with errors"
        );
    }
    for line in report.summary_lines() {
        tracing::info!("{line}");
    }
}
