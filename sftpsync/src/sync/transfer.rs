use std::{
    io,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use sftpsync_core::{RemoteEntry, RemoteError, RemoteStore, remote_join};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("remote error: {0}")]
    Remote(#[from] RemoteError),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("concurrency limiter is closed")]
    ConcurrencyClosed,
    #[error("download size check failed: expected {expected} bytes, got {actual}")]
    SizeMismatch { expected: u64, actual: u64 },
    #[error("download timed out after {0:?}")]
    TimedOut(Duration),
    #[error("download cancelled")]
    Cancelled,
}

impl TransferError {
    /// True when the session itself is gone, as opposed to one bad file.
    pub fn is_connection_loss(&self) -> bool {
        matches!(self, TransferError::Remote(err) if err.is_connection_loss())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TransferConfig {
    pub download_concurrency: usize,
    pub download_timeout: Duration,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            download_concurrency: 4,
            download_timeout: Duration::from_secs(600),
        }
    }
}

/// What [`TransferEngine::fetch`] did with the selected file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fetched {
    /// A copy with the same name and size was already in place.
    Current,
    /// The file was downloaded; carries the number of bytes written.
    Downloaded(u64),
}

/// Fetches a selected remote file into a local leaf folder. The file is
/// written to `<name>.partial` next to its destination and renamed only once
/// it is complete.
pub struct TransferEngine<S> {
    store: Arc<S>,
    download_limit: Arc<Semaphore>,
    download_timeout: Duration,
    cancel: CancellationToken,
}

impl<S: RemoteStore> TransferEngine<S> {
    pub fn new(store: Arc<S>, config: TransferConfig, cancel: CancellationToken) -> Self {
        Self {
            store,
            download_limit: Arc::new(Semaphore::new(config.download_concurrency.max(1))),
            download_timeout: config.download_timeout,
            cancel,
        }
    }

    pub async fn fetch(
        &self,
        remote_folder: &str,
        winner: &RemoteEntry,
        local_leaf: &Path,
    ) -> Result<Fetched, TransferError> {
        let target = local_leaf.join(&winner.name);
        if is_current(&target, winner.size).await? {
            tracing::debug!(file = %winner.name, "local copy is current, skipping download");
            return Ok(Fetched::Current);
        }

        let remote_path = remote_join(remote_folder, &winner.name);
        self.download_to_path(&remote_path, &target, winner.size)
            .await
            .map(Fetched::Downloaded)
    }

    async fn download_to_path(
        &self,
        remote_path: &str,
        target: &Path,
        expected_size: u64,
    ) -> Result<u64, TransferError> {
        let _permit = self
            .download_limit
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| TransferError::ConcurrencyClosed)?;

        let partial = partial_path(target);
        let result = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(TransferError::Cancelled),
            res = tokio::time::timeout(
                self.download_timeout,
                self.stream_to(remote_path, &partial, expected_size),
            ) => res.unwrap_or(Err(TransferError::TimedOut(self.download_timeout))),
        };

        match result {
            Ok(written) => {
                if let Err(err) = tokio::fs::rename(&partial, target).await {
                    let _ = tokio::fs::remove_file(&partial).await;
                    return Err(err.into());
                }
                Ok(written)
            }
            Err(err) => {
                let _ = tokio::fs::remove_file(&partial).await;
                Err(err)
            }
        }
    }

    async fn stream_to(
        &self,
        remote_path: &str,
        partial: &Path,
        expected_size: u64,
    ) -> Result<u64, TransferError> {
        let mut reader = self.store.open(remote_path).await?;
        let mut file = tokio::fs::File::create(partial).await?;
        let mut written = 0u64;

        while let Some(chunk) = reader.next_chunk().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }

        file.flush().await?;
        file.sync_all().await?;

        if written != expected_size {
            return Err(TransferError::SizeMismatch {
                expected: expected_size,
                actual: written,
            });
        }
        Ok(written)
    }
}

async fn is_current(target: &Path, size: u64) -> io::Result<bool> {
    match tokio::fs::metadata(target).await {
        Ok(meta) => Ok(meta.is_file() && meta.len() == size),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err),
    }
}

pub(crate) fn partial_path(target: &Path) -> PathBuf {
    target.with_extension(format!(
        "{}partial",
        target
            .extension()
            .map(|ext| format!("{}.", ext.to_string_lossy()))
            .unwrap_or_default()
    ))
}
