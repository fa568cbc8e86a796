use std::path::{Path, PathBuf};
use std::sync::Arc;

use sftpsync_core::{ErrorClass, RemoteEntry, RemoteStore};
use time::format_description::well_known::Rfc3339;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use super::error::{ErrorKind, SyncError};
use super::paths::remote_folder_for;
use super::retention::RetentionEnforcer;
use super::selection::{Selection, select_latest};
use super::transfer::{Fetched, TransferConfig, TransferEngine, TransferError};

/// Steps a leaf folder goes through. `Done` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FolderStage {
    Mapped,
    Listed,
    Selected,
    Skipped,
    Fetched,
    Pruned,
    Done,
    Failed(ErrorKind),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderFailure {
    pub kind: ErrorKind,
    /// Last stage reached before the failure.
    pub after: FolderStage,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct FolderOutcome {
    pub folder: PathBuf,
    pub remote: String,
    pub selected: Option<String>,
    pub downloaded: bool,
    pub bytes_transferred: u64,
    pub files_deleted: usize,
    pub stage: FolderStage,
    pub error: Option<FolderFailure>,
}

impl FolderOutcome {
    fn new(folder: &Path, remote: String) -> Self {
        Self {
            folder: folder.to_path_buf(),
            remote,
            selected: None,
            downloaded: false,
            bytes_transferred: 0,
            files_deleted: 0,
            stage: FolderStage::Mapped,
            error: None,
        }
    }

    fn fail(mut self, err: &SyncError) -> Self {
        let kind = err.kind();
        tracing::warn!(kind = %kind, error = %err, "folder failed");
        self.error = Some(FolderFailure {
            kind,
            after: self.stage,
            message: err.to_string(),
        });
        self.stage = FolderStage::Failed(kind);
        self
    }

    fn finish(mut self) -> Self {
        tracing::debug!(stage = ?self.stage, "folder done");
        self.stage = FolderStage::Done;
        self
    }

    pub fn is_failed(&self) -> bool {
        self.error.is_some()
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(|failure| failure.kind)
    }
}

#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    pub local_root: PathBuf,
    pub remote_root: String,
    pub keep_latest_only: bool,
    pub transfer: TransferConfig,
}

/// Reconciles one leaf folder: map, list, select, fetch, prune.
///
/// Recoverable failures end up in the returned [`FolderOutcome`]; only
/// errors that make the whole run pointless (lost session, impossible path
/// mapping) come back as `Err`.
pub struct FolderProcessor<S> {
    store: Arc<S>,
    transfer: TransferEngine<S>,
    retention: RetentionEnforcer,
    local_root: PathBuf,
    remote_root: String,
}

impl<S: RemoteStore> FolderProcessor<S> {
    pub fn new(store: Arc<S>, config: ProcessorConfig, cancel: CancellationToken) -> Self {
        Self {
            transfer: TransferEngine::new(Arc::clone(&store), config.transfer, cancel),
            store,
            retention: RetentionEnforcer::new(config.keep_latest_only),
            local_root: config.local_root,
            remote_root: config.remote_root,
        }
    }

    #[cfg(test)]
    pub(crate) fn with_retention(mut self, retention: RetentionEnforcer) -> Self {
        self.retention = retention;
        self
    }

    pub async fn process(&self, leaf: &Path) -> Result<FolderOutcome, SyncError> {
        let remote = remote_folder_for(leaf, &self.local_root, &self.remote_root)?;
        let span = tracing::info_span!("folder", local = %leaf.display(), remote = %remote);
        self.process_mapped(leaf, remote).instrument(span).await
    }

    async fn process_mapped(
        &self,
        leaf: &Path,
        remote: String,
    ) -> Result<FolderOutcome, SyncError> {
        let mut outcome = FolderOutcome::new(leaf, remote);
        tracing::info!("processing folder");

        let entries = match self.list_remote(&outcome.remote).await {
            Ok(entries) => entries,
            Err(err) if err.is_fatal() => return Err(err),
            Err(err) => return Ok(outcome.fail(&err)),
        };
        outcome.stage = FolderStage::Listed;

        let winner = match select_latest(&entries) {
            Selection::Winner(entry) => entry,
            Selection::Empty => {
                tracing::info!("no remote files, local folder left untouched");
                return Ok(outcome.finish());
            }
        };
        outcome.stage = FolderStage::Selected;
        outcome.selected = Some(winner.name.clone());
        tracing::info!(
            file = %winner.name,
            size = winner.size,
            modified = %winner.modified_at.format(&Rfc3339).unwrap_or_default(),
            "newest remote file"
        );

        match self.transfer.fetch(&outcome.remote, &winner, leaf).await {
            Ok(Fetched::Current) => {
                tracing::info!(file = %winner.name, "already present locally, not downloaded");
                outcome.stage = FolderStage::Skipped;
            }
            Ok(Fetched::Downloaded(bytes)) => {
                tracing::info!(file = %winner.name, bytes, "downloaded");
                outcome.downloaded = true;
                outcome.bytes_transferred = bytes;
                outcome.stage = FolderStage::Fetched;
            }
            Err(err) => {
                let err = download_error(&winner, err);
                if err.is_fatal() {
                    return Err(err);
                }
                return Ok(outcome.fail(&err));
            }
        }

        match self.retention.prune(leaf, &winner.name).await {
            Ok(deleted) => {
                outcome.files_deleted = deleted;
                if deleted > 0 {
                    tracing::info!(deleted, "old files removed");
                } else {
                    tracing::debug!("no old files to remove");
                }
            }
            Err(err) => {
                if let SyncError::Cleanup { deleted, .. } = &err {
                    outcome.files_deleted = *deleted;
                }
                return Ok(outcome.fail(&err));
            }
        }
        outcome.stage = FolderStage::Pruned;
        Ok(outcome.finish())
    }

    /// Lists `remote`; a dead session is a connection error, any other
    /// failure makes the folder unavailable. The store bounds the listing
    /// time once it has a session for it.
    pub async fn list_remote(&self, remote: &str) -> Result<Vec<RemoteEntry>, SyncError> {
        self.store.list(remote).await.map_err(|err| match err.classification() {
            ErrorClass::Connection => SyncError::Connection(format!("listing {remote}: {err}")),
            ErrorClass::NotFound | ErrorClass::Transfer => {
                SyncError::RemoteNotFound(format!("{remote}: {err}"))
            }
        })
    }
}

fn download_error(winner: &RemoteEntry, err: TransferError) -> SyncError {
    if err.is_connection_loss() {
        SyncError::Connection(format!("downloading {}: {err}", winner.name))
    } else {
        SyncError::Download {
            name: winner.name.clone(),
            reason: err.to_string(),
        }
    }
}

#[cfg(test)]
#[path = "processor_tests.rs"]
mod tests;
