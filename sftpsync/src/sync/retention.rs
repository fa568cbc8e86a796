use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use super::error::SyncError;

pub(crate) type RemoveFuture = Pin<Box<dyn Future<Output = io::Result<()>> + Send>>;

/// Deletes one superseded file.
pub(crate) type Remover = fn(PathBuf) -> RemoveFuture;

fn remove_file(path: PathBuf) -> RemoveFuture {
    Box::pin(async move { tokio::fs::remove_file(path).await })
}

/// Removes every non-directory entry of a leaf folder except the one to keep.
#[derive(Debug, Clone, Copy)]
pub struct RetentionEnforcer {
    enabled: bool,
    remove: Remover,
}

impl RetentionEnforcer {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            remove: remove_file,
        }
    }

    #[cfg(test)]
    pub(crate) fn with_remover(enabled: bool, remove: Remover) -> Self {
        Self { enabled, remove }
    }

    /// Returns how many entries were removed. Directories are never touched.
    /// Every candidate is attempted; the first failure is reported together
    /// with the number of successful removals.
    pub async fn prune(&self, local_leaf: &Path, keep_name: &str) -> Result<usize, SyncError> {
        if !self.enabled {
            return Ok(0);
        }

        let mut entries = tokio::fs::read_dir(local_leaf)
            .await
            .map_err(|err| SyncError::filesystem(local_leaf, err))?;
        let mut deleted = 0usize;
        let mut failed = 0usize;
        let mut first_error = None;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|err| SyncError::filesystem(local_leaf, err))?
        {
            if entry.file_name() == keep_name {
                continue;
            }
            match entry.file_type().await {
                Ok(ty) if ty.is_dir() => continue,
                Ok(_) => {}
                Err(err) => {
                    failed += 1;
                    first_error.get_or_insert(err);
                    continue;
                }
            }

            let path = entry.path();
            match (self.remove)(path.clone()).await {
                Ok(()) => {
                    deleted += 1;
                    tracing::info!(path = %path.display(), "removed superseded file");
                }
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %err, "could not remove superseded file");
                    failed += 1;
                    first_error.get_or_insert(err);
                }
            }
        }

        match first_error {
            None => Ok(deleted),
            Some(source) => Err(SyncError::Cleanup {
                folder: local_leaf.to_path_buf(),
                deleted,
                failed,
                source,
            }),
        }
    }
}

/// Refuses to delete files whose name starts with `locked`, like a file
/// held open by another process.
#[cfg(test)]
pub(crate) fn refuse_locked(path: PathBuf) -> RemoveFuture {
    Box::pin(async move {
        let locked = path
            .file_name()
            .is_some_and(|name| name.to_string_lossy().starts_with("locked"));
        if locked {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "file is in use",
            ));
        }
        tokio::fs::remove_file(path).await
    })
}
