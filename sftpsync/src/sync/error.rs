use std::fmt;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

use super::paths::PathError;

/// Error taxonomy of a reconciliation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Connection,
    RemoteNotFound,
    Download,
    Filesystem,
    Config,
}

impl ErrorKind {
    /// Fatal kinds stop the whole run; the rest stay inside one folder.
    pub fn is_fatal(self) -> bool {
        matches!(self, ErrorKind::Connection | ErrorKind::Config)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Connection => "connection",
            ErrorKind::RemoteNotFound => "remote_not_found",
            ErrorKind::Download => "download",
            ErrorKind::Filesystem => "filesystem",
            ErrorKind::Config => "config",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("connection lost: {0}")]
    Connection(String),
    #[error("remote folder unavailable: {0}")]
    RemoteNotFound(String),
    #[error("download of {name} failed: {reason}")]
    Download { name: String, reason: String },
    #[error("filesystem error at {}: {source}", path.display())]
    Filesystem {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("removed {deleted} old files in {} but {failed} could not be deleted: {source}", folder.display())]
    Cleanup {
        folder: PathBuf,
        deleted: usize,
        failed: usize,
        #[source]
        source: io::Error,
    },
    #[error("invalid path mapping: {0}")]
    Config(#[from] PathError),
}

impl SyncError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::Connection(_) => ErrorKind::Connection,
            SyncError::RemoteNotFound(_) => ErrorKind::RemoteNotFound,
            SyncError::Download { .. } => ErrorKind::Download,
            SyncError::Filesystem { .. } | SyncError::Cleanup { .. } => ErrorKind::Filesystem,
            SyncError::Config(_) => ErrorKind::Config,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.kind().is_fatal()
    }

    pub(crate) fn filesystem(path: impl Into<PathBuf>, source: io::Error) -> Self {
        SyncError::Filesystem {
            path: path.into(),
            source,
        }
    }
}
