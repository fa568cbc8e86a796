use std::io;

use async_trait::async_trait;
use ssh2::ErrorCode;
use thiserror::Error;
use time::OffsetDateTime;
use tokio::sync::mpsc;

// libssh2 SFTP status codes that mean "there is nothing at this path".
const FX_NO_SUCH_FILE: i32 = 2;
const FX_NO_SUCH_PATH: i32 = 10;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("connection failed: {0}")]
    Connection(String),
    #[error("authentication rejected for {user}: {reason}")]
    Auth { user: String, reason: String },
    #[error("remote path not found: {0}")]
    NotFound(String),
    #[error("ssh error: {0}")]
    Ssh(#[from] ssh2::Error),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("session task failed: {0}")]
    Task(String),
    #[error("remote store is closed")]
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The session can no longer serve requests.
    Connection,
    NotFound,
    /// The request failed but the session is still usable.
    Transfer,
}

impl RemoteError {
    pub fn classification(&self) -> ErrorClass {
        match self {
            RemoteError::Connection(_)
            | RemoteError::Auth { .. }
            | RemoteError::Task(_)
            | RemoteError::Closed => ErrorClass::Connection,
            RemoteError::NotFound(_) => ErrorClass::NotFound,
            RemoteError::Ssh(err) => classify_ssh_code(err.code()),
            RemoteError::Io(err) => classify_io_kind(err.kind()),
        }
    }

    pub fn is_connection_loss(&self) -> bool {
        self.classification() == ErrorClass::Connection
    }
}

fn classify_ssh_code(code: ErrorCode) -> ErrorClass {
    match code {
        ErrorCode::SFTP(FX_NO_SUCH_FILE | FX_NO_SUCH_PATH) => ErrorClass::NotFound,
        ErrorCode::SFTP(_) => ErrorClass::Transfer,
        ErrorCode::Session(_) => ErrorClass::Connection,
    }
}

fn classify_io_kind(kind: io::ErrorKind) -> ErrorClass {
    match kind {
        io::ErrorKind::NotFound => ErrorClass::NotFound,
        io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::NotConnected
        | io::ErrorKind::BrokenPipe
        | io::ErrorKind::UnexpectedEof => ErrorClass::Connection,
        _ => ErrorClass::Transfer,
    }
}

/// A regular file listed in a remote folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    pub name: String,
    pub size: u64,
    pub modified_at: OffsetDateTime,
}

impl RemoteEntry {
    pub fn new(name: impl Into<String>, size: u64, modified_at: OffsetDateTime) -> Self {
        Self {
            name: name.into(),
            size,
            modified_at,
        }
    }

    /// Builds an entry from an SFTP-style mtime in seconds since the epoch.
    pub fn from_unix(name: impl Into<String>, size: u64, mtime: u64) -> Self {
        let modified_at = i64::try_from(mtime)
            .ok()
            .and_then(|secs| OffsetDateTime::from_unix_timestamp(secs).ok())
            .unwrap_or(OffsetDateTime::UNIX_EPOCH);
        Self::new(name, size, modified_at)
    }
}

pub type Chunk = Result<Vec<u8>, RemoteError>;

/// Sending half used by store implementations to feed a [`RemoteReader`].
pub type ChunkSender = mpsc::Sender<Chunk>;

/// Streamed body of a remote file. Dropping it tells the producer to stop.
#[derive(Debug)]
pub struct RemoteReader {
    chunks: mpsc::Receiver<Chunk>,
}

impl RemoteReader {
    pub fn channel(buffer: usize) -> (ChunkSender, Self) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (tx, Self { chunks: rx })
    }

    pub async fn next_chunk(&mut self) -> Option<Chunk> {
        self.chunks.recv().await
    }
}

/// Session-level primitives of the remote file store.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Lists the regular files of `folder`.
    async fn list(&self, folder: &str) -> Result<Vec<RemoteEntry>, RemoteError>;

    async fn open(&self, path: &str) -> Result<RemoteReader, RemoteError>;

    async fn close(&self) -> Result<(), RemoteError>;
}

/// Joins a remote folder and an entry name with a single `/`.
pub fn remote_join(folder: &str, name: &str) -> String {
    format!("{}/{}", folder.trim_end_matches('/'), name)
}
