use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use crate::store::{RemoteEntry, RemoteError, RemoteReader, RemoteStore};

const CHUNK_SIZE: usize = 64;

/// Failure injected into a [`MemoryStore`] path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// The session is gone; the request reports a connection loss.
    ConnectionLost,
    /// The request fails but the session stays usable.
    Broken,
}

#[derive(Debug, Clone)]
struct StoredFile {
    data: Vec<u8>,
    mtime: u64,
    listed_size: Option<u64>,
}

#[derive(Debug, Default)]
struct State {
    folders: HashMap<String, BTreeMap<String, StoredFile>>,
    list_faults: HashMap<String, Fault>,
    open_faults: HashMap<String, Fault>,
    lists: usize,
    opens: usize,
    closed: bool,
}

/// In-memory remote store with fault injection, for exercising the sync
/// engine without an SSH server.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_folder(&self, folder: &str) {
        self.state()
            .folders
            .entry(folder.to_string())
            .or_default();
    }

    pub fn put_file(&self, folder: &str, name: &str, data: impl Into<Vec<u8>>, mtime: u64) {
        self.state()
            .folders
            .entry(folder.to_string())
            .or_default()
            .insert(
                name.to_string(),
                StoredFile {
                    data: data.into(),
                    mtime,
                    listed_size: None,
                },
            );
    }

    /// Makes the listing of `folder` advertise `size` for `name` while the
    /// body keeps its real length.
    pub fn misreport_size(&self, folder: &str, name: &str, size: u64) {
        if let Some(file) = self
            .state()
            .folders
            .get_mut(folder)
            .and_then(|files| files.get_mut(name))
        {
            file.listed_size = Some(size);
        }
    }

    pub fn fail_list(&self, folder: &str, fault: Fault) {
        self.state().list_faults.insert(folder.to_string(), fault);
    }

    /// Fails the download of `path` after the first chunk has been sent.
    pub fn fail_download(&self, path: &str, fault: Fault) {
        self.state().open_faults.insert(path.to_string(), fault);
    }

    pub fn list_count(&self) -> usize {
        self.state().lists
    }

    pub fn open_count(&self) -> usize {
        self.state().opens
    }

    pub fn is_closed(&self) -> bool {
        self.state().closed
    }

    fn state(&self) -> MutexGuard<'_, State> {
        // A panicking test thread must not hide the store from the others.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn fault_error(fault: Fault, path: &str) -> RemoteError {
    match fault {
        Fault::ConnectionLost => RemoteError::Connection(format!("connection dropped at {path}")),
        Fault::Broken => RemoteError::Io(std::io::Error::other(format!("read failed at {path}"))),
    }
}

fn split_remote(path: &str) -> (&str, &str) {
    match path.rsplit_once('/') {
        Some(("", name)) => ("/", name),
        Some((folder, name)) => (folder, name),
        None => ("", path),
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn list(&self, folder: &str) -> Result<Vec<RemoteEntry>, RemoteError> {
        let mut state = self.state();
        if state.closed {
            return Err(RemoteError::Closed);
        }
        state.lists += 1;
        if let Some(fault) = state.list_faults.get(folder) {
            return Err(fault_error(*fault, folder));
        }
        let files = state
            .folders
            .get(folder)
            .ok_or_else(|| RemoteError::NotFound(folder.to_string()))?;
        Ok(files
            .iter()
            .map(|(name, file)| {
                RemoteEntry::from_unix(
                    name.clone(),
                    file.listed_size.unwrap_or(file.data.len() as u64),
                    file.mtime,
                )
            })
            .collect())
    }

    async fn open(&self, path: &str) -> Result<RemoteReader, RemoteError> {
        let mut state = self.state();
        if state.closed {
            return Err(RemoteError::Closed);
        }
        state.opens += 1;
        let (folder, name) = split_remote(path);
        let file = state
            .folders
            .get(folder)
            .and_then(|files| files.get(name))
            .cloned()
            .ok_or_else(|| RemoteError::NotFound(path.to_string()))?;
        let fault = state.open_faults.get(path).copied();

        let chunks: Vec<&[u8]> = file.data.chunks(CHUNK_SIZE).collect();
        let (tx, reader) = RemoteReader::channel(chunks.len() + 1);
        match fault {
            Some(fault) => {
                if let Some(first) = chunks.first() {
                    let _ = tx.try_send(Ok(first.to_vec()));
                }
                let _ = tx.try_send(Err(fault_error(fault, path)));
            }
            None => {
                for chunk in chunks {
                    let _ = tx.try_send(Ok(chunk.to_vec()));
                }
            }
        }
        Ok(reader)
    }

    async fn close(&self) -> Result<(), RemoteError> {
        self.state().closed = true;
        Ok(())
    }
}
