mod auth;
#[cfg(any(test, feature = "test-util"))]
mod memory;
mod pool;
mod sftp;
mod store;

pub use auth::Credentials;
#[cfg(any(test, feature = "test-util"))]
pub use memory::{Fault, MemoryStore};
pub use sftp::{SftpOptions, SftpStore};
pub use store::{
    Chunk, ChunkSender, ErrorClass, RemoteEntry, RemoteError, RemoteReader, RemoteStore,
    remote_join,
};
