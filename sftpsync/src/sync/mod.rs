pub mod backoff;
pub mod coordinator;
pub mod error;
pub mod paths;
pub mod processor;
pub mod retention;
pub mod selection;
pub mod summary;
pub mod transfer;
pub mod walker;

pub use coordinator::{AbortReason, Coordinator, RunReport, RunStatus};
pub use error::{ErrorKind, SyncError};
pub use processor::{FolderOutcome, FolderProcessor, ProcessorConfig};
pub use summary::RunSummary;
