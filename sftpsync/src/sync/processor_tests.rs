use super::*;
use crate::sync::retention::refuse_locked;
use async_trait::async_trait;
use sftpsync_core::{Fault, MemoryStore, RemoteError, RemoteReader};
use std::time::Duration;
use tempfile::tempdir;

fn config(local_root: &Path, keep_latest_only: bool) -> ProcessorConfig {
    ProcessorConfig {
        local_root: local_root.to_path_buf(),
        remote_root: "/".into(),
        keep_latest_only,
        transfer: TransferConfig::default(),
    }
}

fn processor(store: &Arc<MemoryStore>, local_root: &Path) -> FolderProcessor<MemoryStore> {
    FolderProcessor::new(
        Arc::clone(store),
        config(local_root, true),
        CancellationToken::new(),
    )
}

fn leaf(root: &Path, name: &str) -> PathBuf {
    let path = root.join(name);
    std::fs::create_dir_all(&path).unwrap();
    path
}

fn names(dir: &Path) -> Vec<String> {
    let mut out: Vec<_> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    out.sort();
    out
}

#[tokio::test]
async fn downloads_newest_and_keeps_only_it() {
    let store = Arc::new(MemoryStore::new());
    store.put_file("/a", "report_v1.csv", vec![1u8; 100], 1);
    store.put_file("/a", "report_v2.csv", vec![2u8; 150], 2);
    let root = tempdir().unwrap();
    let a = leaf(root.path(), "a");

    let outcome = processor(&store, root.path()).process(&a).await.unwrap();

    assert_eq!(outcome.remote, "/a");
    assert_eq!(outcome.selected.as_deref(), Some("report_v2.csv"));
    assert!(outcome.downloaded);
    assert_eq!(outcome.bytes_transferred, 150);
    assert_eq!(outcome.files_deleted, 0);
    assert_eq!(outcome.stage, FolderStage::Done);
    assert!(!outcome.is_failed());
    assert_eq!(names(&a), vec!["report_v2.csv"]);
}

#[tokio::test]
async fn second_pass_changes_nothing() {
    let store = Arc::new(MemoryStore::new());
    store.put_file("/a", "report_v1.csv", vec![1u8; 100], 1);
    store.put_file("/a", "report_v2.csv", vec![2u8; 150], 2);
    let root = tempdir().unwrap();
    let a = leaf(root.path(), "a");
    let processor = processor(&store, root.path());

    processor.process(&a).await.unwrap();
    let again = processor.process(&a).await.unwrap();

    assert!(!again.downloaded);
    assert_eq!(again.bytes_transferred, 0);
    assert_eq!(again.files_deleted, 0);
    assert_eq!(store.open_count(), 1);
    assert_eq!(names(&a), vec!["report_v2.csv"]);
}

#[tokio::test]
async fn stale_local_files_are_pruned_after_download() {
    let store = Arc::new(MemoryStore::new());
    store.put_file("/a", "report_v2.csv", vec![2u8; 150], 2);
    let root = tempdir().unwrap();
    let a = leaf(root.path(), "a");
    std::fs::write(a.join("report_v1.csv"), vec![1u8; 100]).unwrap();
    std::fs::write(a.join("report_v0.csv"), vec![0u8; 80]).unwrap();

    let outcome = processor(&store, root.path()).process(&a).await.unwrap();

    assert!(outcome.downloaded);
    assert_eq!(outcome.files_deleted, 2);
    assert_eq!(names(&a), vec!["report_v2.csv"]);
}

#[tokio::test]
async fn empty_remote_folder_leaves_local_untouched() {
    let store = Arc::new(MemoryStore::new());
    store.add_folder("/a");
    let root = tempdir().unwrap();
    let a = leaf(root.path(), "a");
    std::fs::write(a.join("keep_me.txt"), b"k").unwrap();

    let outcome = processor(&store, root.path()).process(&a).await.unwrap();

    assert!(!outcome.is_failed());
    assert!(outcome.selected.is_none());
    assert_eq!(outcome.stage, FolderStage::Done);
    assert_eq!(names(&a), vec!["keep_me.txt"]);
}

#[tokio::test]
async fn missing_remote_folder_is_a_folder_error() {
    let store = Arc::new(MemoryStore::new());
    let root = tempdir().unwrap();
    let b = leaf(root.path(), "b");
    std::fs::write(b.join("old.csv"), b"o").unwrap();

    let outcome = processor(&store, root.path()).process(&b).await.unwrap();

    assert_eq!(outcome.error_kind(), Some(ErrorKind::RemoteNotFound));
    assert_eq!(outcome.stage, FolderStage::Failed(ErrorKind::RemoteNotFound));
    assert_eq!(names(&b), vec!["old.csv"]);
}

#[tokio::test]
async fn lost_session_while_listing_is_fatal() {
    let store = Arc::new(MemoryStore::new());
    store.fail_list("/c", Fault::ConnectionLost);
    let root = tempdir().unwrap();
    let c = leaf(root.path(), "c");

    let err = processor(&store, root.path()).process(&c).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Connection);
}

#[tokio::test]
async fn failed_download_skips_retention() {
    let store = Arc::new(MemoryStore::new());
    store.put_file("/a", "new.bin", vec![3u8; 300], 5);
    store.fail_download("/a/new.bin", Fault::Broken);
    let root = tempdir().unwrap();
    let a = leaf(root.path(), "a");
    std::fs::write(a.join("old.bin"), b"old").unwrap();

    let outcome = processor(&store, root.path()).process(&a).await.unwrap();

    assert_eq!(outcome.error_kind(), Some(ErrorKind::Download));
    let failure = outcome.error.as_ref().unwrap();
    assert_eq!(failure.after, FolderStage::Selected);
    assert!(!outcome.downloaded);
    assert_eq!(names(&a), vec!["old.bin"]);
}

#[tokio::test]
async fn size_mismatch_is_a_download_error() {
    let store = Arc::new(MemoryStore::new());
    store.put_file("/a", "new.bin", vec![3u8; 30], 5);
    store.misreport_size("/a", "new.bin", 31);
    let root = tempdir().unwrap();
    let a = leaf(root.path(), "a");

    let outcome = processor(&store, root.path()).process(&a).await.unwrap();

    assert_eq!(outcome.error_kind(), Some(ErrorKind::Download));
    assert!(names(&a).is_empty());
}

#[tokio::test]
async fn lost_session_while_downloading_is_fatal() {
    let store = Arc::new(MemoryStore::new());
    store.put_file("/a", "new.bin", vec![3u8; 300], 5);
    store.fail_download("/a/new.bin", Fault::ConnectionLost);
    let root = tempdir().unwrap();
    let a = leaf(root.path(), "a");

    let err = processor(&store, root.path()).process(&a).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Connection);
    assert!(names(&a).is_empty());
}

#[tokio::test]
async fn disabled_retention_keeps_older_files() {
    let store = Arc::new(MemoryStore::new());
    store.put_file("/a", "report_v2.csv", vec![2u8; 150], 2);
    let root = tempdir().unwrap();
    let a = leaf(root.path(), "a");
    std::fs::write(a.join("report_v1.csv"), vec![1u8; 100]).unwrap();

    let processor = FolderProcessor::new(
        Arc::clone(&store),
        config(root.path(), false),
        CancellationToken::new(),
    );
    let outcome = processor.process(&a).await.unwrap();

    assert!(outcome.downloaded);
    assert_eq!(outcome.files_deleted, 0);
    assert_eq!(names(&a), vec!["report_v1.csv", "report_v2.csv"]);
}

#[tokio::test]
async fn leaf_outside_root_is_a_config_error() {
    let store = Arc::new(MemoryStore::new());
    let root = tempdir().unwrap();
    let elsewhere = tempdir().unwrap();

    let err = processor(&store, root.path())
        .process(elsewhere.path())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Config);
    assert_eq!(store.list_count(), 0);
}

#[tokio::test]
async fn nested_leaf_maps_under_remote_root() {
    let store = Arc::new(MemoryStore::new());
    store.put_file("/exports/x/y", "data.csv", b"payload".to_vec(), 3);
    let root = tempdir().unwrap();
    let y = leaf(root.path(), "x/y");

    let processor = FolderProcessor::new(
        Arc::clone(&store),
        ProcessorConfig {
            remote_root: "/exports/".into(),
            ..config(root.path(), true)
        },
        CancellationToken::new(),
    );
    let outcome = processor.process(&y).await.unwrap();

    assert_eq!(outcome.remote, "/exports/x/y");
    assert_eq!(std::fs::read(y.join("data.csv")).unwrap(), b"payload");
}

#[tokio::test]
async fn empty_remote_file_counts_as_download() {
    let store = Arc::new(MemoryStore::new());
    store.put_file("/a", "empty.flag", Vec::new(), 5);
    let root = tempdir().unwrap();
    let a = leaf(root.path(), "a");

    let outcome = processor(&store, root.path()).process(&a).await.unwrap();

    assert!(outcome.downloaded);
    assert_eq!(outcome.bytes_transferred, 0);
    assert_eq!(outcome.stage, FolderStage::Done);
    assert_eq!(store.open_count(), 1);
    assert!(a.join("empty.flag").is_file());
}

#[tokio::test]
async fn locked_old_file_keeps_download_and_flags_cleanup() {
    let store = Arc::new(MemoryStore::new());
    store.put_file("/a", "new.csv", vec![4u8; 40], 9);
    let root = tempdir().unwrap();
    let a = leaf(root.path(), "a");
    std::fs::write(a.join("old.csv"), b"old").unwrap();
    std::fs::write(a.join("locked.csv"), b"busy").unwrap();

    let processor = processor(&store, root.path())
        .with_retention(RetentionEnforcer::with_remover(true, refuse_locked));
    let outcome = processor.process(&a).await.unwrap();

    assert!(outcome.downloaded);
    assert_eq!(outcome.bytes_transferred, 40);
    assert_eq!(outcome.files_deleted, 1);
    assert_eq!(outcome.error_kind(), Some(ErrorKind::Filesystem));
    assert_eq!(outcome.error.as_ref().unwrap().after, FolderStage::Fetched);
    assert_eq!(names(&a), vec!["locked.csv", "new.csv"]);
}

/// Listing waits before answering, like a session that is busy serving
/// another worker's download.
struct SlowListStore {
    inner: MemoryStore,
    delay: Duration,
}

#[async_trait]
impl RemoteStore for SlowListStore {
    async fn list(&self, folder: &str) -> Result<Vec<RemoteEntry>, RemoteError> {
        tokio::time::sleep(self.delay).await;
        self.inner.list(folder).await
    }

    async fn open(&self, path: &str) -> Result<RemoteReader, RemoteError> {
        self.inner.open(path).await
    }

    async fn close(&self) -> Result<(), RemoteError> {
        self.inner.close().await
    }
}

#[tokio::test]
async fn slow_listing_is_not_a_connection_error() {
    let inner = MemoryStore::new();
    inner.put_file("/a", "data.csv", b"late".to_vec(), 1);
    let store = Arc::new(SlowListStore {
        inner,
        delay: Duration::from_millis(300),
    });
    let root = tempdir().unwrap();
    let a = leaf(root.path(), "a");

    let processor =
        FolderProcessor::new(store, config(root.path(), true), CancellationToken::new());
    let outcome = processor.process(&a).await.unwrap();

    assert!(outcome.downloaded);
    assert!(!outcome.is_failed());
    assert_eq!(names(&a), vec!["data.csv"]);
}
