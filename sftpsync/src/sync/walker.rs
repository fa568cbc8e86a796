use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use super::error::SyncError;

/// Enumerates the leaf folders (folders without subfolders) below a root.
#[derive(Debug, Clone)]
pub struct DirectoryWalker {
    root: PathBuf,
}

impl DirectoryWalker {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, SyncError> {
        let root = root.into();
        let meta = fs::metadata(&root).map_err(|err| SyncError::filesystem(&root, err))?;
        if !meta.is_dir() {
            return Err(SyncError::filesystem(
                &root,
                io::Error::new(io::ErrorKind::NotADirectory, "local root is not a directory"),
            ));
        }
        Ok(Self { root })
    }

    /// Starts a fresh depth-first pass. Siblings are visited in file name
    /// order, so two passes over the same tree yield the same sequence.
    pub fn leaves(&self) -> LeafFolders {
        LeafFolders {
            inner: WalkDir::new(&self.root)
                .follow_links(false)
                .sort_by_file_name()
                .into_iter(),
        }
    }
}

pub struct LeafFolders {
    inner: walkdir::IntoIter,
}

impl Iterator for LeafFolders {
    type Item = PathBuf;

    fn next(&mut self) -> Option<PathBuf> {
        loop {
            match self.inner.next()? {
                Ok(entry) => {
                    if !entry.file_type().is_dir() {
                        continue;
                    }
                    if has_subfolders(entry.path()) {
                        continue;
                    }
                    return Some(entry.into_path());
                }
                Err(err) => {
                    tracing::warn!(
                        path = ?err.path(),
                        error = %err,
                        "skipping unreadable directory"
                    );
                }
            }
        }
    }
}

fn has_subfolders(path: &Path) -> bool {
    match fs::read_dir(path) {
        Ok(entries) => entries
            .filter_map(Result::ok)
            .any(|entry| entry.file_type().is_ok_and(|ty| ty.is_dir())),
        // Unreadable folders cannot be reconciled; walkdir reports them.
        Err(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn yields_only_leaf_folders_in_stable_order() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("b/y")).unwrap();
        std::fs::create_dir_all(root.join("b/x")).unwrap();
        std::fs::create_dir_all(root.join("a")).unwrap();
        std::fs::create_dir_all(root.join("c/deep/er")).unwrap();
        std::fs::write(root.join("b/file.txt"), b"x").unwrap();

        let walker = DirectoryWalker::new(root).unwrap();
        let leaves: Vec<_> = walker.leaves().collect();

        assert_eq!(
            leaves,
            vec![
                root.join("a"),
                root.join("b/x"),
                root.join("b/y"),
                root.join("c/deep/er"),
            ]
        );
        let again: Vec<_> = walker.leaves().collect();
        assert_eq!(leaves, again);
    }

    #[test]
    fn root_without_subfolders_is_itself_a_leaf() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("only.csv"), b"x").unwrap();

        let walker = DirectoryWalker::new(dir.path()).unwrap();
        assert_eq!(walker.leaves().collect::<Vec<_>>(), vec![dir.path().to_path_buf()]);
    }

    #[test]
    fn missing_root_is_a_filesystem_error() {
        let dir = tempdir().unwrap();
        let err = DirectoryWalker::new(dir.path().join("missing")).unwrap_err();
        assert_eq!(err.kind(), super::super::error::ErrorKind::Filesystem);
    }

    #[test]
    fn file_root_is_rejected() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("plain.txt");
        std::fs::write(&file, b"x").unwrap();
        assert!(DirectoryWalker::new(&file).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn symlinked_folders_are_not_followed() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("root");
        let outside = dir.path().join("outside/inner");
        std::fs::create_dir_all(root.join("a")).unwrap();
        std::fs::create_dir_all(&outside).unwrap();
        std::os::unix::fs::symlink(dir.path().join("outside"), root.join("a/link")).unwrap();

        let walker = DirectoryWalker::new(&root).unwrap();
        assert_eq!(walker.leaves().collect::<Vec<_>>(), vec![root.join("a")]);
    }
}
