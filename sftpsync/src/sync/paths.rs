use std::path::{Component, Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PathError {
    #[error("{} is not under {}", leaf.display(), root.display())]
    OutsideRoot { leaf: PathBuf, root: PathBuf },
    #[error("local path contains unsupported component: {}", .0.display())]
    UnsupportedComponent(PathBuf),
    #[error("local path is not valid UTF-8: {}", .0.display())]
    NonUtf8(PathBuf),
}

/// Maps a local leaf folder to its remote twin: the part of `local_leaf`
/// below `local_root` is appended to `remote_root` with `/` separators.
pub fn remote_folder_for(
    local_leaf: &Path,
    local_root: &Path,
    remote_root: &str,
) -> Result<String, PathError> {
    let relative = local_leaf
        .strip_prefix(local_root)
        .map_err(|_| PathError::OutsideRoot {
            leaf: local_leaf.to_path_buf(),
            root: local_root.to_path_buf(),
        })?;

    let mut out = normalize_remote_root(remote_root);
    for component in relative.components() {
        match component {
            Component::Normal(part) => {
                let part = part
                    .to_str()
                    .ok_or_else(|| PathError::NonUtf8(local_leaf.to_path_buf()))?;
                if !out.ends_with('/') {
                    out.push('/');
                }
                out.push_str(part);
            }
            Component::CurDir => continue,
            Component::RootDir | Component::ParentDir | Component::Prefix(_) => {
                return Err(PathError::UnsupportedComponent(local_leaf.to_path_buf()));
            }
        }
    }
    Ok(out)
}

fn normalize_remote_root(remote_root: &str) -> String {
    let unified = remote_root.replace('\\', "/");
    let trimmed = unified.trim_end_matches('/');
    if trimmed.is_empty() {
        if unified.starts_with('/') {
            "/".to_string()
        } else {
            String::new()
        }
    } else {
        trimmed.to_string()
    }
}
