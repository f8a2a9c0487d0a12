use std::path::{Path, PathBuf};

use thiserror::Error;

use super::codec;

const FILES_DIR: &str = "files";
const META_DIR: &str = "meta";

#[derive(Debug, Error)]
pub enum PathError {
    #[error("cloud path is empty")]
    Empty,
    #[error("cloud path contains unsupported component")]
    UnsupportedComponent,
}

/// Splits a POSIX-like cloud path ("a/b/notes.txt") into its names.
/// Empty segments are skipped; "." and ".." are refused.
pub fn cloud_segments(cloud_path: &str) -> Result<Vec<&str>, PathError> {
    let mut segments = Vec::new();
    for part in cloud_path.split('/') {
        match part {
            "" => continue,
            "." | ".." => return Err(PathError::UnsupportedComponent),
            name => segments.push(name),
        }
    }
    if segments.is_empty() {
        return Err(PathError::Empty);
    }
    Ok(segments)
}

/// Where the bytes of `cloud_path` are materialized under the cache root.
pub fn cache_path_for(cache_root: &Path, cloud_path: &str) -> Result<PathBuf, PathError> {
    let mut out = cache_root.join(FILES_DIR);
    out.extend(cloud_segments(cloud_path)?);
    Ok(out)
}

/// Sidecar metadata file for `cloud_path`, named by its flat encoded key.
pub fn meta_path_for(cache_root: &Path, cloud_path: &str) -> Result<PathBuf, PathError> {
    let key = codec::encode_flat(cloud_path);
    if key.is_empty() {
        return Err(PathError::Empty);
    }
    Ok(cache_root.join(META_DIR).join(format!("{key}.json")))
}
