//! Tempfile / directory helpers: thin wrappers over the `tempfile` crate
//! plus `std::fs` read/write/list helpers, kept outside the core because
//! `script-core` has no opinion about the filesystem.

use std::fs;
use std::path::{Path, PathBuf};

use tempfile::{Builder, NamedTempFile, TempDir};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FsError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

fn wrap(path: impl Into<PathBuf>, source: std::io::Error) -> FsError {
    FsError::Io {
        path: path.into(),
        source,
    }
}

/// Creates a fresh temp directory under the system temp root. Removed
/// (recursively) when the returned [`TempDir`] drops.
pub fn temp_dir(prefix: &str) -> Result<TempDir, FsError> {
    Builder::new()
        .prefix(prefix)
        .tempdir()
        .map_err(|err| wrap(std::env::temp_dir(), err))
}

/// Creates a fresh temp file. Removed when the returned [`NamedTempFile`]
/// drops, unless the caller persists it.
pub fn temp_file(prefix: &str) -> Result<NamedTempFile, FsError> {
    Builder::new()
        .prefix(prefix)
        .tempfile()
        .map_err(|err| wrap(std::env::temp_dir(), err))
}

/// Reads an entire file as bytes.
pub fn read(path: impl AsRef<Path>) -> Result<Vec<u8>, FsError> {
    let path = path.as_ref();
    fs::read(path).map_err(|err| wrap(path, err))
}

/// Reads an entire file as lossily-decoded UTF-8 text.
pub fn read_to_string(path: impl AsRef<Path>) -> Result<String, FsError> {
    let bytes = read(path)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Writes `contents`, creating or truncating the file at `path`.
pub fn write(path: impl AsRef<Path>, contents: impl AsRef<[u8]>) -> Result<(), FsError> {
    let path = path.as_ref();
    fs::write(path, contents).map_err(|err| wrap(path, err))
}

/// Lists the immediate children of `dir`, sorted by file name.
pub fn list_dir(dir: impl AsRef<Path>) -> Result<Vec<PathBuf>, FsError> {
    let dir = dir.as_ref();
    let mut entries: Vec<PathBuf> = fs::read_dir(dir)
        .map_err(|err| wrap(dir, err))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .collect();
    entries.sort();
    Ok(entries)
}

#[cfg(test)]
#[path = "fsutil_tests.rs"]
mod tests;
