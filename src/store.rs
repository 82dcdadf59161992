//! Durable JSON snapshot helpers
//!
//! Both record stores (users, sessions) are whole-file JSON snapshots. A
//! reader tolerates a missing file; a writer must never leave a partially
//! written file visible, so every save goes through write-then-rename in the
//! destination directory.

use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Load a JSON snapshot, treating a missing file as an empty store.
pub fn load_json<T: DeserializeOwned + Default>(path: &Path) -> Result<T> {
    if !path.exists() {
        return Ok(T::default());
    }
    let content = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

/// Atomically replace `path` with `contents`.
///
/// Runs on the blocking pool so the event loop is never stalled on disk I/O.
pub async fn save_json(path: &Path, contents: String) -> Result<()> {
    let path: PathBuf = path.to_path_buf();
    tokio::task::spawn_blocking(move || write_atomic(&path, &contents))
        .await
        .map_err(|e| Error::Io(std::io::Error::other(e)))?
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    // Temp file in the same directory, so the rename is atomic
    let parent = path.parent().unwrap_or(Path::new("."));
    let mut temp = NamedTempFile::new_in(parent)?;
    temp.write_all(contents.as_bytes())?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| Error::Io(e.error))?;

    Ok(())
}
