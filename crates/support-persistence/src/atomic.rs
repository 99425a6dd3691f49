//! Crash-safe JSON file helpers.
//!
//! Every record lives in its own file. Writes go through a temp file in the
//! same directory followed by a rename, so a reader sees either the old or
//! the new record, never half of one.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

use crate::error::{PersistenceError, Result};

fn write_err(path: &Path) -> impl FnOnce(std::io::Error) -> PersistenceError + '_ {
    move |source| PersistenceError::WriteError {
        path: path.to_path_buf(),
        source,
    }
}

/// Creates `dir` and its parents if missing.
pub fn ensure_dir(dir: &Path) -> Result<()> {
    if !dir.exists() {
        fs::create_dir_all(dir).map_err(|source| PersistenceError::DirectoryError {
            path: dir.to_path_buf(),
            source,
        })?;
    }
    Ok(())
}

/// Serializes `value` as pretty JSON and replaces `path` atomically.
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_vec_pretty(value)?;

    let dir = path.parent().unwrap_or(Path::new("."));
    ensure_dir(dir)?;

    let mut temp = tempfile::NamedTempFile::new_in(dir).map_err(write_err(path))?;
    temp.write_all(&json).map_err(write_err(path))?;
    temp.as_file().sync_all().map_err(write_err(path))?;
    temp.persist(path)
        .map_err(|e| write_err(path)(e.error))?;
    Ok(())
}

/// Reads a JSON record, returning `None` if the file does not exist.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let data = fs::read_to_string(path).map_err(|source| PersistenceError::ReadError {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(Some(serde_json::from_str(&data)?))
}

/// Lists the `.json` files directly inside `dir`, sorted by path.
pub fn json_files(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let read_err = |source| PersistenceError::ReadError {
        path: dir.to_path_buf(),
        source,
    };

    let mut paths = Vec::new();
    for entry in fs::read_dir(dir).map_err(read_err)? {
        let path = entry.map_err(read_err)?.path();
        if path.extension().is_some_and(|ext| ext == "json") {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

/// Loads every record in `dir`. Files that fail to parse are skipped with a
/// warning so one corrupt record does not hide the rest.
pub fn read_all<T: DeserializeOwned>(dir: &Path) -> Result<Vec<T>> {
    let mut items = Vec::new();
    for path in json_files(dir)? {
        match read_json::<T>(&path) {
            Ok(Some(item)) => items.push(item),
            Ok(None) => {}
            Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable record"),
        }
    }
    Ok(items)
}
