//! Durable snapshot storage
//!
//! Queue buffers and the uploader's in-flight batch are persisted as one JSON
//! snapshot file each, rooted under a single versioned directory:
//!
//! ```text
//! <data_dir>/v1/queue-<id>.json     one per registered queue
//! <data_dir>/v1/uploader.json       uploader in-flight state
//! ```
//!
//! Writes go through a temp file, `sync_all`, then an atomic rename, so a
//! crash mid-write leaves either the old snapshot or the new one, never a
//! torn file. A missing snapshot on read is a fresh start, not an error.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Error, Result};

/// Version segment of the storage namespace. Bump when the snapshot schema
/// changes incompatibly; old directories are left in place.
pub const STORAGE_VERSION: &str = "v1";

fn storage_error(path: &Path, err: impl std::fmt::Display) -> Error {
    Error::Storage {
        path: path.display().to_string(),
        message: err.to_string(),
    }
}

/// Initialize the versioned storage root under `base`, creating it if needed.
///
/// Returns the resolved root directory. Failure here is fatal to whichever
/// component (queue or uploader) requested it, never to the whole process.
pub fn init_root(base: &Path) -> Result<PathBuf> {
    let root = base.join(STORAGE_VERSION);
    fs::create_dir_all(&root).map_err(|e| storage_error(&root, e))?;
    Ok(root)
}

/// Snapshot file name for a queue identifier.
///
/// The identifier is urlencoded so arbitrary identifiers map to safe file
/// names without collisions.
pub fn queue_file_name(identifier: &str) -> String {
    format!("queue-{}.json", urlencoding::encode(identifier))
}

/// Snapshot file name for the uploader's in-flight state.
pub fn uploader_file_name() -> &'static str {
    "uploader.json"
}

/// Atomically write `value` as JSON to `path` (temp file + sync + rename).
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let temp_path = path.with_extension("tmp");

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| storage_error(path, e))?;
    }

    let payload = serde_json::to_vec(value)?;

    let mut file = File::create(&temp_path).map_err(|e| storage_error(&temp_path, e))?;
    file.write_all(&payload)
        .map_err(|e| storage_error(&temp_path, e))?;
    file.sync_all().map_err(|e| storage_error(&temp_path, e))?;

    fs::rename(&temp_path, path).map_err(|e| storage_error(path, e))?;

    Ok(())
}

/// Read a JSON snapshot from `path`.
///
/// Returns `Ok(None)` when no snapshot exists.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(storage_error(path, e)),
    };

    let value = serde_json::from_str(&content)?;
    Ok(Some(value))
}

/// Remove a snapshot file; missing file is a no-op.
pub fn remove_snapshot(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(storage_error(path, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::TempDir;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Snapshot {
        items: Vec<String>,
        count: usize,
    }

    #[test]
    fn test_init_root_creates_versioned_dir() {
        let dir = TempDir::new().unwrap();
        let root = init_root(dir.path()).unwrap();
        assert!(root.ends_with(STORAGE_VERSION));
        assert!(root.is_dir());

        // Idempotent
        let again = init_root(dir.path()).unwrap();
        assert_eq!(root, again);
    }

    #[test]
    fn test_write_read_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("snap.json");

        let snap = Snapshot {
            items: vec!["a".to_string(), "b".to_string()],
            count: 2,
        };
        write_json(&path, &snap).unwrap();

        let back: Option<Snapshot> = read_json(&path).unwrap();
        assert_eq!(back, Some(snap));

        // Temp file must not linger
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn test_read_missing_is_fresh_start() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("absent.json");
        let back: Option<Snapshot> = read_json(&path).unwrap();
        assert!(back.is_none());
    }

    #[test]
    fn test_remove_snapshot_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("snap.json");
        write_json(&path, &Snapshot { items: vec![], count: 0 }).unwrap();

        remove_snapshot(&path).unwrap();
        assert!(!path.exists());
        remove_snapshot(&path).unwrap();
    }

    #[test]
    fn test_queue_file_name_encodes_identifier() {
        assert_eq!(queue_file_name("clicks"), "queue-clicks.json");
        assert_eq!(queue_file_name("a/b c"), "queue-a%2Fb%20c.json");
    }
}
