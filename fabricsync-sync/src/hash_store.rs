//! Managed-tree snapshot: the path → hash map seen on the last pull.
//!
//! Persists a `HashStoreFile` JSON document at
//! `<home>/.fabricsync/hashes/<fabric>.json`.
//! Writes use the same atomic `.tmp` + rename pattern as the store.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use fabricsync_core::types::FabricName;

use crate::error::{io_err, SyncError};

/// Repository path → content hash.
pub type HashStore = BTreeMap<String, String>;

/// On-disk snapshot payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HashStoreFile {
    pub synced_at: DateTime<Utc>,
    pub files: HashStore,
}

/// SHA-256 hex digest of `content` after normalising line endings to LF.
pub fn content_hash(content: &str) -> String {
    let normalized = content.replace("\r\n", "\n");
    let mut h = Sha256::new();
    h.update(normalized.as_bytes());
    hex::encode(h.finalize())
}

/// `~/.fabricsync/hashes/<fabric>.json`
pub fn store_path_at(home: &Path, fabric: &FabricName) -> PathBuf {
    home.join(".fabricsync")
        .join("hashes")
        .join(format!("{}.json", fabric.0))
}

/// Load the snapshot for `fabric`, or `None` if no pull has completed yet.
pub fn load_at(home: &Path, fabric: &FabricName) -> Result<Option<HashStoreFile>, SyncError> {
    let path = store_path_at(home, fabric);
    if !path.exists() {
        return Ok(None);
    }
    let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
    Ok(Some(serde_json::from_str(&contents)?))
}

/// Save the snapshot for `fabric` atomically.
pub fn save_at(home: &Path, fabric: &FabricName, store: &HashStoreFile) -> Result<(), SyncError> {
    let path = store_path_at(home, fabric);
    let Some(dir) = path.parent() else {
        return Err(io_err(
            path,
            std::io::Error::other("invalid hash store path"),
        ));
    };
    std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;

    let json = serde_json::to_string_pretty(store)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, &json).map_err(|e| io_err(&tmp, e))?;
    if let Err(e) = std::fs::rename(&tmp, &path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(io_err(&path, e));
    }
    Ok(())
}

/// Remove the snapshot. Missing files are not an error.
pub fn remove_at(home: &Path, fabric: &FabricName) -> Result<(), SyncError> {
    let path = store_path_at(home, fabric);
    match std::fs::remove_file(&path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(io_err(&path, e)),
    }
}

/// Paths present in `previous` but absent from `current`.
pub fn vanished(previous: &HashStore, current: &HashStore) -> Vec<String> {
    previous
        .keys()
        .filter(|path| !current.contains_key(*path))
        .cloned()
        .collect()
}
