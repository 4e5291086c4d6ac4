pub mod documents;
pub mod mailbox;

pub use documents::{
    ApprovalStore, EfficiencyHistory, FleetStore, NotificationQueue, Resolution, SnapshotStore,
    WatermarkStore,
};
pub use mailbox::{Bin, Enqueue, Mailbox};

use fs2::FileExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Serialize `value` next to `path` and rename into place, so a concurrent
/// reader never observes a partially written document.
pub(crate) fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), StorageError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let temp_path = match path.file_name() {
        Some(name) => path.with_file_name(format!("{}.tmp", name.to_string_lossy())),
        None => path.with_extension("tmp"),
    };
    let payload = serde_json::to_string_pretty(value)?;
    std::fs::write(&temp_path, payload)?;
    std::fs::rename(&temp_path, path)?;
    Ok(())
}

/// Read a whole-document JSON store. A missing or empty file yields the
/// default; an unparsable file is quarantined to a `.corrupted` sibling and
/// the default is returned so processing continues.
pub(crate) fn read_json_or_default<T>(path: &Path) -> Result<T, StorageError>
where
    T: DeserializeOwned + Default,
{
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(T::default()),
        Err(err) => return Err(err.into()),
    };
    if content.trim().is_empty() {
        return Ok(T::default());
    }
    match serde_json::from_str(&content) {
        Ok(value) => Ok(value),
        Err(_) => {
            quarantine(path)?;
            Ok(T::default())
        }
    }
}

/// Move an unreadable document aside rather than dropping it, so it stays
/// available for hand recovery.
pub(crate) fn quarantine(path: &Path) -> Result<PathBuf, StorageError> {
    let quarantined = match path.file_name() {
        Some(name) => path.with_file_name(format!("{}.corrupted", name.to_string_lossy())),
        None => path.with_extension("corrupted"),
    };
    std::fs::rename(path, &quarantined)?;
    Ok(quarantined)
}

/// Advisory lock guarding a read-modify-write of one document. Both
/// processes funnel mutations of a given document through its lock file.
pub(crate) struct DocumentLock {
    file: File,
}

impl DocumentLock {
    pub(crate) fn acquire(document_path: &Path) -> Result<Self, StorageError> {
        let lock_path = match document_path.file_name() {
            Some(name) => document_path.with_file_name(format!("{}.lock", name.to_string_lossy())),
            None => document_path.with_extension("lock"),
        };
        if let Some(parent) = lock_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&lock_path)?;
        file.lock_exclusive()?;
        Ok(Self { file })
    }
}

impl Drop for DocumentLock {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.file);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    #[test]
    fn atomic_write_then_read_round_trips() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("doc.json");
        let mut doc = BTreeMap::new();
        doc.insert("a".to_string(), 1_u64);
        write_json_atomic(&path, &doc).expect("write");
        let loaded: BTreeMap<String, u64> = read_json_or_default(&path).expect("read");
        assert_eq!(loaded, doc);
        assert!(!dir.path().join("doc.json.tmp").exists());
    }

    #[test]
    fn missing_document_reads_as_default() {
        let dir = TempDir::new().expect("temp dir");
        let loaded: Vec<String> =
            read_json_or_default(&dir.path().join("absent.json")).expect("read");
        assert!(loaded.is_empty());
    }

    #[test]
    fn corrupt_document_is_quarantined_not_fatal() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("doc.json");
        std::fs::write(&path, "{not json").expect("write garbage");
        let loaded: Vec<String> = read_json_or_default(&path).expect("read");
        assert!(loaded.is_empty());
        assert!(!path.exists());
        assert!(dir.path().join("doc.json.corrupted").exists());
    }
}
