//! Durable key/value storage for the queue snapshot.
//!
//! # Design Decisions
//! - One value per key, replaced wholesale on every write
//! - File writes go through a temp file and rename, so a crash never leaves
//!   a half-written snapshot
//! - An optional byte quota mirrors browser storage limits
//! - `FileStorage` holds an exclusive advisory lock on its directory, so only
//!   one process at a time owns a snapshot

use fs4::fs_std::FileExt;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use thiserror::Error;

const LOCK_FILE: &str = ".lock";

/// Errors from a storage backend.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("value of {size} bytes exceeds storage quota of {limit} bytes")]
    QuotaExceeded { size: usize, limit: usize },

    #[error("storage directory {} is in use by another process", .0.display())]
    Locked(PathBuf),

    #[error("invalid storage key '{0}'")]
    InvalidKey(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Persistent string storage.
pub trait QueueStorage: Send + Sync {
    fn load(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn persist(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

fn check_quota(value: &str, limit: Option<usize>) -> Result<(), StorageError> {
    match limit {
        Some(limit) if value.len() > limit => Err(StorageError::QuotaExceeded {
            size: value.len(),
            limit,
        }),
        _ => Ok(()),
    }
}

/// Stores each key as `<dir>/<key>.json`.
///
/// The directory lock is released when the last clone is dropped.
#[derive(Debug, Clone)]
pub struct FileStorage {
    dir: PathBuf,
    max_bytes: Option<usize>,
    _lock: Arc<File>,
}

impl FileStorage {
    /// Open (and create if needed) the storage directory.
    ///
    /// Fails with [`StorageError::Locked`] if another handle already owns it.
    pub fn open(dir: impl AsRef<Path>, max_bytes: Option<usize>) -> Result<Self, StorageError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let lock = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(dir.join(LOCK_FILE))?;
        if !FileExt::try_lock_exclusive(&lock)? {
            return Err(StorageError::Locked(dir));
        }
        tracing::debug!(dir = %dir.display(), "Storage directory locked");

        Ok(Self {
            dir,
            max_bytes,
            _lock: Arc::new(lock),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(self.dir.join(format!("{}.json", key)))
    }
}

impl QueueStorage for FileStorage {
    fn load(&self, key: &str) -> Result<Option<String>, StorageError> {
        match fs::read_to_string(self.path_for(key)?) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn persist(&self, key: &str, value: &str) -> Result<(), StorageError> {
        check_quota(value, self.max_bytes)?;
        let path = self.path_for(key)?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, value)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        match fs::remove_file(self.path_for(key)?) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-process storage; contents vanish with the process.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    values: Mutex<HashMap<String, String>>,
    max_bytes: Option<usize>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_quota(max_bytes: usize) -> Self {
        Self {
            values: Mutex::default(),
            max_bytes: Some(max_bytes),
        }
    }
}

impl QueueStorage for MemoryStorage {
    fn load(&self, key: &str) -> Result<Option<String>, StorageError> {
        let values = self.values.lock().unwrap_or_else(|p| p.into_inner());
        Ok(values.get(key).cloned())
    }

    fn persist(&self, key: &str, value: &str) -> Result<(), StorageError> {
        check_quota(value, self.max_bytes)?;
        let mut values = self.values.lock().unwrap_or_else(|p| p.into_inner());
        values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let mut values = self.values.lock().unwrap_or_else(|p| p.into_inner());
        values.remove(key);
        Ok(())
    }
}
