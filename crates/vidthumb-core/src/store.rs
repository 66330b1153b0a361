//! Durable key/value storage behind the thumbnail cache.
//!
//! The cache service only talks to the [`KvStore`] trait, so the backing store
//! can be an in-memory map, a directory of flat files, or anything else that
//! can hold string values under string keys.
//!
//! Stores may enforce a byte quota. A write that would exceed it fails with
//! [`StoreError::QuotaExceeded`], which the cache answers by evicting old
//! entries and retrying.

use std::ffi::OsStr;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use dashmap::DashMap;
use tracing::{debug, warn};

use crate::error::StoreError;

/// Result type for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Suffix for files being written before they are renamed into place.
const TEMP_SUFFIX: &str = ".tmp";

/// Pluggable durable key/value store.
#[cfg_attr(test, mockall::automock)]
pub trait KvStore: Send + Sync {
    /// Read the value stored under `key`.
    fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Store `value` under `key`, replacing any previous value.
    fn set(&self, key: &str, value: &str) -> StoreResult<()>;

    /// Remove `key`. Removing a missing key is not an error.
    fn delete(&self, key: &str) -> StoreResult<()>;

    /// List every key currently stored.
    fn keys(&self) -> StoreResult<Vec<String>>;
}

/// In-memory store with an optional byte quota.
///
/// Usage is measured as key length plus value length, the way browser storage
/// accounts for its quota.
#[derive(Debug, Default)]
pub struct MemoryKvStore {
    entries: DashMap<String, String>,
    quota_bytes: Option<u64>,
}

impl MemoryKvStore {
    /// Create an unbounded in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an in-memory store that rejects writes beyond `quota_bytes`.
    #[must_use]
    pub fn with_quota(quota_bytes: u64) -> Self {
        Self {
            entries: DashMap::new(),
            quota_bytes: Some(quota_bytes),
        }
    }

    /// Bytes currently in use.
    #[must_use]
    pub fn usage_bytes(&self) -> u64 {
        self.entries
            .iter()
            .map(|e| (e.key().len() + e.value().len()) as u64)
            .sum()
    }

    /// Number of stored keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl KvStore for MemoryKvStore {
    fn get(&self, key: &str) -> StoreResult<Option<String>> {
        Ok(self.entries.get(key).map(|v| v.value().clone()))
    }

    fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        if let Some(quota) = self.quota_bytes {
            let replaced = self
                .entries
                .get(key)
                .map_or(0, |v| (key.len() + v.value().len()) as u64);
            let used = self.usage_bytes().saturating_sub(replaced);
            let needed = (key.len() + value.len()) as u64;
            if used + needed > quota {
                return Err(StoreError::QuotaExceeded {
                    key: key.to_string(),
                    needed,
                    available: quota.saturating_sub(used),
                });
            }
        }

        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&self, key: &str) -> StoreResult<()> {
        self.entries.remove(key);
        Ok(())
    }

    fn keys(&self) -> StoreResult<Vec<String>> {
        Ok(self.entries.iter().map(|e| e.key().clone()).collect())
    }
}

/// Directory-backed store holding one file per key.
///
/// File names are the hex encoding of the key, so any key round-trips through
/// `keys()` unchanged. Values are written to a temporary file and renamed into
/// place.
#[derive(Debug, Clone)]
pub struct FileKvStore {
    dir: PathBuf,
    quota_bytes: Option<u64>,
}

impl FileKvStore {
    /// Open (creating if needed) a store rooted at `dir`.
    pub fn open(dir: impl Into<PathBuf>) -> StoreResult<Self> {
        let dir = dir.into();
        if !dir.exists() {
            fs::create_dir_all(&dir).map_err(|e| io_error(&dir.display().to_string(), &e))?;
        }
        debug!("Opened file store at {}", dir.display());
        Ok(Self {
            dir,
            quota_bytes: None,
        })
    }

    /// Limit the total size of stored values.
    #[must_use]
    pub const fn with_quota(mut self, quota_bytes: u64) -> Self {
        self.quota_bytes = Some(quota_bytes);
        self
    }

    /// Root directory of the store.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Total bytes of stored values.
    pub fn usage_bytes(&self) -> StoreResult<u64> {
        self.usage_excluding(None)
    }

    fn path_for(&self, key: &str) -> StoreResult<PathBuf> {
        if key.is_empty() {
            return Err(StoreError::InvalidKey("key must not be empty".to_string()));
        }
        Ok(self.dir.join(hex::encode(key)))
    }

    fn usage_excluding(&self, skip: Option<&Path>) -> StoreResult<u64> {
        let entries =
            fs::read_dir(&self.dir).map_err(|e| io_error(&self.dir.display().to_string(), &e))?;

        let mut total = 0;
        for entry in entries.flatten() {
            let path = entry.path();
            if skip.is_some_and(|s| s == path) || decode_key(&entry.file_name()).is_none() {
                continue;
            }
            if let Ok(metadata) = entry.metadata()
                && metadata.is_file()
            {
                total += metadata.len();
            }
        }
        Ok(total)
    }
}

impl KvStore for FileKvStore {
    fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let path = self.path_for(key)?;
        match fs::read_to_string(&path) {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error(key, &e)),
        }
    }

    fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        let path = self.path_for(key)?;

        if let Some(quota) = self.quota_bytes {
            let used = self.usage_excluding(Some(&path))?;
            let needed = value.len() as u64;
            if used + needed > quota {
                return Err(StoreError::QuotaExceeded {
                    key: key.to_string(),
                    needed,
                    available: quota.saturating_sub(used),
                });
            }
        }

        let mut temp_name = path.as_os_str().to_owned();
        temp_name.push(TEMP_SUFFIX);
        let temp_path = PathBuf::from(temp_name);

        let written = fs::write(&temp_path, value).and_then(|()| fs::rename(&temp_path, &path));
        if let Err(e) = written {
            let _ = fs::remove_file(&temp_path);
            if e.kind() == io::ErrorKind::StorageFull {
                warn!("Disk full while writing {}", key);
                return Err(StoreError::QuotaExceeded {
                    key: key.to_string(),
                    needed: value.len() as u64,
                    available: 0,
                });
            }
            return Err(io_error(key, &e));
        }
        Ok(())
    }

    fn delete(&self, key: &str) -> StoreResult<()> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error(key, &e)),
        }
    }

    fn keys(&self) -> StoreResult<Vec<String>> {
        let entries =
            fs::read_dir(&self.dir).map_err(|e| io_error(&self.dir.display().to_string(), &e))?;

        let keys = entries
            .flatten()
            .filter_map(|entry| decode_key(&entry.file_name()))
            .collect();
        Ok(keys)
    }
}

/// Key stored under a file name. Temp files and foreign files do not decode.
fn decode_key(name: &OsStr) -> Option<String> {
    let bytes = hex::decode(name.to_str()?).ok()?;
    String::from_utf8(bytes).ok()
}

fn io_error(key: &str, e: &io::Error) -> StoreError {
    StoreError::Io {
        key: key.to_string(),
        reason: e.to_string(),
    }
}
