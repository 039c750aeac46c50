//! Persistent record of completed downloads.
//!
//! The record is a single JSON file mapping content ids to where the finished
//! file lives and how large it was:
//!
//! ```json
//! { "downloads": { "1609219331": { "path": "...", "size": 1048576, "completed_at": "..." } } }
//! ```
//!
//! Older files that map ids straight to a path are still accepted.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::CacheError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheRecord {
    pub path: PathBuf,
    pub size: u64,
    pub completed_at: DateTime<Utc>,
}

impl CacheRecord {
    pub fn new(path: impl Into<PathBuf>, size: u64) -> Self {
        Self {
            path: path.into(),
            size,
            completed_at: Utc::now(),
        }
    }
}

/// Outcome of checking a cache entry against the filesystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheLookup {
    Hit(CacheRecord),
    /// Recorded, but the file is gone or shorter than recorded.
    Stale(CacheRecord),
    Miss,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum StoredEntry {
    Record(CacheRecord),
    LegacyPath(PathBuf),
}

#[derive(Debug, Default, Deserialize)]
struct StoredCache {
    #[serde(default)]
    downloads: HashMap<String, StoredEntry>,
}

#[derive(Serialize)]
struct StoredCacheRef<'a> {
    downloads: BTreeMap<&'a str, &'a CacheRecord>,
}

pub struct CacheStore {
    path: PathBuf,
    entries: RwLock<HashMap<String, CacheRecord>>,
    /// Serializes `record` + `persist` so concurrent writers never interleave file writes.
    write_lock: Mutex<()>,
}

impl CacheStore {
    /// An empty store that persists to `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            entries: RwLock::new(HashMap::new()),
            write_lock: Mutex::new(()),
        }
    }

    /// Load the store from `path`.
    ///
    /// A missing file yields an empty store. An unreadable or unparsable file
    /// is logged and also yields an empty store: losing the record only costs
    /// re-checks, while refusing to start would block every download.
    pub async fn load(path: impl Into<PathBuf>) -> Self {
        let store = Self::new(path);
        match store.read_entries().await {
            Ok(entries) => {
                debug!(
                    count = entries.len(),
                    path = %store.path.display(),
                    "Loaded download cache"
                );
                *store.entries.write() = entries;
            }
            Err(e) => warn!(error = %e, "Ignoring download cache"),
        }
        store
    }

    async fn read_entries(&self) -> Result<HashMap<String, CacheRecord>, CacheError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(HashMap::new()),
            Err(e) => {
                return Err(CacheError::Corrupt {
                    path: self.path.clone(),
                    reason: e.to_string(),
                });
            }
        };

        let stored: StoredCache =
            serde_json::from_slice(&bytes).map_err(|e| CacheError::Corrupt {
                path: self.path.clone(),
                reason: e.to_string(),
            })?;

        let mut entries = HashMap::with_capacity(stored.downloads.len());
        for (id, entry) in stored.downloads {
            let record = match entry {
                StoredEntry::Record(record) => record,
                StoredEntry::LegacyPath(path) => {
                    let size = tokio::fs::metadata(&path)
                        .await
                        .map(|m| m.len())
                        .unwrap_or(0);
                    CacheRecord {
                        path,
                        size,
                        completed_at: DateTime::<Utc>::UNIX_EPOCH,
                    }
                }
            };
            entries.insert(id, record);
        }
        Ok(entries)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn contains(&self, asset_id: &str) -> bool {
        self.entries.read().contains_key(asset_id)
    }

    pub fn get(&self, asset_id: &str) -> Option<CacheRecord> {
        self.entries.read().get(asset_id).cloned()
    }

    /// Id of the entry recorded at `path`, if any.
    pub fn owner_of(&self, path: &Path) -> Option<String> {
        self.entries
            .read()
            .iter()
            .find(|(_, record)| record.path == path)
            .map(|(id, _)| id.clone())
    }

    /// Check an entry against the file it points at.
    pub async fn lookup(&self, asset_id: &str) -> CacheLookup {
        let Some(record) = self.get(asset_id) else {
            return CacheLookup::Miss;
        };
        match tokio::fs::metadata(&record.path).await {
            Ok(meta) if meta.is_file() && meta.len() > 0 && meta.len() >= record.size => {
                CacheLookup::Hit(record)
            }
            _ => CacheLookup::Stale(record),
        }
    }

    /// Record a confirmed download and write the whole store through to disk.
    ///
    /// Overwrites any previous entry for the same id.
    pub async fn record(&self, asset_id: &str, record: CacheRecord) -> Result<(), CacheError> {
        let _guard = self.write_lock.lock().await;
        self.entries.write().insert(asset_id.to_string(), record);
        self.persist_locked().await
    }

    pub async fn persist(&self) -> Result<(), CacheError> {
        let _guard = self.write_lock.lock().await;
        self.persist_locked().await
    }

    async fn persist_locked(&self) -> Result<(), CacheError> {
        let json = {
            let entries = self.entries.read();
            let snapshot = StoredCacheRef {
                downloads: entries.iter().map(|(k, v)| (k.as_str(), v)).collect(),
            };
            serde_json::to_vec_pretty(&snapshot).map_err(|e| self.unwritable(std::io::Error::other(e)))?
        };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| self.unwritable(e))?;
        }

        // Write beside the target and rename, so readers never see half a file.
        let tmp_path = self.tmp_path();
        tokio::fs::write(&tmp_path, &json)
            .await
            .map_err(|e| self.unwritable(e))?;
        tokio::fs::rename(&tmp_path, &self.path)
            .await
            .map_err(|e| self.unwritable(e))?;
        Ok(())
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    fn unwritable(&self, source: std::io::Error) -> CacheError {
        CacheError::Unwritable {
            path: self.path.clone(),
            source,
        }
    }
}
