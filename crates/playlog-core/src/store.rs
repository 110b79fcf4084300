//! Key-value store seam and its quota model.
//!
//! The persisted record lives in a small cloud-synced key-value store: a flat
//! JSON object namespace with `get`/`set` and hard quotas on total bytes,
//! bytes per item and item count. A `set` that would break any quota is
//! rejected whole, so a run either writes every key it meant to or none.
//!
//! Item size is measured as key length plus the length of the value's JSON
//! text.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::config::StoreConfig;
use crate::error::ErrorCode;

/// Flat key-value namespace as stored.
pub type KvMap = serde_json::Map<String, Value>;

/// Failures of the external key-value store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("item {key:?} is {size} bytes, over the per-item quota of {limit}")]
    QuotaBytesPerItem {
        key: String,
        size: usize,
        limit: usize,
    },

    #[error("store would hold {requested} bytes, over the quota of {limit}")]
    QuotaBytes { requested: usize, limit: usize },

    #[error("store would hold {requested} items, over the limit of {limit}")]
    MaxItems { requested: usize, limit: usize },

    #[error("failed to access store file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("store file {path} is not a JSON object: {source}")]
    Serde {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl StoreError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::QuotaBytesPerItem { .. } | Self::QuotaBytes { .. } | Self::MaxItems { .. } => {
                ErrorCode::StoreQuotaExceeded
            }
            Self::Io { .. } | Self::Serde { .. } => ErrorCode::StoreUnavailable,
        }
    }
}

/// Async get/set access to the key-value store.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Values for `keys`; absent keys are simply missing from the result.
    async fn get(&self, keys: &[String]) -> Result<KvMap, StoreError>;

    /// Every stored key.
    async fn get_all(&self) -> Result<KvMap, StoreError>;

    /// Upsert every entry of `items` in one step.
    async fn set(&self, items: KvMap) -> Result<(), StoreError>;
}

// ---------------------------------------------------------------------------
// Quota
// ---------------------------------------------------------------------------

/// Size in bytes that `key` = `value` counts against the quota.
#[must_use]
pub fn item_size(key: &str, value: &Value) -> usize {
    key.len() + value.to_string().len()
}

/// Check that applying `items` over `current` stays within `limits`.
///
/// # Errors
///
/// Returns the first quota the write would break.
pub fn check_quota(limits: &StoreConfig, current: &KvMap, items: &KvMap) -> Result<(), StoreError> {
    for (key, value) in items {
        let size = item_size(key, value);
        if size > limits.quota_bytes_per_item {
            return Err(StoreError::QuotaBytesPerItem {
                key: key.clone(),
                size,
                limit: limits.quota_bytes_per_item,
            });
        }
    }

    let new_keys = items.keys().filter(|k| !current.contains_key(*k)).count();
    let requested_items = current.len() + new_keys;
    if requested_items > limits.max_items {
        return Err(StoreError::MaxItems {
            requested: requested_items,
            limit: limits.max_items,
        });
    }

    let requested_bytes: usize = current
        .iter()
        .filter(|(k, _)| !items.contains_key(*k))
        .chain(items.iter())
        .map(|(k, v)| item_size(k, v))
        .sum();
    if requested_bytes > limits.quota_bytes {
        return Err(StoreError::QuotaBytes {
            requested: requested_bytes,
            limit: limits.quota_bytes,
        });
    }

    Ok(())
}

fn select(all: &KvMap, keys: &[String]) -> KvMap {
    keys.iter()
        .filter_map(|k| all.get(k).map(|v| (k.clone(), v.clone())))
        .collect()
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

/// In-process store with the same quota behaviour as the synced store.
#[derive(Debug)]
pub struct MemoryStore {
    items: Mutex<KvMap>,
    limits: StoreConfig,
    writes: AtomicUsize,
}

impl MemoryStore {
    #[must_use]
    pub fn new(limits: StoreConfig) -> Self {
        Self::with_items(KvMap::new(), limits)
    }

    #[must_use]
    pub const fn with_items(items: KvMap, limits: StoreConfig) -> Self {
        Self {
            items: Mutex::new(items),
            limits,
            writes: AtomicUsize::new(0),
        }
    }

    /// Copy of everything currently stored.
    #[must_use]
    pub fn snapshot(&self) -> KvMap {
        self.items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of accepted `set` calls so far.
    #[must_use]
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(StoreConfig::default())
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, keys: &[String]) -> Result<KvMap, StoreError> {
        let items = self.items.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(select(&items, keys))
    }

    async fn get_all(&self) -> Result<KvMap, StoreError> {
        Ok(self.snapshot())
    }

    async fn set(&self, new_items: KvMap) -> Result<(), StoreError> {
        let mut items = self.items.lock().unwrap_or_else(PoisonError::into_inner);
        check_quota(&self.limits, &items, &new_items)?;
        let written = new_items.len();
        items.extend(new_items);
        self.writes.fetch_add(1, Ordering::SeqCst);
        debug!(written, total = items.len(), "memory store updated");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// FileStore
// ---------------------------------------------------------------------------

/// Store persisted as one JSON object on disk.
///
/// Writes go to a temporary sibling file that is then renamed over the
/// original, so a crash never leaves a half-written store.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    limits: StoreConfig,
    write_lock: tokio::sync::Mutex<()>,
}

impl FileStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, limits: StoreConfig) -> Self {
        Self {
            path: path.into(),
            limits,
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_all(&self) -> Result<KvMap, StoreError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(KvMap::new()),
            Err(source) => {
                return Err(StoreError::Io {
                    path: self.path.clone(),
                    source,
                });
            }
        };
        serde_json::from_slice(&bytes).map_err(|source| StoreError::Serde {
            path: self.path.clone(),
            source,
        })
    }

    async fn write_all(&self, items: &KvMap) -> Result<(), StoreError> {
        let io_err = |source: io::Error| StoreError::Io {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
        }
        let bytes = serde_json::to_vec_pretty(items).map_err(|source| StoreError::Serde {
            path: self.path.clone(),
            source,
        })?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes).await.map_err(io_err)?;
        tokio::fs::rename(&tmp, &self.path).await.map_err(io_err)?;
        Ok(())
    }
}

#[async_trait]
impl KvStore for FileStore {
    async fn get(&self, keys: &[String]) -> Result<KvMap, StoreError> {
        Ok(select(&self.read_all().await?, keys))
    }

    async fn get_all(&self) -> Result<KvMap, StoreError> {
        self.read_all().await
    }

    async fn set(&self, new_items: KvMap) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut items = self.read_all().await?;
        check_quota(&self.limits, &items, &new_items)?;
        let written = new_items.len();
        items.extend(new_items);
        self.write_all(&items).await?;
        debug!(written, path = %self.path.display(), "file store updated");
        Ok(())
    }
}
