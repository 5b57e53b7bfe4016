use std::path::PathBuf;
use std::sync::Arc;

use crate::store::map::{JsonFileMap, KeyValueMap, MemoryMap, StoreError};

/// Last playback offset per video, in milliseconds, keyed by the video's
/// stable string form.
///
/// Best-effort by contract: a failing backing map makes `get` answer 0 and
/// `set` report false, with a warning logged. Nothing here returns an error.
/// An offset of 0 doubles as "nothing saved"; the two cases are not told apart.
#[derive(Clone)]
pub struct PositionStore {
    map: Arc<dyn KeyValueMap>,
}

impl PositionStore {
    pub fn new(map: Arc<dyn KeyValueMap>) -> Self {
        Self { map }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryMap::new()))
    }

    /// Store backed by a JSON file at `path`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        Ok(Self::new(Arc::new(JsonFileMap::open(path)?)))
    }

    /// Saved offset for `key`; 0 when nothing is saved or the map is unreadable.
    pub fn get(&self, key: &str) -> u64 {
        match self.map.get(key) {
            Ok(value) => value.unwrap_or(0),
            Err(e) => {
                tracing::warn!("Cannot read saved position for {}: {}", key, e);
                0
            }
        }
    }

    /// Overwrite the offset for `key`. Last write wins.
    pub fn set(&self, key: &str, offset_ms: u64) -> bool {
        match self.map.put(key, offset_ms) {
            Ok(()) => {
                tracing::debug!("Saved position {} ms for {}", offset_ms, key);
                true
            }
            Err(e) => {
                tracing::warn!("Cannot save position for {}: {}", key, e);
                false
            }
        }
    }

    /// Forget the offset for `key`. Returns whether the store is now clear of it.
    pub fn clear(&self, key: &str) -> bool {
        match self.map.remove(key) {
            Ok(existed) => {
                if existed {
                    tracing::debug!("Cleared saved position for {}", key);
                }
                true
            }
            Err(e) => {
                tracing::warn!("Cannot clear saved position for {}: {}", key, e);
                false
            }
        }
    }

    /// [`get`](Self::get) on the blocking pool, for callers that must not block.
    pub async fn fetch(&self, key: String) -> u64 {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.get(&key))
            .await
            .unwrap_or_else(|e| {
                tracing::warn!("Position read task failed: {}", e);
                0
            })
    }

    /// [`set`](Self::set) on the blocking pool.
    pub async fn persist(&self, key: String, offset_ms: u64) -> bool {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.set(&key, offset_ms))
            .await
            .unwrap_or_else(|e| {
                tracing::warn!("Position write task failed: {}", e);
                false
            })
    }
}
