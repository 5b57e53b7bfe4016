use std::collections::{BTreeMap, HashMap};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};

use tempfile::NamedTempFile;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("position store I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("position file is not valid JSON: {0}")]
    Corrupt(#[from] serde_json::Error),
    #[error("position store unavailable: {0}")]
    Unavailable(String),
}

/// String-keyed map of non-negative integers that outlives the process.
///
/// Each call must be atomic with respect to the others: a reader never sees a
/// half-applied write.
pub trait KeyValueMap: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<u64>, StoreError>;
    fn put(&self, key: &str, value: u64) -> Result<(), StoreError>;
    /// Returns whether the key was present.
    fn remove(&self, key: &str) -> Result<bool, StoreError>;
}

/// Process-local map. Nothing survives a restart; used for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryMap {
    entries: RwLock<HashMap<String, u64>>,
}

impl MemoryMap {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned<T>(_: T) -> StoreError {
    StoreError::Unavailable("lock poisoned".into())
}

impl KeyValueMap for MemoryMap {
    fn get(&self, key: &str) -> Result<Option<u64>, StoreError> {
        Ok(self.entries.read().map_err(poisoned)?.get(key).copied())
    }

    fn put(&self, key: &str, value: u64) -> Result<(), StoreError> {
        self.entries
            .write()
            .map_err(poisoned)?
            .insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.entries.write().map_err(poisoned)?.remove(key).is_some())
    }
}

/// Map persisted as one JSON object on disk.
///
/// Reads are served from memory. Every write rewrites the whole file through a
/// temp file in the same directory and an atomic rename, so a crash leaves
/// either the old or the new document, never a torn one. The in-memory copy is
/// only updated once the file write succeeded.
#[derive(Debug)]
pub struct JsonFileMap {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, u64>>,
}

impl JsonFileMap {
    /// `<data dir>/reprise/positions.json`, when the platform has a data dir.
    pub fn default_path() -> Option<PathBuf> {
        dirs::data_dir().map(|dir| dir.join("reprise").join("positions.json"))
    }

    /// Open or create the map at `path`. A file that fails to parse is logged
    /// and treated as empty; it gets replaced on the next write.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let entries = match std::fs::File::open(&path) {
            Ok(file) => match serde_json::from_reader(BufReader::new(file)) {
                Ok(entries) => entries,
                Err(e) => {
                    tracing::warn!("Ignoring unreadable position file {}: {}", path.display(), e);
                    BTreeMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };

        tracing::debug!("Loaded {} saved positions from {}", entries.len(), path.display());
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_file(&self, entries: &BTreeMap<String, u64>) -> Result<(), StoreError> {
        let dir = match self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            Some(dir) => dir,
            None => Path::new("."),
        };
        let tmp = NamedTempFile::new_in(dir)?;
        {
            let mut writer = BufWriter::new(tmp.as_file());
            serde_json::to_writer_pretty(&mut writer, entries)?;
            writer.flush()?;
        }
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| StoreError::Io(e.error))?;
        Ok(())
    }
}

impl KeyValueMap for JsonFileMap {
    fn get(&self, key: &str) -> Result<Option<u64>, StoreError> {
        Ok(self.entries.lock().map_err(poisoned)?.get(key).copied())
    }

    fn put(&self, key: &str, value: u64) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().map_err(poisoned)?;
        let previous = entries.insert(key.to_string(), value);
        if let Err(e) = self.write_file(&entries) {
            match previous {
                Some(old) => entries.insert(key.to_string(), old),
                None => entries.remove(key),
            };
            return Err(e);
        }
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<bool, StoreError> {
        let mut entries = self.entries.lock().map_err(poisoned)?;
        let Some(old) = entries.remove(key) else {
            return Ok(false);
        };
        if let Err(e) = self.write_file(&entries) {
            entries.insert(key.to_string(), old);
            return Err(e);
        }
        Ok(true)
    }
}
