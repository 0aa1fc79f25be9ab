//! Durable key-value storage for scheduler configs, keyed by scheduler name.

use std::collections::{BTreeMap, HashMap};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use crate::core::errors::{EvictError, Result};

/// Synchronous config persistence used by the scheduler.
pub trait ConfigStorage: Send + Sync {
    /// Durably store `data` under `name`.
    fn save_scheduler_config(&self, name: &str, data: &[u8]) -> Result<()>;

    /// Load the config stored under `name`, if any.
    fn load_scheduler_config(&self, name: &str) -> Result<Option<Vec<u8>>>;
}

/// In-process storage with switchable write failures.
#[derive(Debug, Default)]
pub struct MemoryConfigStorage {
    entries: Mutex<HashMap<String, Vec<u8>>>,
    fail_writes: AtomicBool,
    writes: Mutex<u64>,
}

impl MemoryConfigStorage {
    /// Empty storage that accepts writes.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following write fail (or succeed again).
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Stored bytes for `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Vec<u8>> {
        self.entries.lock().get(name).cloned()
    }

    /// Successful writes so far.
    #[must_use]
    pub fn write_count(&self) -> u64 {
        *self.writes.lock()
    }
}

impl ConfigStorage for MemoryConfigStorage {
    fn save_scheduler_config(&self, name: &str, data: &[u8]) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(EvictError::persistence(name, "injected write failure"));
        }
        self.entries.lock().insert(name.to_string(), data.to_vec());
        *self.writes.lock() += 1;
        Ok(())
    }

    fn load_scheduler_config(&self, name: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.get(name))
    }
}

/// JSON file holding every scheduler config, rewritten atomically on save.
#[derive(Debug)]
pub struct FileConfigStorage {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileConfigStorage {
    /// Storage backed by the JSON map at `path`; the file is created on first write.
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            lock: Mutex::new(()),
        }
    }

    /// Backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<BTreeMap<String, String>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let raw = fs::read_to_string(&self.path).map_err(|e| EvictError::io(&self.path, e))?;
        if raw.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        Ok(serde_json::from_str(&raw)?)
    }
}

impl ConfigStorage for FileConfigStorage {
    fn save_scheduler_config(&self, name: &str, data: &[u8]) -> Result<()> {
        let _guard = self.lock.lock();
        let mut entries = self
            .read_all()
            .map_err(|e| EvictError::persistence(name, e.to_string()))?;
        let value = String::from_utf8(data.to_vec())
            .map_err(|e| EvictError::persistence(name, e.to_string()))?;
        entries.insert(name.to_string(), value);

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| EvictError::persistence(name, e.to_string()))?;
        }
        let encoded = serde_json::to_vec_pretty(&entries)?;
        write_atomic(&self.path, &encoded).map_err(|e| EvictError::persistence(name, e.to_string()))
    }

    fn load_scheduler_config(&self, name: &str) -> Result<Option<Vec<u8>>> {
        let _guard = self.lock.lock();
        Ok(self.read_all()?.remove(name).map(String::into_bytes))
    }
}

/// Write `data` to a sibling `.tmp`, fsync it, then rename over `path`.
///
/// The temp file is removed when any step fails.
fn write_atomic(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let tmp_path = path.with_extension("tmp");
    let result = (|| {
        {
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&tmp_path)?;
            file.write_all(data)?;
            file.sync_all()?;
        }
        fs::rename(&tmp_path, path)
    })();
    if result.is_err() {
        let _ = fs::remove_file(&tmp_path);
    }
    result
}
