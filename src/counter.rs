//! Visitor counter storage
//!
//! The counter is independent of the render pipeline; the HTTP layer is
//! handed a [`CounterStore`] at startup.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Minimal increment/read interface over some persistent store
pub trait CounterStore: Send + Sync {
    /// Add one and return the new value
    fn increment(&self) -> Result<u64>;

    /// Current value without changing it
    fn current(&self) -> Result<u64>;
}

/// Process-local counter, lost on restart
#[derive(Debug, Default)]
pub struct MemoryCounter {
    count: AtomicU64,
}

impl MemoryCounter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CounterStore for MemoryCounter {
    fn increment(&self) -> Result<u64> {
        Ok(self.count.fetch_add(1, Ordering::SeqCst) + 1)
    }

    fn current(&self) -> Result<u64> {
        Ok(self.count.load(Ordering::SeqCst))
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CounterDoc {
    count: u64,
}

/// Counter persisted as `{"count": n}` in a JSON file.
///
/// Writes go to a sibling temp file that is then renamed over the original,
/// so a crash never leaves a half-written document behind.
#[derive(Debug)]
pub struct FileCounter {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileCounter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    fn read(&self) -> Result<CounterDoc> {
        match std::fs::read(&self.path) {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| Error::StorageError(format!("{}: {}", self.path.display(), e))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(CounterDoc::default()),
            Err(e) => Err(Error::StorageError(format!("{}: {}", self.path.display(), e))),
        }
    }

    fn write(&self, doc: &CounterDoc) -> Result<()> {
        let tmp = self.path.with_extension("tmp");
        let body = serde_json::to_vec(doc).map_err(|e| Error::StorageError(e.to_string()))?;
        std::fs::write(&tmp, body)
            .and_then(|_| std::fs::rename(&tmp, &self.path))
            .map_err(|e| Error::StorageError(format!("{}: {}", self.path.display(), e)))
    }
}

impl CounterStore for FileCounter {
    fn increment(&self) -> Result<u64> {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| Error::StorageError("counter lock poisoned".into()))?;
        let mut doc = self.read()?;
        doc.count += 1;
        self.write(&doc)?;
        Ok(doc.count)
    }

    fn current(&self) -> Result<u64> {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| Error::StorageError("counter lock poisoned".into()))?;
        Ok(self.read()?.count)
    }
}
