//! Persisted capture results.
//!
//! The whole schema is two keys: [`LATEST_KEY`] holds the most recent
//! [`CaptureResult`] and [`BATCH_KEY`] the results of the last batch run.
//! Every write replaces the previous value outright. Writers are serialized
//! by the store itself, so at most one write is in flight at a time.

use crate::{CaptureResult, Error, Result};
use log::debug;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

pub const LATEST_KEY: &str = "latest";
pub const BATCH_KEY: &str = "batch";

/// Key/value persistence for capture results
pub trait ResultStore {
    fn put_latest(&self, result: &CaptureResult) -> Result<()>;

    fn latest(&self) -> Result<Option<CaptureResult>>;

    fn put_batch(&self, results: &[CaptureResult]) -> Result<()>;

    fn batch(&self) -> Result<Vec<CaptureResult>>;
}

impl<T: ResultStore + ?Sized> ResultStore for &T {
    fn put_latest(&self, result: &CaptureResult) -> Result<()> {
        (**self).put_latest(result)
    }

    fn latest(&self) -> Result<Option<CaptureResult>> {
        (**self).latest()
    }

    fn put_batch(&self, results: &[CaptureResult]) -> Result<()> {
        (**self).put_batch(results)
    }

    fn batch(&self) -> Result<Vec<CaptureResult>> {
        (**self).batch()
    }
}

#[derive(Default)]
struct Slots {
    latest: Option<CaptureResult>,
    batch: Vec<CaptureResult>,
}

/// In-memory store; clones share the same slots
#[derive(Clone, Default)]
pub struct MemoryStore {
    slots: Arc<Mutex<Slots>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_slots<R>(&self, f: impl FnOnce(&mut Slots) -> R) -> Result<R> {
        let mut slots = self
            .slots
            .lock()
            .map_err(|_| Error::Storage("memory store poisoned".into()))?;
        Ok(f(&mut slots))
    }
}

impl ResultStore for MemoryStore {
    fn put_latest(&self, result: &CaptureResult) -> Result<()> {
        self.with_slots(|s| s.latest = Some(result.clone()))
    }

    fn latest(&self) -> Result<Option<CaptureResult>> {
        self.with_slots(|s| s.latest.clone())
    }

    fn put_batch(&self, results: &[CaptureResult]) -> Result<()> {
        self.with_slots(|s| s.batch = results.to_vec())
    }

    fn batch(&self) -> Result<Vec<CaptureResult>> {
        self.with_slots(|s| s.batch.clone())
    }
}

/// JSON files in a directory, one per key (`latest.json`, `batch.json`).
///
/// Values are written to a temporary file and renamed into place so readers
/// in other processes never see a partial record.
pub struct FileStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl FileStore {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .map_err(|e| Error::Storage(format!("Failed to create {}: {}", dir.display(), e)))?;
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }

    fn write<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| Error::Storage("file store writer poisoned".into()))?;
        let json = serde_json::to_vec(value)
            .map_err(|e| Error::Storage(format!("Failed to encode {}: {}", key, e)))?;
        let target = self.path(key);
        let tmp = self.dir.join(format!(".{}.json.tmp", key));
        fs::write(&tmp, json).map_err(|e| Error::Storage(format!("Failed to write {}: {}", tmp.display(), e)))?;
        fs::rename(&tmp, &target)
            .map_err(|e| Error::Storage(format!("Failed to replace {}: {}", target.display(), e)))?;
        debug!("stored {} at {}", key, target.display());
        Ok(())
    }

    fn read<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let path = self.path(key);
        let bytes = match fs::read(&path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::Storage(format!("Failed to read {}: {}", path.display(), e))),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| Error::Storage(format!("Corrupt {} record: {}", key, e)))
    }
}

impl ResultStore for FileStore {
    fn put_latest(&self, result: &CaptureResult) -> Result<()> {
        self.write(LATEST_KEY, result)
    }

    fn latest(&self) -> Result<Option<CaptureResult>> {
        self.read(LATEST_KEY)
    }

    fn put_batch(&self, results: &[CaptureResult]) -> Result<()> {
        self.write(BATCH_KEY, results)
    }

    fn batch(&self) -> Result<Vec<CaptureResult>> {
        Ok(self.read(BATCH_KEY)?.unwrap_or_default())
    }
}
