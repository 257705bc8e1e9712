//! ==============================================================================
//! store.rs - durable record store for sensor readings
//! ==============================================================================
//!
//! purpose:
//!     holds the full time series of readings. the on-disk file is the single
//!     source of truth: one json array, oldest reading first.
//!
//! write path:
//!     every append reads the current array, pushes the new reading and
//!     rewrites the whole file. the rewrite goes through a temp file that is
//!     fsynced and renamed into place, so readers always see a complete
//!     snapshot. appends are serialized by a writer lock, concurrent
//!     submissions can not overwrite each other.
//!
//! read path:
//!     - missing, empty or whitespace-only file -> empty sequence
//!     - unparseable content -> StoreError::Malformed for that request
//!     - on the append path unparseable content is treated as empty so new
//!       data can still be recorded
//!
//! relationships:
//!     - used by: ingest.rs (append), query.rs (read_all)
//!     - MemoryStore backs tests and embedders without a disk
//!
//! ==============================================================================

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use thiserror::Error;
use tracing::{debug, warn};

use crate::domain::Reading;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("record store i/o failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("record store content is malformed: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("record store task failed: {0}")]
    Task(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// append-only holder of readings
///
/// both operations block; async callers run them on `spawn_blocking`.
pub trait RecordStore: Send + Sync {
    /// durably add one reading after all existing ones
    fn append(&self, reading: &Reading) -> StoreResult<()>;

    /// every stored reading in insertion order
    fn read_all(&self) -> StoreResult<Vec<Reading>>;
}

// ==============================================================================
// json file store
// ==============================================================================

pub struct JsonFileStore {
    path: PathBuf,
    writer: Mutex<()>,
}

impl JsonFileStore {
    /// open (or lazily create) the store at `path`, creating parent directories
    pub fn open<P: Into<PathBuf>>(path: P) -> StoreResult<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        Ok(Self {
            path,
            writer: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_raw(&self) -> StoreResult<Option<String>> {
        match fs::read_to_string(&self.path) {
            Ok(content) if content.trim().is_empty() => Ok(None),
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write_snapshot(&self, readings: &[Reading]) -> StoreResult<()> {
        let bytes = serde_json::to_vec(readings)?;

        let mut tmp_name = self.path.as_os_str().to_owned();
        tmp_name.push(".tmp");
        let tmp_path = PathBuf::from(tmp_name);

        let mut file = fs::File::create(&tmp_path)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}

impl RecordStore for JsonFileStore {
    fn append(&self, reading: &Reading) -> StoreResult<()> {
        let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);

        let mut readings = match self.read_raw()? {
            None => Vec::new(),
            Some(content) => serde_json::from_str::<Vec<Reading>>(&content).unwrap_or_else(|e| {
                warn!(path = %self.path.display(), error = %e, "record store unparseable, starting a fresh sequence");
                Vec::new()
            }),
        };
        readings.push(reading.clone());
        self.write_snapshot(&readings)?;

        debug!(path = %self.path.display(), total = readings.len(), "reading appended");
        Ok(())
    }

    fn read_all(&self) -> StoreResult<Vec<Reading>> {
        match self.read_raw()? {
            None => Ok(Vec::new()),
            Some(content) => Ok(serde_json::from_str(&content)?),
        }
    }
}

// ==============================================================================
// in-memory store
// ==============================================================================

#[derive(Default)]
pub struct MemoryStore {
    readings: Mutex<Vec<Reading>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RecordStore for MemoryStore {
    fn append(&self, reading: &Reading) -> StoreResult<()> {
        self.readings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(reading.clone());
        Ok(())
    }

    fn read_all(&self) -> StoreResult<Vec<Reading>> {
        Ok(self.readings.lock().unwrap_or_else(PoisonError::into_inner).clone())
    }
}
