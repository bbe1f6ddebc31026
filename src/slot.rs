//! Run identifier slot shared between processes.
//!
//! When several processes report into one run (parallel test workers, or a
//! separate `reportwire finalize` invocation), the process that starts the run
//! publishes its identifier here so finalization can still find it after the
//! in-process [`crate::identity::IdentityStore`] is gone.

use std::{
    fs::{self, File},
    io::{self, Write},
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use log::debug;
use serde::{Deserialize, Serialize};

use crate::model::ItemId;

/// Errors raised while reading or writing a run slot.
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum SlotError {
    /// The slot file could not be read or written.
    #[error("run slot I/O failed: {0}")]
    Io(#[from] io::Error),
    /// The slot file exists but does not hold a run record.
    #[error("run slot is malformed: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Storage for the current run identifier visible to other processes.
pub trait RunSlot: Send + Sync {
    /// Record `run` as the current run.
    ///
    /// # Errors
    ///
    /// Returns a [`SlotError`] if the record could not be stored.
    fn publish(&self, run: &ItemId) -> Result<(), SlotError>;

    /// Read the current run, if any.
    ///
    /// # Errors
    ///
    /// Returns a [`SlotError`] if a record exists but cannot be read.
    fn load(&self) -> Result<Option<ItemId>, SlotError>;

    /// Remove the record. Clearing an empty slot succeeds.
    ///
    /// # Errors
    ///
    /// Returns a [`SlotError`] if the record could not be removed.
    fn clear(&self) -> Result<(), SlotError>;
}

#[derive(Debug, Serialize, Deserialize)]
struct SlotRecord {
    run_id: ItemId,
    pid: u32,
    written_at: DateTime<Utc>,
}

/// [`RunSlot`] backed by a small JSON file.
///
/// Writes go to a sibling temporary file that is renamed over the slot, so
/// readers never observe a partial record.
///
/// ```
/// use reportwire::{
///     model::ItemId,
///     slot::{FileRunSlot, RunSlot},
/// };
///
/// let dir = std::env::temp_dir().join(format!("reportwire-doc-{}", std::process::id()));
/// std::fs::create_dir_all(&dir).expect("create dir");
/// let slot = FileRunSlot::new(dir.join("run.json"));
/// slot.publish(&ItemId::from("run-1")).expect("publish");
/// assert_eq!(slot.load().expect("load"), Some(ItemId::from("run-1")));
/// slot.clear().expect("clear");
/// assert_eq!(slot.load().expect("load"), None);
/// ```
#[derive(Clone, Debug)]
pub struct FileRunSlot {
    path: PathBuf,
}

impl FileRunSlot {
    /// Slot stored at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self { Self { path: path.into() } }

    /// Location of the slot file.
    #[must_use]
    pub fn path(&self) -> &Path { &self.path }
}

impl RunSlot for FileRunSlot {
    fn publish(&self, run: &ItemId) -> Result<(), SlotError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        let record = SlotRecord {
            run_id: run.clone(),
            pid: std::process::id(),
            written_at: Utc::now(),
        };
        let temp_path = self.path.with_extension("tmp");
        {
            let mut file = File::create(&temp_path)?;
            serde_json::to_writer(&mut file, &record)?;
            file.flush()?;
        }
        fs::rename(&temp_path, &self.path)?;
        debug!("published run {run} to {}", self.path.display());
        Ok(())
    }

    fn load(&self) -> Result<Option<ItemId>, SlotError> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let record: SlotRecord = serde_json::from_str(&contents)?;
        Ok(Some(record.run_id))
    }

    fn clear(&self) -> Result<(), SlotError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}
