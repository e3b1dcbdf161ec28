//! Snapshot persistence for the volume registry
//!
//! State lives in a directory holding two JSON documents keyed by volume
//! name: `volumes.json` (records) and `options.json` (connection options).
//! Each document is replaced atomically (temp file + rename in the same
//! directory); the pair is not written transactionally, so a crash between
//! the two writes is reported on the next restore as `PartialState` or
//! corrected by the next successful save.

use std::collections::BTreeMap;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::error::{Result, VolumeError};
use crate::registry::VolumeRegistry;
use crate::volume::{ConnectionOptions, VolumeRecord};

/// File name of the records document
pub const VOLUMES_FILE: &str = "volumes.json";
/// File name of the options document
pub const OPTIONS_FILE: &str = "options.json";

/// Reads and writes registry snapshots under a state directory
#[derive(Debug)]
pub struct StateStore {
    dir: PathBuf,
    /// Serializes snapshot writes from this process
    write_lock: Mutex<()>,
}

impl StateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn volumes_path(&self) -> PathBuf {
        self.dir.join(VOLUMES_FILE)
    }

    pub fn options_path(&self) -> PathBuf {
        self.dir.join(OPTIONS_FILE)
    }

    /// Create the state directory if it does not exist
    pub fn ensure_dir(&self) -> Result<()> {
        std::fs::create_dir_all(&self.dir).map_err(|e| {
            VolumeError::StorageInitFailed(format!("{}: {}", self.dir.display(), e))
        })
    }

    /// Write the full contents of the registry to both documents
    pub fn save(&self, registry: &VolumeRegistry) -> Result<()> {
        let _guard = self.write_lock.lock();

        std::fs::create_dir_all(&self.dir).map_err(|e| {
            VolumeError::PersistenceFailed(format!("{}: {}", self.dir.display(), e))
        })?;

        let mut volumes = BTreeMap::new();
        let mut options = BTreeMap::new();
        for (record, opts) in registry.entries() {
            options.insert(record.name.clone(), opts);
            volumes.insert(record.name.clone(), record);
        }

        write_document(&self.volumes_path(), &volumes)?;
        write_document(&self.options_path(), &options)?;

        debug!("Saved state for {} volume(s) to {:?}", volumes.len(), self.dir);
        Ok(())
    }

    /// Replay the saved documents into an empty registry.
    ///
    /// Returns the number of restored volumes. A missing document yields
    /// `NoPriorState`; records without options are skipped and reported as
    /// `PartialState` after every complete volume has been restored.
    pub fn restore(&self, registry: &VolumeRegistry) -> Result<usize> {
        self.ensure_dir()?;

        let volumes: BTreeMap<String, VolumeRecord> = match read_document(&self.volumes_path())? {
            Some(volumes) => volumes,
            None => return Err(VolumeError::NoPriorState),
        };
        let mut options: BTreeMap<String, ConnectionOptions> =
            match read_document(&self.options_path())? {
                Some(options) => options,
                None => return Err(VolumeError::NoPriorState),
            };

        let mut restored = Vec::with_capacity(volumes.len());
        let mut orphaned = Vec::new();

        for (name, record) in volumes {
            if record.name != name {
                return Err(VolumeError::CorruptState(format!(
                    "record keyed '{}' is named '{}'",
                    name, record.name
                )));
            }

            match options.remove(&name) {
                Some(opts) => {
                    registry.create(record, opts)?;
                    restored.push(name);
                }
                None => {
                    warn!("No options found for volume {}, skipping", name);
                    orphaned.push(name);
                }
            }
        }

        for name in options.keys() {
            debug!("Ignoring options for unknown volume {}", name);
        }

        if !orphaned.is_empty() {
            return Err(VolumeError::PartialState { restored, orphaned });
        }

        info!("Restored {} volume(s) from {:?}", restored.len(), self.dir);
        Ok(restored.len())
    }
}

fn read_document<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let data = match std::fs::read(path) {
        Ok(data) => data,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(VolumeError::Io(io::Error::new(
                e.kind(),
                format!("{}: {}", path.display(), e),
            )))
        }
    };

    serde_json::from_slice(&data)
        .map(Some)
        .map_err(|e| VolumeError::CorruptState(format!("{}: {}", path.display(), e)))
}

fn write_document<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let persist_err = |e: io::Error| {
        VolumeError::PersistenceFailed(format!("{}: {}", path.display(), e))
    };

    let data = serde_json::to_vec_pretty(value)
        .map_err(|e| VolumeError::PersistenceFailed(format!("{}: {}", path.display(), e)))?;

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = NamedTempFile::new_in(dir).map_err(persist_err)?;
    tmp.write_all(&data).map_err(persist_err)?;
    tmp.as_file().sync_all().map_err(persist_err)?;
    tmp.persist(path).map_err(|e| persist_err(e.error))?;
    Ok(())
}
