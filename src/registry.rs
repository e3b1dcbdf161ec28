//! In-memory volume registry with per-volume mount reference counting
//!
//! Each volume name maps to one entry holding its record, its connection
//! options and the set of lease IDs that currently hold it mounted. All
//! read-modify-write operations on a name go through the map's entry guards,
//! so they are serialized per name while different names proceed in parallel.

use std::collections::HashSet;
use std::path::PathBuf;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::debug;

use crate::error::{Result, VolumeError};
use crate::volume::{ConnectionOptions, VolumeRecord};

/// Everything the registry knows about one volume
#[derive(Debug)]
struct VolumeEntry {
    record: VolumeRecord,
    options: ConnectionOptions,
    /// Lease IDs currently holding the volume mounted
    leases: HashSet<String>,
}

/// Authoritative catalog of volumes
#[derive(Debug, Default)]
pub struct VolumeRegistry {
    volumes: DashMap<String, VolumeEntry>,
}

impl VolumeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a new volume together with its options
    pub fn create(&self, record: VolumeRecord, options: ConnectionOptions) -> Result<()> {
        if record.name.is_empty() {
            return Err(VolumeError::InvalidArgument(
                "volume name must not be empty".to_string(),
            ));
        }
        if options.host.is_empty() {
            return Err(VolumeError::InvalidArgument(format!(
                "volume '{}' has no host",
                record.name
            )));
        }

        match self.volumes.entry(record.name.clone()) {
            Entry::Occupied(_) => Err(VolumeError::AlreadyExists(record.name)),
            Entry::Vacant(slot) => {
                debug!("Registered volume {}", record.name);
                slot.insert(VolumeEntry {
                    record,
                    options,
                    leases: HashSet::new(),
                });
                Ok(())
            }
        }
    }

    pub fn get(&self, name: &str) -> Result<VolumeRecord> {
        self.volumes
            .get(name)
            .map(|entry| entry.record.clone())
            .ok_or_else(|| VolumeError::NotFound(name.to_string()))
    }

    /// All volume records, in no particular order
    pub fn list(&self) -> Vec<VolumeRecord> {
        self.volumes
            .iter()
            .map(|entry| entry.record.clone())
            .collect()
    }

    /// Connection options for a volume, `None` if the name is unknown
    pub fn options(&self, name: &str) -> Option<ConnectionOptions> {
        self.volumes.get(name).map(|entry| entry.options.clone())
    }

    /// Record and options of every volume, each pair read under one guard
    pub fn entries(&self) -> Vec<(VolumeRecord, ConnectionOptions)> {
        self.volumes
            .iter()
            .map(|entry| (entry.record.clone(), entry.options.clone()))
            .collect()
    }

    pub fn path(&self, name: &str) -> Result<PathBuf> {
        self.volumes
            .get(name)
            .map(|entry| entry.record.mountpoint.clone())
            .ok_or_else(|| VolumeError::NotFound(name.to_string()))
    }

    /// Delete a volume that no lease holds mounted, returning its record
    pub fn remove(&self, name: &str) -> Result<VolumeRecord> {
        match self.volumes.entry(name.to_string()) {
            Entry::Vacant(_) => Err(VolumeError::NotFound(name.to_string())),
            Entry::Occupied(slot) => {
                let leases = slot.get().leases.len();
                if leases > 0 {
                    return Err(VolumeError::InUse {
                        name: name.to_string(),
                        leases,
                    });
                }
                let (_, entry) = slot.remove_entry();
                debug!("Removed volume {}", name);
                Ok(entry.record)
            }
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.volumes.contains_key(name)
    }

    /// Whether any lease holds the volume mounted; false for unknown names
    pub fn is_mounted(&self, name: &str) -> bool {
        self.volumes
            .get(name)
            .map(|entry| !entry.leases.is_empty())
            .unwrap_or(false)
    }

    /// Add a lease to the volume and return the new lease count.
    ///
    /// A returned count of 1 means this call moved the volume from unmounted
    /// to mounted; the caller performs the physical mount.
    pub fn mount(&self, lease: &str, name: &str) -> Result<usize> {
        if lease.is_empty() {
            return Err(VolumeError::InvalidArgument(
                "lease id must not be empty".to_string(),
            ));
        }

        let mut entry = self
            .volumes
            .get_mut(name)
            .ok_or_else(|| VolumeError::NotFound(name.to_string()))?;

        if !entry.leases.insert(lease.to_string()) {
            return Err(VolumeError::AlreadyLeased {
                name: name.to_string(),
                lease: lease.to_string(),
            });
        }

        let count = entry.leases.len();
        debug!("Volume {} leased by {} ({} active)", name, lease, count);
        Ok(count)
    }

    /// Release a lease and return the remaining lease count.
    ///
    /// A returned count of 0 means this call released the last lease; the
    /// caller performs the physical unmount.
    pub fn unmount(&self, lease: &str, name: &str) -> Result<usize> {
        let mut entry = self
            .volumes
            .get_mut(name)
            .ok_or_else(|| VolumeError::NotFound(name.to_string()))?;

        if !entry.leases.remove(lease) {
            return Err(VolumeError::NotLeased {
                name: name.to_string(),
                lease: lease.to_string(),
            });
        }

        let count = entry.leases.len();
        debug!("Volume {} released by {} ({} active)", name, lease, count);
        Ok(count)
    }

    pub fn lease_count(&self, name: &str) -> usize {
        self.volumes
            .get(name)
            .map(|entry| entry.leases.len())
            .unwrap_or(0)
    }

    /// Lease IDs holding the volume, sorted; empty for unknown names
    pub fn leases(&self, name: &str) -> Vec<String> {
        let mut leases: Vec<String> = self
            .volumes
            .get(name)
            .map(|entry| entry.leases.iter().cloned().collect())
            .unwrap_or_default();
        leases.sort();
        leases
    }

    pub fn len(&self) -> usize {
        self.volumes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.volumes.is_empty()
    }
}
