//! Volume lifecycle orchestration
//!
//! `VolumeDriver` implements the plugin verbs on top of the registry. Verbs
//! that touch a single volume (create, remove, mount, unmount) hold that
//! volume's async lock for their whole duration, so the physical mount or
//! unmount and the lease bookkeeping happen as one step per name.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::checker::ftp::FtpChecker;
use crate::checker::ConnectivityChecker;
use crate::config::Config;
use crate::error::{Result, VolumeError};
use crate::executor::curlftpfs::CurlFtpFs;
use crate::executor::MountExecutor;
use crate::registry::VolumeRegistry;
use crate::state::StateStore;
use crate::volume::{
    validate_volume_name, ConnectionDefaults, ConnectionOptions, VolumeRecord, DEFAULT_REMOTE_PATH,
};

/// Visibility of volumes created by this driver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    Local,
    Global,
}

/// Answer to the capabilities verb
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Capability {
    pub scope: Scope,
}

/// The volume driver
pub struct VolumeDriver {
    /// Mountpoints are created under this directory
    root: PathBuf,
    defaults: ConnectionDefaults,
    registry: VolumeRegistry,
    state: StateStore,
    checker: Arc<dyn ConnectivityChecker>,
    executor: Arc<dyn MountExecutor>,
    /// Per-volume locks, only for names that have a volume or a caller
    /// waiting on one
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl VolumeDriver {
    pub fn new(
        root: impl Into<PathBuf>,
        state: StateStore,
        checker: Arc<dyn ConnectivityChecker>,
        executor: Arc<dyn MountExecutor>,
    ) -> Self {
        Self {
            root: root.into(),
            defaults: ConnectionDefaults::default(),
            registry: VolumeRegistry::new(),
            state,
            checker,
            executor,
            locks: DashMap::new(),
        }
    }

    /// Build a driver with the FTP checker and curlftpfs executor
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.driver.root.clone(),
            StateStore::new(config.state.dir.clone()),
            Arc::new(FtpChecker::new(config.checker.timeout)),
            Arc::new(CurlFtpFs::new((&config.executor).into())),
        )
        .with_defaults(config.defaults.clone())
    }

    /// Connection values applied when a create request omits them
    pub fn with_defaults(mut self, defaults: ConnectionDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn registry(&self) -> &VolumeRegistry {
        &self.registry
    }

    pub fn state(&self) -> &StateStore {
        &self.state
    }

    fn lock_for(&self, name: &str) -> Arc<Mutex<()>> {
        self.locks.entry(name.to_string()).or_default().clone()
    }

    /// Drop the lock entry of a name without a volume, unless another caller
    /// already holds a handle to it. Must be called while `lock` is held.
    fn release_lock(&self, name: &str, lock: &Arc<Mutex<()>>) {
        let removed = self.locks.remove_if(name, |_, held| {
            Arc::ptr_eq(held, lock) && Arc::strong_count(held) == 2 && !self.registry.contains(name)
        });
        if removed.is_some() {
            debug!("Released lock for {}", name);
        }
    }

    fn check_exists(&self, name: &str) -> Result<()> {
        if self.registry.contains(name) {
            Ok(())
        } else {
            Err(VolumeError::NotFound(name.to_string()))
        }
    }

    /// Save a snapshot; failures are logged and the in-memory state stays
    /// authoritative until the next successful save
    fn persist(&self) {
        if let Err(e) = self.state.save(&self.registry) {
            warn!("Failed to update state data file: {}", e);
        }
    }

    /// Load saved volumes into the (empty) registry at startup.
    ///
    /// Missing state starts empty. Records without options are dropped with
    /// a warning unless `strict` is set, in which case `PartialState` is
    /// returned.
    pub fn restore(&self, strict: bool) -> Result<usize> {
        match self.state.restore(&self.registry) {
            Ok(restored) => Ok(restored),
            Err(VolumeError::NoPriorState) => {
                info!("No saved state in {:?}, starting empty", self.state.dir());
                Ok(0)
            }
            Err(VolumeError::PartialState { restored, orphaned }) if !strict => {
                warn!(
                    "Restored {} volume(s); dropped {:?} with no saved options",
                    restored.len(),
                    orphaned
                );
                Ok(restored.len())
            }
            Err(e) => Err(e),
        }
    }

    /// Validate the request, check the FTP endpoint and register the volume
    pub async fn create(&self, name: &str, opts: &HashMap<String, String>) -> Result<()> {
        validate_volume_name(name)?;
        let options = ConnectionOptions::from_request(opts, &self.defaults)?;

        let lock = self.lock_for(name);
        let guard = lock.lock().await;
        let result = self.create_locked(name, options).await;
        self.release_lock(name, &lock);
        drop(guard);
        result
    }

    async fn create_locked(&self, name: &str, options: ConnectionOptions) -> Result<()> {
        // Fail fast before dialing out
        if self.registry.contains(name) {
            return Err(VolumeError::AlreadyExists(name.to_string()));
        }

        self.checker.check_connection(&options).await?;
        if options.remote_path != DEFAULT_REMOTE_PATH {
            self.checker.check_remote_dir(&options).await?;
        }

        let record = VolumeRecord::new(name, &self.root);
        let mountpoint = record.mountpoint.clone();
        self.registry.create(record, options)?;
        info!("Created volume {} at {:?}", name, mountpoint);

        self.persist();
        Ok(())
    }

    pub fn list(&self) -> Vec<VolumeRecord> {
        self.registry.list()
    }

    pub fn get(&self, name: &str) -> Result<VolumeRecord> {
        self.registry.get(name)
    }

    pub fn path(&self, name: &str) -> Result<PathBuf> {
        self.registry.path(name)
    }

    /// Remove an unmounted volume and its mountpoint directory
    pub async fn remove(&self, name: &str) -> Result<()> {
        self.check_exists(name)?;

        let lock = self.lock_for(name);
        let guard = lock.lock().await;
        let result = self.remove_locked(name).await;
        self.release_lock(name, &lock);
        drop(guard);
        result
    }

    async fn remove_locked(&self, name: &str) -> Result<()> {
        let record = self.registry.remove(name)?;
        info!("Removed volume {}", name);

        if let Err(e) = self.executor.remove_mountpoint(&record.mountpoint).await {
            warn!("Failed to remove volume directory {:?}: {}", record.mountpoint, e);
        }

        self.persist();
        Ok(())
    }

    /// Take a lease on the volume, mounting it if this is the first lease.
    ///
    /// Returns the mountpoint. If the physical mount fails the lease is
    /// released again.
    pub async fn mount(&self, lease: &str, name: &str) -> Result<PathBuf> {
        self.check_exists(name)?;

        let lock = self.lock_for(name);
        let guard = lock.lock().await;
        let result = self.mount_locked(lease, name).await;
        self.release_lock(name, &lock);
        drop(guard);
        result
    }

    async fn mount_locked(&self, lease: &str, name: &str) -> Result<PathBuf> {
        let record = self.registry.get(name)?;
        let options = self
            .registry
            .options(name)
            .ok_or_else(|| VolumeError::NotFound(name.to_string()))?;

        let count = self.registry.mount(lease, name)?;
        if count > 1 {
            debug!("Volume {} already mounted ({} leases)", name, count);
            return Ok(record.mountpoint);
        }

        if let Err(e) = self.executor.mount(&record.mountpoint, &options).await {
            if let Err(rollback) = self.registry.unmount(lease, name) {
                warn!("Failed to release lease {} on {}: {}", lease, name, rollback);
            }
            return Err(e);
        }

        info!("Mounted volume {} at {:?}", name, record.mountpoint);
        Ok(record.mountpoint)
    }

    /// Release a lease, unmounting the volume when it was the last one.
    ///
    /// If the physical unmount fails the lease is kept so the volume still
    /// reports as mounted.
    pub async fn unmount(&self, lease: &str, name: &str) -> Result<()> {
        self.check_exists(name)?;

        let lock = self.lock_for(name);
        let guard = lock.lock().await;
        let result = self.unmount_locked(lease, name).await;
        self.release_lock(name, &lock);
        drop(guard);
        result
    }

    async fn unmount_locked(&self, lease: &str, name: &str) -> Result<()> {
        let mountpoint = self.registry.path(name)?;
        let remaining = self.registry.unmount(lease, name)?;
        if remaining > 0 {
            debug!("Volume {} still held by {} lease(s)", name, remaining);
            return Ok(());
        }

        if let Err(e) = self.executor.unmount(&mountpoint).await {
            if let Err(restore) = self.registry.mount(lease, name) {
                warn!("Failed to restore lease {} on {}: {}", lease, name, restore);
            }
            return Err(e);
        }

        if let Err(e) = self.executor.remove_mountpoint(&mountpoint).await {
            warn!("Failed to remove mounted directory {:?}: {}", mountpoint, e);
        }

        info!("Unmounted volume {}", name);
        Ok(())
    }

    pub fn capabilities(&self) -> Capability {
        Capability {
            scope: Scope::Local,
        }
    }

    /// Write a final snapshot
    pub fn shutdown(&self) -> Result<()> {
        self.state.save(&self.registry)
    }
}
