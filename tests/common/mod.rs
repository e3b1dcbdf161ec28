//! Shared fixtures for driver integration tests
//!
//! `FakeChecker` and `RecordingExecutor` stand in for the FTP login check and the
//! curlftpfs bridge so the lifecycle can be exercised without a server or
//! FUSE. `Harness` wires them into a driver rooted in a temporary directory.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tempfile::TempDir;

use ftp_volume_driver::checker::ConnectivityChecker;
use ftp_volume_driver::driver::VolumeDriver;
use ftp_volume_driver::executor::MountExecutor;
use ftp_volume_driver::state::StateStore;
use ftp_volume_driver::volume::ConnectionOptions;
use ftp_volume_driver::{Result, VolumeError};

/// How the fake FTP server answers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerBehavior {
    Accept,
    Unreachable,
    RejectLogin,
    MissingDir,
}

pub struct FakeChecker {
    behavior: Mutex<ServerBehavior>,
    pub connection_checks: AtomicUsize,
    pub dir_checks: AtomicUsize,
}

impl FakeChecker {
    pub fn new() -> Self {
        Self {
            behavior: Mutex::new(ServerBehavior::Accept),
            connection_checks: AtomicUsize::new(0),
            dir_checks: AtomicUsize::new(0),
        }
    }

    pub fn set(&self, behavior: ServerBehavior) {
        *self.behavior.lock() = behavior;
    }

    fn login(&self, options: &ConnectionOptions) -> Result<()> {
        match *self.behavior.lock() {
            ServerBehavior::Unreachable => Err(VolumeError::Connection(options.address())),
            ServerBehavior::RejectLogin => Err(VolumeError::Auth(options.user.clone())),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl ConnectivityChecker for FakeChecker {
    async fn check_connection(&self, options: &ConnectionOptions) -> Result<()> {
        self.connection_checks.fetch_add(1, Ordering::SeqCst);
        self.login(options)
    }

    async fn check_remote_dir(&self, options: &ConnectionOptions) -> Result<()> {
        self.dir_checks.fetch_add(1, Ordering::SeqCst);
        self.login(options)?;
        if *self.behavior.lock() == ServerBehavior::MissingDir {
            return Err(VolumeError::RemoteDirNotFound(options.remote_path.clone()));
        }
        Ok(())
    }
}

/// Executor that records every call and tracks which paths are attached
pub struct RecordingExecutor {
    pub mounts: Mutex<Vec<PathBuf>>,
    pub unmounts: Mutex<Vec<PathBuf>>,
    pub removed: Mutex<Vec<PathBuf>>,
    attached: Mutex<HashSet<PathBuf>>,
    /// Mounts of an already attached path, or unmounts of a detached one
    pub violations: AtomicUsize,
    pub fail_mount: AtomicBool,
    pub fail_unmount: AtomicBool,
    pub mount_delay: Mutex<Option<Duration>>,
}

impl RecordingExecutor {
    pub fn new() -> Self {
        Self {
            mounts: Mutex::new(Vec::new()),
            unmounts: Mutex::new(Vec::new()),
            removed: Mutex::new(Vec::new()),
            attached: Mutex::new(HashSet::new()),
            violations: AtomicUsize::new(0),
            fail_mount: AtomicBool::new(false),
            fail_unmount: AtomicBool::new(false),
            mount_delay: Mutex::new(None),
        }
    }

    pub fn mount_count(&self) -> usize {
        self.mounts.lock().len()
    }

    pub fn unmount_count(&self) -> usize {
        self.unmounts.lock().len()
    }

    pub fn is_attached(&self, path: &Path) -> bool {
        self.attached.lock().contains(path)
    }
}

#[async_trait]
impl MountExecutor for RecordingExecutor {
    async fn mount(&self, mountpoint: &Path, options: &ConnectionOptions) -> Result<()> {
        let delay = *self.mount_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_mount.load(Ordering::SeqCst) {
            return Err(VolumeError::Mount(options.url()));
        }

        self.mounts.lock().push(mountpoint.to_path_buf());
        if !self.attached.lock().insert(mountpoint.to_path_buf()) {
            self.violations.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn unmount(&self, mountpoint: &Path) -> Result<()> {
        if self.fail_unmount.load(Ordering::SeqCst) {
            return Err(VolumeError::Unmount(mountpoint.display().to_string()));
        }

        self.unmounts.lock().push(mountpoint.to_path_buf());
        if !self.attached.lock().remove(mountpoint) {
            self.violations.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn remove_mountpoint(&self, mountpoint: &Path) -> Result<()> {
        self.removed.lock().push(mountpoint.to_path_buf());
        Ok(())
    }
}

/// A driver wired to fakes under a temporary directory
pub struct Harness {
    pub dir: TempDir,
    pub checker: Arc<FakeChecker>,
    pub executor: Arc<RecordingExecutor>,
    pub driver: Arc<VolumeDriver>,
}

impl Harness {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let checker = Arc::new(FakeChecker::new());
        let executor = Arc::new(RecordingExecutor::new());
        let driver = Arc::new(Self::build(dir.path(), checker.clone(), executor.clone()));
        Self {
            dir,
            checker,
            executor,
            driver,
        }
    }

    fn build(
        dir: &Path,
        checker: Arc<FakeChecker>,
        executor: Arc<RecordingExecutor>,
    ) -> VolumeDriver {
        VolumeDriver::new(
            dir.join("volumes"),
            StateStore::new(dir.join("state")),
            checker,
            executor,
        )
    }

    pub fn root(&self) -> PathBuf {
        self.dir.path().join("volumes")
    }

    /// A second driver over the same state directory, as after a restart
    pub fn restart(&self) -> VolumeDriver {
        Self::build(
            self.dir.path(),
            Arc::new(FakeChecker::new()),
            Arc::new(RecordingExecutor::new()),
        )
    }
}

/// Create options for the reference endpoint
pub fn ftp_opts() -> HashMap<String, String> {
    opts(&[
        ("host", "ftp.example.com"),
        ("port", "21"),
        ("user", "u"),
        ("password", "p"),
        ("remotepath", "/data"),
    ])
}

pub fn opts(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}
