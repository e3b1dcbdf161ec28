//! Mounting through the curlftpfs FUSE bridge

use std::io;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, error, info};

use super::MountExecutor;
use crate::error::{Result, VolumeError};
use crate::volume::ConnectionOptions;

/// curlftpfs executor configuration
#[derive(Debug, Clone)]
pub struct CurlFtpFsConfig {
    /// Binary invoked as `<binary> host:port/path <mountpoint> -o user=..`
    pub mount_binary: String,
    /// Binary invoked as `<binary> <mountpoint>`
    pub unmount_binary: String,
    /// Extra `-o` options passed on every mount
    pub mount_options: Vec<String>,
    /// Bound on each spawned process
    pub timeout: Duration,
}

impl Default for CurlFtpFsConfig {
    fn default() -> Self {
        Self {
            mount_binary: "curlftpfs".to_string(),
            unmount_binary: "umount".to_string(),
            mount_options: vec!["nonempty".to_string()],
            timeout: Duration::from_secs(30),
        }
    }
}

/// Mount executor shelling out to curlftpfs and the system unmount tool
#[derive(Debug, Clone, Default)]
pub struct CurlFtpFs {
    config: CurlFtpFsConfig,
}

impl CurlFtpFs {
    pub fn new(config: CurlFtpFsConfig) -> Self {
        Self { config }
    }

    /// Run a command to completion, returning a description of any failure
    async fn run(&self, mut cmd: Command) -> std::result::Result<(), String> {
        cmd.stdin(Stdio::null()).kill_on_drop(true);

        let output = match tokio::time::timeout(self.config.timeout, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(e.to_string()),
            Err(_) => return Err(format!("timed out after {:?}", self.config.timeout)),
        };

        if output.status.success() {
            Ok(())
        } else {
            Err(format!(
                "{}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ))
        }
    }
}

/// Escape a value for a FUSE `-o` option list, where `,` separates options
/// and `\` escapes the next character
fn escape_option(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if c == ',' || c == '\\' {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[async_trait]
impl MountExecutor for CurlFtpFs {
    async fn mount(&self, mountpoint: &Path, options: &ConnectionOptions) -> Result<()> {
        tokio::fs::create_dir_all(mountpoint).await.map_err(|e| {
            VolumeError::Mount(format!(
                "unable to create mount point {:?}: {}",
                mountpoint, e
            ))
        })?;

        info!("Mounting {} at {:?}", options.url(), mountpoint);

        let mut cmd = Command::new(&self.config.mount_binary);
        cmd.arg(options.url())
            .arg(mountpoint)
            .arg("-o")
            .arg(format!(
                "user={}:{}",
                escape_option(&options.user),
                escape_option(&options.password)
            ));
        for opt in &self.config.mount_options {
            cmd.arg("-o").arg(opt);
        }

        if let Err(e) = self.run(cmd).await {
            error!("Failed to mount {:?}: {}", mountpoint, e);
            // Only succeeds while the directory is still empty
            if let Err(cleanup) = tokio::fs::remove_dir(mountpoint).await {
                debug!("Left mount point {:?} in place: {}", mountpoint, cleanup);
            }
            return Err(VolumeError::Mount(format!("{:?}: {}", mountpoint, e)));
        }
        Ok(())
    }

    async fn unmount(&self, mountpoint: &Path) -> Result<()> {
        info!("Unmounting {:?}", mountpoint);

        let mut cmd = Command::new(&self.config.unmount_binary);
        cmd.arg(mountpoint);

        self.run(cmd).await.map_err(|e| {
            error!("Failed to unmount {:?}: {}", mountpoint, e);
            VolumeError::Unmount(format!("{:?}: {}", mountpoint, e))
        })
    }

    async fn remove_mountpoint(&self, mountpoint: &Path) -> Result<()> {
        match tokio::fs::remove_dir_all(mountpoint).await {
            Ok(()) => {
                debug!("Removed mount point {:?}", mountpoint);
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(VolumeError::RemoveMountpoint(format!(
                "{:?}: {}",
                mountpoint, e
            ))),
        }
    }
}
