//! FTP login check
//!
//! Logs in over the control connection with `suppaftp` and optionally changes
//! into the volume's remote directory. No data connection is ever opened.

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use suppaftp::{FtpError, FtpStream};
use tracing::{debug, error};

use super::ConnectivityChecker;
use crate::error::{Result, VolumeError};
use crate::volume::ConnectionOptions;

/// Default bound on a whole check, dial included
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Checks FTP reachability by logging in over the control connection
#[derive(Debug, Clone)]
pub struct FtpChecker {
    timeout: Duration,
}

impl Default for FtpChecker {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT)
    }
}

impl FtpChecker {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    async fn check(&self, options: &ConnectionOptions, check_dir: bool) -> Result<()> {
        // Values end up verbatim on FTP command lines
        options.validate()?;

        let address = options.address();
        let session = run_session(options, check_dir, self.timeout);

        let result = match tokio::time::timeout(self.timeout, session).await {
            Ok(result) => result,
            Err(_) => Err(VolumeError::Connection(format!(
                "{}: timed out after {:?}",
                address, self.timeout
            ))),
        };

        if let Err(e) = &result {
            error!("FTP check against {} failed: {}", address, e);
        }
        result
    }
}

#[async_trait]
impl ConnectivityChecker for FtpChecker {
    async fn check_connection(&self, options: &ConnectionOptions) -> Result<()> {
        self.check(options, false).await
    }

    async fn check_remote_dir(&self, options: &ConnectionOptions) -> Result<()> {
        self.check(options, true).await
    }
}

async fn run_session(options: &ConnectionOptions, check_dir: bool, timeout: Duration) -> Result<()> {
    let address = options.address();
    let addr = resolve(&address).await?;
    let options = options.clone();

    tokio::task::spawn_blocking(move || login(addr, &options, check_dir, timeout))
        .await
        .map_err(|e| VolumeError::Connection(format!("{}: session aborted: {}", address, e)))?
}

async fn resolve(address: &str) -> Result<SocketAddr> {
    tokio::net::lookup_host(address)
        .await
        .map_err(|e| VolumeError::Connection(format!("{}: {}", address, e)))?
        .next()
        .ok_or_else(|| VolumeError::Connection(format!("{}: no address found", address)))
}

/// Blocking login session; every socket operation is bounded by `timeout`
fn login(
    addr: SocketAddr,
    options: &ConnectionOptions,
    check_dir: bool,
    timeout: Duration,
) -> Result<()> {
    let address = options.address();
    let connection_err = |e: FtpError| VolumeError::Connection(format!("{}: {}", address, e));

    let mut ftp = FtpStream::connect_timeout(addr, timeout).map_err(connection_err)?;
    ftp.get_ref()
        .set_read_timeout(Some(timeout))
        .and_then(|_| ftp.get_ref().set_write_timeout(Some(timeout)))
        .map_err(|e| VolumeError::Connection(format!("{}: {}", address, e)))?;

    ftp.login(&options.user, &options.password)
        .map_err(|e| match e {
            FtpError::UnexpectedResponse(_) => {
                VolumeError::Auth(format!("{} as {}: {}", address, options.user, e))
            }
            other => connection_err(other),
        })?;
    debug!("Logged in to {} as {}", address, options.user);

    if check_dir {
        ftp.cwd(&options.remote_path).map_err(|e| match e {
            FtpError::UnexpectedResponse(_) => {
                VolumeError::RemoteDirNotFound(format!("{}: {}", options.remote_path, e))
            }
            other => connection_err(other),
        })?;
    }

    // Best effort, the server may hang up first
    let _ = ftp.quit();
    Ok(())
}
