pub mod ftp;

use async_trait::async_trait;

use crate::error::Result;
use crate::volume::ConnectionOptions;

/// Verifies that a volume's FTP endpoint is usable before it is created
///
/// Implementations hold no connections: every call dials, checks and
/// disconnects. Calls must be bounded by a timeout.
#[async_trait]
pub trait ConnectivityChecker: Send + Sync {
    /// Dial the server and log in with the volume's credentials
    ///
    /// Fails with `Connection` or `Auth`.
    async fn check_connection(&self, options: &ConnectionOptions) -> Result<()>;

    /// Log in and verify that `options.remote_path` exists
    ///
    /// Fails with `Connection`, `Auth` or `RemoteDirNotFound`.
    async fn check_remote_dir(&self, options: &ConnectionOptions) -> Result<()>;
}
