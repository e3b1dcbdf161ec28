pub mod curlftpfs;

use std::path::Path;

use async_trait::async_trait;

use crate::error::Result;
use crate::volume::ConnectionOptions;

/// Performs the physical attach/detach of a remote directory
///
/// The driver calls `mount` only when a volume gains its first lease and
/// `unmount` + `remove_mountpoint` only when it loses its last one.
#[async_trait]
pub trait MountExecutor: Send + Sync {
    /// Attach `options.remote_path` at `mountpoint`, creating the directory
    async fn mount(&self, mountpoint: &Path, options: &ConnectionOptions) -> Result<()>;

    /// Detach whatever is mounted at `mountpoint`
    async fn unmount(&self, mountpoint: &Path) -> Result<()>;

    /// Delete the mountpoint directory; an absent directory is not an error
    async fn remove_mountpoint(&self, mountpoint: &Path) -> Result<()>;
}
