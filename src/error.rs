use std::io;
use thiserror::Error;

/// Main error type for volume driver operations
#[derive(Error, Debug)]
pub enum VolumeError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Volume already exists: {0}")]
    AlreadyExists(String),

    #[error("Volume not found: {0}")]
    NotFound(String),

    #[error("Volume '{name}' is in use by {leases} mount(s)")]
    InUse { name: String, leases: usize },

    #[error("Volume '{name}' is already mounted for lease {lease}")]
    AlreadyLeased { name: String, lease: String },

    #[error("Volume '{name}' is not mounted for lease {lease}")]
    NotLeased { name: String, lease: String },

    #[error("Failed to persist state: {0}")]
    PersistenceFailed(String),

    #[error("No prior state found")]
    NoPriorState,

    #[error(
        "Partial state: restored {} volume(s), no options for {:?}",
        restored.len(),
        orphaned
    )]
    PartialState {
        restored: Vec<String>,
        orphaned: Vec<String>,
    },

    #[error("Failed to initialize state storage: {0}")]
    StorageInitFailed(String),

    #[error("Corrupt state: {0}")]
    CorruptState(String),

    #[error("Unable to connect to ftp server: {0}")]
    Connection(String),

    #[error("FTP authentication failed: {0}")]
    Auth(String),

    #[error("Remote directory not found: {0}")]
    RemoteDirNotFound(String),

    #[error("Failed to mount directory: {0}")]
    Mount(String),

    #[error("Failed to unmount directory: {0}")]
    Unmount(String),

    #[error("Failed to remove mountpoint: {0}")]
    RemoveMountpoint(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl VolumeError {
    /// Whether the error was caused by the caller's request rather than the
    /// driver or its collaborators
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            VolumeError::InvalidArgument(_)
                | VolumeError::AlreadyExists(_)
                | VolumeError::NotFound(_)
                | VolumeError::InUse { .. }
                | VolumeError::AlreadyLeased { .. }
                | VolumeError::NotLeased { .. }
                | VolumeError::Auth(_)
                | VolumeError::RemoteDirNotFound(_)
        )
    }

    /// Whether retrying the same request later may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            VolumeError::InUse { .. }
                | VolumeError::PersistenceFailed(_)
                | VolumeError::Connection(_)
                | VolumeError::Mount(_)
                | VolumeError::Unmount(_)
                | VolumeError::RemoveMountpoint(_)
                | VolumeError::Io(_)
        )
    }
}

/// Result type alias for volume driver operations
pub type Result<T> = std::result::Result<T, VolumeError>;
