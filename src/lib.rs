//! ftp-volume-driver: remote FTP directories as container volumes
//!
//! The driver keeps a catalog of named volumes, each bound to an FTP endpoint,
//! and mounts them into the local filesystem through a FUSE bridge when a
//! container needs them.
//!
//! # Architecture
//!
//! - **Registry**: In-memory catalog of volumes, their connection options and
//!   the set of leases (mount request IDs) holding each volume mounted.
//! - **State Store**: Snapshots the registry to two JSON documents and replays
//!   them at startup.
//! - **Checker / Executor**: Pluggable collaborators that verify an FTP login
//!   and perform the physical mount/unmount.
//! - **Driver**: The plugin verbs (create, remove, mount, ...) sequencing the
//!   pieces above, with the physical mount done only on the first lease and
//!   the unmount only on the last.
//! - **Plugin**: Volume plugin protocol served on a unix socket.
//!
//! # Example
//!
//! ```no_run
//! use std::collections::HashMap;
//! use ftp_volume_driver::config::Config;
//! use ftp_volume_driver::driver::VolumeDriver;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::from_file(&"config.yaml".into())?;
//! let driver = VolumeDriver::from_config(&config);
//! driver.restore(config.state.strict_restore)?;
//!
//! let opts: HashMap<String, String> = [
//!     ("host", "ftp.example.com"),
//!     ("port", "21"),
//!     ("user", "u"),
//!     ("password", "p"),
//! ]
//! .into_iter()
//! .map(|(k, v)| (k.to_string(), v.to_string()))
//! .collect();
//!
//! driver.create("v1", &opts).await?;
//! let mountpoint = driver.mount("container-1", "v1").await?;
//! # let _ = mountpoint;
//! # Ok(())
//! # }
//! ```

pub mod checker;
pub mod config;
pub mod driver;
pub mod env;
pub mod error;
pub mod executor;
pub mod plugin;
pub mod registry;
pub mod state;
pub mod volume;

pub use error::{Result, VolumeError};
