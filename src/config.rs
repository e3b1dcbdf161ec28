//! Configuration parsing and structures

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::env::expand_opt;
use crate::error::VolumeError;
use crate::executor::curlftpfs::CurlFtpFsConfig;
use crate::volume::ConnectionDefaults;

// =============================================================================
// Raw Config (Deserialized from YAML)
// =============================================================================

/// Raw configuration as deserialized from YAML.
/// This is converted to `Config` via `resolve()`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawConfig {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub driver: DriverConfig,

    #[serde(default)]
    pub state: RawStateConfig,

    /// Connection values used when a create request omits them.
    /// String fields may reference environment variables.
    #[serde(default)]
    pub defaults: ConnectionDefaults,

    #[serde(default)]
    pub checker: CheckerConfig,

    #[serde(default)]
    pub executor: ExecutorConfig,
}

/// State section before the directory default is applied
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawStateConfig {
    /// Directory holding the state documents (default: `<root>/state`)
    pub dir: Option<PathBuf>,

    /// Fail startup when saved records have no matching options
    #[serde(default)]
    pub strict_restore: bool,
}

// =============================================================================
// Resolved Config (Ready for use)
// =============================================================================

/// Top-level configuration (resolved from RawConfig)
#[derive(Debug, Clone)]
pub struct Config {
    pub logging: LoggingConfig,
    pub driver: DriverConfig,
    pub state: StateConfig,
    pub defaults: ConnectionDefaults,
    pub checker: CheckerConfig,
    pub executor: ExecutorConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Plugin identity and filesystem layout
#[derive(Debug, Clone, Deserialize)]
pub struct DriverConfig {
    /// Plugin name; the socket is `<socket_dir>/<name>.sock`
    #[serde(default = "default_driver_name")]
    pub name: String,

    #[serde(default = "default_socket_dir")]
    pub socket_dir: PathBuf,

    /// Volumes are mounted at `<root>/<volume name>`
    #[serde(default = "default_root")]
    pub root: PathBuf,
}

fn default_driver_name() -> String {
    "ftp-driver".to_string()
}

fn default_socket_dir() -> PathBuf {
    PathBuf::from("/run/docker/plugins")
}

fn default_root() -> PathBuf {
    PathBuf::from("/var/run/docker/ftp-driver")
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            name: default_driver_name(),
            socket_dir: default_socket_dir(),
            root: default_root(),
        }
    }
}

impl DriverConfig {
    pub fn socket_path(&self) -> PathBuf {
        self.socket_dir.join(format!("{}.sock", self.name))
    }
}

/// State persistence configuration (resolved)
#[derive(Debug, Clone)]
pub struct StateConfig {
    pub dir: PathBuf,
    pub strict_restore: bool,
}

/// Connectivity check configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CheckerConfig {
    /// Bound on a whole login check (e.g., "5s")
    #[serde(default = "default_check_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

fn default_check_timeout() -> Duration {
    Duration::from_secs(5)
}

impl Default for CheckerConfig {
    fn default() -> Self {
        Self {
            timeout: default_check_timeout(),
        }
    }
}

/// Mount executor configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutorConfig {
    #[serde(default = "default_mount_binary")]
    pub mount_binary: String,

    #[serde(default = "default_unmount_binary")]
    pub unmount_binary: String,

    /// Extra `-o` options for every mount
    #[serde(default = "default_mount_options")]
    pub mount_options: Vec<String>,

    /// Bound on each mount/unmount process (e.g., "30s")
    #[serde(default = "default_executor_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

fn default_mount_binary() -> String {
    "curlftpfs".to_string()
}

fn default_unmount_binary() -> String {
    "umount".to_string()
}

fn default_mount_options() -> Vec<String> {
    vec!["nonempty".to_string()]
}

fn default_executor_timeout() -> Duration {
    Duration::from_secs(30)
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            mount_binary: default_mount_binary(),
            unmount_binary: default_unmount_binary(),
            mount_options: default_mount_options(),
            timeout: default_executor_timeout(),
        }
    }
}

impl From<&ExecutorConfig> for CurlFtpFsConfig {
    fn from(config: &ExecutorConfig) -> Self {
        CurlFtpFsConfig {
            mount_binary: config.mount_binary.clone(),
            unmount_binary: config.unmount_binary.clone(),
            mount_options: config.mount_options.clone(),
            timeout: config.timeout,
        }
    }
}

// =============================================================================
// Resolution Logic
// =============================================================================

impl RawConfig {
    /// Resolve raw config: expand environment references in connection
    /// defaults and derive the state directory from the root
    pub fn resolve(self) -> Result<Config, ConfigError> {
        let RawConfig {
            logging,
            driver,
            state,
            defaults,
            checker,
            executor,
        } = self;

        let defaults = ConnectionDefaults {
            host: expand_opt(defaults.host)?,
            port: defaults.port,
            user: expand_opt(defaults.user)?,
            password: expand_opt(defaults.password)?,
            remote_path: expand_opt(defaults.remote_path)?,
        };

        let state = StateConfig {
            dir: state.dir.unwrap_or_else(|| driver.root.join("state")),
            strict_restore: state.strict_restore,
        };

        Ok(Config {
            logging,
            driver,
            state,
            defaults,
            checker,
            executor,
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        let driver = DriverConfig::default();
        Config {
            logging: LoggingConfig::default(),
            state: StateConfig {
                dir: driver.root.join("state"),
                strict_restore: false,
            },
            driver,
            defaults: ConnectionDefaults::default(),
            checker: CheckerConfig::default(),
            executor: ExecutorConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file(path: &PathBuf) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadError(path.clone(), e.to_string()))?;

        Self::from_str(&content)
    }

    /// Parse configuration from a YAML string
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig =
            serde_yaml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        raw.resolve()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        let name = &self.driver.name;
        if name.is_empty() || name.contains('/') {
            return Err(ConfigError::ValidationError(format!(
                "Invalid driver name: {:?}",
                name
            )));
        }

        if !self.driver.root.is_absolute() {
            return Err(ConfigError::ValidationError(format!(
                "Volume root must be an absolute path: {:?}",
                self.driver.root
            )));
        }

        if !self.state.dir.is_absolute() {
            return Err(ConfigError::ValidationError(format!(
                "State directory must be an absolute path: {:?}",
                self.state.dir
            )));
        }

        if self.checker.timeout.is_zero() || self.executor.timeout.is_zero() {
            return Err(ConfigError::ValidationError(
                "Timeouts must be greater than zero".to_string(),
            ));
        }

        if self.executor.mount_binary.is_empty() || self.executor.unmount_binary.is_empty() {
            return Err(ConfigError::ValidationError(
                "Mount and unmount binaries must be set".to_string(),
            ));
        }

        if self.defaults.port == Some(0) {
            return Err(ConfigError::ValidationError(
                "Default port must not be 0".to_string(),
            ));
        }

        if let Some(path) = &self.defaults.remote_path {
            if !path.starts_with('/') {
                return Err(ConfigError::ValidationError(format!(
                    "Default remote_path must be absolute: {:?}",
                    path
                )));
            }
        }

        Ok(())
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {0}: {1}")]
    ReadError(PathBuf, String),

    #[error("Failed to parse config: {0}")]
    ParseError(String),

    #[error("Configuration validation error: {0}")]
    ValidationError(String),
}

impl From<ConfigError> for VolumeError {
    fn from(e: ConfigError) -> Self {
        VolumeError::Config(e.to_string())
    }
}
