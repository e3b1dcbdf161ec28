//! Volume records and FTP connection options
//!
//! Both types serialize with PascalCase keys so the same values can be written
//! to the state documents and returned over the plugin protocol unchanged.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, VolumeError};

/// Default remote directory when a volume does not specify one
pub const DEFAULT_REMOTE_PATH: &str = "/";

/// Option keys accepted by volume creation
pub const OPT_HOST: &str = "host";
pub const OPT_PORT: &str = "port";
pub const OPT_USER: &str = "user";
pub const OPT_PASSWORD: &str = "password";
pub const OPT_REMOTE_PATH: &str = "remotepath";

/// A named volume backed by a remote FTP directory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct VolumeRecord {
    pub name: String,
    pub mountpoint: PathBuf,
    pub created_at: DateTime<Utc>,
    /// Informational key/value bag reported to the container runtime
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub status: BTreeMap<String, serde_json::Value>,
}

impl VolumeRecord {
    /// Create a record whose mountpoint is `root/name`
    pub fn new(name: impl Into<String>, root: &Path) -> Self {
        let name = name.into();
        Self {
            mountpoint: root.join(&name),
            name,
            created_at: Utc::now(),
            status: BTreeMap::new(),
        }
    }
}

/// FTP endpoint and remote directory for a volume
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ConnectionOptions {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    #[serde(default = "default_remote_path")]
    pub remote_path: String,
}

fn default_remote_path() -> String {
    DEFAULT_REMOTE_PATH.to_string()
}

impl ConnectionOptions {
    /// `host:port` address of the control connection
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// `host:port/remote/path` as understood by curlftpfs
    pub fn url(&self) -> String {
        format!("{}:{}{}", self.host, self.port, self.remote_path)
    }

    /// Build options from the raw key/value map of a create request.
    ///
    /// Missing keys fall back to `defaults`; `remotepath` falls back to `/`.
    /// Unknown keys are rejected.
    pub fn from_request(
        opts: &HashMap<String, String>,
        defaults: &ConnectionDefaults,
    ) -> Result<Self> {
        if let Some(key) = opts.keys().find(|k| !is_known_option(k)) {
            return Err(VolumeError::InvalidArgument(format!(
                "unknown option '{}'",
                key
            )));
        }

        let host = required(opts, OPT_HOST, defaults.host.as_ref())?;
        let user = required(opts, OPT_USER, defaults.user.as_ref())?;
        let password = required(opts, OPT_PASSWORD, defaults.password.as_ref())?;

        let port = match opts.get(OPT_PORT) {
            Some(raw) => parse_port(raw)?,
            None => defaults.port.ok_or_else(|| missing(OPT_PORT))?,
        };
        if port == 0 {
            return Err(VolumeError::InvalidArgument("port must not be 0".to_string()));
        }

        let remote_path = opts
            .get(OPT_REMOTE_PATH)
            .cloned()
            .or_else(|| defaults.remote_path.clone())
            .unwrap_or_else(default_remote_path);
        if !remote_path.starts_with('/') {
            return Err(VolumeError::InvalidArgument(format!(
                "remotepath must be absolute: {}",
                remote_path
            )));
        }

        let options = Self {
            host,
            port,
            user,
            password,
            remote_path,
        };
        options.validate()?;
        Ok(options)
    }

    /// Reject values that would break out of an FTP command line or a
    /// mount option string
    pub fn validate(&self) -> Result<()> {
        let fields = [
            (OPT_HOST, &self.host),
            (OPT_USER, &self.user),
            (OPT_PASSWORD, &self.password),
            (OPT_REMOTE_PATH, &self.remote_path),
        ];
        for (key, value) in fields {
            if value.chars().any(|c| matches!(c, '\r' | '\n' | '\0')) {
                return Err(VolumeError::InvalidArgument(format!(
                    "option '{}' contains a line break or NUL",
                    key
                )));
            }
        }
        Ok(())
    }
}

impl fmt::Debug for ConnectionOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionOptions")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("remote_path", &self.remote_path)
            .finish()
    }
}

/// Connection values used when a create request omits them
#[derive(Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ConnectionDefaults {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub remote_path: Option<String>,
}

impl fmt::Debug for ConnectionDefaults {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionDefaults")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("remote_path", &self.remote_path)
            .finish()
    }
}

fn is_known_option(key: &str) -> bool {
    matches!(
        key,
        OPT_HOST | OPT_PORT | OPT_USER | OPT_PASSWORD | OPT_REMOTE_PATH
    )
}

fn missing(key: &str) -> VolumeError {
    VolumeError::InvalidArgument(format!("required option '{}' not specified", key))
}

fn required(
    opts: &HashMap<String, String>,
    key: &str,
    default: Option<&String>,
) -> Result<String> {
    let value = opts.get(key).or(default).ok_or_else(|| missing(key))?;
    // Passwords may legitimately be empty (anonymous logins); names may not.
    if value.is_empty() && key != OPT_PASSWORD {
        return Err(VolumeError::InvalidArgument(format!(
            "option '{}' must not be empty",
            key
        )));
    }
    Ok(value.clone())
}

fn parse_port(raw: &str) -> Result<u16> {
    raw.trim()
        .parse::<u16>()
        .map_err(|_| VolumeError::InvalidArgument(format!("not a valid port: {}", raw)))
}

/// Check that a volume name can be used as a single path component
pub fn validate_volume_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(VolumeError::InvalidArgument(
            "volume name must not be empty".to_string(),
        ));
    }
    if name == "." || name == ".." || name.contains('/') || name.contains('\0') {
        return Err(VolumeError::InvalidArgument(format!(
            "invalid volume name: {:?}",
            name
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_from_request_full() {
        let opts = request(&[
            ("host", "ftp.example.com"),
            ("port", "21"),
            ("user", "u"),
            ("password", "p"),
            ("remotepath", "/data"),
        ]);

        let parsed = ConnectionOptions::from_request(&opts, &ConnectionDefaults::default()).unwrap();
        assert_eq!(parsed.host, "ftp.example.com");
        assert_eq!(parsed.port, 21);
        assert_eq!(parsed.user, "u");
        assert_eq!(parsed.password, "p");
        assert_eq!(parsed.remote_path, "/data");
        assert_eq!(parsed.url(), "ftp.example.com:21/data");
    }

    #[test]
    fn test_remote_path_defaults_to_root() {
        let opts = request(&[
            ("host", "ftp.example.com"),
            ("port", "21"),
            ("user", "u"),
            ("password", "p"),
        ]);

        let parsed = ConnectionOptions::from_request(&opts, &ConnectionDefaults::default()).unwrap();
        assert_eq!(parsed.remote_path, "/");
    }

    #[test]
    fn test_missing_required_option() {
        let opts = request(&[("host", "ftp.example.com"), ("port", "21"), ("user", "u")]);

        let err = ConnectionOptions::from_request(&opts, &ConnectionDefaults::default()).unwrap_err();
        assert!(matches!(err, VolumeError::InvalidArgument(_)));
        assert!(err.to_string().contains("password"));
    }

    #[test]
    fn test_invalid_port() {
        let opts = request(&[
            ("host", "h"),
            ("port", "twenty-one"),
            ("user", "u"),
            ("password", "p"),
        ]);
        assert!(matches!(
            ConnectionOptions::from_request(&opts, &ConnectionDefaults::default()),
            Err(VolumeError::InvalidArgument(_))
        ));

        let opts = request(&[("host", "h"), ("port", "0"), ("user", "u"), ("password", "p")]);
        assert!(matches!(
            ConnectionOptions::from_request(&opts, &ConnectionDefaults::default()),
            Err(VolumeError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_unknown_option_rejected() {
        let opts = request(&[
            ("host", "h"),
            ("port", "21"),
            ("user", "u"),
            ("password", "p"),
            ("passwd", "p"),
        ]);
        let err = ConnectionOptions::from_request(&opts, &ConnectionDefaults::default()).unwrap_err();
        assert!(err.to_string().contains("passwd"));
    }

    #[test]
    fn test_defaults_fill_missing_options() {
        let defaults = ConnectionDefaults {
            host: Some("ftp.internal".to_string()),
            port: Some(2121),
            user: Some("svc".to_string()),
            password: Some("secret".to_string()),
            remote_path: Some("/exports".to_string()),
        };
        let opts = request(&[("user", "alice"), ("password", "pw")]);

        let parsed = ConnectionOptions::from_request(&opts, &defaults).unwrap();
        assert_eq!(parsed.host, "ftp.internal");
        assert_eq!(parsed.port, 2121);
        assert_eq!(parsed.user, "alice");
        assert_eq!(parsed.password, "pw");
        assert_eq!(parsed.remote_path, "/exports");
    }

    #[test]
    fn test_line_breaks_rejected_in_every_option() {
        for key in ["host", "user", "password", "remotepath"] {
            let mut opts = request(&[
                ("host", "h"),
                ("port", "21"),
                ("user", "u"),
                ("password", "p"),
                ("remotepath", "/data"),
            ]);
            let injected = format!("{}\r\nDELE important.txt", opts[key]);
            opts.insert(key.to_string(), injected);

            let err = ConnectionOptions::from_request(&opts, &ConnectionDefaults::default())
                .unwrap_err();
            assert!(matches!(err, VolumeError::InvalidArgument(_)), "{}: {:?}", key, err);
            assert!(err.to_string().contains(key));
        }
    }

    #[test]
    fn test_bare_newline_and_nul_rejected() {
        let opts = request(&[("host", "h"), ("port", "21"), ("user", "u\nSITE x"), ("password", "p")]);
        assert!(ConnectionOptions::from_request(&opts, &ConnectionDefaults::default()).is_err());

        let opts = request(&[("host", "h"), ("port", "21"), ("user", "u"), ("password", "p\0")]);
        assert!(ConnectionOptions::from_request(&opts, &ConnectionDefaults::default()).is_err());
    }

    #[test]
    fn test_commas_allowed_in_password() {
        let opts = request(&[("host", "h"), ("port", "21"), ("user", "u"), ("password", "a,b")]);
        let parsed = ConnectionOptions::from_request(&opts, &ConnectionDefaults::default()).unwrap();
        assert_eq!(parsed.password, "a,b");
    }

    #[test]
    fn test_relative_remote_path_rejected() {
        let opts = request(&[
            ("host", "h"),
            ("port", "21"),
            ("user", "u"),
            ("password", "p"),
            ("remotepath", "data"),
        ]);
        assert!(ConnectionOptions::from_request(&opts, &ConnectionDefaults::default()).is_err());
    }

    #[test]
    fn test_debug_redacts_password() {
        let opts = ConnectionOptions {
            host: "h".to_string(),
            port: 21,
            user: "u".to_string(),
            password: "hunter2".to_string(),
            remote_path: "/".to_string(),
        };
        let rendered = format!("{:?}", opts);
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn test_record_mountpoint_under_root() {
        let record = VolumeRecord::new("v1", Path::new("/var/run/docker/ftp-driver"));
        assert_eq!(record.mountpoint, PathBuf::from("/var/run/docker/ftp-driver/v1"));
        assert!(record.status.is_empty());
    }

    #[test]
    fn test_record_json_keys() {
        let record = VolumeRecord::new("v1", Path::new("/mnt"));
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["Name"], "v1");
        assert_eq!(json["Mountpoint"], "/mnt/v1");
        assert!(json.get("CreatedAt").is_some());
        assert!(json.get("Status").is_none());
    }

    #[test]
    fn test_options_accept_legacy_document() {
        // Older state files carry a null connection handle alongside the fields.
        let json = r#"{"RemotePath":"/data","User":"u","Host":"h","Port":21,"Password":"p","Conn":null}"#;
        let opts: ConnectionOptions = serde_json::from_str(json).unwrap();
        assert_eq!(opts.remote_path, "/data");
        assert_eq!(opts.port, 21);
    }

    #[test]
    fn test_validate_volume_name() {
        assert!(validate_volume_name("data-01").is_ok());
        assert!(validate_volume_name("").is_err());
        assert!(validate_volume_name("..").is_err());
        assert!(validate_volume_name("a/b").is_err());
    }
}
