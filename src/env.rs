//! `${VAR}` expansion for configuration values
//!
//! Credentials in the configuration file are usually references such as
//! `password: ${FTP_PASSWORD}`. A reference may carry a fallback with
//! `${VAR:-fallback}`; a reference without one must be set.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::env;

use crate::config::ConfigError;

/// `${NAME}` or `${NAME:-fallback}`
static REFERENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}").expect("valid pattern")
});

/// Expand every variable reference in `input`.
///
/// Fails listing every unset variable that has no fallback.
pub fn expand(input: &str) -> Result<String, ConfigError> {
    let mut unset: Vec<String> = Vec::new();

    let expanded = REFERENCE.replace_all(input, |caps: &Captures| {
        let name = &caps[1];
        match (env::var(name), caps.get(2)) {
            (Ok(value), _) => value,
            (Err(_), Some(fallback)) => fallback.as_str().to_string(),
            (Err(_), None) => {
                if !unset.iter().any(|n| n == name) {
                    unset.push(name.to_string());
                }
                String::new()
            }
        }
    });

    if unset.is_empty() {
        Ok(expanded.into_owned())
    } else {
        Err(ConfigError::ValidationError(format!(
            "Missing environment variables: {}",
            unset.join(", ")
        )))
    }
}

/// Expand an optional value, leaving `None` untouched
pub fn expand_opt(input: Option<String>) -> Result<Option<String>, ConfigError> {
    input.map(|value| expand(&value)).transpose()
}
