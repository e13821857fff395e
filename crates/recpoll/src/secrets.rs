//! Credential resolution for the file-search API and the downstream webhook.
//!
//! A credential is configured as a [`SecretSource`] and resolved, in order, from:
//!
//! 1. **Direct value** (`"token": { "value": "..." }`), for local runs
//! 2. **File** (`"token": { "file": "/run/secrets/drive_token" }`), for mounted secrets
//! 3. **Env var** (`"token": { "envVar": "RECPOLL_DRIVE_TOKEN" }`), for deployments

use std::fs;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("No secret source provided (need one of: value, file, or envVar)")]
    NoSourceProvided,

    #[error("Failed to read secret from file '{path}': {source}")]
    FileReadError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Environment variable '{name}' not set")]
    EnvVarNotSet { name: String },

    #[error("Environment variable '{name}' contains invalid UTF-8")]
    EnvVarNotUnicode { name: String },
}

/// Where a credential comes from. Empty strings count as unset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretSource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env_var: Option<String>,
}

impl SecretSource {
    pub fn from_env(name: impl Into<String>) -> Self {
        Self {
            env_var: Some(name.into()),
            ..Default::default()
        }
    }

    pub fn is_configured(&self) -> bool {
        [&self.value, &self.file, &self.env_var]
            .iter()
            .any(|s| s.as_deref().is_some_and(|s| !s.is_empty()))
    }

    pub fn resolve(&self) -> Result<SecretString, SecretError> {
        resolve_secret(
            self.value.as_deref(),
            self.file.as_deref(),
            self.env_var.as_deref(),
        )
    }

    /// Like [`resolve`](Self::resolve), but an unconfigured source is `None`.
    pub fn resolve_optional(&self) -> Result<Option<SecretString>, SecretError> {
        match self.resolve() {
            Ok(secret) => Ok(Some(secret)),
            Err(SecretError::NoSourceProvided) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Resolves a secret from a direct value, then a file, then an env var.
pub fn resolve_secret(
    direct: Option<&str>,
    file_path: Option<&str>,
    env_var: Option<&str>,
) -> Result<SecretString, SecretError> {
    if let Some(value) = direct.filter(|v| !v.is_empty()) {
        return Ok(SecretString::from(value.to_string()));
    }

    if let Some(path) = file_path.filter(|p| !p.is_empty()) {
        let expanded = expand_home(path);
        return fs::read_to_string(&expanded)
            .map(|content| SecretString::from(content.trim().to_string()))
            .map_err(|source| SecretError::FileReadError {
                path: expanded,
                source,
            });
    }

    if let Some(name) = env_var.filter(|n| !n.is_empty()) {
        return match std::env::var(name) {
            Ok(value) => Ok(SecretString::from(value.trim().to_string())),
            Err(std::env::VarError::NotPresent) => Err(SecretError::EnvVarNotSet {
                name: name.to_string(),
            }),
            Err(std::env::VarError::NotUnicode(_)) => Err(SecretError::EnvVarNotUnicode {
                name: name.to_string(),
            }),
        };
    }

    Err(SecretError::NoSourceProvided)
}

/// Expands a leading `~` to the home directory. `~user` is not supported.
pub(crate) fn expand_home(path: &str) -> String {
    if path == "~" || path.starts_with("~/") {
        if let Some(home) = dirs::home_dir() {
            let home = home.to_string_lossy();
            return path.replacen('~', &home, 1);
        }
    }
    path.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use serial_test::serial;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    #[serial]
    fn test_direct_value_takes_priority() {
        std::env::set_var("RECPOLL_TEST_SECRET_1", "env_value");
        let source = SecretSource {
            value: Some("direct_value".to_string()),
            env_var: Some("RECPOLL_TEST_SECRET_1".to_string()),
            ..Default::default()
        };
        assert_eq!(source.resolve().unwrap().expose_secret(), "direct_value");
        std::env::remove_var("RECPOLL_TEST_SECRET_1");
    }

    #[test]
    #[serial]
    fn test_file_takes_priority_over_env() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, "file_value").unwrap();

        std::env::set_var("RECPOLL_TEST_SECRET_2", "env_value");
        let result = resolve_secret(
            None,
            Some(temp_file.path().to_str().unwrap()),
            Some("RECPOLL_TEST_SECRET_2"),
        )
        .unwrap();
        assert_eq!(result.expose_secret(), "file_value");
        std::env::remove_var("RECPOLL_TEST_SECRET_2");
    }

    #[test]
    #[serial]
    fn test_env_var_fallback_trims() {
        std::env::set_var("RECPOLL_TEST_SECRET_3", "  env_value\n");
        let source = SecretSource::from_env("RECPOLL_TEST_SECRET_3");
        assert_eq!(source.resolve().unwrap().expose_secret(), "env_value");
        std::env::remove_var("RECPOLL_TEST_SECRET_3");
    }

    #[test]
    fn test_no_source() {
        let source = SecretSource::default();
        assert!(!source.is_configured());
        assert!(matches!(source.resolve(), Err(SecretError::NoSourceProvided)));
        assert!(source.resolve_optional().unwrap().is_none());
    }

    #[test]
    fn test_empty_strings_are_unset() {
        let source = SecretSource {
            value: Some(String::new()),
            file: Some(String::new()),
            env_var: None,
        };
        assert!(!source.is_configured());
    }

    #[test]
    fn test_missing_file_is_an_error_even_when_optional() {
        let source = SecretSource {
            file: Some("/nonexistent/path/to/secret".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            source.resolve_optional(),
            Err(SecretError::FileReadError { .. })
        ));
    }

    #[test]
    #[serial]
    fn test_env_var_not_set() {
        std::env::remove_var("RECPOLL_TEST_UNSET");
        let result = resolve_secret(None, None, Some("RECPOLL_TEST_UNSET"));
        assert!(matches!(result, Err(SecretError::EnvVarNotSet { .. })));
    }

    #[test]
    fn test_deserialize_camel_case() {
        let source: SecretSource = serde_json::from_str(r#"{"envVar": "DRIVE_TOKEN"}"#).unwrap();
        assert_eq!(source.env_var.as_deref(), Some("DRIVE_TOKEN"));
        assert!(source.is_configured());
    }

    #[test]
    fn test_expand_home() {
        assert_eq!(expand_home("/etc/secret"), "/etc/secret");
        if let Some(home) = dirs::home_dir() {
            let expanded = expand_home("~/token");
            assert!(expanded.starts_with(&*home.to_string_lossy()));
            assert!(expanded.ends_with("/token"));
        }
    }
}
