//! Configuration management for ratewindow.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::{RateWindowError, Result};
use crate::ratelimit::{LimitRule, DEFAULT_WINDOW_SECS, GUEST_KEY, MAX_WINDOW_SECS};

/// Environment variable prefix for configuration overrides.
const ENV_PREFIX: &str = "RATEWINDOW";

/// Main configuration for ratewindow.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RateWindowConfig {
    /// Window persistence configuration
    #[serde(default)]
    pub storage: StorageConfig,

    /// Limiting behaviour
    #[serde(default)]
    pub limiting: LimitingConfig,

    /// Named limits, e.g. one per API endpoint
    #[serde(default)]
    pub scopes: HashMap<String, LimitRule>,
}

/// Which store backs the windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// One JSON file per key
    #[default]
    File,
    /// Process-local map
    Memory,
}

/// Storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,

    /// Directory holding the window files
    #[serde(default = "default_dir")]
    pub dir: PathBuf,

    /// File name prefix; the key is appended to it
    #[serde(default = "default_prefix")]
    pub prefix: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            dir: default_dir(),
            prefix: default_prefix(),
        }
    }
}

fn default_dir() -> PathBuf {
    std::env::temp_dir()
}

fn default_prefix() -> String {
    "ratelimit_".to_string()
}

/// How concurrent checks for the same key are coordinated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Consistency {
    /// Per-key lock around read-modify-write
    #[default]
    Strict,
    /// Unsynchronized read-modify-write; concurrent checks may be undercounted
    Relaxed,
}

/// What to do when a window cannot be persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageErrorPolicy {
    /// Log and return the in-memory decision
    #[default]
    Log,
    /// Return the error to the caller
    Fail,
}

/// Limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitingConfig {
    /// Window length in seconds
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    /// Limit used when a caller names neither a limit nor a scope
    #[serde(default = "default_limit")]
    pub default_limit: u64,

    /// Key used for callers without an identifier
    #[serde(default = "default_guest_key")]
    pub guest_key: String,

    #[serde(default)]
    pub consistency: Consistency,

    #[serde(default)]
    pub on_storage_error: StorageErrorPolicy,
}

impl Default for LimitingConfig {
    fn default() -> Self {
        Self {
            window_secs: default_window_secs(),
            default_limit: default_limit(),
            guest_key: default_guest_key(),
            consistency: Consistency::default(),
            on_storage_error: StorageErrorPolicy::default(),
        }
    }
}

fn default_window_secs() -> u64 {
    DEFAULT_WINDOW_SECS
}

fn default_limit() -> u64 {
    30
}

fn default_guest_key() -> String {
    GUEST_KEY.to_string()
}

impl RateWindowConfig {
    /// Load configuration from a YAML file path.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: RateWindowConfig =
            serde_yaml::from_str(yaml).map_err(|e| RateWindowError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from an optional file layered under
    /// `RATEWINDOW__*` environment variables.
    ///
    /// The file format is picked from its extension.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = ::config::Config::builder();

        if let Some(path) = path {
            info!(path = %path.display(), "Loading configuration file");
            builder = builder.add_source(::config::File::from(path));
        }

        let config: RateWindowConfig = builder
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| RateWindowError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the limiter cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.limiting.window_secs == 0 {
            return Err(RateWindowError::Config(
                "limiting.window_secs must be positive".to_string(),
            ));
        }
        if self.limiting.window_secs > MAX_WINDOW_SECS {
            return Err(RateWindowError::Config(format!(
                "limiting.window_secs must be at most {MAX_WINDOW_SECS}"
            )));
        }
        if self.limiting.default_limit == 0 {
            return Err(RateWindowError::Config(
                "limiting.default_limit must be positive".to_string(),
            ));
        }
        if self.limiting.guest_key.trim().is_empty() {
            return Err(RateWindowError::Config(
                "limiting.guest_key must not be empty".to_string(),
            ));
        }
        for (name, rule) in &self.scopes {
            if rule.limit == 0 {
                return Err(RateWindowError::Config(format!(
                    "scope {name}: limit must be positive"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RateWindowConfig::default();
        assert_eq!(config.storage.backend, StorageBackend::File);
        assert_eq!(config.storage.prefix, "ratelimit_");
        assert_eq!(config.limiting.window_secs, 60);
        assert_eq!(config.limiting.guest_key, "guest");
        assert_eq!(config.limiting.consistency, Consistency::Strict);
        assert_eq!(config.limiting.on_storage_error, StorageErrorPolicy::Log);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_yaml() {
        let yaml = r#"
storage:
  backend: memory
limiting:
  default_limit: 5
  consistency: relaxed
  on_storage_error: fail
scopes:
  ai_chat:
    limit: 10
    namespace: chat
  order_edit:
    limit: 100
"#;
        let config = RateWindowConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.storage.backend, StorageBackend::Memory);
        assert_eq!(config.storage.prefix, "ratelimit_");
        assert_eq!(config.limiting.default_limit, 5);
        assert_eq!(config.limiting.window_secs, 60);
        assert_eq!(config.limiting.consistency, Consistency::Relaxed);
        assert_eq!(config.limiting.on_storage_error, StorageErrorPolicy::Fail);
        assert_eq!(config.scopes["ai_chat"].limit, 10);
        assert_eq!(config.scopes["ai_chat"].namespace.as_deref(), Some("chat"));
        assert!(config.scopes["order_edit"].namespace.is_none());
    }

    #[test]
    fn test_zero_scope_limit_rejected() {
        let yaml = r#"
scopes:
  broken:
    limit: 0
"#;
        let err = RateWindowConfig::from_yaml(yaml).unwrap_err();
        assert!(matches!(err, RateWindowError::Config(_)));
    }

    #[test]
    fn test_zero_window_rejected() {
        let yaml = "limiting:\n  window_secs: 0\n";
        assert!(RateWindowConfig::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_window_upper_bound() {
        let yaml = format!("limiting:\n  window_secs: {}\n", MAX_WINDOW_SECS);
        assert!(RateWindowConfig::from_yaml(&yaml).is_ok());

        let yaml = format!("limiting:\n  window_secs: {}\n", MAX_WINDOW_SECS + 1);
        assert!(RateWindowConfig::from_yaml(&yaml).is_err());

        let err = RateWindowConfig::from_yaml("limiting:\n  window_secs: 9223372036854775807\n")
            .unwrap_err();
        assert!(matches!(err, RateWindowError::Config(_)));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ratewindow.yaml");
        std::fs::write(&path, "limiting:\n  guest_key: anonymous\n").unwrap();

        let config = RateWindowConfig::from_file(&path).unwrap();
        assert_eq!(config.limiting.guest_key, "anonymous");
    }

    #[test]
    fn test_load_layers_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ratewindow.yaml");
        std::fs::write(&path, "limiting:\n  default_limit: 7\n").unwrap();

        let config = RateWindowConfig::load(Some(&path)).unwrap();
        assert_eq!(config.limiting.default_limit, 7);
        assert_eq!(config.limiting.window_secs, 60);
    }
}
