//! Configuration management for the broker.
//!
//! Provides TOML-based configuration with XDG-compliant paths and
//! environment variable overrides.

use crate::error::{ConfigError, ConfigResult};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main broker configuration.
///
/// This is loaded from `~/.config/rsb/config.toml` (or platform equivalent).
/// If the file doesn't exist, default values are used.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Service identity and public URL
    pub general: GeneralConfig,
    /// Lifecycle behavior of the broker core
    pub broker: BrokerSettings,
    /// Where the service catalog is read from
    pub catalog: CatalogConfig,
    /// Logging defaults
    pub logging: LoggingConfig,
}

impl BrokerConfig {
    /// Load configuration from the default location, falling back to defaults if not found.
    ///
    /// # Errors
    /// Returns error if:
    /// - Config directory cannot be determined
    /// - File exists but cannot be read
    /// - File contents are not valid TOML or fail validation
    pub fn load() -> ConfigResult<Self> {
        let config_path = Self::config_path()?;

        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            tracing::debug!("Config file not found, using defaults");
            Ok(Self::default())
        }
    }

    /// Load configuration from an explicit file path.
    pub fn load_from(path: &Path) -> ConfigResult<Self> {
        tracing::debug!("Loading config from {}", path.display());
        let contents = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration with environment variable overrides.
    ///
    /// Supports the following environment variables:
    /// - `RSB_BASE_URL`: Override the public base URL
    /// - `RSB_ASYNC_SUPPORTED`: Override asynchronous operation support (true/false)
    /// - `RSB_ASYNC_REQUIRED`: Override whether asynchronous operation is required (true/false)
    /// - `RSB_LOCK_TIMEOUT_MS`: Override the per-identifier lock timeout
    /// - `RSB_CATALOG_PATH`: Override the catalog location
    pub fn load_with_env() -> ConfigResult<Self> {
        let mut config = Self::load()?;
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from a key lookup (normally the process environment).
    ///
    /// Values that fail to parse are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(val) = lookup("RSB_BASE_URL") {
            tracing::debug!("Override general.base_url from env: {}", val);
            self.general.base_url = val;
        }

        if let Some(val) = lookup("RSB_ASYNC_SUPPORTED") {
            if let Ok(enabled) = val.parse() {
                self.broker.async_supported = enabled;
                tracing::debug!("Override broker.async_supported from env: {}", enabled);
            }
        }

        if let Some(val) = lookup("RSB_ASYNC_REQUIRED") {
            if let Ok(required) = val.parse() {
                self.broker.async_required = required;
                tracing::debug!("Override broker.async_required from env: {}", required);
            }
        }

        if let Some(val) = lookup("RSB_LOCK_TIMEOUT_MS") {
            if let Ok(ms) = val.parse() {
                self.broker.lock_timeout_ms = ms;
                tracing::debug!("Override broker.lock_timeout_ms from env: {}", ms);
            }
        }

        if let Some(val) = lookup("RSB_CATALOG_PATH") {
            tracing::debug!("Override catalog.path from env: {}", val);
            self.catalog.path = Some(PathBuf::from(val));
        }
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.broker.lock_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "broker.lock_timeout_ms".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }

        if self.broker.async_required && !self.broker.async_supported {
            return Err(ConfigError::InvalidValue {
                field: "broker.async_required".to_string(),
                reason: "requires broker.async_supported".to_string(),
            });
        }

        if self.general.service_name.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "general.service_name".to_string(),
                reason: "cannot be empty".to_string(),
            });
        }

        Ok(())
    }

    /// Save configuration to disk.
    ///
    /// Creates the config directory if it doesn't exist.
    pub fn save(&self) -> ConfigResult<()> {
        self.save_to(&Self::config_path()?)
    }

    /// Save configuration to an explicit file path.
    pub fn save_to(&self, path: &Path) -> ConfigResult<()> {
        let config_dir = path.parent().ok_or_else(|| ConfigError::InvalidValue {
            field: "config_path".to_string(),
            reason: "no parent directory".to_string(),
        })?;

        fs::create_dir_all(config_dir)?;
        tracing::debug!("Saving config to {}", path.display());

        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    /// Get the path to the configuration file.
    ///
    /// Uses XDG base directories: `~/.config/rsb/config.toml`
    pub fn config_path() -> ConfigResult<PathBuf> {
        let dirs = ProjectDirs::from("org", "rsb", "rsb").ok_or(ConfigError::NoConfigDir)?;
        Ok(dirs.config_dir().join("config.toml"))
    }

    /// Get the path the catalog is loaded from.
    ///
    /// Falls back to `catalog.toml` next to the config file.
    pub fn catalog_path(&self) -> ConfigResult<PathBuf> {
        match &self.catalog.path {
            Some(path) => Ok(path.clone()),
            None => {
                let dirs =
                    ProjectDirs::from("org", "rsb", "rsb").ok_or(ConfigError::NoConfigDir)?;
                Ok(dirs.config_dir().join("catalog.toml"))
            }
        }
    }

    /// Lock acquisition timeout as a `Duration`.
    #[must_use]
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.broker.lock_timeout_ms)
    }
}

/// Service identity settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Service name; must be unique within the platform's marketplace
    pub service_name: String,
    /// Public base URL used to build dashboard links
    pub base_url: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            service_name: "rsb-resource-service".to_string(),
            base_url: "http://localhost:3000".to_string(),
        }
    }
}

/// Lifecycle behavior settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerSettings {
    /// Whether long-running operations may complete asynchronously
    pub async_supported: bool,
    /// Whether callers must accept asynchronous completion
    pub async_required: bool,
    /// Whether bindings without an application (service keys) are allowed
    pub service_keys_supported: bool,
    /// Upper bound on waiting for a per-identifier lock, in milliseconds
    pub lock_timeout_ms: u64,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            async_supported: false,
            async_required: false,
            service_keys_supported: true,
            lock_timeout_ms: 5000,
        }
    }
}

/// Catalog source settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// A catalog TOML file or a directory of them
    pub path: Option<PathBuf>,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default `EnvFilter` directive when `RUST_LOG` is unset
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info,rsb=debug".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = BrokerConfig::default();
        assert_eq!(config.general.base_url, "http://localhost:3000");
        assert!(!config.broker.async_supported);
        assert!(!config.broker.async_required);
        assert!(config.broker.service_keys_supported);
        assert_eq!(config.lock_timeout(), Duration::from_secs(5));
        assert!(config.catalog.path.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_serialization() {
        let config = BrokerConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("[general]"));
        assert!(toml_str.contains("[broker]"));
        assert!(toml_str.contains("[logging]"));

        let parsed: BrokerConfig = toml::from_str(&toml_str).expect("parse serialized config");
        assert_eq!(parsed.general.service_name, config.general.service_name);
    }

    #[test]
    fn test_config_save_load() {
        let tmp = TempDir::new().expect("create temp dir");
        let config_path = tmp.path().join("nested").join("config.toml");

        let mut config = BrokerConfig::default();
        config.general.base_url = "https://broker.example.com".to_string();
        config.broker.lock_timeout_ms = 250;

        config.save_to(&config_path).expect("save config");
        let loaded = BrokerConfig::load_from(&config_path).expect("load config");

        assert_eq!(loaded.general.base_url, "https://broker.example.com");
        assert_eq!(loaded.broker.lock_timeout_ms, 250);
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("RSB_BASE_URL", "https://override.example.com"),
            ("RSB_ASYNC_SUPPORTED", "true"),
            ("RSB_ASYNC_REQUIRED", "not-a-bool"),
            ("RSB_LOCK_TIMEOUT_MS", "750"),
            ("RSB_CATALOG_PATH", "/etc/rsb/catalog"),
        ]);

        let mut config = BrokerConfig::default();
        config.apply_overrides(|key| env.get(key).map(ToString::to_string));

        assert_eq!(config.general.base_url, "https://override.example.com");
        assert!(config.broker.async_supported);
        // Unparseable values are ignored
        assert!(!config.broker.async_required);
        assert_eq!(config.broker.lock_timeout_ms, 750);
        assert_eq!(
            config.catalog_path().expect("catalog path"),
            PathBuf::from("/etc/rsb/catalog")
        );
    }

    #[test]
    fn test_partial_config() {
        let toml_str = r#"
[broker]
async_supported = true
"#;

        let config: BrokerConfig = toml::from_str(toml_str).expect("parse partial config");
        assert!(config.broker.async_supported);
        // These should be defaults
        assert!(config.broker.service_keys_supported);
        assert_eq!(config.broker.lock_timeout_ms, 5000);
        assert_eq!(config.logging.filter, "info,rsb=debug");
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let mut config = BrokerConfig::default();
        config.broker.lock_timeout_ms = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { field, .. }) if field == "broker.lock_timeout_ms"
        ));
    }

    #[test]
    fn test_validate_async_required_needs_supported() {
        let mut config = BrokerConfig::default();
        config.broker.async_required = true;
        assert!(config.validate().is_err());

        config.broker.async_supported = true;
        assert!(config.validate().is_ok());
    }
}
