//! Configuration system for Keyward.
//!
//! Configuration is loaded from multiple sources with the following precedence:
//! 1. Environment variables (highest priority)
//! 2. `keyward.toml` file
//! 3. Default values (lowest priority)
//!
//! Loading is explicit: the host application calls [`KeywardConfig::load`]
//! once and hands the [`ValidatorConfig`] to the validator. The validation
//! engine itself never looks at the environment.
//!
//! The bypass and master markers are read from the file only; no environment
//! variable can set them.
//!
//! # Environment Variables
//!
//! - `KEYWARD_DEBUG` - Verbose key diagnostics in logs
//! - `KEYWARD_CASE_INSENSITIVE_IDENTITY` - Case-insensitive user/host comparison
//! - `KEYWARD_LOGGING_ENABLED` - Enable logging
//! - `KEYWARD_LOG_LEVEL` - Log level (trace, debug, info, warn, error)
//! - `KEYWARD_STORAGE_DIR` - Directory for the high-water-mark fallback file
//! - `KEYWARD_USE_KEYRING` - Store the high-water mark in the OS keyring

use config::{Config, ConfigBuilder, FileFormat};
use serde::Deserialize;
use std::env;
use std::path::PathBuf;

use crate::errors::{LicenseError, LicenseResult};

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct KeywardConfig {
    /// Validation policy
    pub validator: ValidatorConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
    /// High-water-mark storage configuration
    pub storage: StorageConfig,
}

/// Validation policy handed to [`crate::validator::LicenseValidator`].
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ValidatorConfig {
    /// Log raw key text and token streams
    pub debug: bool,
    /// Compare bound user/host names case-insensitively
    pub case_insensitive_identity: bool,
    /// `pwd` value that marks a privileged key
    pub bypass_marker: Option<String>,
    /// Marker the caller must present to read the app password back
    pub master_marker: Option<String>,
    /// Requested grace (days or units) above which truncation applies
    pub min_grace_days: i64,
    /// Maximum grace is the licensed span (or limit) divided by this
    pub grace_divisor: i64,
    /// Prefix that marks an encrypted `opt` value
    pub options_magic: String,
    /// Envelope algorithm tag assumed when a key carries none
    pub envelope_tag: String,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            debug: false,
            case_insensitive_identity: false,
            bypass_marker: None,
            master_marker: None,
            min_grace_days: 5,
            grace_divisor: 4,
            options_magic: "98765".to_string(),
            envelope_tag: "AG1".to_string(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Enable logging
    pub enabled: bool,
    /// Log level: trace, debug, info, warn, error
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            level: "info".to_string(),
        }
    }
}

/// Where the tamper-evident high-water mark lives.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Keyring service name
    pub service: String,
    /// Fallback directory; the platform app data directory when unset
    pub directory: Option<PathBuf>,
    /// Try the OS keyring before the file fallback
    pub use_keyring: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            service: "keyward".to_string(),
            directory: None,
            use_keyring: true,
        }
    }
}

fn with_defaults(
    builder: ConfigBuilder<config::builder::DefaultState>,
) -> LicenseResult<ConfigBuilder<config::builder::DefaultState>> {
    let defaults = ValidatorConfig::default();
    builder
        .set_default("validator.debug", false)
        .map_err(|e| LicenseError::ConfigError(e.to_string()))?
        .set_default("validator.case_insensitive_identity", false)
        .map_err(|e| LicenseError::ConfigError(e.to_string()))?
        .set_default("validator.min_grace_days", defaults.min_grace_days)
        .map_err(|e| LicenseError::ConfigError(e.to_string()))?
        .set_default("validator.grace_divisor", defaults.grace_divisor)
        .map_err(|e| LicenseError::ConfigError(e.to_string()))?
        .set_default("validator.options_magic", defaults.options_magic)
        .map_err(|e| LicenseError::ConfigError(e.to_string()))?
        .set_default("validator.envelope_tag", defaults.envelope_tag)
        .map_err(|e| LicenseError::ConfigError(e.to_string()))?
        .set_default("logging.enabled", false)
        .map_err(|e| LicenseError::ConfigError(e.to_string()))?
        .set_default("logging.level", "info")
        .map_err(|e| LicenseError::ConfigError(e.to_string()))?
        .set_default("storage.service", "keyward")
        .map_err(|e| LicenseError::ConfigError(e.to_string()))?
        .set_default("storage.use_keyring", true)
        .map_err(|e| LicenseError::ConfigError(e.to_string()))
}

fn finish(builder: ConfigBuilder<config::builder::DefaultState>) -> LicenseResult<KeywardConfig> {
    let settings = builder
        .build()
        .map_err(|e| LicenseError::ConfigError(format!("failed to build config: {e}")))?;

    let config: KeywardConfig = settings
        .try_deserialize()
        .map_err(|e| LicenseError::ConfigError(format!("failed to deserialize config: {e}")))?;

    config.validate()?;
    Ok(config)
}

impl KeywardConfig {
    /// Load configuration from `keyward.toml` (optional) and `KEYWARD_*`
    /// environment variables, then validate it.
    pub fn load() -> LicenseResult<Self> {
        let builder = with_defaults(Config::builder())?
            .add_source(config::File::with_name("keyward").required(false))
            .set_override_option(
                "validator.debug",
                env::var("KEYWARD_DEBUG")
                    .ok()
                    .and_then(|v| v.parse::<bool>().ok()),
            )
            .map_err(|e| LicenseError::ConfigError(e.to_string()))?
            .set_override_option(
                "validator.case_insensitive_identity",
                env::var("KEYWARD_CASE_INSENSITIVE_IDENTITY")
                    .ok()
                    .and_then(|v| v.parse::<bool>().ok()),
            )
            .map_err(|e| LicenseError::ConfigError(e.to_string()))?
            .set_override_option(
                "logging.enabled",
                env::var("KEYWARD_LOGGING_ENABLED")
                    .ok()
                    .and_then(|v| v.parse::<bool>().ok()),
            )
            .map_err(|e| LicenseError::ConfigError(e.to_string()))?
            .set_override_option("logging.level", env::var("KEYWARD_LOG_LEVEL").ok())
            .map_err(|e| LicenseError::ConfigError(e.to_string()))?
            .set_override_option("storage.directory", env::var("KEYWARD_STORAGE_DIR").ok())
            .map_err(|e| LicenseError::ConfigError(e.to_string()))?
            .set_override_option(
                "storage.use_keyring",
                env::var("KEYWARD_USE_KEYRING")
                    .ok()
                    .and_then(|v| v.parse::<bool>().ok()),
            )
            .map_err(|e| LicenseError::ConfigError(e.to_string()))?;

        finish(builder)
    }

    /// Load configuration from TOML text only (no file lookup, no environment).
    pub fn from_toml_str(toml: &str) -> LicenseResult<Self> {
        let builder =
            with_defaults(Config::builder())?.add_source(config::File::from_str(toml, FileFormat::Toml));
        finish(builder)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> LicenseResult<()> {
        self.validator.validate()?;

        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            other => {
                return Err(LicenseError::ConfigError(format!(
                    "logging.level must be one of: trace, debug, info, warn, error. Got '{other}'"
                )));
            }
        }

        if self.storage.service.is_empty() {
            return Err(LicenseError::ConfigError(
                "storage.service cannot be empty".to_string(),
            ));
        }

        Ok(())
    }
}

impl ValidatorConfig {
    pub fn validate(&self) -> LicenseResult<()> {
        if self.grace_divisor <= 0 || self.grace_divisor > i64::from(i32::MAX) {
            return Err(LicenseError::ConfigError(format!(
                "validator.grace_divisor must be between 1 and {}",
                i32::MAX
            )));
        }
        if self.min_grace_days < 0 {
            return Err(LicenseError::ConfigError(
                "validator.min_grace_days cannot be negative".to_string(),
            ));
        }
        if self.options_magic.is_empty() {
            return Err(LicenseError::ConfigError(
                "validator.options_magic cannot be empty".to_string(),
            ));
        }
        if self.envelope_tag.is_empty() || self.envelope_tag.contains('~') {
            return Err(LicenseError::ConfigError(
                "validator.envelope_tag must be non-empty and must not contain '~'".to_string(),
            ));
        }
        if matches!(&self.bypass_marker, Some(m) if m.is_empty()) {
            return Err(LicenseError::ConfigError(
                "validator.bypass_marker cannot be empty when set".to_string(),
            ));
        }
        Ok(())
    }
}
