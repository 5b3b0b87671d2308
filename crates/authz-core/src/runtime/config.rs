// crates/authz-core/src/runtime/config.rs
// ============================================================================
// Module: Authz Configuration
// Description: TOML configuration with environment overrides.
// Purpose: Resolve engine paths, diagnostics settings and the revision file.
// Dependencies: serde, toml
// ============================================================================

//! ## Overview
//! [`AuthzConfig::load`] reads an optional TOML file (explicit path, else
//! `AUTHZ_CONFIG`), applies environment overrides and validates the result.
//! Without any file the defaults plus environment produce a usable config.
//!
//! ```toml
//! [engine]
//! model_path = "config/access/model.toml"
//! policy_path = "config/access/policy.csv"
//! flag_path = "config/access/authz_flags.yaml"
//! mode = "shadow"
//!
//! [diagnostics]
//! request_id_header = "X-Request-ID"
//! retry_token_ttl_secs = 300
//! ```
//! Security posture: the retry secret is only read from the environment.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::env;
use std::fs;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::core::mode::EnforcementMode;
use crate::core::mode::ModeSetting;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Environment variable naming the config file.
pub const CONFIG_ENV_VAR: &str = "AUTHZ_CONFIG";
/// Environment variable overriding the enforcement mode.
pub const MODE_ENV_VAR: &str = "AUTHZ_MODE";
/// Environment variable overriding the model path.
pub const MODEL_PATH_ENV_VAR: &str = "AUTHZ_MODEL_PATH";
/// Environment variable overriding the policy path.
pub const POLICY_PATH_ENV_VAR: &str = "AUTHZ_POLICY_PATH";
/// Environment variable overriding the flag file path.
pub const FLAG_PATH_ENV_VAR: &str = "AUTHZ_FLAG_CONFIG";
/// Environment variable overriding the revision file path.
pub const REVISION_PATH_ENV_VAR: &str = "AUTHZ_REVISION_PATH";
/// Environment variable holding the retry token secret.
pub const RETRY_SECRET_ENV_VAR: &str = "AUTHZ_RETRY_SECRET";
/// Default debug endpoint path.
pub const DEFAULT_DEBUG_PATH: &str = "/core/api/authz/debug";
/// Default request id header.
pub const DEFAULT_REQUEST_ID_HEADER: &str = "X-Request-ID";
/// Maximum configuration file size in bytes.
const MAX_CONFIG_FILE_SIZE: u64 = 256 * 1024;
/// Maximum total path length.
const MAX_TOTAL_PATH_LENGTH: usize = 4096;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Decision engine settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    /// Rule model file.
    #[serde(default = "default_model_path")]
    pub model_path: PathBuf,
    /// Aggregated policy file.
    #[serde(default = "default_policy_path")]
    pub policy_path: PathBuf,
    /// YAML flag file holding the runtime mode.
    #[serde(default = "default_flag_path")]
    pub flag_path: PathBuf,
    /// Mode used when the flag file is missing or malformed.
    #[serde(default)]
    pub mode: EnforcementMode,
    /// Mode forced through `AUTHZ_MODE`; bypasses the flag file.
    #[serde(skip)]
    pub mode_override: Option<ModeSetting>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            model_path: default_model_path(),
            policy_path: default_policy_path(),
            flag_path: default_flag_path(),
            mode: EnforcementMode::default(),
            mode_override: None,
        }
    }
}

/// Forbidden payload and retry settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DiagnosticsConfig {
    /// Header carrying the request id.
    #[serde(default = "default_request_id_header")]
    pub request_id_header: String,
    /// Debug endpoint path embedded in forbidden payloads.
    #[serde(default = "default_debug_path")]
    pub debug_path: String,
    /// Retry token lifetime in seconds.
    #[serde(default = "default_retry_token_ttl_secs")]
    pub retry_token_ttl_secs: u64,
    /// Retry cooldown window in seconds.
    #[serde(default = "default_retry_cooldown_secs")]
    pub retry_cooldown_secs: u64,
    /// Maximum tracked request ids in the retry limiter.
    #[serde(default = "default_retry_limiter_capacity")]
    pub retry_limiter_capacity: usize,
    /// Retry token signing secret, read from `AUTHZ_RETRY_SECRET`.
    #[serde(skip)]
    pub retry_secret: Option<String>,
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            request_id_header: default_request_id_header(),
            debug_path: default_debug_path(),
            retry_token_ttl_secs: default_retry_token_ttl_secs(),
            retry_cooldown_secs: default_retry_cooldown_secs(),
            retry_limiter_capacity: default_retry_limiter_capacity(),
            retry_secret: None,
        }
    }
}

impl DiagnosticsConfig {
    /// Returns the retry token lifetime.
    #[must_use]
    pub const fn retry_token_ttl(&self) -> Duration {
        Duration::from_secs(self.retry_token_ttl_secs)
    }

    /// Returns the retry cooldown window.
    #[must_use]
    pub const fn retry_cooldown(&self) -> Duration {
        Duration::from_secs(self.retry_cooldown_secs)
    }
}

/// Revision file settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RevisionConfig {
    /// Revision file; defaults to `<policy_path>.rev`.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// Top-level authz configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuthzConfig {
    /// Engine settings.
    #[serde(default)]
    pub engine: EngineConfig,
    /// Diagnostics settings.
    #[serde(default)]
    pub diagnostics: DiagnosticsConfig,
    /// Revision settings.
    #[serde(default)]
    pub revision: RevisionConfig,
}

/// Returns the default model path.
fn default_model_path() -> PathBuf {
    PathBuf::from("config/access/model.toml")
}

/// Returns the default policy path.
fn default_policy_path() -> PathBuf {
    PathBuf::from("config/access/policy.csv")
}

/// Returns the default flag path.
fn default_flag_path() -> PathBuf {
    PathBuf::from("config/access/authz_flags.yaml")
}

/// Returns the default request id header.
fn default_request_id_header() -> String {
    DEFAULT_REQUEST_ID_HEADER.to_string()
}

/// Returns the default debug path.
fn default_debug_path() -> String {
    DEFAULT_DEBUG_PATH.to_string()
}

/// Returns the default retry token lifetime.
const fn default_retry_token_ttl_secs() -> u64 {
    300
}

/// Returns the default retry cooldown.
const fn default_retry_cooldown_secs() -> u64 {
    60
}

/// Returns the default retry limiter capacity.
const fn default_retry_limiter_capacity() -> usize {
    10_000
}

// ============================================================================
// SECTION: Loading
// ============================================================================

impl AuthzConfig {
    /// Loads configuration from a file (or defaults) plus the environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the file cannot be read, parsed or
    /// validated.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let resolved = path
            .map(Path::to_path_buf)
            .or_else(|| env::var_os(CONFIG_ENV_VAR).map(PathBuf::from));
        let mut config = match resolved {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Parses a config file without environment overrides.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        if path.as_os_str().len() > MAX_TOTAL_PATH_LENGTH {
            return Err(ConfigError::Invalid("config path exceeds max length".to_string()));
        }
        let metadata = fs::metadata(path).map_err(|err| ConfigError::Io(err.to_string()))?;
        if metadata.len() > MAX_CONFIG_FILE_SIZE {
            return Err(ConfigError::Invalid("config file exceeds size limit".to_string()));
        }
        let content = fs::read_to_string(path).map_err(|err| ConfigError::Io(err.to_string()))?;
        toml::from_str(&content).map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Applies overrides from an environment lookup.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        if let Some(mode) = non_empty(MODE_ENV_VAR) {
            self.engine.mode_override = Some(ModeSetting::from_label(mode.trim()));
        }
        if let Some(path) = non_empty(MODEL_PATH_ENV_VAR) {
            self.engine.model_path = PathBuf::from(path);
        }
        if let Some(path) = non_empty(POLICY_PATH_ENV_VAR) {
            self.engine.policy_path = PathBuf::from(path);
        }
        if let Some(path) = non_empty(FLAG_PATH_ENV_VAR) {
            self.engine.flag_path = PathBuf::from(path);
        }
        if let Some(path) = non_empty(REVISION_PATH_ENV_VAR) {
            self.revision.path = Some(PathBuf::from(path));
        }
        if let Some(secret) = non_empty(RETRY_SECRET_ENV_VAR) {
            self.diagnostics.retry_secret = Some(secret);
        }
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first missing setting.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.engine.model_path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("authz: missing model path".to_string()));
        }
        if self.engine.policy_path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("authz: missing policy path".to_string()));
        }
        if self.engine.mode_override.is_none() && self.engine.flag_path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid(
                "authz: missing flag configuration path".to_string(),
            ));
        }
        if self.diagnostics.request_id_header.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "diagnostics.request_id_header must be non-empty".to_string(),
            ));
        }
        if !self.diagnostics.debug_path.starts_with('/') {
            return Err(ConfigError::Invalid(
                "diagnostics.debug_path must start with '/'".to_string(),
            ));
        }
        if self.diagnostics.retry_token_ttl_secs == 0 {
            return Err(ConfigError::Invalid(
                "diagnostics.retry_token_ttl_secs must be greater than zero".to_string(),
            ));
        }
        if self.diagnostics.retry_limiter_capacity == 0 {
            return Err(ConfigError::Invalid(
                "diagnostics.retry_limiter_capacity must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Returns the revision file path (`<policy_path>.rev` by default).
    #[must_use]
    pub fn revision_path(&self) -> PathBuf {
        self.revision.path.clone().unwrap_or_else(|| {
            let mut path = self.engine.policy_path.clone().into_os_string();
            path.push(".rev");
            PathBuf::from(path)
        })
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Configuration errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// I/O failure while reading configuration.
    #[error("config io error: {0}")]
    Io(String),
    /// TOML parsing error.
    #[error("config parse error: {0}")]
    Parse(String),
    /// Invalid configuration data.
    #[error("invalid config: {0}")]
    Invalid(String),
}
