// crates/authz-core/src/core/mode.rs
// ============================================================================
// Module: Enforcement Mode
// Description: Enforcement modes and the sources that report them.
// Purpose: Let the enforcement mode change at runtime without a restart.
// Dependencies: serde, serde_yaml
// ============================================================================

//! ## Overview
//! The decision engine reads the enforcement mode on every `authorize` call.
//! [`FileModeSource`] serves that read from a YAML flag file cached by
//! modification time, so the steady-state cost is one `stat`.
//! Security posture: the flag file is operator-controlled; unknown values
//! degrade to `shadow`, never to `disabled`.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;
use std::fs;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::SystemTime;

use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Runtime enforcement mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EnforcementMode {
    /// Authorization is skipped entirely.
    Disabled,
    /// Denials are logged but never enforced.
    #[default]
    Shadow,
    /// Denials are returned as forbidden errors.
    Enforce,
}

impl EnforcementMode {
    /// Returns the canonical label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disabled => "disabled",
            Self::Shadow => "shadow",
            Self::Enforce => "enforce",
        }
    }

    /// Parses a label, ignoring case and surrounding whitespace.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "disabled" => Some(Self::Disabled),
            "shadow" => Some(Self::Shadow),
            "enforce" => Some(Self::Enforce),
            _ => None,
        }
    }

    /// Parses a label, coercing unknown values to [`Self::Shadow`].
    #[must_use]
    pub fn parse_lossy(value: &str) -> Self {
        Self::parse(value).unwrap_or(Self::Shadow)
    }
}

impl fmt::Display for EnforcementMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mode reported by a [`ModeSource`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModeSetting {
    /// A recognized mode.
    Known(EnforcementMode),
    /// An unrecognized label, treated as shadow by the engine.
    Unknown(String),
}

impl ModeSetting {
    /// Classifies a raw label.
    #[must_use]
    pub fn from_label(label: &str) -> Self {
        EnforcementMode::parse(label).map_or_else(|| Self::Unknown(label.to_string()), Self::Known)
    }
}

// ============================================================================
// SECTION: Mode Sources
// ============================================================================

/// Source of the current enforcement mode.
pub trait ModeSource: Send + Sync {
    /// Returns the mode in effect right now.
    fn mode(&self) -> ModeSetting;
}

/// Mode source that always reports the same value.
#[derive(Debug, Clone)]
pub struct StaticModeSource {
    /// Reported mode.
    setting: ModeSetting,
}

impl StaticModeSource {
    /// Creates a source for a known mode.
    #[must_use]
    pub const fn new(mode: EnforcementMode) -> Self {
        Self { setting: ModeSetting::Known(mode) }
    }

    /// Creates a source from an unvalidated label.
    #[must_use]
    pub fn from_label(label: &str) -> Self {
        Self { setting: ModeSetting::from_label(label) }
    }
}

impl ModeSource for StaticModeSource {
    fn mode(&self) -> ModeSetting {
        self.setting.clone()
    }
}

/// YAML document stored in the flag file.
#[derive(Debug, Deserialize)]
struct FlagDocument {
    /// Raw mode label.
    #[serde(default)]
    mode: String,
}

/// Cached flag file read.
#[derive(Debug, Clone)]
struct FlagCache {
    /// Modification time and length observed when the cache was filled.
    stamp: Option<(SystemTime, u64)>,
    /// Parsed setting.
    setting: ModeSetting,
}

/// Mode source backed by a YAML file of the form `mode: enforce`.
///
/// # Invariants
/// - A read failure reports the last successfully parsed mode, or the
///   fallback when nothing was read yet.
/// - A parse failure reports the fallback.
#[derive(Debug)]
pub struct FileModeSource {
    /// Flag file path.
    path: PathBuf,
    /// Mode used when the file is unreadable or malformed.
    fallback: EnforcementMode,
    /// Last observed file state.
    cache: Mutex<Option<FlagCache>>,
}

impl FileModeSource {
    /// Creates a file-backed mode source.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, fallback: EnforcementMode) -> Self {
        Self { path: path.into(), fallback, cache: Mutex::new(None) }
    }

    /// Returns the flag file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads and parses the flag file, bypassing the cache.
    fn read(&self) -> Result<ModeSetting, FlagReadError> {
        let text = fs::read_to_string(&self.path).map_err(|_| FlagReadError::Io)?;
        let document: FlagDocument =
            serde_yaml::from_str(&text).map_err(|_| FlagReadError::Parse)?;
        if document.mode.trim().is_empty() {
            return Ok(ModeSetting::Known(self.fallback));
        }
        Ok(ModeSetting::from_label(&document.mode))
    }
}

/// Flag file read failure kinds.
enum FlagReadError {
    /// File could not be read.
    Io,
    /// File content was not valid YAML.
    Parse,
}

impl ModeSource for FileModeSource {
    fn mode(&self) -> ModeSetting {
        let stamp = fs::metadata(&self.path)
            .and_then(|meta| meta.modified().map(|modified| (modified, meta.len())))
            .ok();
        let Ok(mut guard) = self.cache.lock() else {
            return ModeSetting::Known(self.fallback);
        };
        if let Some(cache) = guard.as_ref()
            && stamp.is_some()
            && cache.stamp == stamp
        {
            return cache.setting.clone();
        }
        match self.read() {
            Ok(setting) => {
                *guard = Some(FlagCache { stamp, setting: setting.clone() });
                setting
            }
            Err(FlagReadError::Io) => guard
                .as_ref()
                .map_or(ModeSetting::Known(self.fallback), |cache| cache.setting.clone()),
            Err(FlagReadError::Parse) => {
                let setting = ModeSetting::Known(self.fallback);
                *guard = Some(FlagCache { stamp, setting: setting.clone() });
                setting
            }
        }
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, reason = "Test-only assertions and helpers are permitted.")]

    use super::*;

    #[test]
    fn parse_lossy_coerces_unknown_to_shadow() {
        assert_eq!(EnforcementMode::parse_lossy(" ENFORCE "), EnforcementMode::Enforce);
        assert_eq!(EnforcementMode::parse_lossy("strict"), EnforcementMode::Shadow);
    }

    #[test]
    fn file_source_falls_back_on_parse_error_and_keeps_last_on_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flags.yaml");
        let source = FileModeSource::new(&path, EnforcementMode::Shadow);

        assert_eq!(source.mode(), ModeSetting::Known(EnforcementMode::Shadow));

        fs::write(&path, "mode: enforce\n").unwrap();
        assert_eq!(source.mode(), ModeSetting::Known(EnforcementMode::Enforce));

        fs::remove_file(&path).unwrap();
        assert_eq!(source.mode(), ModeSetting::Known(EnforcementMode::Enforce));

        fs::write(&path, "mode: [unterminated\n").unwrap();
        assert_eq!(source.mode(), ModeSetting::Known(EnforcementMode::Shadow));
    }

    #[test]
    fn file_source_reports_unknown_labels() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flags.yaml");
        fs::write(&path, "mode: paranoid\n").unwrap();
        let source = FileModeSource::new(&path, EnforcementMode::Enforce);
        assert_eq!(source.mode(), ModeSetting::Unknown("paranoid".to_string()));
    }
}
