// crates/authz-core/src/rules/model.rs
// ============================================================================
// Module: Rule Model
// Description: Evaluation knobs for the domain-scoped RBAC rule format.
// Purpose: Load the model file that fixes effect, domain and wildcard semantics.
// Dependencies: serde, toml
// ============================================================================

//! ## Overview
//! The model file is a small TOML document:
//!
//! ```toml
//! effect = "deny_override"
//! global_domain = "global"
//! wildcard = "*"
//! max_role_depth = 10
//! ```
//!
//! Every key is optional. The rule format itself (`p` and `g` rows) is
//! fixed; the model only chooses how matching rows combine.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs;
use std::path::Path;

use serde::Deserialize;
use serde::Serialize;

use crate::core::identifiers::GLOBAL_DOMAIN;
use crate::rules::RuleError;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Maximum accepted model file size in bytes.
const MAX_MODEL_FILE_BYTES: u64 = 64 * 1024;
/// Upper bound for role inheritance depth.
const MAX_ROLE_DEPTH_LIMIT: usize = 64;

// ============================================================================
// SECTION: Types
// ============================================================================

/// How matching rows combine into a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EffectStrategy {
    /// Allowed when some row allows and no row denies.
    #[default]
    DenyOverride,
    /// Allowed when some row allows.
    AllowOverride,
    /// The first matching row in file order decides.
    Priority,
}

impl EffectStrategy {
    /// Returns the canonical label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::DenyOverride => "deny_override",
            Self::AllowOverride => "allow_override",
            Self::Priority => "priority",
        }
    }
}

/// Rule evaluation model.
///
/// # Invariants
/// - `wildcard` and `global_domain` are non-empty.
/// - `max_role_depth` is between 1 and 64.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleModel {
    /// Effect combination strategy.
    #[serde(default)]
    pub effect: EffectStrategy,
    /// Domain whose rows and role grants apply to every domain.
    #[serde(default = "default_global_domain")]
    pub global_domain: String,
    /// Token that matches any subject, domain, object or action.
    #[serde(default = "default_wildcard")]
    pub wildcard: String,
    /// Maximum role inheritance depth followed during matching.
    #[serde(default = "default_max_role_depth")]
    pub max_role_depth: usize,
}

impl Default for RuleModel {
    fn default() -> Self {
        Self {
            effect: EffectStrategy::default(),
            global_domain: default_global_domain(),
            wildcard: default_wildcard(),
            max_role_depth: default_max_role_depth(),
        }
    }
}

/// Returns the default global domain.
fn default_global_domain() -> String {
    GLOBAL_DOMAIN.to_string()
}

/// Returns the default wildcard token.
fn default_wildcard() -> String {
    "*".to_string()
}

/// Returns the default role depth.
const fn default_max_role_depth() -> usize {
    10
}

impl RuleModel {
    /// Loads and validates a model file.
    ///
    /// # Errors
    ///
    /// Returns [`RuleError`] when the file is unreadable, oversized or invalid.
    pub fn load(path: &Path) -> Result<Self, RuleError> {
        let metadata = fs::metadata(path)
            .map_err(|err| RuleError::Io(format!("{}: {err}", path.display())))?;
        if metadata.len() > MAX_MODEL_FILE_BYTES {
            return Err(RuleError::Model("model file exceeds size limit".to_string()));
        }
        let text = fs::read_to_string(path)
            .map_err(|err| RuleError::Io(format!("{}: {err}", path.display())))?;
        Self::parse(&text)
    }

    /// Parses and validates model text.
    ///
    /// # Errors
    ///
    /// Returns [`RuleError::Model`] when the text is not a valid model.
    pub fn parse(text: &str) -> Result<Self, RuleError> {
        let model: Self = toml::from_str(text).map_err(|err| RuleError::Model(err.to_string()))?;
        model.validate()?;
        Ok(model)
    }

    /// Validates model invariants.
    ///
    /// # Errors
    ///
    /// Returns [`RuleError::Model`] when an invariant is violated.
    pub fn validate(&self) -> Result<(), RuleError> {
        if self.global_domain.trim().is_empty() {
            return Err(RuleError::Model("global_domain must be non-empty".to_string()));
        }
        if self.wildcard.trim().is_empty() {
            return Err(RuleError::Model("wildcard must be non-empty".to_string()));
        }
        if self.max_role_depth == 0 || self.max_role_depth > MAX_ROLE_DEPTH_LIMIT {
            return Err(RuleError::Model(format!(
                "max_role_depth must be between 1 and {MAX_ROLE_DEPTH_LIMIT}"
            )));
        }
        Ok(())
    }
}
