// crates/authz-core/src/rules/mod.rs
// ============================================================================
// Module: Rule Engine
// Description: Loader and evaluator for domain-scoped RBAC policy files.
// Purpose: Provide the rule engine behind the decision engine.
// Dependencies: csv, serde, toml
// ============================================================================

//! ## Overview
//! The rule engine reads a model file and a policy file and produces an
//! immutable [`RuleSet`]. The decision engine swaps whole rule sets on reload;
//! nothing here is mutated after construction.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::Path;

use thiserror::Error;

// ============================================================================
// SECTION: Submodules
// ============================================================================

pub mod condition;
pub mod evaluator;
pub mod listing;
pub mod model;
pub mod policy;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use condition::Condition;
pub use evaluator::Evaluation;
pub use evaluator::RuleSet;
pub use listing::PolicyEntry;
pub use listing::PolicyPage;
pub use listing::PolicyQuery;
pub use listing::PolicySortField;
pub use model::EffectStrategy;
pub use model::RuleModel;
pub use policy::Effect;
pub use policy::PolicyRule;
pub use policy::PolicySet;
pub use policy::RoleGrant;
pub use policy::read_policy_file;
pub use policy::read_policy_rows;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Rule engine errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RuleError {
    /// File could not be read.
    #[error("rule io error: {0}")]
    Io(String),
    /// Model file is invalid.
    #[error("rule model error: {0}")]
    Model(String),
    /// Policy rows are malformed.
    #[error("rule parse error: {0}")]
    Parse(String),
    /// Condition column is malformed.
    #[error("rule condition error: {0}")]
    Condition(String),
}

// ============================================================================
// SECTION: Loading
// ============================================================================

/// Loads a model and policy file into an evaluable rule set.
///
/// # Errors
///
/// Returns [`RuleError`] when either file is unreadable or invalid.
pub fn load_rule_set(model_path: &Path, policy_path: &Path) -> Result<RuleSet, RuleError> {
    let model = RuleModel::load(model_path)?;
    let policies = PolicySet::load(policy_path)?;
    Ok(RuleSet::new(model, policies))
}
