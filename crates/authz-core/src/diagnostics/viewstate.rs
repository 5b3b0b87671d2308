// crates/authz-core/src/diagnostics/viewstate.rs
// ============================================================================
// Module: Request View State
// Description: Per-request capability cache and missing-policy accumulator.
// Purpose: Collect decision evidence for forbidden responses and UI hints.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! A [`ViewState`] lives for exactly one request. Handlers record each
//! capability decision in it and the response layer reads it back when it
//! assembles a forbidden payload. The state is never shared across requests.
//!
//! Code paths that may run without a view state use the
//! [`OptionalViewState`] extension on `Option<&mut ViewState>`, which turns
//! every operation into a no-op returning zero values.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Effect label carried by generated suggestions.
pub const SUGGESTION_EFFECT: &str = "allow";

/// A denied `(domain, object, action)` triple observed during a request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MissingPolicy {
    /// Domain the decision was evaluated in.
    pub domain: String,
    /// Object that was denied.
    pub object: String,
    /// Action that was denied.
    pub action: String,
}

/// Proposed allow rule that would fix a missing policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicySuggestion {
    /// Subject to grant.
    pub subject: String,
    /// Domain to grant in.
    pub domain: String,
    /// Object to grant.
    pub object: String,
    /// Action to grant.
    pub action: String,
    /// Rule effect; always `allow` for generated suggestions.
    pub effect: String,
}

/// Per-request authorization view state.
///
/// # Invariants
/// - Capability keys are lowercased and trimmed.
/// - `missing_policies` keeps insertion order and may contain duplicates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewState {
    /// Subject the request is evaluated as.
    pub subject: String,
    /// Tenant domain of the request.
    pub tenant: String,
    /// Capability decisions keyed by `<object>.<action>`.
    pub capabilities: BTreeMap<String, bool>,
    /// Denials recorded in evaluation order.
    pub missing_policies: Vec<MissingPolicy>,
}

impl ViewState {
    /// Creates an empty view state for a subject and tenant domain.
    #[must_use]
    pub fn new(subject: impl Into<String>, tenant: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            tenant: tenant.into(),
            capabilities: BTreeMap::new(),
            missing_policies: Vec::new(),
        }
    }

    /// Records a capability decision. Last write wins.
    pub fn set_capability(&mut self, name: &str, allowed: bool) {
        self.capabilities.insert(normalize_capability_key(name), allowed);
    }

    /// Returns true when the capability was recorded as allowed.
    #[must_use]
    pub fn capability(&self, name: &str) -> bool {
        self.capability_value(name).unwrap_or(false)
    }

    /// Returns the recorded decision, if any.
    #[must_use]
    pub fn capability_value(&self, name: &str) -> Option<bool> {
        self.capabilities.get(&normalize_capability_key(name)).copied()
    }

    /// Appends a missing policy without deduplication.
    pub fn add_missing_policy(&mut self, policy: MissingPolicy) {
        self.missing_policies.push(policy);
    }

    /// Builds the single allow suggestion that would satisfy `policy`.
    ///
    /// The subject comes from the state; the domain falls back to the state
    /// tenant when the missing policy carries none.
    #[must_use]
    pub fn suggest_diff(&self, policy: &MissingPolicy) -> Vec<PolicySuggestion> {
        let domain = if policy.domain.trim().is_empty() {
            self.tenant.clone()
        } else {
            policy.domain.clone()
        };
        vec![PolicySuggestion {
            subject: self.subject.clone(),
            domain,
            object: policy.object.clone(),
            action: policy.action.clone(),
            effect: SUGGESTION_EFFECT.to_string(),
        }]
    }
}

/// Lowercases and trims a capability key.
fn normalize_capability_key(name: &str) -> String {
    name.trim().to_lowercase()
}

// ============================================================================
// SECTION: Optional View State
// ============================================================================

/// View state operations that tolerate an absent state.
pub trait OptionalViewState {
    /// Records a capability decision when a state is present.
    fn set_capability(&mut self, name: &str, allowed: bool);
    /// Returns true when a present state recorded the capability as allowed.
    fn capability(&self, name: &str) -> bool;
    /// Returns the recorded decision of a present state.
    fn capability_value(&self, name: &str) -> Option<bool>;
    /// Appends a missing policy when a state is present.
    fn add_missing_policy(&mut self, policy: MissingPolicy);
    /// Returns suggestions from a present state, else an empty list.
    fn suggest_diff(&self, policy: &MissingPolicy) -> Vec<PolicySuggestion>;
}

impl OptionalViewState for Option<&mut ViewState> {
    fn set_capability(&mut self, name: &str, allowed: bool) {
        if let Some(state) = self.as_deref_mut() {
            state.set_capability(name, allowed);
        }
    }

    fn capability(&self, name: &str) -> bool {
        self.as_deref().is_some_and(|state| state.capability(name))
    }

    fn capability_value(&self, name: &str) -> Option<bool> {
        self.as_deref().and_then(|state| state.capability_value(name))
    }

    fn add_missing_policy(&mut self, policy: MissingPolicy) {
        if let Some(state) = self.as_deref_mut() {
            state.add_missing_policy(policy);
        }
    }

    fn suggest_diff(&self, policy: &MissingPolicy) -> Vec<PolicySuggestion> {
        self.as_deref().map(|state| state.suggest_diff(policy)).unwrap_or_default()
    }
}
