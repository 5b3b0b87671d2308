// crates/authz-core/src/core/request.rs
// ============================================================================
// Module: Authz Request Model
// Description: Decision request with ABAC attributes.
// Purpose: Carry the four decision coordinates plus attributes into the engine.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! [`AuthzRequest`] is the value handed to the decision engine. Attributes are
//! owned JSON values so cloning a request always deep-copies them.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

// ============================================================================
// SECTION: Types
// ============================================================================

/// ABAC attributes keyed by name.
pub type Attributes = BTreeMap<String, Value>;

/// Authorization request evaluated by the decision engine.
///
/// # Invariants
/// - Fields are passed through as given; canonicalization happens in
///   [`crate::core::identifiers`] before construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthzRequest {
    /// Subject identifier.
    pub subject: String,
    /// Domain identifier.
    pub domain: String,
    /// Object identifier.
    pub object: String,
    /// Action identifier.
    pub action: String,
    /// Optional ABAC attributes.
    #[serde(default)]
    pub attributes: Attributes,
}

impl AuthzRequest {
    /// Builds a request with empty attributes.
    #[must_use]
    pub fn new(
        subject: impl Into<String>,
        domain: impl Into<String>,
        object: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        Self {
            subject: subject.into(),
            domain: domain.into(),
            object: object.into(),
            action: action.into(),
            attributes: Attributes::new(),
        }
    }

    /// Replaces the request attributes.
    #[must_use]
    pub fn with_attributes(mut self, attributes: Attributes) -> Self {
        self.attributes = attributes;
        self
    }

    /// Adds a single attribute.
    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}
