// crates/authz-core/src/core/revision.rs
// ============================================================================
// Module: Policy Revision Metadata
// Description: Revision file model produced by the external policy packer.
// Purpose: Describe which policy build is currently deployed.
// Dependencies: serde, time
// ============================================================================

//! ## Overview
//! The packer writes `{revision, generated_at, entries}` next to the
//! aggregated policy file. Only `revision` is required.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use time::OffsetDateTime;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Revision metadata for the packed policy set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevisionMetadata {
    /// Opaque revision string.
    pub revision: String,
    /// Time the pack was generated.
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub generated_at: Option<OffsetDateTime>,
    /// Number of packed policy rows.
    #[serde(default)]
    pub entries: u64,
}
