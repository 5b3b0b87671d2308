// crates/authz-policy-store/src/lib.rs
// ============================================================================
// Module: Authz Policy Store Library
// Description: File-backed policy tree with structural patching.
// Purpose: Apply policy diffs to a directory of CSV fragments reversibly.
// Dependencies: authz-core, serde_json, walkdir
// ============================================================================

//! ## Overview
//! [`PolicyStore`] loads every `.csv` fragment under a policy directory into
//! one policy tree keyed by rule type, applies RFC 6902 patches against the
//! tree's JSON form, writes rows back to the files they came from, and
//! returns the reverse patch.
//!
//! Writes are not crash-safe; callers run the store inside a disposable
//! working tree.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod patch;
pub mod store;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use patch::PatchError;
pub use patch::apply_patch;
pub use patch::diff;
pub use store::FALLBACK_FILE;
pub use store::PolicyStore;
pub use store::PolicyStoreError;
pub use store::PolicyTree;
