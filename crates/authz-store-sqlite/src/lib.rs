// crates/authz-store-sqlite/src/lib.rs
// ============================================================================
// Module: Authz SQLite Store Library
// Description: SQLite-backed policy change repository.
// Purpose: Persist the policy-change lifecycle and the bot lock durably.
// Dependencies: authz-core, rusqlite, serde_json
// ============================================================================

//! ## Overview
//! Provides [`SqlitePolicyChangeStore`], a [`PolicyChangeRepository`]
//! implementation over a single `SQLite` database. Hosts that need several
//! repository calls to commit together use
//! [`SqlitePolicyChangeStore::in_transaction`].
//!
//! [`PolicyChangeRepository`]: authz_core::PolicyChangeRepository

// ============================================================================
// SECTION: Modules
// ============================================================================

mod rows;
pub mod store;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use store::SqliteChangeScope;
pub use store::SqlitePolicyChangeStore;
pub use store::SqliteStoreConfig;
pub use store::SqliteStoreError;
pub use store::SqliteStoreMode;
pub use store::SqliteSyncMode;
