// crates/authz-core/src/core/mod.rs
// ============================================================================
// Module: Authz Core Types
// Description: Identifiers, requests, modes, revisions and change requests.
// Purpose: Provide the plain data types shared across the authz workspace.
// Dependencies: serde, time, uuid
// ============================================================================

//! ## Overview
//! Core types carry no behavior beyond canonicalization and validation. The
//! decision engine, the repository and the bot all build on them.

// ============================================================================
// SECTION: Submodules
// ============================================================================

pub mod changes;
pub mod identifiers;
pub mod mode;
pub mod request;
pub mod revision;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use changes::BotLockParams;
pub use changes::BotMetadataUpdate;
pub use changes::FieldUpdate;
pub use changes::ListPage;
pub use changes::ListParams;
pub use changes::MergeOutcome;
pub use changes::NewPolicyChange;
pub use changes::PolicyChangeRequest;
pub use changes::PolicyChangeStatus;
pub use changes::StatusUpdate;
pub use identifiers::ACTION_WILDCARD;
pub use identifiers::GLOBAL_DOMAIN;
pub use identifiers::capability_key;
pub use identifiers::domain_from_tenant;
pub use identifiers::normalize_action;
pub use identifiers::normalized_user_uuid;
pub use identifiers::object_name;
pub use identifiers::subject_for_role;
pub use identifiers::subject_for_user;
pub use identifiers::subject_for_user_id;
pub use identifiers::system_subject;
pub use mode::EnforcementMode;
pub use mode::FileModeSource;
pub use mode::ModeSetting;
pub use mode::ModeSource;
pub use mode::StaticModeSource;
pub use request::Attributes;
pub use request::AuthzRequest;
pub use revision::RevisionMetadata;
