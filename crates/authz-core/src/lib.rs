// crates/authz-core/src/lib.rs
// ============================================================================
// Module: Authz Core Library
// Description: Multi-tenant authorization runtime and policy-change domain.
// Purpose: Provide decisions, diagnostics and the change lifecycle contracts.
// Dependencies: csv, serde, thiserror, time, toml, tracing, uuid
// ============================================================================

//! ## Overview
//! Authz Core evaluates `(subject, domain, object, action, attributes)`
//! requests against a domain-scoped RBAC policy set under a runtime
//! enforcement mode, and defines the policy-change lifecycle consumed by the
//! SQLite store and the bot.
//! Invariants:
//! - [`DecisionEngine::check`](interfaces::Decider::check) is pure between reloads.
//! - Denials surface as errors only from [`DecisionEngine::authorize`] in
//!   enforce mode.
//! - Policy-change status moves only along the documented lifecycle graph.
//!
//! Security posture: rule engine failures are opaque to callers; retry tokens
//! are HMAC-signed and compared in constant time.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod core;
pub mod diagnostics;
pub mod interfaces;
pub mod rules;
pub mod runtime;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use crate::core::AuthzRequest;
pub use crate::core::EnforcementMode;
pub use crate::core::ModeSetting;
pub use crate::core::ModeSource;
pub use crate::core::PolicyChangeRequest;
pub use crate::core::PolicyChangeStatus;
pub use crate::core::RevisionMetadata;
pub use diagnostics::ForbiddenPayload;
pub use diagnostics::ForbiddenPayloadBuilder;
pub use diagnostics::ViewState;
pub use diagnostics::check_capability;
pub use interfaces::Decider;
pub use interfaces::PolicyChangeRepository;
pub use interfaces::RepositoryError;
pub use interfaces::RevisionError;
pub use interfaces::RevisionProvider;
pub use runtime::AuthzConfig;
pub use runtime::AuthzError;
pub use runtime::DecisionEngine;
pub use runtime::DecisionEngineOptions;
pub use runtime::ForbiddenError;
pub use runtime::PolicyDraftService;
