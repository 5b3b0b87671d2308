// crates/authz-core/src/interfaces/mod.rs
// ============================================================================
// Module: Authz Interfaces
// Description: Backend-agnostic seams for decisions, revisions and persistence.
// Purpose: Let hosts and tests substitute the engine, revision source and store.
// Dependencies: crate::core, crate::runtime, thiserror
// ============================================================================

//! ## Overview
//! Three traits separate the authz runtime from its collaborators:
//! - [`Decider`]: the pure allow/deny predicate used by diagnostics helpers.
//! - [`RevisionProvider`]: the source of the deployed policy revision.
//! - [`PolicyChangeRepository`]: persistence for the policy-change lifecycle.

// ============================================================================
// SECTION: Imports
// ============================================================================

use thiserror::Error;
use uuid::Uuid;

use crate::core::changes::BotLockParams;
use crate::core::changes::BotMetadataUpdate;
use crate::core::changes::FieldUpdate;
use crate::core::changes::ListPage;
use crate::core::changes::ListParams;
use crate::core::changes::MergeOutcome;
use crate::core::changes::NewPolicyChange;
use crate::core::changes::PolicyChangeRequest;
use crate::core::changes::PolicyChangeStatus;
use crate::core::changes::StatusUpdate;
use crate::core::request::AuthzRequest;
use crate::core::revision::RevisionMetadata;
use crate::runtime::errors::AuthzError;

// ============================================================================
// SECTION: Decider
// ============================================================================

/// Pure authorization predicate.
pub trait Decider: Send + Sync {
    /// Returns whether the request is allowed. Denial is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`AuthzError::Engine`] when evaluation fails.
    fn check(&self, request: &AuthzRequest) -> Result<bool, AuthzError>;
}

// ============================================================================
// SECTION: Revision Provider
// ============================================================================

/// Revision provider errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RevisionError {
    /// No revision path was configured.
    #[error("revision path is not configured")]
    NotConfigured,
    /// Revision file could not be read.
    #[error("revision io error: {0}")]
    Io(String),
    /// Revision file is not valid JSON.
    #[error("revision parse error: {0}")]
    Parse(String),
    /// Revision field is empty.
    #[error("revision field is empty")]
    EmptyRevision,
}

/// Source of the deployed policy revision.
pub trait RevisionProvider: Send + Sync {
    /// Returns the current revision metadata.
    ///
    /// # Errors
    ///
    /// Returns [`RevisionError`] when the revision cannot be read.
    fn current(&self) -> Result<RevisionMetadata, RevisionError>;
}

// ============================================================================
// SECTION: Policy Change Repository
// ============================================================================

/// Repository errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RepositoryError {
    /// Row does not exist, or a conditional update matched nothing.
    #[error("policy change request not found")]
    NotFound,
    /// Diff is empty or not a JSON patch array.
    #[error("invalid policy diff: {0}")]
    InvalidDiff(String),
    /// Status change is not an edge of the lifecycle graph.
    #[error("invalid status transition: {from} -> {to}")]
    InvalidTransition {
        /// Current status.
        from: PolicyChangeStatus,
        /// Requested status.
        to: PolicyChangeStatus,
    },
    /// Update would break an entity invariant.
    #[error("policy change invariant violated: {0}")]
    Invariant(String),
    /// Backend failure.
    #[error("policy change store error: {0}")]
    Store(String),
}

/// Persistence contract for policy change requests.
///
/// Every mutating call stamps `updated_at` with the store's UTC clock.
pub trait PolicyChangeRepository: Send + Sync {
    /// Inserts a new request and returns the stored row.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::InvalidDiff`] for an empty diff.
    fn create(&self, request: NewPolicyChange) -> Result<PolicyChangeRequest, RepositoryError>;

    /// Loads a request by id.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::NotFound`] when the row does not exist.
    fn get_by_id(&self, id: Uuid) -> Result<PolicyChangeRequest, RepositoryError>;

    /// Lists requests matching `params`.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::Store`] on backend failure.
    fn list(&self, params: &ListParams) -> Result<ListPage, RepositoryError>;

    /// Moves a request along the lifecycle graph.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::NotFound`] or
    /// [`RepositoryError::InvalidTransition`].
    fn update_status(&self, id: Uuid, update: &StatusUpdate) -> Result<(), RepositoryError>;

    /// Updates bot bookkeeping fields; an empty update is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::NotFound`] when the row does not exist.
    fn update_bot_metadata(
        &self,
        id: Uuid,
        update: &BotMetadataUpdate,
    ) -> Result<(), RepositoryError>;

    /// Compare-and-set acquisition of the bot lock.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::Store`] on backend failure.
    fn acquire_bot_lock(&self, id: Uuid, params: &BotLockParams) -> Result<bool, RepositoryError>;

    /// Releases the lock when `locker` owns it.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::NotFound`] when nothing was released.
    fn release_bot_lock(&self, id: Uuid, locker: &str) -> Result<(), RepositoryError>;

    /// Clears the lock unconditionally.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::NotFound`] when the row does not exist.
    fn force_release_bot_lock(&self, id: Uuid) -> Result<(), RepositoryError>;

    /// Records a bot failure: sets `error_log` and moves the row to `failed`.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError`] when either update fails.
    fn fail_request(&self, id: Uuid, message: &str) -> Result<(), RepositoryError> {
        self.update_bot_metadata(
            id,
            &BotMetadataUpdate {
                error_log: FieldUpdate::Value(message.to_string()),
                ..BotMetadataUpdate::default()
            },
        )?;
        self.update_status(id, &StatusUpdate::status(PolicyChangeStatus::Failed))
    }

    /// Records a successful bot run and moves the row to `merged`.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError`] when the row cannot be merged.
    fn complete_merge(&self, id: Uuid, outcome: &MergeOutcome) -> Result<(), RepositoryError>;
}
