// crates/authz-bot/src/error.rs
// ============================================================================
// Module: Bot Errors
// Description: Failure taxonomy for one bot iteration.
// Purpose: Collapse every stage failure into the message parked on the row.
// Dependencies: authz-core, authz-policy-store, thiserror
// ============================================================================

//! ## Overview
//! Every stage of the pipeline maps its foreign error into [`BotError`]. The
//! display string is what the scheduler writes into `error_log`, so messages
//! are stable and carry the stage they came from.

// ============================================================================
// SECTION: Imports
// ============================================================================

use authz_core::RepositoryError;
use authz_core::RevisionError;
use authz_policy_store::PolicyStoreError;
use thiserror::Error;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Bot failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BotError {
    /// Environment or startup configuration is invalid.
    #[error("authz bot config error: {0}")]
    Config(String),
    /// A git command failed or the working tree is unusable.
    #[error("git error: {0}")]
    Git(String),
    /// A validation command exited unsuccessfully.
    #[error("validation failed: {0}")]
    Validation(String),
    /// The code host rejected or failed the pull request call.
    #[error("code host error: {0}")]
    CodeHost(String),
    /// Revision metadata could not be read.
    #[error("revision error: {0}")]
    Revision(String),
    /// The request was composed against another revision.
    #[error("base revision mismatch: have {have}, request {request}")]
    RevisionMismatch {
        /// Currently deployed revision.
        have: String,
        /// Revision recorded on the request.
        request: String,
    },
    /// The diff could not be applied to the policy directory.
    #[error("policy apply failed: {0}")]
    PolicyStore(String),
    /// The repository call failed.
    #[error("repository error: {0}")]
    Repository(String),
    /// Shutdown was requested while the iteration was running.
    #[error("bot iteration cancelled")]
    Cancelled,
    /// A blocking task could not be joined.
    #[error("bot task failed: {0}")]
    Task(String),
}

impl From<RepositoryError> for BotError {
    fn from(err: RepositoryError) -> Self {
        Self::Repository(err.to_string())
    }
}

impl From<RevisionError> for BotError {
    fn from(err: RevisionError) -> Self {
        Self::Revision(err.to_string())
    }
}

impl From<PolicyStoreError> for BotError {
    fn from(err: PolicyStoreError) -> Self {
        Self::PolicyStore(err.to_string())
    }
}
