// crates/authz-core/src/core/changes.rs
// ============================================================================
// Module: Policy Change Requests
// Description: Persisted policy-change entity, lifecycle and update params.
// Purpose: Define the state machine shared by the repository, service and bot.
// Dependencies: serde, serde_json, time, uuid
// ============================================================================

//! ## Overview
//! A [`PolicyChangeRequest`] is a persisted intent to modify the rule set.
//! Its status follows a fixed graph:
//!
//! ```text
//! draft -> pending_review -> approved -> merged
//!   |            |              |
//!   |            +-> rejected   +-> failed -> approved
//!   +-> canceled +-> canceled   +-> canceled
//! ```
//!
//! `rejected`, `canceled` and `merged` are terminal. Re-applying the current
//! status is accepted as an idempotent update.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use time::OffsetDateTime;
use uuid::Uuid;

// ============================================================================
// SECTION: Status
// ============================================================================

/// Lifecycle status of a policy change request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyChangeStatus {
    /// Being composed by the requester.
    Draft,
    /// Waiting for a reviewer.
    PendingReview,
    /// Approved and waiting for the bot.
    Approved,
    /// Rejected by a reviewer.
    Rejected,
    /// Applied and proposed as a pull request.
    Merged,
    /// Bot processing failed; recoverable.
    Failed,
    /// Withdrawn.
    Canceled,
}

impl PolicyChangeStatus {
    /// All statuses in lifecycle order.
    pub const ALL: [Self; 7] = [
        Self::Draft,
        Self::PendingReview,
        Self::Approved,
        Self::Rejected,
        Self::Merged,
        Self::Failed,
        Self::Canceled,
    ];

    /// Returns the canonical label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::PendingReview => "pending_review",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Merged => "merged",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
        }
    }

    /// Parses a canonical label.
    #[must_use]
    pub fn parse(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|status| status.as_str() == label)
    }

    /// Returns true for statuses with no outgoing transitions.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Rejected | Self::Canceled | Self::Merged)
    }

    /// Returns true when moving from `self` to `next` is legal.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        if self as u8 == next as u8 {
            return true;
        }
        matches!(
            (self, next),
            (Self::Draft, Self::PendingReview | Self::Canceled)
                | (Self::PendingReview, Self::Approved | Self::Rejected | Self::Canceled)
                | (Self::Approved, Self::Merged | Self::Failed | Self::Canceled)
                | (Self::Failed, Self::Approved)
        )
    }
}

impl fmt::Display for PolicyChangeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// SECTION: Entity
// ============================================================================

/// Persisted policy change request.
///
/// # Invariants
/// - `applied_policy_revision` is set iff `status` is `merged`.
/// - `bot_lock` set implies `bot_locked_at` set.
/// - `diff` is a non-empty JSON patch array.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyChangeRequest {
    /// Store-assigned identifier.
    pub id: Uuid,
    /// Lifecycle status.
    pub status: PolicyChangeStatus,
    /// Requesting user.
    pub requester_id: Uuid,
    /// Reviewing user.
    pub approver_id: Option<Uuid>,
    /// Owning tenant.
    pub tenant_id: Uuid,
    /// Subject the change targets.
    pub subject: String,
    /// Domain the change targets.
    pub domain: String,
    /// Action the change targets.
    pub action: String,
    /// Object the change targets.
    pub object: String,
    /// Free-form justification.
    pub reason: String,
    /// JSON patch against the policy tree.
    pub diff: Value,
    /// Revision the requester composed the diff against.
    pub base_policy_revision: String,
    /// Revision produced by the bot.
    pub applied_policy_revision: Option<String>,
    /// Reverse patch recorded by the bot.
    pub applied_policy_snapshot: Option<Value>,
    /// Pull request URL.
    pub pr_link: Option<String>,
    /// Current lock holder.
    pub bot_lock: Option<String>,
    /// Lock acquisition time.
    #[serde(with = "time::serde::rfc3339::option")]
    pub bot_locked_at: Option<OffsetDateTime>,
    /// Number of bot attempts.
    pub bot_attempts: u32,
    /// Last bot failure.
    pub error_log: Option<String>,
    /// Last bot job identifier.
    pub bot_job_id: Option<String>,
    /// Creation time.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    /// Last mutation time.
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    /// Review time.
    #[serde(with = "time::serde::rfc3339::option")]
    pub reviewed_at: Option<OffsetDateTime>,
}

impl PolicyChangeRequest {
    /// Returns true when a failed row still carries an error log.
    #[must_use]
    pub fn is_parked(&self) -> bool {
        self.status == PolicyChangeStatus::Failed
            && self.error_log.as_deref().is_some_and(|log| !log.trim().is_empty())
    }
}

/// Input for creating a policy change request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPolicyChange {
    /// Initial status (`draft` or `pending_review`).
    pub status: PolicyChangeStatus,
    /// Requesting user.
    pub requester_id: Uuid,
    /// Owning tenant.
    pub tenant_id: Uuid,
    /// Subject the change targets.
    pub subject: String,
    /// Domain the change targets.
    pub domain: String,
    /// Action the change targets.
    pub action: String,
    /// Object the change targets.
    pub object: String,
    /// Free-form justification.
    pub reason: String,
    /// JSON patch against the policy tree.
    pub diff: Value,
    /// Revision the requester composed the diff against.
    pub base_policy_revision: String,
}

// ============================================================================
// SECTION: Update Parameters
// ============================================================================

/// Tri-state field update.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum FieldUpdate<T> {
    /// Leave the column unchanged.
    #[default]
    Unset,
    /// Set the column to NULL.
    Null,
    /// Set the column to a value.
    Value(T),
}

impl<T> FieldUpdate<T> {
    /// Returns true when the field is left unchanged.
    #[must_use]
    pub const fn is_unset(&self) -> bool {
        matches!(self, Self::Unset)
    }

    /// Returns the new column value, `None` meaning NULL, or `None` outer when unset.
    #[must_use]
    pub const fn as_change(&self) -> Option<Option<&T>> {
        match self {
            Self::Unset => None,
            Self::Null => Some(None),
            Self::Value(value) => Some(Some(value)),
        }
    }
}

/// Status update parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdate {
    /// Target status.
    pub status: PolicyChangeStatus,
    /// Approver change.
    pub approver_id: FieldUpdate<Uuid>,
    /// Review time change.
    pub reviewed_at: FieldUpdate<OffsetDateTime>,
}

impl StatusUpdate {
    /// Builds an update that only changes the status.
    #[must_use]
    pub const fn status(status: PolicyChangeStatus) -> Self {
        Self { status, approver_id: FieldUpdate::Unset, reviewed_at: FieldUpdate::Unset }
    }
}

/// Bot metadata update parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BotMetadataUpdate {
    /// Bot job identifier.
    pub bot_job_id: FieldUpdate<String>,
    /// Attempt counter.
    pub bot_attempts: FieldUpdate<u32>,
    /// Error log.
    pub error_log: FieldUpdate<String>,
    /// Pull request URL.
    pub pr_link: FieldUpdate<String>,
    /// Applied revision.
    pub applied_policy_revision: FieldUpdate<String>,
    /// Reverse patch snapshot.
    pub applied_policy_snapshot: FieldUpdate<Value>,
}

impl BotMetadataUpdate {
    /// Returns true when no field is set.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.bot_job_id.is_unset()
            && self.bot_attempts.is_unset()
            && self.error_log.is_unset()
            && self.pr_link.is_unset()
            && self.applied_policy_revision.is_unset()
            && self.applied_policy_snapshot.is_unset()
    }
}

/// Result recorded when the bot finishes a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOutcome {
    /// Pull request URL.
    pub pr_link: String,
    /// Revision produced by the change.
    pub applied_policy_revision: String,
    /// Reverse patch for rollback.
    pub applied_policy_snapshot: Value,
}

/// Bot lock acquisition parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BotLockParams {
    /// Locker identity.
    pub locker: String,
    /// Acquisition time.
    pub locked_at: OffsetDateTime,
    /// Locks acquired before this instant are considered stale.
    pub stale_before: OffsetDateTime,
}

/// Listing filters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListParams {
    /// Allowed statuses; empty means all.
    pub statuses: Vec<PolicyChangeStatus>,
    /// Tenant filter.
    pub tenant_id: Option<Uuid>,
    /// Requester filter.
    pub requester_id: Option<Uuid>,
    /// Approver filter.
    pub approver_id: Option<Uuid>,
    /// Case-insensitive subject substring.
    pub subject: Option<String>,
    /// Exact domain filter.
    pub domain: Option<String>,
    /// Page size; zero means no limit.
    pub limit: usize,
    /// Rows to skip.
    pub offset: usize,
    /// Ascending `updated_at` order when true.
    pub ascending: bool,
}

impl Default for ListParams {
    fn default() -> Self {
        Self {
            statuses: Vec::new(),
            tenant_id: None,
            requester_id: None,
            approver_id: None,
            subject: None,
            domain: None,
            limit: 0,
            offset: 0,
            ascending: false,
        }
    }
}

/// One page of policy change requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListPage {
    /// Rows on this page.
    pub items: Vec<PolicyChangeRequest>,
    /// Total matching rows.
    pub total: usize,
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_graph_matches_documented_edges() {
        use PolicyChangeStatus::*;
        assert!(Draft.can_transition_to(PendingReview));
        assert!(Approved.can_transition_to(Failed));
        assert!(Failed.can_transition_to(Approved));
        assert!(!Failed.can_transition_to(Merged));
        assert!(!Draft.can_transition_to(Approved));
        assert!(!Rejected.can_transition_to(Approved));
        assert!(!Merged.can_transition_to(Failed));
        assert!(Merged.can_transition_to(Merged));
        for status in PolicyChangeStatus::ALL {
            assert_eq!(PolicyChangeStatus::parse(status.as_str()), Some(status));
        }
    }

    #[test]
    fn empty_metadata_update_is_detected() {
        assert!(BotMetadataUpdate::default().is_empty());
        let update =
            BotMetadataUpdate { error_log: FieldUpdate::Null, ..BotMetadataUpdate::default() };
        assert!(!update.is_empty());
    }
}
