// crates/authz-core/src/runtime/drafts.rs
// ============================================================================
// Module: Policy Draft Service
// Description: Host-facing lifecycle operations for policy change requests.
// Purpose: Validate drafts, enforce tenant scoping and drive reviewer transitions.
// Dependencies: crate::interfaces, crate::core::changes, serde_json, time
// ============================================================================

//! ## Overview
//! [`PolicyDraftService`] sits between request handlers and a
//! [`PolicyChangeRepository`]. It owns the rules that the repository does not:
//! required fields, diff shape, base revision freshness, tenant ownership and
//! which reviewer actions are legal from which status.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::PathBuf;
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::core::changes::BotMetadataUpdate;
use crate::core::changes::FieldUpdate;
use crate::core::changes::ListPage;
use crate::core::changes::ListParams;
use crate::core::changes::NewPolicyChange;
use crate::core::changes::PolicyChangeRequest;
use crate::core::changes::PolicyChangeStatus;
use crate::core::changes::StatusUpdate;
use crate::core::identifiers::domain_from_tenant;
use crate::core::identifiers::normalize_action;
use crate::core::identifiers::subject_for_user;
use crate::interfaces::PolicyChangeRepository;
use crate::interfaces::RepositoryError;
use crate::interfaces::RevisionError;
use crate::interfaces::RevisionProvider;
use crate::rules::PolicyEntry;
use crate::rules::PolicyPage;
use crate::rules::PolicyQuery;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default page size for draft listings.
pub const DEFAULT_PAGE_SIZE: usize = 50;
/// Maximum page size for draft listings.
pub const MAX_PAGE_SIZE: usize = 500;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Draft service errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DraftError {
    /// A required input field is blank.
    #[error("policy draft {0} is required")]
    MissingField(&'static str),
    /// Diff is empty or not a JSON array.
    #[error("policy draft diff must be a JSON patch array")]
    InvalidDiff,
    /// Base revision is stale.
    #[error("policy draft base revision is stale: have {current}, request {requested}")]
    RevisionMismatch {
        /// Deployed revision.
        current: String,
        /// Revision supplied by the caller.
        requested: String,
    },
    /// Draft does not exist.
    #[error("policy draft not found")]
    NotFound,
    /// Draft belongs to another tenant.
    #[error("policy draft belongs to a different tenant")]
    TenantMismatch,
    /// Action is not legal from the current status.
    #[error("policy draft status transition not allowed from {0}")]
    InvalidState(PolicyChangeStatus),
    /// Revert requested for a draft without an applied snapshot.
    #[error("policy draft snapshot is not available")]
    MissingSnapshot,
    /// Revision provider failure.
    #[error("policy draft revision error: {0}")]
    Revision(#[from] RevisionError),
    /// Repository failure.
    #[error("policy draft repository error: {0}")]
    Repository(RepositoryError),
    /// Aggregated policy file is not configured or unreadable.
    #[error("policy listing error: {0}")]
    Policies(String),
}

impl From<RepositoryError> for DraftError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound => Self::NotFound,
            other => Self::Repository(other),
        }
    }
}

// ============================================================================
// SECTION: Types
// ============================================================================

/// Input for [`PolicyDraftService::create`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CreateDraftParams {
    /// Requesting user.
    pub requester_id: Uuid,
    /// Object the draft grants access to.
    pub object: String,
    /// Action the draft grants.
    pub action: String,
    /// Free-text justification.
    pub reason: String,
    /// JSON patch against the policy tree.
    pub diff: Value,
    /// Domain; defaults to the tenant's domain.
    pub domain: String,
    /// Subject; defaults to the requester's subject.
    pub subject: String,
    /// Revision the requester saw; empty skips the freshness check.
    pub base_revision: String,
    /// Start in `pending_review` instead of `draft`.
    pub submit: bool,
}

/// Filters for [`PolicyDraftService::list`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListDraftsParams {
    /// Status filter; empty means any.
    pub statuses: Vec<PolicyChangeStatus>,
    /// Requester filter.
    pub requester_id: Option<Uuid>,
    /// Approver filter.
    pub approver_id: Option<Uuid>,
    /// Case-insensitive subject substring.
    pub subject: String,
    /// Exact domain.
    pub domain: String,
    /// Page size; zero selects the default.
    pub limit: usize,
    /// Rows to skip.
    pub offset: usize,
    /// Oldest first when set.
    pub ascending: bool,
}

/// Lifecycle service for policy drafts.
pub struct PolicyDraftService {
    /// Persistence backend.
    repo: Arc<dyn PolicyChangeRepository>,
    /// Deployed revision source.
    revisions: Arc<dyn RevisionProvider>,
    /// Aggregated policy file for listings.
    policy_path: Option<PathBuf>,
}

impl PolicyDraftService {
    /// Creates a service over `repo` and `revisions`.
    #[must_use]
    pub fn new(
        repo: Arc<dyn PolicyChangeRepository>,
        revisions: Arc<dyn RevisionProvider>,
    ) -> Self {
        Self { repo, revisions, policy_path: None }
    }

    /// Sets the aggregated policy file used by [`Self::policies`].
    #[must_use]
    pub fn with_policy_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.policy_path = Some(path.into());
        self
    }

    /// Validates and stores a new draft scoped to `tenant`.
    ///
    /// # Errors
    ///
    /// Returns [`DraftError::MissingField`], [`DraftError::InvalidDiff`],
    /// [`DraftError::RevisionMismatch`], or a revision/repository error.
    pub fn create(
        &self,
        tenant: Uuid,
        params: CreateDraftParams,
    ) -> Result<PolicyChangeRequest, DraftError> {
        if params.requester_id.is_nil() {
            return Err(DraftError::MissingField("requester"));
        }
        let object = params.object.trim();
        if object.is_empty() {
            return Err(DraftError::MissingField("object"));
        }
        if params.action.trim().is_empty() {
            return Err(DraftError::MissingField("action"));
        }
        let diff = normalize_diff(params.diff)?;
        let current = self.revisions.current()?;
        let requested = params.base_revision.trim();
        if !requested.is_empty() && requested != current.revision {
            return Err(DraftError::RevisionMismatch {
                current: current.revision,
                requested: requested.to_string(),
            });
        }
        let domain = if params.domain.trim().is_empty() {
            domain_from_tenant(tenant)
        } else {
            params.domain.trim().to_string()
        };
        let subject = if params.subject.trim().is_empty() {
            subject_for_user(tenant, Some(params.requester_id))
        } else {
            params.subject.trim().to_string()
        };
        let status = if params.submit {
            PolicyChangeStatus::PendingReview
        } else {
            PolicyChangeStatus::Draft
        };
        let created = self.repo.create(NewPolicyChange {
            status,
            requester_id: params.requester_id,
            tenant_id: tenant,
            subject,
            domain,
            action: normalize_action(&params.action),
            object: object.to_string(),
            reason: params.reason.trim().to_string(),
            diff,
            base_policy_revision: current.revision,
        })?;
        Ok(created)
    }

    /// Moves a draft to `pending_review`.
    ///
    /// # Errors
    ///
    /// Returns [`DraftError::InvalidState`] unless the row is a draft.
    pub fn submit(&self, tenant: Uuid, id: Uuid) -> Result<PolicyChangeRequest, DraftError> {
        let current = self.owned(tenant, id)?;
        if current.status != PolicyChangeStatus::Draft {
            return Err(DraftError::InvalidState(current.status));
        }
        self.repo.update_status(id, &StatusUpdate::status(PolicyChangeStatus::PendingReview))?;
        Ok(self.repo.get_by_id(id)?)
    }

    /// Lists drafts for `tenant`.
    ///
    /// # Errors
    ///
    /// Returns [`DraftError::Repository`] on backend failure.
    pub fn list(&self, tenant: Uuid, params: &ListDraftsParams) -> Result<ListPage, DraftError> {
        let list = ListParams {
            statuses: params.statuses.clone(),
            tenant_id: Some(tenant),
            requester_id: params.requester_id,
            approver_id: params.approver_id,
            subject: non_empty(&params.subject),
            domain: non_empty(&params.domain),
            limit: clamp_limit(params.limit),
            offset: params.offset,
            ascending: params.ascending,
        };
        Ok(self.repo.list(&list)?)
    }

    /// Loads a draft owned by `tenant`.
    ///
    /// # Errors
    ///
    /// Returns [`DraftError::NotFound`] or [`DraftError::TenantMismatch`].
    pub fn get(&self, tenant: Uuid, id: Uuid) -> Result<PolicyChangeRequest, DraftError> {
        self.owned(tenant, id)
    }

    /// Approves a pending draft.
    ///
    /// # Errors
    ///
    /// Returns [`DraftError::InvalidState`] unless the row is pending review.
    pub fn approve(
        &self,
        tenant: Uuid,
        id: Uuid,
        approver: Uuid,
    ) -> Result<PolicyChangeRequest, DraftError> {
        self.review(tenant, id, approver, PolicyChangeStatus::Approved)
    }

    /// Rejects a pending draft.
    ///
    /// # Errors
    ///
    /// Returns [`DraftError::InvalidState`] unless the row is pending review.
    pub fn reject(
        &self,
        tenant: Uuid,
        id: Uuid,
        approver: Uuid,
    ) -> Result<PolicyChangeRequest, DraftError> {
        self.review(tenant, id, approver, PolicyChangeStatus::Rejected)
    }

    /// Cancels a draft that has not reached the bot yet.
    ///
    /// # Errors
    ///
    /// Returns [`DraftError::InvalidState`] for rejected, merged, failed or
    /// canceled rows.
    pub fn cancel(&self, tenant: Uuid, id: Uuid) -> Result<PolicyChangeRequest, DraftError> {
        let current = self.owned(tenant, id)?;
        match current.status {
            PolicyChangeStatus::Draft
            | PolicyChangeStatus::PendingReview
            | PolicyChangeStatus::Approved => {}
            status => return Err(DraftError::InvalidState(status)),
        }
        self.repo.update_status(
            id,
            &StatusUpdate {
                status: PolicyChangeStatus::Canceled,
                approver_id: FieldUpdate::Null,
                reviewed_at: FieldUpdate::Value(OffsetDateTime::now_utc()),
            },
        )?;
        Ok(self.repo.get_by_id(id)?)
    }

    /// Records a manual bot trigger and re-arms a failed row.
    ///
    /// # Errors
    ///
    /// Returns [`DraftError::NotFound`] or [`DraftError::TenantMismatch`].
    pub fn trigger_bot(
        &self,
        tenant: Uuid,
        id: Uuid,
        locker: &str,
    ) -> Result<PolicyChangeRequest, DraftError> {
        let current = self.owned(tenant, id)?;
        let locker = locker.trim();
        let update = BotMetadataUpdate {
            bot_attempts: FieldUpdate::Value(current.bot_attempts.saturating_add(1)),
            bot_job_id: if locker.is_empty() {
                FieldUpdate::Unset
            } else {
                FieldUpdate::Value(locker.to_string())
            },
            error_log: FieldUpdate::Null,
            ..BotMetadataUpdate::default()
        };
        self.repo.update_bot_metadata(id, &update)?;
        Ok(self.repo.get_by_id(id)?)
    }

    /// Creates a pending draft that undoes a merged change.
    ///
    /// # Errors
    ///
    /// Returns [`DraftError::MissingSnapshot`] when the source row carries no
    /// applied snapshot.
    pub fn revert(
        &self,
        tenant: Uuid,
        source: Uuid,
        requester: Uuid,
    ) -> Result<PolicyChangeRequest, DraftError> {
        let original = self.owned(tenant, source)?;
        let Some(snapshot) = original.applied_policy_snapshot.filter(|value| !is_empty_json(value))
        else {
            return Err(DraftError::MissingSnapshot);
        };
        self.create(
            tenant,
            CreateDraftParams {
                requester_id: requester,
                object: original.object,
                action: original.action,
                reason: format!("Revert policy change {source}"),
                diff: snapshot,
                domain: original.domain,
                subject: String::new(),
                base_revision: String::new(),
                submit: true,
            },
        )
    }

    /// Lists rows of the aggregated policy file.
    ///
    /// # Errors
    ///
    /// Returns [`DraftError::Policies`] when no policy file is configured or it
    /// cannot be parsed.
    pub fn policies(&self, query: &PolicyQuery) -> Result<PolicyPage, DraftError> {
        let Some(path) = self.policy_path.as_deref() else {
            return Err(DraftError::Policies("policy file path is not configured".to_string()));
        };
        let entries =
            PolicyEntry::load_all(path).map_err(|err| DraftError::Policies(err.to_string()))?;
        Ok(query.apply(&entries))
    }

    /// Shared approve/reject path.
    fn review(
        &self,
        tenant: Uuid,
        id: Uuid,
        approver: Uuid,
        status: PolicyChangeStatus,
    ) -> Result<PolicyChangeRequest, DraftError> {
        let current = self.owned(tenant, id)?;
        if current.status != PolicyChangeStatus::PendingReview {
            return Err(DraftError::InvalidState(current.status));
        }
        self.repo.update_status(
            id,
            &StatusUpdate {
                status,
                approver_id: FieldUpdate::Value(approver),
                reviewed_at: FieldUpdate::Value(OffsetDateTime::now_utc()),
            },
        )?;
        Ok(self.repo.get_by_id(id)?)
    }

    /// Loads a row and checks tenant ownership.
    fn owned(&self, tenant: Uuid, id: Uuid) -> Result<PolicyChangeRequest, DraftError> {
        let request = self.repo.get_by_id(id)?;
        if request.tenant_id != tenant {
            return Err(DraftError::TenantMismatch);
        }
        Ok(request)
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Accepts only non-empty JSON arrays as diffs.
fn normalize_diff(diff: Value) -> Result<Value, DraftError> {
    match diff {
        Value::Array(ops) if !ops.is_empty() => Ok(Value::Array(ops)),
        Value::String(text) => {
            let parsed: Value =
                serde_json::from_str(text.trim()).map_err(|_| DraftError::InvalidDiff)?;
            match parsed {
                Value::Array(ops) if !ops.is_empty() => Ok(Value::Array(ops)),
                _ => Err(DraftError::InvalidDiff),
            }
        }
        _ => Err(DraftError::InvalidDiff),
    }
}

/// Returns true for null, empty arrays and empty objects.
fn is_empty_json(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

/// Clamps a requested page size to `1 ..= MAX_PAGE_SIZE`.
const fn clamp_limit(limit: usize) -> usize {
    if limit == 0 {
        DEFAULT_PAGE_SIZE
    } else if limit > MAX_PAGE_SIZE {
        MAX_PAGE_SIZE
    } else {
        limit
    }
}

/// Maps blank filters to `None`.
fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() { None } else { Some(trimmed.to_string()) }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn diff_must_be_a_non_empty_array() {
        assert_eq!(normalize_diff(json!([])), Err(DraftError::InvalidDiff));
        assert_eq!(normalize_diff(json!({"op": "add"})), Err(DraftError::InvalidDiff));
        assert_eq!(normalize_diff(json!("  ")), Err(DraftError::InvalidDiff));
        let from_text = normalize_diff(json!(r#" [ {"op":"remove","path":"/p/0"} ] "#));
        assert_eq!(from_text, Ok(json!([{"op": "remove", "path": "/p/0"}])));
    }

    #[test]
    fn page_size_is_clamped() {
        assert_eq!(clamp_limit(0), DEFAULT_PAGE_SIZE);
        assert_eq!(clamp_limit(7), 7);
        assert_eq!(clamp_limit(10_000), MAX_PAGE_SIZE);
    }
}
