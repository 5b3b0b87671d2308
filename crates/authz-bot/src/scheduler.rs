// crates/authz-bot/src/scheduler.rs
// ============================================================================
// Module: Bot Scheduler
// Description: Polling loop that turns approved drafts into pull requests.
// Purpose: Apply, validate, commit, push and record one request at a time.
// Dependencies: authz-core, authz-policy-store, time, tokio, tracing
// ============================================================================

//! ## Overview
//! Each iteration picks the oldest eligible request (`approved`, or `failed`
//! with a cleared error log), takes its bot lock, and drives it through:
//!
//! ```text
//! prepare branch -> revision guard -> apply diff -> make authz-pack/test
//!   -> stage/commit/push -> open pull request -> complete merge
//! ```
//!
//! Any stage failure parks the row as `failed` with the message in
//! `error_log`. The feature branch is cleaned up and the lock released on
//! every path. Shutdown interrupts the running stage and leaves the row's
//! status untouched.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use authz_core::PolicyChangeRepository;
use authz_core::PolicyChangeRequest;
use authz_core::PolicyChangeStatus;
use authz_core::RepositoryError;
use authz_core::RevisionMetadata;
use authz_core::RevisionProvider;
use authz_core::core::BotLockParams;
use authz_core::core::BotMetadataUpdate;
use authz_core::core::FieldUpdate;
use authz_core::core::ListParams;
use authz_core::core::MergeOutcome;
use authz_core::core::StatusUpdate;
use authz_policy_store::PolicyStore;
use serde_json::Value;
use time::OffsetDateTime;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;
use uuid::Uuid;

use crate::config::BotConfig;
use crate::error::BotError;
use crate::git::GitWorkspace;
use crate::github::CodeHost;
use crate::github::PullRequestDraft;
use crate::process::Shutdown;
use crate::validate::PolicyValidator;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Locks older than this are treated as abandoned.
pub const LOCK_STALE_AFTER: time::Duration = time::Duration::minutes(5);
/// Candidates fetched per iteration.
const CANDIDATE_LIMIT: usize = 50;
/// Placeholder for a blank reason in the pull request body.
const MISSING_REASON: &str = "(not provided)";

// ============================================================================
// SECTION: Types
// ============================================================================

/// Scheduler settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BotSettings {
    /// Lock owner identity.
    pub locker_id: String,
    /// Delay between iterations.
    pub poll_interval: Duration,
    /// Feature branch prefix.
    pub branch_prefix: String,
    /// Policy fragment directory the diff is applied to.
    pub policy_dir: PathBuf,
    /// Aggregated policy file, staged after validation.
    pub policy_path: PathBuf,
    /// Revision metadata file, staged after validation.
    pub revision_path: PathBuf,
}

impl BotSettings {
    /// Extracts scheduler settings from the full configuration.
    #[must_use]
    pub fn from_config(config: &BotConfig) -> Self {
        Self {
            locker_id: config.locker_id.clone(),
            poll_interval: config.poll_interval,
            branch_prefix: config.branch_prefix.clone(),
            policy_dir: config.policy_dir.clone(),
            policy_path: config.policy_path.clone(),
            revision_path: config.revision_path.clone(),
        }
    }
}

/// Result of one iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IterationOutcome {
    /// No eligible request.
    Idle,
    /// Another worker holds a fresh lock on the request.
    Skipped(Uuid),
    /// The request was merged.
    Merged {
        /// Request id.
        id: Uuid,
        /// Pull request URL.
        pr_link: String,
    },
    /// The request was parked as failed.
    Failed {
        /// Request id.
        id: Uuid,
        /// Message written to `error_log`.
        message: String,
    },
    /// Shutdown interrupted the request; its status is unchanged.
    Cancelled(Uuid),
}

impl IterationOutcome {
    /// Returns a stable label for logs.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Skipped(_) => "skipped",
            Self::Merged { .. } => "merged",
            Self::Failed { .. } => "failed",
            Self::Cancelled(_) => "cancelled",
        }
    }
}

/// Collaborators the scheduler drives.
#[derive(Clone)]
pub struct BotDependencies {
    /// Policy change persistence.
    pub repository: Arc<dyn PolicyChangeRepository>,
    /// Deployed revision source.
    pub revisions: Arc<dyn RevisionProvider>,
    /// Version control.
    pub git: Arc<dyn GitWorkspace>,
    /// Build-and-test gate.
    pub validator: Arc<dyn PolicyValidator>,
    /// Pull request host.
    pub code_host: Arc<dyn CodeHost>,
}

/// Policy bot.
pub struct PolicyBot {
    /// Scheduler settings.
    settings: BotSettings,
    /// Collaborators.
    deps: BotDependencies,
}

// ============================================================================
// SECTION: Scheduler
// ============================================================================

impl PolicyBot {
    /// Creates a bot.
    #[must_use]
    pub const fn new(settings: BotSettings, deps: BotDependencies) -> Self {
        Self { settings, deps }
    }

    /// Polls until shutdown, or runs a single iteration when `once` is set.
    pub async fn run(&self, mut shutdown: Shutdown, once: bool) {
        info!(locker = %self.settings.locker_id, once, "authz bot started");
        loop {
            match self.run_once().await {
                Ok(outcome) => debug!(outcome = outcome.label(), "authz bot iteration finished"),
                Err(err) => error!(error = %err, "authz bot iteration failed"),
            }
            if once || shutdown.is_triggered() {
                break;
            }
            tokio::select! {
                () = tokio::time::sleep(self.settings.poll_interval) => {}
                () = shutdown.triggered() => break,
            }
        }
        info!(locker = %self.settings.locker_id, "authz bot stopped");
    }

    /// Processes at most one eligible request.
    ///
    /// # Errors
    ///
    /// Returns [`BotError`] when the candidate list, the lock or the metadata
    /// bump fails. Pipeline failures are recorded on the row instead.
    pub async fn run_once(&self) -> Result<IterationOutcome, BotError> {
        let Some(request) = self.next_candidate().await? else {
            debug!("no pending drafts found");
            return Ok(IterationOutcome::Idle);
        };
        self.process(request).await
    }

    /// Returns the oldest request the bot may pick up.
    async fn next_candidate(&self) -> Result<Option<PolicyChangeRequest>, BotError> {
        let params = ListParams {
            statuses: vec![PolicyChangeStatus::Approved, PolicyChangeStatus::Failed],
            limit: CANDIDATE_LIMIT,
            ascending: true,
            ..ListParams::default()
        };
        let page = self.repository(move |repository| repository.list(&params)).await?;
        Ok(page.items.into_iter().find(|request| !request.is_parked()))
    }

    /// Locks, processes and unlocks one request.
    async fn process(&self, request: PolicyChangeRequest) -> Result<IterationOutcome, BotError> {
        let id = request.id;
        let now = OffsetDateTime::now_utc();
        let params = BotLockParams {
            locker: self.settings.locker_id.clone(),
            locked_at: now,
            stale_before: now - LOCK_STALE_AFTER,
        };
        let locked = self.repository(move |repository| repository.acquire_bot_lock(id, &params)).await?;
        if !locked {
            debug!(request_id = %id, "unable to acquire lock");
            return Ok(IterationOutcome::Skipped(id));
        }

        let outcome = self.process_locked(&request, now).await;

        let locker = self.settings.locker_id.clone();
        let released = self
            .repository(move |repository| match repository.release_bot_lock(id, &locker) {
                Err(RepositoryError::NotFound) => Ok(()),
                other => other,
            })
            .await;
        if let Err(err) = released {
            warn!(request_id = %id, error = %err, "failed to release bot lock");
        }
        outcome
    }

    /// Runs the pipeline while holding the lock.
    async fn process_locked(
        &self,
        request: &PolicyChangeRequest,
        now: OffsetDateTime,
    ) -> Result<IterationOutcome, BotError> {
        let id = request.id;
        let update = BotMetadataUpdate {
            bot_job_id: FieldUpdate::Value(format!(
                "{}-{}",
                self.settings.locker_id,
                now.unix_timestamp()
            )),
            bot_attempts: FieldUpdate::Value(request.bot_attempts.saturating_add(1)),
            error_log: FieldUpdate::Null,
            ..BotMetadataUpdate::default()
        };
        self.repository(move |repository| repository.update_bot_metadata(id, &update)).await?;
        if request.status == PolicyChangeStatus::Failed {
            self.repository(move |repository| {
                repository.update_status(id, &StatusUpdate::status(PolicyChangeStatus::Approved))
            })
            .await?;
        }

        let branch = format!("{}{id}", self.settings.branch_prefix);
        match self.pipeline(request, &branch).await {
            Ok(pr_link) => {
                info!(request_id = %id, pr = %pr_link, "policy draft submitted");
                Ok(IterationOutcome::Merged { id, pr_link })
            }
            Err(BotError::Cancelled) => {
                warn!(request_id = %id, "policy draft interrupted by shutdown");
                Ok(IterationOutcome::Cancelled(id))
            }
            Err(err) => {
                let message = err.to_string();
                error!(request_id = %id, error = %message, "failed to process draft");
                let log = message.clone();
                if let Err(fail_err) =
                    self.repository(move |repository| repository.fail_request(id, &log)).await
                {
                    error!(request_id = %id, error = %fail_err, "failed to record bot failure");
                }
                Ok(IterationOutcome::Failed { id, message })
            }
        }
    }

    /// Prepares the branch, publishes the change and always cleans up.
    async fn pipeline(&self, request: &PolicyChangeRequest, branch: &str) -> Result<String, BotError> {
        self.deps.git.prepare_branch(branch).await?;
        let result = self.publish(request, branch).await;
        self.deps.git.cleanup_branch(branch).await;
        result
    }

    /// Applies, validates, pushes and records the change on a prepared branch.
    async fn publish(&self, request: &PolicyChangeRequest, branch: &str) -> Result<String, BotError> {
        let id = request.id;
        let current = self.current_revision().await?;
        if !request.base_policy_revision.is_empty() && request.base_policy_revision != current.revision
        {
            return Err(BotError::RevisionMismatch {
                have: current.revision,
                request: request.base_policy_revision.clone(),
            });
        }

        let reverse = self.apply_diff(request.diff.clone()).await?;
        self.deps.validator.validate().await?;
        self.deps
            .git
            .stage(&[
                self.settings.policy_dir.clone(),
                self.settings.policy_path.clone(),
                self.settings.revision_path.clone(),
            ])
            .await?;
        self.deps.git.commit(&format!("chore(authz): apply policy request {id}")).await?;
        self.deps.git.push(branch).await?;

        let draft = PullRequestDraft {
            title: format!("Authz policy update {id}"),
            branch: branch.to_string(),
            body: render_pull_request_body(request),
        };
        let pr_link = self.deps.code_host.open_pull_request(&draft).await?;

        let applied = self.current_revision().await?;
        let outcome = MergeOutcome {
            pr_link: pr_link.clone(),
            applied_policy_revision: applied.revision,
            applied_policy_snapshot: reverse,
        };
        self.repository(move |repository| repository.complete_merge(id, &outcome)).await?;
        Ok(pr_link)
    }

    /// Applies `diff` to the policy directory and returns the reverse patch.
    async fn apply_diff(&self, diff: Value) -> Result<Value, BotError> {
        let dir = self.settings.policy_dir.clone();
        blocking(move || {
            let mut store = PolicyStore::load(dir)?;
            Ok(store.apply(&diff)?)
        })
        .await
    }

    /// Reads the deployed revision.
    async fn current_revision(&self) -> Result<RevisionMetadata, BotError> {
        let revisions = Arc::clone(&self.deps.revisions);
        blocking(move || Ok(revisions.current()?)).await
    }

    /// Runs a repository call on the blocking pool.
    async fn repository<T, F>(&self, op: F) -> Result<T, BotError>
    where
        F: FnOnce(&dyn PolicyChangeRepository) -> Result<T, RepositoryError> + Send + 'static,
        T: Send + 'static,
    {
        let repository = Arc::clone(&self.deps.repository);
        blocking(move || Ok(op(repository.as_ref())?)).await
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Runs `op` on the blocking pool.
async fn blocking<T, F>(op: F) -> Result<T, BotError>
where
    F: FnOnce() -> Result<T, BotError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(op).await.map_err(|err| BotError::Task(err.to_string()))?
}

/// Renders the pull request body for `request`.
#[must_use]
pub fn render_pull_request_body(request: &PolicyChangeRequest) -> String {
    let reason = if request.reason.trim().is_empty() { MISSING_REASON } else { request.reason.as_str() };
    format!(
        "## Policy Draft {}\n\n- Subject: {}\n- Domain: {}\n- Object: {}\n- Action: {}\n- Reason: {}\n- Base Revision: {}\n",
        request.id,
        request.subject,
        request.domain,
        request.object,
        request.action,
        reason,
        request.base_policy_revision,
    )
}
