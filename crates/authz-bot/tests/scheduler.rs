// crates/authz-bot/tests/scheduler.rs
// ============================================================================
// Module: Bot Scheduler Tests
// Description: Run bot iterations against a real repository and policy tree.
// Purpose: Validate merge, park, skip and shutdown paths end to end.
// Dependencies: authz-bot, authz-core, authz-store-sqlite, serde_json, tempfile, tokio
// ============================================================================

//! ## Overview
//! Git, the make gate and the code host are replaced by recording fakes. The
//! repository is a real SQLite store and the policy directory is real, so the
//! reverse patch and revision bookkeeping are exercised for real.

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    clippy::missing_docs_in_private_items,
    reason = "Test-only assertions and helpers are permitted."
)]

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use authz_bot::BotDependencies;
use authz_bot::BotError;
use authz_bot::BotSettings;
use authz_bot::CodeHost;
use authz_bot::GitWorkspace;
use authz_bot::IterationOutcome;
use authz_bot::PolicyBot;
use authz_bot::PolicyValidator;
use authz_bot::PullRequestDraft;
use authz_bot::Shutdown;
use authz_bot::scheduler::render_pull_request_body;
use authz_bot::shutdown_channel;
use authz_core::PolicyChangeRepository;
use authz_core::PolicyChangeStatus;
use authz_core::core::BotLockParams;
use authz_core::core::BotMetadataUpdate;
use authz_core::core::FieldUpdate;
use authz_core::core::NewPolicyChange;
use authz_core::core::StatusUpdate;
use authz_core::runtime::FileRevisionProvider;
use authz_store_sqlite::SqlitePolicyChangeStore;
use authz_store_sqlite::SqliteStoreConfig;
use serde_json::json;
use tempfile::TempDir;
use time::OffsetDateTime;
use uuid::Uuid;

// ============================================================================
// SECTION: Fakes
// ============================================================================

#[derive(Default)]
struct FakeGit {
    log: Mutex<Vec<String>>,
    prepare_failure: Option<BotError>,
}

impl FakeGit {
    fn record(&self, entry: String) {
        self.log.lock().unwrap().push(entry);
    }

    fn entries(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }
}

#[async_trait]
impl GitWorkspace for FakeGit {
    async fn prepare_branch(&self, branch: &str) -> Result<(), BotError> {
        self.record(format!("prepare {branch}"));
        self.prepare_failure.clone().map_or(Ok(()), Err)
    }

    async fn cleanup_branch(&self, branch: &str) {
        self.record(format!("cleanup {branch}"));
    }

    async fn stage(&self, paths: &[PathBuf]) -> Result<(), BotError> {
        self.record(format!("stage {}", paths.len()));
        Ok(())
    }

    async fn commit(&self, message: &str) -> Result<(), BotError> {
        self.record(format!("commit {message}"));
        Ok(())
    }

    async fn push(&self, branch: &str) -> Result<(), BotError> {
        self.record(format!("push {branch}"));
        Ok(())
    }
}

/// Stands in for `make authz-pack`/`authz-test`: rewrites the revision file.
struct FakeValidator {
    revision_path: PathBuf,
    failure: Option<String>,
}

#[async_trait]
impl PolicyValidator for FakeValidator {
    async fn validate(&self) -> Result<(), BotError> {
        if let Some(message) = &self.failure {
            return Err(BotError::Validation(message.clone()));
        }
        fs::write(&self.revision_path, r#"{"revision":"rev-2-packed","entries":2}"#).unwrap();
        Ok(())
    }
}

#[derive(Default)]
struct FakeHost {
    drafts: Mutex<Vec<PullRequestDraft>>,
}

#[async_trait]
impl CodeHost for FakeHost {
    async fn open_pull_request(&self, draft: &PullRequestDraft) -> Result<String, BotError> {
        let mut drafts = self.drafts.lock().unwrap();
        drafts.push(draft.clone());
        Ok(format!("https://github.test/acme/platform/pull/{}", drafts.len()))
    }
}

// ============================================================================
// SECTION: Harness
// ============================================================================

const SEED_POLICY: &str = "p, role:admin, global, core.users, list\n";

struct Harness {
    temp: TempDir,
    store: Arc<SqlitePolicyChangeStore>,
    git: Arc<FakeGit>,
    host: Arc<FakeHost>,
    bot: PolicyBot,
}

impl Harness {
    fn policy_file(&self) -> PathBuf {
        self.temp.path().join("config/access/policies/core/global.csv")
    }

    fn revision_file(&self) -> PathBuf {
        self.temp.path().join("config/access/policy.csv.rev")
    }
}

fn harness(git: FakeGit, validation_failure: Option<&str>) -> Harness {
    let temp = TempDir::new().unwrap();
    let access = temp.path().join("config/access");
    fs::create_dir_all(access.join("policies/core")).unwrap();
    fs::write(access.join("policies/core/global.csv"), SEED_POLICY).unwrap();
    fs::write(access.join("policy.csv.rev"), r#"{"revision":"rev-1","entries":1}"#).unwrap();

    let store = Arc::new(
        SqlitePolicyChangeStore::new(&SqliteStoreConfig::new(temp.path().join("changes.sqlite3"))).unwrap(),
    );
    let git = Arc::new(git);
    let host = Arc::new(FakeHost::default());
    let settings = BotSettings {
        locker_id: "worker-1".to_string(),
        poll_interval: Duration::from_millis(10),
        branch_prefix: "authz/bot/".to_string(),
        policy_dir: access.join("policies"),
        policy_path: access.join("policy.csv"),
        revision_path: access.join("policy.csv.rev"),
    };
    let deps = BotDependencies {
        repository: Arc::clone(&store) as Arc<dyn PolicyChangeRepository>,
        revisions: Arc::new(FileRevisionProvider::new(access.join("policy.csv.rev"))),
        git: Arc::clone(&git) as Arc<dyn GitWorkspace>,
        validator: Arc::new(FakeValidator {
            revision_path: access.join("policy.csv.rev"),
            failure: validation_failure.map(str::to_string),
        }),
        code_host: Arc::clone(&host) as Arc<dyn CodeHost>,
    };
    let bot = PolicyBot::new(settings, deps);
    Harness { temp, store, git, host, bot }
}

fn approved_request(store: &SqlitePolicyChangeStore, base_revision: &str, reason: &str) -> Uuid {
    let created = store
        .create(NewPolicyChange {
            status: PolicyChangeStatus::PendingReview,
            requester_id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            subject: "role:admin".to_string(),
            domain: "global".to_string(),
            action: "edit".to_string(),
            object: "core.users".to_string(),
            reason: reason.to_string(),
            diff: json!([{"op": "add", "path": "/p/-", "value": ["role:admin", "global", "core.users", "edit"]}]),
            base_policy_revision: base_revision.to_string(),
        })
        .unwrap();
    store.update_status(created.id, &StatusUpdate::status(PolicyChangeStatus::Approved)).unwrap();
    created.id
}

fn read(path: &Path) -> String {
    fs::read_to_string(path).unwrap()
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[tokio::test]
async fn approved_request_is_merged_with_reverse_snapshot() {
    let h = harness(FakeGit::default(), None);
    let id = approved_request(&h.store, "rev-1", "  ");

    let outcome = h.bot.run_once().await.unwrap();
    let pr_link = "https://github.test/acme/platform/pull/1".to_string();
    assert_eq!(outcome, IterationOutcome::Merged { id, pr_link: pr_link.clone() });

    let row = h.store.get_by_id(id).unwrap();
    assert_eq!(row.status, PolicyChangeStatus::Merged);
    assert_eq!(row.pr_link.as_deref(), Some(pr_link.as_str()));
    assert_eq!(row.applied_policy_revision.as_deref(), Some("rev-2-packed"));
    assert_eq!(row.applied_policy_snapshot, Some(json!([{"op": "remove", "path": "/p/0"}])));
    assert_eq!(row.bot_lock, None);
    assert_eq!(row.bot_locked_at, None);
    assert_eq!(row.bot_attempts, 1);
    assert_eq!(row.error_log, None);
    assert!(row.bot_job_id.unwrap().starts_with("worker-1-"));

    let branch = format!("authz/bot/{id}");
    assert_eq!(
        h.git.entries(),
        vec![
            format!("prepare {branch}"),
            "stage 3".to_string(),
            format!("commit chore(authz): apply policy request {id}"),
            format!("push {branch}"),
            format!("cleanup {branch}"),
        ]
    );
    let drafts = h.host.drafts.lock().unwrap().clone();
    assert_eq!(drafts.len(), 1);
    assert_eq!(drafts[0].title, format!("Authz policy update {id}"));
    assert_eq!(drafts[0].branch, branch);
    assert!(drafts[0].body.contains("- Reason: (not provided)"));
    assert_eq!(
        read(&h.policy_file()),
        "p, role:admin, global, core.users, edit\np, role:admin, global, core.users, list\n"
    );

    assert_eq!(h.bot.run_once().await.unwrap(), IterationOutcome::Idle);
}

#[tokio::test]
async fn base_revision_mismatch_parks_the_request_until_cleared() {
    let h = harness(FakeGit::default(), None);
    fs::write(h.revision_file(), r#"{"revision":"rev-new","entries":2}"#).unwrap();
    let id = approved_request(&h.store, "rev-old", "grant edit");

    let message = "base revision mismatch: have rev-new, request rev-old".to_string();
    assert_eq!(h.bot.run_once().await.unwrap(), IterationOutcome::Failed { id, message: message.clone() });

    let row = h.store.get_by_id(id).unwrap();
    assert_eq!(row.status, PolicyChangeStatus::Failed);
    assert_eq!(row.error_log.as_deref(), Some(message.as_str()));
    assert_eq!(row.bot_lock, None);
    assert!(row.is_parked());
    let branch = format!("authz/bot/{id}");
    assert_eq!(h.git.entries(), vec![format!("prepare {branch}"), format!("cleanup {branch}")]);
    assert!(h.host.drafts.lock().unwrap().is_empty());
    assert_eq!(read(&h.policy_file()), SEED_POLICY);

    assert_eq!(h.bot.run_once().await.unwrap(), IterationOutcome::Idle);

    fs::write(h.revision_file(), r#"{"revision":"rev-old","entries":10}"#).unwrap();
    h.store
        .update_bot_metadata(id, &BotMetadataUpdate { error_log: FieldUpdate::Null, ..BotMetadataUpdate::default() })
        .unwrap();
    let outcome = h.bot.run_once().await.unwrap();
    assert!(matches!(outcome, IterationOutcome::Merged { id: merged, .. } if merged == id));
    let row = h.store.get_by_id(id).unwrap();
    assert_eq!(row.status, PolicyChangeStatus::Merged);
    assert_eq!(row.bot_attempts, 2);
}

#[tokio::test]
async fn validation_failure_parks_the_request_and_cleans_up() {
    let h = harness(FakeGit::default(), Some("make authz-test exited with status 2"));
    let id = approved_request(&h.store, "", "grant edit");

    let outcome = h.bot.run_once().await.unwrap();
    assert_eq!(
        outcome,
        IterationOutcome::Failed {
            id,
            message: "validation failed: make authz-test exited with status 2".to_string()
        }
    );
    let branch = format!("authz/bot/{id}");
    assert_eq!(h.git.entries(), vec![format!("prepare {branch}"), format!("cleanup {branch}")]);
    let row = h.store.get_by_id(id).unwrap();
    assert_eq!(row.status, PolicyChangeStatus::Failed);
    assert_eq!(row.applied_policy_revision, None);
    assert_eq!(row.bot_lock, None);
}

#[tokio::test]
async fn fresh_foreign_lock_skips_the_request() {
    let h = harness(FakeGit::default(), None);
    let id = approved_request(&h.store, "rev-1", "grant edit");
    let now = OffsetDateTime::now_utc();
    assert!(h
        .store
        .acquire_bot_lock(
            id,
            &BotLockParams {
                locker: "worker-2".to_string(),
                locked_at: now,
                stale_before: now - time::Duration::minutes(5),
            },
        )
        .unwrap());

    assert_eq!(h.bot.run_once().await.unwrap(), IterationOutcome::Skipped(id));
    let row = h.store.get_by_id(id).unwrap();
    assert_eq!(row.status, PolicyChangeStatus::Approved);
    assert_eq!(row.bot_lock.as_deref(), Some("worker-2"));
    assert_eq!(row.bot_attempts, 0);
    assert!(h.git.entries().is_empty());
}

#[tokio::test]
async fn cancelled_iteration_leaves_status_untouched() {
    let git = FakeGit { prepare_failure: Some(BotError::Cancelled), ..FakeGit::default() };
    let h = harness(git, None);
    let id = approved_request(&h.store, "rev-1", "grant edit");

    assert_eq!(h.bot.run_once().await.unwrap(), IterationOutcome::Cancelled(id));
    let row = h.store.get_by_id(id).unwrap();
    assert_eq!(row.status, PolicyChangeStatus::Approved);
    assert_eq!(row.error_log, None);
    assert_eq!(row.bot_lock, None);
    assert_eq!(row.bot_attempts, 1);
}

#[tokio::test]
async fn dirty_tree_is_recorded_on_the_request() {
    let git = FakeGit {
        prepare_failure: Some(BotError::Git("working tree is dirty".to_string())),
        ..FakeGit::default()
    };
    let h = harness(git, None);
    let id = approved_request(&h.store, "rev-1", "grant edit");

    let outcome = h.bot.run_once().await.unwrap();
    assert_eq!(outcome, IterationOutcome::Failed { id, message: "git error: working tree is dirty".to_string() });
    assert_eq!(h.git.entries(), vec![format!("prepare authz/bot/{id}")]);
}

#[tokio::test]
async fn run_loop_honours_once_and_shutdown() {
    let h = harness(FakeGit::default(), None);
    let first = approved_request(&h.store, "rev-1", "grant edit");
    h.bot.run(Shutdown::never(), true).await;
    assert_eq!(h.store.get_by_id(first).unwrap().status, PolicyChangeStatus::Merged);

    let second = approved_request(&h.store, "", "grant edit");
    let (trigger, shutdown) = shutdown_channel();
    trigger.trigger();
    h.bot.run(shutdown, false).await;
    assert_eq!(h.store.get_by_id(second).unwrap().status, PolicyChangeStatus::Merged);
}

#[test]
fn pull_request_body_lists_the_request() {
    let h = harness(FakeGit::default(), None);
    let id = approved_request(&h.store, "rev-1", "grant edit");
    let request = h.store.get_by_id(id).unwrap();
    assert_eq!(
        render_pull_request_body(&request),
        format!(
            "## Policy Draft {id}\n\n- Subject: role:admin\n- Domain: global\n- Object: core.users\n- Action: edit\n- Reason: grant edit\n- Base Revision: rev-1\n"
        )
    );
}
