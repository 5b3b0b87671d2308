// crates/authz-store-sqlite/tests/sqlite_store.rs
// ============================================================================
// Module: SQLite Store Tests
// Description: Validate the SQLite PolicyChangeRepository.
// Purpose: Ensure lifecycle rules, bot lock CAS and listing hold on disk.
// Dependencies: authz-store-sqlite, authz-core, proptest, serde_json, tempfile
// ============================================================================

//! ## Overview
//! Conformance tests for the SQLite-backed policy change repository,
//! including concurrent lock acquisition and ambient transactions.

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

use std::sync::Arc;
use std::sync::Barrier;
use std::thread;
use std::time::Duration;

use authz_core::PolicyChangeRepository;
use authz_core::PolicyChangeStatus;
use authz_core::RepositoryError;
use authz_core::core::BotLockParams;
use authz_core::core::BotMetadataUpdate;
use authz_core::core::FieldUpdate;
use authz_core::core::ListParams;
use authz_core::core::MergeOutcome;
use authz_core::core::NewPolicyChange;
use authz_core::core::PolicyChangeRequest;
use authz_core::core::StatusUpdate;
use authz_store_sqlite::SqlitePolicyChangeStore;
use authz_store_sqlite::SqliteStoreConfig;
use authz_store_sqlite::SqliteStoreError;
use proptest::prelude::*;
use serde_json::json;
use tempfile::TempDir;
use time::OffsetDateTime;
use uuid::Uuid;

// ============================================================================
// SECTION: Helpers
// ============================================================================

fn open_store(temp: &TempDir) -> SqlitePolicyChangeStore {
    SqlitePolicyChangeStore::new(&SqliteStoreConfig::new(temp.path().join("changes.sqlite3")))
        .expect("store init")
}

fn new_change(tenant: Uuid, subject: &str) -> NewPolicyChange {
    NewPolicyChange {
        status: PolicyChangeStatus::PendingReview,
        requester_id: Uuid::new_v4(),
        tenant_id: tenant,
        subject: subject.to_string(),
        domain: "global".to_string(),
        action: "edit".to_string(),
        object: "core.users".to_string(),
        reason: String::new(),
        diff: json!([{"op": "add", "path": "/p/-", "value": [subject, "global", "core.users", "edit"]}]),
        base_policy_revision: "rev-1".to_string(),
    }
}

fn approved(store: &SqlitePolicyChangeStore, tenant: Uuid) -> PolicyChangeRequest {
    let created = store.create(new_change(tenant, "role:editor")).unwrap();
    store
        .update_status(created.id, &StatusUpdate::status(PolicyChangeStatus::Approved))
        .unwrap();
    store.get_by_id(created.id).unwrap()
}

fn lock_params(locker: &str, locked_at: OffsetDateTime) -> BotLockParams {
    BotLockParams {
        locker: locker.to_string(),
        locked_at,
        stale_before: OffsetDateTime::now_utc() - time::Duration::minutes(5),
    }
}

// ============================================================================
// SECTION: Create and Read
// ============================================================================

#[test]
fn create_assigns_identity_and_canonicalizes_blanks() {
    let temp = TempDir::new().unwrap();
    let store = open_store(&temp);
    let tenant = Uuid::new_v4();
    let created = store.create(new_change(tenant, "role:editor")).unwrap();

    assert!(!created.id.is_nil());
    assert_eq!(created.status, PolicyChangeStatus::PendingReview);
    assert_eq!(created.created_at, created.updated_at);
    assert_eq!(created.reason, "");
    assert_eq!(created.bot_attempts, 0);
    assert_eq!(created.applied_policy_revision, None);
    assert_eq!(store.get_by_id(created.id).unwrap(), created);
}

#[test]
fn create_rejects_empty_or_non_array_diff() {
    let temp = TempDir::new().unwrap();
    let store = open_store(&temp);
    let mut change = new_change(Uuid::new_v4(), "role:editor");
    change.diff = json!([]);
    assert!(matches!(store.create(change.clone()), Err(RepositoryError::InvalidDiff(_))));
    change.diff = json!({"op": "add"});
    assert!(matches!(store.create(change), Err(RepositoryError::InvalidDiff(_))));
    assert_eq!(store.list(&ListParams::default()).unwrap().total, 0);
}

#[test]
fn unknown_id_is_not_found() {
    let temp = TempDir::new().unwrap();
    let store = open_store(&temp);
    let id = Uuid::new_v4();
    assert_eq!(store.get_by_id(id), Err(RepositoryError::NotFound));
    assert_eq!(
        store.update_status(id, &StatusUpdate::status(PolicyChangeStatus::Approved)),
        Err(RepositoryError::NotFound)
    );
    assert_eq!(store.force_release_bot_lock(id), Err(RepositoryError::NotFound));
}

#[test]
fn rows_survive_reopen() {
    let temp = TempDir::new().unwrap();
    let id = {
        let store = open_store(&temp);
        store.create(new_change(Uuid::new_v4(), "role:editor")).unwrap().id
    };
    let store = open_store(&temp);
    assert_eq!(store.get_by_id(id).unwrap().object, "core.users");
}

#[test]
fn directory_path_is_rejected() {
    let temp = TempDir::new().unwrap();
    let result = SqlitePolicyChangeStore::new(&SqliteStoreConfig::new(temp.path()));
    assert!(matches!(result, Err(SqliteStoreError::Invalid(_))));
}

// ============================================================================
// SECTION: Lifecycle
// ============================================================================

#[test]
fn status_updates_follow_the_lifecycle_graph() {
    let temp = TempDir::new().unwrap();
    let store = open_store(&temp);
    let created = store.create(new_change(Uuid::new_v4(), "role:editor")).unwrap();
    let reviewer = Uuid::new_v4();
    let reviewed_at = OffsetDateTime::now_utc();

    assert_eq!(
        store.update_status(created.id, &StatusUpdate::status(PolicyChangeStatus::Merged)),
        Err(RepositoryError::InvalidTransition {
            from: PolicyChangeStatus::PendingReview,
            to: PolicyChangeStatus::Merged,
        })
    );
    store
        .update_status(
            created.id,
            &StatusUpdate {
                status: PolicyChangeStatus::Rejected,
                approver_id: FieldUpdate::Value(reviewer),
                reviewed_at: FieldUpdate::Value(reviewed_at),
            },
        )
        .unwrap();
    let rejected = store.get_by_id(created.id).unwrap();
    assert_eq!(rejected.status, PolicyChangeStatus::Rejected);
    assert_eq!(rejected.approver_id, Some(reviewer));
    assert_eq!(
        rejected.reviewed_at.map(|at| at.unix_timestamp()),
        Some(reviewed_at.unix_timestamp())
    );
    assert!(rejected.updated_at >= created.updated_at);
    assert!(matches!(
        store.update_status(created.id, &StatusUpdate::status(PolicyChangeStatus::Approved)),
        Err(RepositoryError::InvalidTransition { .. })
    ));
}

#[test]
fn merged_requires_an_applied_revision() {
    let temp = TempDir::new().unwrap();
    let store = open_store(&temp);
    let row = approved(&store, Uuid::new_v4());
    assert!(matches!(
        store.update_status(row.id, &StatusUpdate::status(PolicyChangeStatus::Merged)),
        Err(RepositoryError::Invariant(_))
    ));
    let revision_first = BotMetadataUpdate {
        applied_policy_revision: FieldUpdate::Value("rev-2".to_string()),
        ..BotMetadataUpdate::default()
    };
    assert!(matches!(
        store.update_bot_metadata(row.id, &revision_first),
        Err(RepositoryError::Invariant(_))
    ));

    store
        .complete_merge(
            row.id,
            &MergeOutcome {
                pr_link: "https://example.test/pull/1".to_string(),
                applied_policy_revision: "rev-2".to_string(),
                applied_policy_snapshot: json!([{"op": "remove", "path": "/p/1"}]),
            },
        )
        .unwrap();
    let merged = store.get_by_id(row.id).unwrap();
    assert_eq!(merged.status, PolicyChangeStatus::Merged);
    assert_eq!(merged.applied_policy_revision.as_deref(), Some("rev-2"));
    assert_eq!(merged.pr_link.as_deref(), Some("https://example.test/pull/1"));
    assert_eq!(merged.applied_policy_snapshot, Some(json!([{"op": "remove", "path": "/p/1"}])));
    assert!(matches!(
        store.fail_request(row.id, "late failure"),
        Err(RepositoryError::InvalidTransition { .. })
    ));
}

#[test]
fn fail_request_sets_log_and_status_together() {
    let temp = TempDir::new().unwrap();
    let store = open_store(&temp);
    let row = approved(&store, Uuid::new_v4());
    store.fail_request(row.id, "make authz-test exited with status 2").unwrap();
    let failed = store.get_by_id(row.id).unwrap();
    assert_eq!(failed.status, PolicyChangeStatus::Failed);
    assert_eq!(failed.error_log.as_deref(), Some("make authz-test exited with status 2"));
    assert!(failed.is_parked());

    let pending = store.create(new_change(Uuid::new_v4(), "role:viewer")).unwrap();
    assert!(matches!(
        store.fail_request(pending.id, "boom"),
        Err(RepositoryError::InvalidTransition { .. })
    ));
    assert_eq!(store.get_by_id(pending.id).unwrap().error_log, None);
}

#[test]
fn bot_metadata_fields_are_tri_state() {
    let temp = TempDir::new().unwrap();
    let store = open_store(&temp);
    let row = approved(&store, Uuid::new_v4());
    store.update_bot_metadata(row.id, &BotMetadataUpdate::default()).unwrap();
    assert_eq!(store.get_by_id(row.id).unwrap().updated_at, row.updated_at);

    store
        .update_bot_metadata(
            row.id,
            &BotMetadataUpdate {
                bot_job_id: FieldUpdate::Value("bot-a-1700000000".to_string()),
                bot_attempts: FieldUpdate::Value(3),
                error_log: FieldUpdate::Value("boom".to_string()),
                ..BotMetadataUpdate::default()
            },
        )
        .unwrap();
    store
        .update_bot_metadata(
            row.id,
            &BotMetadataUpdate {
                error_log: FieldUpdate::Null,
                pr_link: FieldUpdate::Value(String::new()),
                ..BotMetadataUpdate::default()
            },
        )
        .unwrap();
    let updated = store.get_by_id(row.id).unwrap();
    assert_eq!(updated.bot_job_id.as_deref(), Some("bot-a-1700000000"));
    assert_eq!(updated.bot_attempts, 3);
    assert_eq!(updated.error_log, None);
    assert_eq!(updated.pr_link, None);
}

// ============================================================================
// SECTION: Bot Lock
// ============================================================================

#[test]
fn lock_is_exclusive_until_released_or_stale() {
    let temp = TempDir::new().unwrap();
    let store = open_store(&temp);
    let row = approved(&store, Uuid::new_v4());
    let now = OffsetDateTime::now_utc();

    assert!(store.acquire_bot_lock(row.id, &lock_params("bot-a", now)).unwrap());
    assert!(store.acquire_bot_lock(row.id, &lock_params("bot-a", now)).unwrap());
    assert!(!store.acquire_bot_lock(row.id, &lock_params("bot-b", now)).unwrap());
    assert_eq!(store.release_bot_lock(row.id, "bot-b"), Err(RepositoryError::NotFound));
    store.release_bot_lock(row.id, "bot-a").unwrap();
    let released = store.get_by_id(row.id).unwrap();
    assert_eq!(released.bot_lock, None);
    assert_eq!(released.bot_locked_at, None);
    assert!(store.acquire_bot_lock(row.id, &lock_params("bot-b", now)).unwrap());

    let stale = approved(&store, Uuid::new_v4());
    let long_ago = now - time::Duration::minutes(10);
    assert!(store.acquire_bot_lock(stale.id, &lock_params("bot-a", long_ago)).unwrap());
    assert!(store.acquire_bot_lock(stale.id, &lock_params("bot-b", now)).unwrap());
    assert_eq!(store.get_by_id(stale.id).unwrap().bot_lock.as_deref(), Some("bot-b"));

    store.force_release_bot_lock(stale.id).unwrap();
    assert_eq!(store.get_by_id(stale.id).unwrap().bot_lock, None);
}

#[test]
fn concurrent_lockers_see_one_winner() {
    let temp = TempDir::new().unwrap();
    let store = open_store(&temp);
    let row = approved(&store, Uuid::new_v4());
    let workers = 8;
    let barrier = Arc::new(Barrier::new(workers));
    let handles: Vec<_> = (0 .. workers)
        .map(|index| {
            let store = store.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                let params = lock_params(&format!("bot-{index}"), OffsetDateTime::now_utc());
                store.acquire_bot_lock(row.id, &params).unwrap()
            })
        })
        .collect();
    let winners = handles.into_iter().map(|handle| handle.join().unwrap()).filter(|won| *won).count();
    assert_eq!(winners, 1);
}

#[test]
fn blank_locker_is_rejected() {
    let temp = TempDir::new().unwrap();
    let store = open_store(&temp);
    let row = approved(&store, Uuid::new_v4());
    assert!(matches!(
        store.acquire_bot_lock(row.id, &lock_params("  ", OffsetDateTime::now_utc())),
        Err(RepositoryError::Invariant(_))
    ));
}

// ============================================================================
// SECTION: Listing
// ============================================================================

#[test]
fn list_filters_orders_and_pages() {
    let temp = TempDir::new().unwrap();
    let store = open_store(&temp);
    let tenant = Uuid::new_v4();
    let mut ids = Vec::new();
    for subject in ["role:Editor", "role:viewer", "tenant:x:user:100%_done", "role:editor-lead"] {
        ids.push(store.create(new_change(tenant, subject)).unwrap().id);
        thread::sleep(Duration::from_millis(2));
    }
    store.create(new_change(Uuid::new_v4(), "role:editor")).unwrap();

    let by_tenant = ListParams { tenant_id: Some(tenant), ascending: true, ..ListParams::default() };
    let page = store.list(&by_tenant).unwrap();
    assert_eq!(page.total, 4);
    assert_eq!(page.items.iter().map(|row| row.id).collect::<Vec<_>>(), ids);

    let descending = store
        .list(&ListParams { tenant_id: Some(tenant), limit: 2, offset: 1, ..ListParams::default() })
        .unwrap();
    assert_eq!(descending.total, 4);
    assert_eq!(descending.items.iter().map(|row| row.id).collect::<Vec<_>>(), vec![ids[2], ids[1]]);

    let editors = store
        .list(&ListParams {
            tenant_id: Some(tenant),
            subject: Some("EDITOR".to_string()),
            ..ListParams::default()
        })
        .unwrap();
    assert_eq!(editors.total, 2);

    let literal = store
        .list(&ListParams { subject: Some("0%_".to_string()), ..ListParams::default() })
        .unwrap();
    assert_eq!(literal.total, 1);
    assert_eq!(literal.items[0].id, ids[2]);

    store.update_status(ids[0], &StatusUpdate::status(PolicyChangeStatus::Approved)).unwrap();
    let approved_only = store
        .list(&ListParams {
            statuses: vec![PolicyChangeStatus::Approved, PolicyChangeStatus::Failed],
            ..ListParams::default()
        })
        .unwrap();
    assert_eq!(approved_only.items.iter().map(|row| row.id).collect::<Vec<_>>(), vec![ids[0]]);
}

// ============================================================================
// SECTION: Ambient Transactions
// ============================================================================

#[test]
fn ambient_transaction_rolls_back_on_error() {
    let temp = TempDir::new().unwrap();
    let store = open_store(&temp);
    let tenant = Uuid::new_v4();
    let result: Result<(), RepositoryError> = store.in_transaction(|scope| {
        let created = scope.create(new_change(tenant, "role:editor"))?;
        scope.update_status(created.id, &StatusUpdate::status(PolicyChangeStatus::Merged))
    });
    assert!(matches!(result, Err(RepositoryError::InvalidTransition { .. })));
    assert_eq!(store.list(&ListParams::default()).unwrap().total, 0);

    let id = store
        .in_transaction(|scope| {
            let created = scope.create(new_change(tenant, "role:editor"))?;
            scope.update_status(created.id, &StatusUpdate::status(PolicyChangeStatus::Approved))?;
            Ok(created.id)
        })
        .unwrap();
    assert_eq!(store.get_by_id(id).unwrap().status, PolicyChangeStatus::Approved);
}

// ============================================================================
// SECTION: Properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn status_filter_total_matches_rows(moves in proptest::collection::vec(0_u8 .. 3, 1 .. 8)) {
        let temp = TempDir::new().unwrap();
        let store = open_store(&temp);
        let tenant = Uuid::new_v4();
        let mut expected_approved = 0;
        for step in &moves {
            let row = store.create(new_change(tenant, "role:editor")).unwrap();
            let next = match step {
                0 => None,
                1 => Some(PolicyChangeStatus::Approved),
                _ => Some(PolicyChangeStatus::Canceled),
            };
            if let Some(status) = next {
                store.update_status(row.id, &StatusUpdate::status(status)).unwrap();
            }
            if next == Some(PolicyChangeStatus::Approved) {
                expected_approved += 1;
            }
        }
        let page = store
            .list(&ListParams { statuses: vec![PolicyChangeStatus::Approved], ..ListParams::default() })
            .unwrap();
        prop_assert_eq!(page.total, expected_approved);
        prop_assert_eq!(page.items.len(), expected_approved);
        let all = store.list(&ListParams::default()).unwrap();
        prop_assert_eq!(all.total, moves.len());
    }
}
