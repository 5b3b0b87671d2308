// crates/authz-store-sqlite/src/rows.rs
// ============================================================================
// Module: Policy Change Rows
// Description: SQL statements and row codec for policy change requests.
// Purpose: Implement repository operations against one open transaction.
// Dependencies: authz-core, rusqlite, serde_json, time, uuid
// ============================================================================

//! ## Overview
//! Every function here runs against a connection that already holds a
//! transaction. Timestamps are stored as integer microseconds since the unix
//! epoch, JSON columns as compact text, and empty strings as NULL.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt::Write as _;

use authz_core::RepositoryError;
use authz_core::core::BotLockParams;
use authz_core::core::BotMetadataUpdate;
use authz_core::core::FieldUpdate;
use authz_core::core::ListPage;
use authz_core::core::ListParams;
use authz_core::core::MergeOutcome;
use authz_core::core::NewPolicyChange;
use authz_core::core::PolicyChangeRequest;
use authz_core::core::PolicyChangeStatus;
use authz_core::core::StatusUpdate;
use rusqlite::Connection;
use rusqlite::OptionalExtension;
use rusqlite::Row;
use rusqlite::params;
use rusqlite::params_from_iter;
use rusqlite::types::Value as SqlValue;
use serde_json::Value;
use time::OffsetDateTime;
use uuid::Uuid;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Column list shared by every SELECT.
const COLUMNS: &str = "id, status, requester_id, approver_id, tenant_id, subject, domain, \
                       action, object, reason, diff, base_policy_revision, \
                       applied_policy_revision, applied_policy_snapshot, pr_link, bot_lock, \
                       bot_locked_at, bot_attempts, error_log, bot_job_id, created_at, \
                       updated_at, reviewed_at";

/// Table DDL, created with schema version 1.
pub const CREATE_TABLES: &str = "CREATE TABLE IF NOT EXISTS policy_change_requests (
        id TEXT PRIMARY KEY,
        status TEXT NOT NULL,
        requester_id TEXT NOT NULL,
        approver_id TEXT,
        tenant_id TEXT NOT NULL,
        subject TEXT,
        domain TEXT,
        action TEXT,
        object TEXT,
        reason TEXT,
        diff TEXT NOT NULL,
        base_policy_revision TEXT,
        applied_policy_revision TEXT,
        applied_policy_snapshot TEXT,
        pr_link TEXT,
        bot_lock TEXT,
        bot_locked_at INTEGER,
        bot_attempts INTEGER NOT NULL DEFAULT 0,
        error_log TEXT,
        bot_job_id TEXT,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL,
        reviewed_at INTEGER
    );
    CREATE INDEX IF NOT EXISTS idx_policy_change_requests_status_updated
        ON policy_change_requests (status, updated_at);
    CREATE INDEX IF NOT EXISTS idx_policy_change_requests_tenant
        ON policy_change_requests (tenant_id);";

// ============================================================================
// SECTION: Operations
// ============================================================================

/// Inserts a new row and returns it as stored.
pub fn insert(
    conn: &Connection,
    request: NewPolicyChange,
) -> Result<PolicyChangeRequest, RepositoryError> {
    let diff = match &request.diff {
        Value::Array(ops) if !ops.is_empty() => json_text(&request.diff)?,
        Value::Array(_) => return Err(RepositoryError::InvalidDiff("diff is empty".to_string())),
        _ => {
            return Err(RepositoryError::InvalidDiff("diff must be a JSON array".to_string()));
        }
    };
    if !matches!(request.status, PolicyChangeStatus::Draft | PolicyChangeStatus::PendingReview) {
        return Err(RepositoryError::Invariant(format!(
            "new requests start as draft or pending_review, not {}",
            request.status
        )));
    }
    let id = Uuid::new_v4();
    let now = now_micros()?;
    conn.execute(
        "INSERT INTO policy_change_requests (id, status, requester_id, tenant_id, subject, \
         domain, action, object, reason, diff, base_policy_revision, bot_attempts, created_at, \
         updated_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, 0, ?12, ?12)",
        params![
            id.to_string(),
            request.status.as_str(),
            request.requester_id.to_string(),
            request.tenant_id.to_string(),
            text_or_null(&request.subject),
            text_or_null(&request.domain),
            text_or_null(&request.action),
            text_or_null(&request.object),
            text_or_null(&request.reason),
            diff,
            text_or_null(&request.base_policy_revision),
            now
        ],
    )
    .map_err(db_err)?;
    select(conn, id)
}

/// Loads one row.
pub fn select(conn: &Connection, id: Uuid) -> Result<PolicyChangeRequest, RepositoryError> {
    let sql = format!("SELECT {COLUMNS} FROM policy_change_requests WHERE id = ?1");
    let row = conn
        .query_row(&sql, params![id.to_string()], |row| Ok(decode(row)))
        .optional()
        .map_err(db_err)?;
    row.ok_or(RepositoryError::NotFound)?
}

/// Lists rows matching `params` with a total count.
pub fn list(conn: &Connection, params: &ListParams) -> Result<ListPage, RepositoryError> {
    let mut filter = String::new();
    let mut values: Vec<SqlValue> = Vec::new();
    if !params.statuses.is_empty() {
        let marks = vec!["?"; params.statuses.len()].join(", ");
        push_clause(&mut filter, &format!("status IN ({marks})"));
        values.extend(params.statuses.iter().map(|status| text(status.as_str())));
    }
    if let Some(tenant) = params.tenant_id {
        push_clause(&mut filter, "tenant_id = ?");
        values.push(text(&tenant.to_string()));
    }
    if let Some(requester) = params.requester_id {
        push_clause(&mut filter, "requester_id = ?");
        values.push(text(&requester.to_string()));
    }
    if let Some(approver) = params.approver_id {
        push_clause(&mut filter, "approver_id = ?");
        values.push(text(&approver.to_string()));
    }
    if let Some(subject) = params.subject.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        push_clause(&mut filter, "lower(subject) LIKE ? ESCAPE '\\'");
        values.push(text(&format!("%{}%", escape_like(&subject.to_lowercase()))));
    }
    if let Some(domain) = params.domain.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        push_clause(&mut filter, "domain = ?");
        values.push(text(domain));
    }

    let total: i64 = conn
        .query_row(
            &format!("SELECT COUNT(*) FROM policy_change_requests{filter}"),
            params_from_iter(values.iter()),
            |row| row.get(0),
        )
        .map_err(db_err)?;

    let order = if params.ascending { "ASC" } else { "DESC" };
    let mut sql =
        format!("SELECT {COLUMNS} FROM policy_change_requests{filter} ORDER BY updated_at {order}, id {order}");
    if params.limit > 0 || params.offset > 0 {
        let limit = if params.limit == 0 { -1 } else { to_i64(params.limit)? };
        let _ = write!(sql, " LIMIT {limit} OFFSET {}", to_i64(params.offset)?);
    }
    let mut statement = conn.prepare(&sql).map_err(db_err)?;
    let rows = statement
        .query_map(params_from_iter(values.iter()), |row| Ok(decode(row)))
        .map_err(db_err)?;
    let mut items = Vec::new();
    for row in rows {
        items.push(row.map_err(db_err)??);
    }
    Ok(ListPage {
        items,
        total: usize::try_from(total)
            .map_err(|_| RepositoryError::Store("negative row count".to_string()))?,
    })
}

/// Applies a validated status change.
pub fn update_status(
    conn: &Connection,
    id: Uuid,
    update: &StatusUpdate,
) -> Result<(), RepositoryError> {
    let current = select(conn, id)?;
    check_transition(&current, update.status)?;
    if update.status == PolicyChangeStatus::Merged
        && current.applied_policy_revision.as_deref().is_none_or(str::is_empty)
    {
        return Err(RepositoryError::Invariant(
            "merged requests require an applied policy revision".to_string(),
        ));
    }
    let mut assignments = vec![("status", text(update.status.as_str()))];
    if let Some(change) = update.approver_id.as_change() {
        assignments.push(("approver_id", change.map_or(SqlValue::Null, |id| text(&id.to_string()))));
    }
    if let Some(change) = update.reviewed_at.as_change() {
        let value = match change {
            Some(at) => SqlValue::Integer(to_micros(*at)?),
            None => SqlValue::Null,
        };
        assignments.push(("reviewed_at", value));
    }
    apply_assignments(conn, id, assignments)
}

/// Applies a bot metadata change; an empty change touches nothing.
pub fn update_bot_metadata(
    conn: &Connection,
    id: Uuid,
    update: &BotMetadataUpdate,
) -> Result<(), RepositoryError> {
    if update.is_empty() {
        return Ok(());
    }
    let current = select(conn, id)?;
    match update.applied_policy_revision.as_change() {
        Some(Some(_)) if current.status != PolicyChangeStatus::Merged => {
            return Err(RepositoryError::Invariant(
                "applied policy revision is only recorded on merged requests".to_string(),
            ));
        }
        Some(None) if current.status == PolicyChangeStatus::Merged => {
            return Err(RepositoryError::Invariant(
                "merged requests keep their applied policy revision".to_string(),
            ));
        }
        _ => {}
    }
    let mut assignments = Vec::new();
    push_text(&mut assignments, "bot_job_id", &update.bot_job_id);
    if let Some(change) = update.bot_attempts.as_change() {
        assignments.push((
            "bot_attempts",
            SqlValue::Integer(change.map_or(0, |attempts| i64::from(*attempts))),
        ));
    }
    push_text(&mut assignments, "error_log", &update.error_log);
    push_text(&mut assignments, "pr_link", &update.pr_link);
    push_text(&mut assignments, "applied_policy_revision", &update.applied_policy_revision);
    if let Some(change) = update.applied_policy_snapshot.as_change() {
        let value = match change {
            Some(snapshot) => SqlValue::Text(json_text(snapshot)?),
            None => SqlValue::Null,
        };
        assignments.push(("applied_policy_snapshot", value));
    }
    apply_assignments(conn, id, assignments)
}

/// Records a bot failure and moves the row to `failed`.
pub fn fail(conn: &Connection, id: Uuid, message: &str) -> Result<(), RepositoryError> {
    let current = select(conn, id)?;
    check_transition(&current, PolicyChangeStatus::Failed)?;
    apply_assignments(
        conn,
        id,
        vec![
            ("status", text(PolicyChangeStatus::Failed.as_str())),
            ("error_log", text_or_null(message).map_or(SqlValue::Null, SqlValue::Text)),
        ],
    )
}

/// Records a merge outcome and moves the row to `merged`.
pub fn complete_merge(
    conn: &Connection,
    id: Uuid,
    outcome: &MergeOutcome,
) -> Result<(), RepositoryError> {
    let current = select(conn, id)?;
    check_transition(&current, PolicyChangeStatus::Merged)?;
    if outcome.applied_policy_revision.trim().is_empty() {
        return Err(RepositoryError::Invariant(
            "merged requests require an applied policy revision".to_string(),
        ));
    }
    apply_assignments(
        conn,
        id,
        vec![
            ("status", text(PolicyChangeStatus::Merged.as_str())),
            ("pr_link", text_or_null(&outcome.pr_link).map_or(SqlValue::Null, SqlValue::Text)),
            ("applied_policy_revision", text(&outcome.applied_policy_revision)),
            ("applied_policy_snapshot", SqlValue::Text(json_text(&outcome.applied_policy_snapshot)?)),
            ("error_log", SqlValue::Null),
        ],
    )
}

/// Compare-and-set acquisition of the bot lock.
pub fn acquire_lock(
    conn: &Connection,
    id: Uuid,
    lock: &BotLockParams,
) -> Result<bool, RepositoryError> {
    let locker = lock.locker.trim();
    if locker.is_empty() {
        return Err(RepositoryError::Invariant("bot locker is required".to_string()));
    }
    let changed = conn
        .execute(
            "UPDATE policy_change_requests SET bot_lock = ?1, bot_locked_at = ?2, updated_at = \
             ?3 WHERE id = ?4 AND (bot_lock IS NULL OR bot_lock = '' OR bot_locked_at IS NULL \
             OR bot_locked_at < ?5 OR bot_lock = ?1)",
            params![
                locker,
                to_micros(lock.locked_at)?,
                now_micros()?,
                id.to_string(),
                to_micros(lock.stale_before)?
            ],
        )
        .map_err(db_err)?;
    Ok(changed == 1)
}

/// Clears the lock when held by `locker`, or unconditionally when `None`.
pub fn release_lock(
    conn: &Connection,
    id: Uuid,
    locker: Option<&str>,
) -> Result<(), RepositoryError> {
    let now = now_micros()?;
    let changed = match locker {
        Some(locker) => conn.execute(
            "UPDATE policy_change_requests SET bot_lock = NULL, bot_locked_at = NULL, updated_at \
             = ?1 WHERE id = ?2 AND bot_lock = ?3",
            params![now, id.to_string(), locker.trim()],
        ),
        None => conn.execute(
            "UPDATE policy_change_requests SET bot_lock = NULL, bot_locked_at = NULL, updated_at \
             = ?1 WHERE id = ?2",
            params![now, id.to_string()],
        ),
    }
    .map_err(db_err)?;
    if changed == 0 {
        return Err(RepositoryError::NotFound);
    }
    Ok(())
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Rejects status changes outside the lifecycle graph.
fn check_transition(
    current: &PolicyChangeRequest,
    next: PolicyChangeStatus,
) -> Result<(), RepositoryError> {
    if current.status.can_transition_to(next) {
        return Ok(());
    }
    Err(RepositoryError::InvalidTransition { from: current.status, to: next })
}

/// Runs `UPDATE ... SET <assignments>, updated_at = now WHERE id = ?`.
fn apply_assignments(
    conn: &Connection,
    id: Uuid,
    assignments: Vec<(&'static str, SqlValue)>,
) -> Result<(), RepositoryError> {
    let mut sql = String::from("UPDATE policy_change_requests SET ");
    let mut values = Vec::with_capacity(assignments.len() + 2);
    for (column, value) in assignments {
        let _ = write!(sql, "{column} = ?, ");
        values.push(value);
    }
    sql.push_str("updated_at = ? WHERE id = ?");
    values.push(SqlValue::Integer(now_micros()?));
    values.push(text(&id.to_string()));
    let changed = conn.execute(&sql, params_from_iter(values.iter())).map_err(db_err)?;
    if changed == 0 {
        return Err(RepositoryError::NotFound);
    }
    Ok(())
}

/// Pushes a text column change, storing blanks as NULL.
fn push_text(
    assignments: &mut Vec<(&'static str, SqlValue)>,
    column: &'static str,
    update: &FieldUpdate<String>,
) {
    if let Some(change) = update.as_change() {
        let value = change.and_then(|value| text_or_null(value)).map_or(SqlValue::Null, SqlValue::Text);
        assignments.push((column, value));
    }
}

/// Appends a WHERE/AND clause.
fn push_clause(filter: &mut String, clause: &str) {
    filter.push_str(if filter.is_empty() { " WHERE " } else { " AND " });
    filter.push_str(clause);
}

/// Escapes LIKE metacharacters with a backslash.
fn escape_like(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for ch in input.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

/// Decodes one row into the entity.
fn decode(row: &Row<'_>) -> Result<PolicyChangeRequest, RepositoryError> {
    let status_label: String = row.get(1).map_err(db_err)?;
    let status = PolicyChangeStatus::parse(&status_label)
        .ok_or_else(|| RepositoryError::Store(format!("unknown status: {status_label}")))?;
    let attempts: i64 = row.get(17).map_err(db_err)?;
    Ok(PolicyChangeRequest {
        id: uuid_column(row, 0)?,
        status,
        requester_id: uuid_column(row, 2)?,
        approver_id: optional_uuid_column(row, 3)?,
        tenant_id: uuid_column(row, 4)?,
        subject: text_column(row, 5)?.unwrap_or_default(),
        domain: text_column(row, 6)?.unwrap_or_default(),
        action: text_column(row, 7)?.unwrap_or_default(),
        object: text_column(row, 8)?.unwrap_or_default(),
        reason: text_column(row, 9)?.unwrap_or_default(),
        diff: json_column(row, 10)?.unwrap_or(Value::Null),
        base_policy_revision: text_column(row, 11)?.unwrap_or_default(),
        applied_policy_revision: text_column(row, 12)?,
        applied_policy_snapshot: json_column(row, 13)?,
        pr_link: text_column(row, 14)?,
        bot_lock: text_column(row, 15)?,
        bot_locked_at: time_column(row, 16)?,
        bot_attempts: u32::try_from(attempts)
            .map_err(|_| RepositoryError::Store("bot_attempts out of range".to_string()))?,
        error_log: text_column(row, 18)?,
        bot_job_id: text_column(row, 19)?,
        created_at: time_column(row, 20)?.ok_or_else(|| missing("created_at"))?,
        updated_at: time_column(row, 21)?.ok_or_else(|| missing("updated_at"))?,
        reviewed_at: time_column(row, 22)?,
    })
}

/// Reads a nullable text column, mapping blanks to `None`.
fn text_column(row: &Row<'_>, index: usize) -> Result<Option<String>, RepositoryError> {
    let value: Option<String> = row.get(index).map_err(db_err)?;
    Ok(value.filter(|value| !value.is_empty()))
}

/// Reads a required UUID column.
fn uuid_column(row: &Row<'_>, index: usize) -> Result<Uuid, RepositoryError> {
    optional_uuid_column(row, index)?.ok_or_else(|| missing("uuid"))
}

/// Reads a nullable UUID column.
fn optional_uuid_column(row: &Row<'_>, index: usize) -> Result<Option<Uuid>, RepositoryError> {
    text_column(row, index)?
        .map(|value| {
            Uuid::parse_str(&value).map_err(|err| RepositoryError::Store(err.to_string()))
        })
        .transpose()
}

/// Reads a nullable JSON column.
fn json_column(row: &Row<'_>, index: usize) -> Result<Option<Value>, RepositoryError> {
    text_column(row, index)?
        .map(|value| {
            serde_json::from_str(&value).map_err(|err| RepositoryError::Store(err.to_string()))
        })
        .transpose()
}

/// Reads a nullable microsecond timestamp column.
fn time_column(row: &Row<'_>, index: usize) -> Result<Option<OffsetDateTime>, RepositoryError> {
    let value: Option<i64> = row.get(index).map_err(db_err)?;
    value.map(from_micros).transpose()
}

/// Builds a missing-column store error.
fn missing(column: &str) -> RepositoryError {
    RepositoryError::Store(format!("missing required column: {column}"))
}

/// Wraps a string as an SQL text value.
fn text(value: &str) -> SqlValue {
    SqlValue::Text(value.to_string())
}

/// Returns `None` for blank strings.
fn text_or_null(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() { None } else { Some(value.to_string()) }
}

/// Serializes JSON compactly.
fn json_text(value: &Value) -> Result<String, RepositoryError> {
    serde_json::to_string(value).map_err(|err| RepositoryError::Store(err.to_string()))
}

/// Converts a count to an SQL integer.
fn to_i64(value: usize) -> Result<i64, RepositoryError> {
    i64::try_from(value).map_err(|_| RepositoryError::Store("pagination value too large".to_string()))
}

/// Converts a timestamp to unix microseconds.
fn to_micros(at: OffsetDateTime) -> Result<i64, RepositoryError> {
    i64::try_from(at.unix_timestamp_nanos() / 1_000)
        .map_err(|_| RepositoryError::Store("timestamp out of range".to_string()))
}

/// Converts unix microseconds to a UTC timestamp.
fn from_micros(micros: i64) -> Result<OffsetDateTime, RepositoryError> {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(micros) * 1_000)
        .map_err(|err| RepositoryError::Store(err.to_string()))
}

/// Returns the store clock in unix microseconds.
fn now_micros() -> Result<i64, RepositoryError> {
    to_micros(OffsetDateTime::now_utc())
}

/// Maps an engine error into a repository error.
#[allow(clippy::needless_pass_by_value, reason = "Used directly as a map_err adapter.")]
fn db_err(err: rusqlite::Error) -> RepositoryError {
    RepositoryError::Store(err.to_string())
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn like_metacharacters_are_escaped() {
        assert_eq!(escape_like("50%_off\\"), "50\\%\\_off\\\\");
    }

    #[test]
    fn micros_round_trip_truncates_nanos() {
        let at = OffsetDateTime::from_unix_timestamp_nanos(1_700_000_000_123_456_789).unwrap_or(OffsetDateTime::UNIX_EPOCH);
        let micros = to_micros(at).unwrap_or_default();
        assert_eq!(micros, 1_700_000_000_123_456);
        assert_eq!(
            from_micros(micros).map(OffsetDateTime::unix_timestamp_nanos),
            Ok(1_700_000_000_123_456_000)
        );
    }

    #[test]
    fn blank_text_maps_to_null() {
        assert_eq!(text_or_null("  "), None);
        assert_eq!(text_or_null("x"), Some("x".to_string()));
    }
}
