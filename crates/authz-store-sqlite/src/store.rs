// crates/authz-store-sqlite/src/store.rs
// ============================================================================
// Module: SQLite Policy Change Store
// Description: Durable PolicyChangeRepository backed by SQLite WAL.
// Purpose: Persist policy change requests and arbitrate the bot lock.
// Dependencies: authz-core, rusqlite, serde, thiserror
// ============================================================================

//! ## Overview
//! [`SqlitePolicyChangeStore`] keeps policy change requests in one table.
//! Every repository call runs in its own `IMMEDIATE` transaction, so the bot
//! lock compare-and-set and the failure bookkeeping are atomic. Hosts that
//! need several calls to commit together pass a closure to
//! [`SqlitePolicyChangeStore::in_transaction`] and receive a
//! [`SqliteChangeScope`] bound to that transaction.
//! Security posture: database contents are untrusted; rows that fail to
//! decode surface as store errors rather than defaults.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use authz_core::PolicyChangeRepository;
use authz_core::RepositoryError;
use authz_core::core::BotLockParams;
use authz_core::core::BotMetadataUpdate;
use authz_core::core::ListPage;
use authz_core::core::ListParams;
use authz_core::core::MergeOutcome;
use authz_core::core::NewPolicyChange;
use authz_core::core::PolicyChangeRequest;
use authz_core::core::StatusUpdate;
use rusqlite::Connection;
use rusqlite::OpenFlags;
use rusqlite::OptionalExtension;
use rusqlite::Transaction;
use rusqlite::TransactionBehavior;
use rusqlite::params;
use serde::Deserialize;
use thiserror::Error;
use uuid::Uuid;

use crate::rows;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// `SQLite` schema version for the store.
const SCHEMA_VERSION: i64 = 1;
/// Default busy timeout (ms).
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
/// Maximum length of a single path component.
const MAX_PATH_COMPONENT_LENGTH: usize = 255;
/// Maximum total path length.
const MAX_TOTAL_PATH_LENGTH: usize = 4096;

// ============================================================================
// SECTION: Config
// ============================================================================

/// `SQLite` journal mode configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SqliteStoreMode {
    /// WAL journal mode.
    #[default]
    Wal,
    /// Delete journal mode.
    Delete,
}

impl SqliteStoreMode {
    /// Returns the `SQLite` pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Wal => "wal",
            Self::Delete => "delete",
        }
    }
}

/// `SQLite` sync mode configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SqliteSyncMode {
    /// Full synchronous mode.
    #[default]
    Full,
    /// Normal synchronous mode.
    Normal,
}

impl SqliteSyncMode {
    /// Returns the `SQLite` pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Normal => "normal",
        }
    }
}

/// Configuration for the `SQLite` policy change store.
#[derive(Debug, Clone, Deserialize)]
pub struct SqliteStoreConfig {
    /// Path to the `SQLite` database file.
    pub path: PathBuf,
    /// Busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// `SQLite` journal mode.
    #[serde(default)]
    pub journal_mode: SqliteStoreMode,
    /// `SQLite` sync mode.
    #[serde(default)]
    pub sync_mode: SqliteSyncMode,
}

impl SqliteStoreConfig {
    /// Returns a config for `path` with default pragmas.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            journal_mode: SqliteStoreMode::default(),
            sync_mode: SqliteSyncMode::default(),
        }
    }
}

/// Returns the default busy timeout for `SQLite` connections.
const fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// `SQLite` store setup errors.
#[derive(Debug, Error)]
pub enum SqliteStoreError {
    /// Store I/O error.
    #[error("sqlite store io error: {0}")]
    Io(String),
    /// `SQLite` engine error.
    #[error("sqlite store db error: {0}")]
    Db(String),
    /// Store schema version mismatch.
    #[error("sqlite store version mismatch: {0}")]
    VersionMismatch(String),
    /// Invalid store configuration.
    #[error("sqlite store invalid data: {0}")]
    Invalid(String),
}

impl From<SqliteStoreError> for RepositoryError {
    fn from(error: SqliteStoreError) -> Self {
        Self::Store(error.to_string())
    }
}

// ============================================================================
// SECTION: Store
// ============================================================================

/// `SQLite`-backed policy change repository.
#[derive(Clone)]
pub struct SqlitePolicyChangeStore {
    /// Shared `SQLite` connection guarded by a mutex.
    connection: Arc<Mutex<Connection>>,
}

impl SqlitePolicyChangeStore {
    /// Opens the store, creating the schema on first use.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] when the database cannot be opened or
    /// initialized.
    pub fn new(config: &SqliteStoreConfig) -> Result<Self, SqliteStoreError> {
        validate_store_path(&config.path)?;
        ensure_parent_dir(&config.path)?;
        let mut connection = open_connection(config)?;
        initialize_schema(&mut connection)?;
        Ok(Self { connection: Arc::new(Mutex::new(connection)) })
    }

    /// Runs `operation` inside one `IMMEDIATE` transaction.
    ///
    /// The transaction commits when `operation` returns `Ok` and rolls back
    /// otherwise.
    ///
    /// # Errors
    ///
    /// Returns the closure's error, or [`RepositoryError::Store`] when the
    /// transaction cannot be opened or committed.
    pub fn in_transaction<T, F>(&self, operation: F) -> Result<T, RepositoryError>
    where
        F: FnOnce(&SqliteChangeScope<'_>) -> Result<T, RepositoryError>,
    {
        let mut guard = self
            .connection
            .lock()
            .map_err(|_| RepositoryError::Store("mutex poisoned".to_string()))?;
        let tx = guard
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|err| RepositoryError::Store(err.to_string()))?;
        let value = operation(&SqliteChangeScope { tx: &tx })?;
        tx.commit().map_err(|err| RepositoryError::Store(err.to_string()))?;
        drop(guard);
        Ok(value)
    }
}

impl PolicyChangeRepository for SqlitePolicyChangeStore {
    fn create(&self, request: NewPolicyChange) -> Result<PolicyChangeRequest, RepositoryError> {
        self.in_transaction(|scope| scope.create(request))
    }

    fn get_by_id(&self, id: Uuid) -> Result<PolicyChangeRequest, RepositoryError> {
        self.in_transaction(|scope| scope.get_by_id(id))
    }

    fn list(&self, params: &ListParams) -> Result<ListPage, RepositoryError> {
        self.in_transaction(|scope| scope.list(params))
    }

    fn update_status(&self, id: Uuid, update: &StatusUpdate) -> Result<(), RepositoryError> {
        self.in_transaction(|scope| scope.update_status(id, update))
    }

    fn update_bot_metadata(
        &self,
        id: Uuid,
        update: &BotMetadataUpdate,
    ) -> Result<(), RepositoryError> {
        self.in_transaction(|scope| scope.update_bot_metadata(id, update))
    }

    fn acquire_bot_lock(&self, id: Uuid, params: &BotLockParams) -> Result<bool, RepositoryError> {
        self.in_transaction(|scope| scope.acquire_bot_lock(id, params))
    }

    fn release_bot_lock(&self, id: Uuid, locker: &str) -> Result<(), RepositoryError> {
        self.in_transaction(|scope| scope.release_bot_lock(id, locker))
    }

    fn force_release_bot_lock(&self, id: Uuid) -> Result<(), RepositoryError> {
        self.in_transaction(|scope| scope.force_release_bot_lock(id))
    }

    fn fail_request(&self, id: Uuid, message: &str) -> Result<(), RepositoryError> {
        self.in_transaction(|scope| scope.fail_request(id, message))
    }

    fn complete_merge(&self, id: Uuid, outcome: &MergeOutcome) -> Result<(), RepositoryError> {
        self.in_transaction(|scope| scope.complete_merge(id, outcome))
    }
}

// ============================================================================
// SECTION: Transaction Scope
// ============================================================================

/// Repository operations bound to one open transaction.
pub struct SqliteChangeScope<'a> {
    /// Ambient transaction.
    tx: &'a Transaction<'a>,
}

impl SqliteChangeScope<'_> {
    /// Inserts a new request.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::InvalidDiff`] for an empty diff.
    pub fn create(&self, request: NewPolicyChange) -> Result<PolicyChangeRequest, RepositoryError> {
        rows::insert(self.tx, request)
    }

    /// Loads a request.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::NotFound`] when the row does not exist.
    pub fn get_by_id(&self, id: Uuid) -> Result<PolicyChangeRequest, RepositoryError> {
        rows::select(self.tx, id)
    }

    /// Lists requests.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::Store`] on backend failure.
    pub fn list(&self, params: &ListParams) -> Result<ListPage, RepositoryError> {
        rows::list(self.tx, params)
    }

    /// Moves a request along the lifecycle graph.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::NotFound`] or
    /// [`RepositoryError::InvalidTransition`].
    pub fn update_status(&self, id: Uuid, update: &StatusUpdate) -> Result<(), RepositoryError> {
        rows::update_status(self.tx, id, update)
    }

    /// Updates bot bookkeeping fields.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::NotFound`] or [`RepositoryError::Invariant`].
    pub fn update_bot_metadata(
        &self,
        id: Uuid,
        update: &BotMetadataUpdate,
    ) -> Result<(), RepositoryError> {
        rows::update_bot_metadata(self.tx, id, update)
    }

    /// Compare-and-set acquisition of the bot lock.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::Invariant`] for a blank locker.
    pub fn acquire_bot_lock(
        &self,
        id: Uuid,
        params: &BotLockParams,
    ) -> Result<bool, RepositoryError> {
        rows::acquire_lock(self.tx, id, params)
    }

    /// Releases the lock held by `locker`.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::NotFound`] when nothing was released.
    pub fn release_bot_lock(&self, id: Uuid, locker: &str) -> Result<(), RepositoryError> {
        rows::release_lock(self.tx, id, Some(locker))
    }

    /// Clears the lock unconditionally.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::NotFound`] when the row does not exist.
    pub fn force_release_bot_lock(&self, id: Uuid) -> Result<(), RepositoryError> {
        rows::release_lock(self.tx, id, None)
    }

    /// Sets `error_log` and moves the row to `failed` in one statement.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::InvalidTransition`] when the row cannot fail.
    pub fn fail_request(&self, id: Uuid, message: &str) -> Result<(), RepositoryError> {
        rows::fail(self.tx, id, message)
    }

    /// Records the merge outcome and moves the row to `merged`.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::InvalidTransition`] or
    /// [`RepositoryError::Invariant`].
    pub fn complete_merge(&self, id: Uuid, outcome: &MergeOutcome) -> Result<(), RepositoryError> {
        rows::complete_merge(self.tx, id, outcome)
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Ensures the parent directory for the store exists.
fn ensure_parent_dir(path: &Path) -> Result<(), SqliteStoreError> {
    let Some(parent) = path.parent() else {
        return Err(SqliteStoreError::Io("store path missing parent directory".to_string()));
    };
    if parent.as_os_str().is_empty() {
        return Ok(());
    }
    std::fs::create_dir_all(parent).map_err(|err| SqliteStoreError::Io(err.to_string()))
}

/// Validates store paths for safety limits.
fn validate_store_path(path: &Path) -> Result<(), SqliteStoreError> {
    if path.as_os_str().is_empty() {
        return Err(SqliteStoreError::Invalid("store path is empty".to_string()));
    }
    if path.as_os_str().len() > MAX_TOTAL_PATH_LENGTH {
        return Err(SqliteStoreError::Invalid("store path exceeds length limit".to_string()));
    }
    if path.components().any(|part| part.as_os_str().len() > MAX_PATH_COMPONENT_LENGTH) {
        return Err(SqliteStoreError::Invalid(
            "store path contains an overlong component".to_string(),
        ));
    }
    if path.is_dir() {
        return Err(SqliteStoreError::Invalid(
            "store path must be a file, not a directory".to_string(),
        ));
    }
    Ok(())
}

/// Opens an `SQLite` connection and applies pragmas.
fn open_connection(config: &SqliteStoreConfig) -> Result<Connection, SqliteStoreError> {
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_FULL_MUTEX;
    let connection = Connection::open_with_flags(&config.path, flags)
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    connection
        .execute_batch(&format!(
            "PRAGMA journal_mode = {}; PRAGMA synchronous = {};",
            config.journal_mode.pragma_value(),
            config.sync_mode.pragma_value()
        ))
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    connection
        .busy_timeout(Duration::from_millis(config.busy_timeout_ms))
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    Ok(connection)
}

/// Creates the schema or validates the existing version.
fn initialize_schema(connection: &mut Connection) -> Result<(), SqliteStoreError> {
    let tx = connection.transaction().map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    tx.execute_batch("CREATE TABLE IF NOT EXISTS store_meta (version INTEGER NOT NULL);")
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    let version: Option<i64> = tx
        .query_row("SELECT version FROM store_meta LIMIT 1", params![], |row| row.get(0))
        .optional()
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    match version {
        None => {
            tx.execute("INSERT INTO store_meta (version) VALUES (?1)", params![SCHEMA_VERSION])
                .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
            tx.execute_batch(rows::CREATE_TABLES)
                .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        }
        Some(SCHEMA_VERSION) => {}
        Some(value) => {
            return Err(SqliteStoreError::VersionMismatch(format!(
                "unsupported schema version: {value}"
            )));
        }
    }
    tx.commit().map_err(|err| SqliteStoreError::Db(err.to_string()))
}
