// crates/authz-core/src/runtime/audit.rs
// ============================================================================
// Module: Authz Audit Logging
// Description: Structured decision events and the sinks that record them.
// Purpose: Emit shadow denials, enforced denials and reloads as structured logs.
// Dependencies: serde, serde_json, tracing
// ============================================================================

//! ## Overview
//! The decision engine reports noteworthy outcomes as [`AuthzAuditEvent`]
//! values. Deployments choose the sink: [`TracingAuditSink`] (default) routes
//! events into `tracing`, while [`StderrAuditSink`] and [`FileAuditSink`]
//! write one JSON object per line.
//! Security posture: events carry identifiers only, never attribute values.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs::OpenOptions;
use std::io;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use serde::Serialize;

use crate::core::mode::EnforcementMode;
use crate::core::request::AuthzRequest;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Audit event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthzAuditKind {
    /// A denial was observed in shadow mode and not enforced.
    ShadowDeny,
    /// A denial was enforced.
    EnforcedDeny,
    /// The mode source reported an unknown label.
    UnknownMode,
    /// The rule set was reloaded from disk.
    PolicyReloaded,
}

impl AuthzAuditKind {
    /// Returns the stable log message for the event.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::ShadowDeny => "authz shadow deny",
            Self::EnforcedDeny => "authz denied request",
            Self::UnknownMode => "unknown flag mode, defaulting to shadow",
            Self::PolicyReloaded => "authz policy reloaded",
        }
    }
}

/// Authz audit event payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthzAuditEvent {
    /// Event kind.
    pub event: AuthzAuditKind,
    /// Event timestamp (milliseconds since epoch).
    pub timestamp_ms: u128,
    /// Subject of the decision, when the event concerns one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    /// Domain of the decision.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    /// Object of the decision.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object: Option<String>,
    /// Action of the decision.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    /// Effective enforcement mode.
    pub mode: EnforcementMode,
    /// Free-form detail (unknown label, rule count).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl AuthzAuditEvent {
    /// Builds a decision event for `request`.
    #[must_use]
    pub fn decision(kind: AuthzAuditKind, request: &AuthzRequest, mode: EnforcementMode) -> Self {
        Self {
            event: kind,
            timestamp_ms: now_millis(),
            subject: Some(request.subject.clone()),
            domain: Some(request.domain.clone()),
            object: Some(request.object.clone()),
            action: Some(request.action.clone()),
            mode,
            detail: None,
        }
    }

    /// Builds an event that is not tied to a request.
    #[must_use]
    pub fn system(kind: AuthzAuditKind, mode: EnforcementMode, detail: impl Into<String>) -> Self {
        Self {
            event: kind,
            timestamp_ms: now_millis(),
            subject: None,
            domain: None,
            object: None,
            action: None,
            mode,
            detail: Some(detail.into()),
        }
    }
}

/// Returns the current time in milliseconds since epoch.
fn now_millis() -> u128 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|duration| duration.as_millis()).unwrap_or(0)
}

// ============================================================================
// SECTION: Sinks
// ============================================================================

/// Audit sink for authz events.
pub trait AuthzAuditSink: Send + Sync {
    /// Records an audit event.
    fn record(&self, event: &AuthzAuditEvent);
}

/// Audit sink that forwards events to `tracing`.
///
/// Denials and anomalies log at warn level; reloads at info level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuthzAuditSink for TracingAuditSink {
    fn record(&self, event: &AuthzAuditEvent) {
        let subject = event.subject.as_deref().unwrap_or_default();
        let domain = event.domain.as_deref().unwrap_or_default();
        let object = event.object.as_deref().unwrap_or_default();
        let action = event.action.as_deref().unwrap_or_default();
        let mode = event.mode.as_str();
        match event.event {
            AuthzAuditKind::ShadowDeny => {
                tracing::warn!(subject, domain, object, action, mode, "authz shadow deny");
            }
            AuthzAuditKind::EnforcedDeny => {
                tracing::warn!(subject, domain, object, action, mode, "authz denied request");
            }
            AuthzAuditKind::UnknownMode => {
                let label = event.detail.as_deref().unwrap_or_default();
                tracing::warn!(label, mode, "unknown flag mode, defaulting to shadow");
            }
            AuthzAuditKind::PolicyReloaded => {
                let detail = event.detail.as_deref().unwrap_or_default();
                tracing::info!(detail, mode, "authz policy reloaded");
            }
        }
    }
}

/// Audit sink that logs JSON lines to stderr.
#[derive(Debug, Default, Clone, Copy)]
pub struct StderrAuditSink;

impl AuthzAuditSink for StderrAuditSink {
    fn record(&self, event: &AuthzAuditEvent) {
        if let Ok(payload) = serde_json::to_string(event) {
            let _ = writeln!(std::io::stderr(), "{payload}");
        }
    }
}

/// Audit sink that logs JSON lines to a file.
#[derive(Debug)]
pub struct FileAuditSink {
    /// File handle used for append-only logging.
    file: Mutex<std::fs::File>,
}

impl FileAuditSink {
    /// Opens the audit log file in append mode.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened.
    pub fn new(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self { file: Mutex::new(file) })
    }
}

impl AuthzAuditSink for FileAuditSink {
    fn record(&self, event: &AuthzAuditEvent) {
        if let Ok(payload) = serde_json::to_string(event)
            && let Ok(mut file) = self.file.lock()
        {
            let _ = writeln!(file, "{payload}");
            let _ = file.flush();
        }
    }
}

/// No-op audit sink.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopAuditSink;

impl AuthzAuditSink for NoopAuditSink {
    fn record(&self, _event: &AuthzAuditEvent) {}
}
