// crates/authz-core/src/runtime/mod.rs
// ============================================================================
// Module: Authz Runtime
// Description: Decision engine, configuration, audit, metrics and services.
// Purpose: Wire the rule engine into an in-process authorization runtime.
// Dependencies: crate::rules, crate::core, tracing, toml
// ============================================================================

//! ## Overview
//! The runtime hosts the [`DecisionEngine`], its configuration and sinks, the
//! file-backed revision provider, the process-global instances and the
//! policy draft service.

// ============================================================================
// SECTION: Submodules
// ============================================================================

pub mod audit;
pub mod config;
pub mod drafts;
pub mod errors;
pub mod global;
pub mod revision;
pub mod service;
pub mod telemetry;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use audit::AuthzAuditEvent;
pub use audit::AuthzAuditKind;
pub use audit::AuthzAuditSink;
pub use audit::FileAuditSink;
pub use audit::NoopAuditSink;
pub use audit::StderrAuditSink;
pub use audit::TracingAuditSink;
pub use config::AuthzConfig;
pub use config::ConfigError;
pub use config::DiagnosticsConfig;
pub use config::EngineConfig;
pub use config::RevisionConfig;
pub use drafts::CreateDraftParams;
pub use drafts::DraftError;
pub use drafts::ListDraftsParams;
pub use drafts::PolicyDraftService;
pub use errors::AuthzError;
pub use errors::FORBIDDEN_CODE;
pub use errors::FORBIDDEN_LOCALE_KEY;
pub use errors::ForbiddenError;
pub use revision::FileRevisionProvider;
pub use service::DecisionEngine;
pub use service::DecisionEngineOptions;
pub use service::Inspection;
pub use telemetry::AuthzMetrics;
pub use telemetry::INSPECTION_COUNTER;
pub use telemetry::INSPECTION_LATENCY;
pub use telemetry::InMemoryMetrics;
pub use telemetry::InspectionMetric;
pub use telemetry::InspectionResult;
pub use telemetry::NoopMetrics;
