// crates/authz-core/src/runtime/service.rs
// ============================================================================
// Module: Decision Engine
// Description: Mode-gated policy evaluation with inspection and reload.
// Purpose: Answer allow/deny for in-process callers under the runtime mode.
// Dependencies: crate::rules, crate::runtime::{audit, telemetry}
// ============================================================================

//! ## Overview
//! [`DecisionEngine`] owns the loaded rule set behind a read/write lock.
//! Evaluations share the read side; [`DecisionEngine::reload`] builds the new
//! rule set off-lock and swaps it under the write side, so evaluations in
//! flight finish on the previous set.
//!
//! Security posture: rule engine failures are reported as opaque engine
//! errors; parser and filesystem details are logged, never returned.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::RwLock;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Duration;
use std::time::Instant;

use tracing::error;

use crate::core::mode::EnforcementMode;
use crate::core::mode::FileModeSource;
use crate::core::mode::ModeSetting;
use crate::core::mode::ModeSource;
use crate::core::mode::StaticModeSource;
use crate::core::request::AuthzRequest;
use crate::interfaces::Decider;
use crate::rules::RuleSet;
use crate::rules::load_rule_set;
use crate::runtime::audit::AuthzAuditEvent;
use crate::runtime::audit::AuthzAuditKind;
use crate::runtime::audit::AuthzAuditSink;
use crate::runtime::audit::TracingAuditSink;
use crate::runtime::config::AuthzConfig;
use crate::runtime::errors::AuthzError;
use crate::runtime::errors::ForbiddenError;
use crate::runtime::telemetry::AuthzMetrics;
use crate::runtime::telemetry::InspectionMetric;
use crate::runtime::telemetry::InspectionResult;
use crate::runtime::telemetry::NoopMetrics;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Generic message returned when the rule set cannot be reached.
const ENGINE_UNAVAILABLE: &str = "rule engine unavailable";
/// Generic message returned when a reload fails.
const RELOAD_FAILED: &str = "policy reload failed";

// ============================================================================
// SECTION: Types
// ============================================================================

/// Construction options for [`DecisionEngine`].
#[derive(Clone)]
pub struct DecisionEngineOptions {
    /// Rule model file.
    pub model_path: PathBuf,
    /// Aggregated policy file.
    pub policy_path: PathBuf,
    /// Runtime mode source; required.
    pub mode_source: Option<Arc<dyn ModeSource>>,
    /// Audit sink for decision events.
    pub audit: Arc<dyn AuthzAuditSink>,
    /// Metrics sink for inspections.
    pub metrics: Arc<dyn AuthzMetrics>,
}

impl DecisionEngineOptions {
    /// Creates options with the tracing audit sink and no metrics.
    #[must_use]
    pub fn new(
        model_path: impl Into<PathBuf>,
        policy_path: impl Into<PathBuf>,
        mode_source: Arc<dyn ModeSource>,
    ) -> Self {
        Self {
            model_path: model_path.into(),
            policy_path: policy_path.into(),
            mode_source: Some(mode_source),
            audit: Arc::new(TracingAuditSink),
            metrics: Arc::new(NoopMetrics),
        }
    }

    /// Replaces the audit sink.
    #[must_use]
    pub fn with_audit(mut self, audit: Arc<dyn AuthzAuditSink>) -> Self {
        self.audit = audit;
        self
    }

    /// Replaces the metrics sink.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<dyn AuthzMetrics>) -> Self {
        self.metrics = metrics;
        self
    }
}

impl fmt::Debug for DecisionEngineOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecisionEngineOptions")
            .field("model_path", &self.model_path)
            .field("policy_path", &self.policy_path)
            .field("mode_source", &self.mode_source.is_some())
            .finish_non_exhaustive()
    }
}

/// Result of [`DecisionEngine::inspect`].
#[derive(Debug, Clone, PartialEq)]
pub struct Inspection {
    /// Raw decision, independent of mode.
    pub allowed: bool,
    /// Mode in effect at evaluation time.
    pub mode: EnforcementMode,
    /// Canonical text of the policy rows that matched.
    pub trace: Vec<String>,
    /// Evaluation latency.
    pub latency: Duration,
    /// Deep copy of the evaluated request.
    pub request: AuthzRequest,
}

/// Mode-gated decision engine.
///
/// # Invariants
/// - The rule set is replaced only as a whole.
/// - The mode is read from the source on every call.
pub struct DecisionEngine {
    /// Rule model file.
    model_path: PathBuf,
    /// Aggregated policy file.
    policy_path: PathBuf,
    /// Loaded rule set.
    rules: RwLock<Arc<RuleSet>>,
    /// Runtime mode source.
    mode_source: Arc<dyn ModeSource>,
    /// Audit sink.
    audit: Arc<dyn AuthzAuditSink>,
    /// Metrics sink.
    metrics: Arc<dyn AuthzMetrics>,
    /// Set once an unknown mode label has been reported.
    unknown_mode_reported: AtomicBool,
}

impl fmt::Debug for DecisionEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecisionEngine")
            .field("model_path", &self.model_path)
            .field("policy_path", &self.policy_path)
            .finish_non_exhaustive()
    }
}

impl DecisionEngine {
    /// Builds an engine and loads the rule set.
    ///
    /// # Errors
    ///
    /// Returns [`AuthzError::Config`] when a path or the mode source is
    /// missing, or when the rule files cannot be loaded.
    pub fn new(options: DecisionEngineOptions) -> Result<Self, AuthzError> {
        if options.model_path.as_os_str().is_empty() {
            return Err(AuthzError::Config("missing model path".to_string()));
        }
        if options.policy_path.as_os_str().is_empty() {
            return Err(AuthzError::Config("missing policy path".to_string()));
        }
        let Some(mode_source) = options.mode_source else {
            return Err(AuthzError::Config("missing mode source".to_string()));
        };
        let rules = load_rule_set(&options.model_path, &options.policy_path)
            .map_err(|err| AuthzError::Config(err.to_string()))?;
        Ok(Self {
            model_path: options.model_path,
            policy_path: options.policy_path,
            rules: RwLock::new(Arc::new(rules)),
            mode_source,
            audit: options.audit,
            metrics: options.metrics,
            unknown_mode_reported: AtomicBool::new(false),
        })
    }

    /// Builds an engine from validated configuration.
    ///
    /// `AUTHZ_MODE` (captured as `mode_override`) pins the mode; otherwise
    /// the flag file is consulted on every call with `mode` as fallback.
    ///
    /// # Errors
    ///
    /// Returns [`AuthzError::Config`] when the engine cannot be built.
    pub fn from_config(config: &AuthzConfig) -> Result<Self, AuthzError> {
        config.validate().map_err(|err| AuthzError::Config(err.to_string()))?;
        let engine = &config.engine;
        let mode_source: Arc<dyn ModeSource> = match &engine.mode_override {
            Some(ModeSetting::Known(mode)) => Arc::new(StaticModeSource::new(*mode)),
            Some(ModeSetting::Unknown(label)) => Arc::new(StaticModeSource::from_label(label)),
            None => Arc::new(FileModeSource::new(engine.flag_path.clone(), engine.mode)),
        };
        Self::new(DecisionEngineOptions::new(
            engine.model_path.clone(),
            engine.policy_path.clone(),
            mode_source,
        ))
    }

    /// Returns the effective mode; unknown labels map to shadow.
    #[must_use]
    pub fn mode(&self) -> EnforcementMode {
        match self.mode_source.mode() {
            ModeSetting::Known(mode) => mode,
            ModeSetting::Unknown(label) => {
                if !self.unknown_mode_reported.swap(true, Ordering::AcqRel) {
                    self.audit.record(&AuthzAuditEvent::system(
                        AuthzAuditKind::UnknownMode,
                        EnforcementMode::Shadow,
                        label,
                    ));
                }
                EnforcementMode::Shadow
            }
        }
    }

    /// Returns the number of loaded policy rows.
    ///
    /// # Errors
    ///
    /// Returns [`AuthzError::Engine`] when the rule set lock is poisoned.
    pub fn rule_count(&self) -> Result<usize, AuthzError> {
        Ok(self.snapshot()?.rule_count())
    }

    /// Mode-gated authorization.
    ///
    /// # Errors
    ///
    /// Returns [`AuthzError::Forbidden`] for a denial in enforce mode, or
    /// [`AuthzError::Engine`] when evaluation fails.
    pub fn authorize(&self, request: &AuthzRequest) -> Result<(), AuthzError> {
        let mode = self.mode();
        if mode == EnforcementMode::Disabled {
            return Ok(());
        }
        if self.evaluate(request)? {
            return Ok(());
        }
        match mode {
            EnforcementMode::Enforce => {
                self.audit.record(&AuthzAuditEvent::decision(
                    AuthzAuditKind::EnforcedDeny,
                    request,
                    mode,
                ));
                Err(AuthzError::Forbidden(ForbiddenError::from_request(request)))
            }
            EnforcementMode::Shadow | EnforcementMode::Disabled => {
                self.audit.record(&AuthzAuditEvent::decision(
                    AuthzAuditKind::ShadowDeny,
                    request,
                    mode,
                ));
                Ok(())
            }
        }
    }

    /// Evaluates `request` and reports the trace for diagnostics.
    ///
    /// # Errors
    ///
    /// Returns [`AuthzError::Engine`] when evaluation fails.
    pub fn inspect(&self, request: &AuthzRequest) -> Result<Inspection, AuthzError> {
        let mode = self.mode();
        let rules = self.snapshot()?;
        let started = Instant::now();
        let evaluation = rules.evaluate(request);
        let latency = started.elapsed();
        self.metrics.record_inspection(InspectionMetric {
            mode,
            result: InspectionResult::from_allowed(evaluation.allowed),
            latency,
        });
        Ok(Inspection {
            allowed: evaluation.allowed,
            mode,
            trace: evaluation.trace,
            latency,
            request: request.clone(),
        })
    }

    /// Reloads the model and policy files and swaps the rule set.
    ///
    /// On failure the previous rule set stays active.
    ///
    /// # Errors
    ///
    /// Returns [`AuthzError::Engine`] when the files cannot be loaded.
    pub fn reload(&self) -> Result<(), AuthzError> {
        let rules = load_rule_set(&self.model_path, &self.policy_path).map_err(|err| {
            error!(error = %err, "authz policy reload failed");
            AuthzError::Engine(RELOAD_FAILED.to_string())
        })?;
        let count = rules.rule_count();
        {
            let mut guard =
                self.rules.write().map_err(|_| AuthzError::Engine(ENGINE_UNAVAILABLE.to_string()))?;
            *guard = Arc::new(rules);
        }
        self.audit.record(&AuthzAuditEvent::system(
            AuthzAuditKind::PolicyReloaded,
            self.mode(),
            format!("{count} policies"),
        ));
        Ok(())
    }

    /// Returns the current rule set without holding the lock.
    fn snapshot(&self) -> Result<Arc<RuleSet>, AuthzError> {
        self.rules
            .read()
            .map(|guard| Arc::clone(&guard))
            .map_err(|_| AuthzError::Engine(ENGINE_UNAVAILABLE.to_string()))
    }

    /// Evaluates `request` against the current rule set.
    fn evaluate(&self, request: &AuthzRequest) -> Result<bool, AuthzError> {
        Ok(self.snapshot()?.evaluate(request).allowed)
    }
}

impl Decider for DecisionEngine {
    fn check(&self, request: &AuthzRequest) -> Result<bool, AuthzError> {
        self.evaluate(request)
    }
}
