// crates/authz-core/src/runtime/global.rs
// ============================================================================
// Module: Process-Global Authz Instances
// Description: One-shot initialization of the shared engine and revision provider.
// Purpose: Amortize rule loading across all request handlers of a process.
// Dependencies: crate::runtime::{config, service, revision}, tracing
// ============================================================================

//! ## Overview
//! The decision engine and the revision provider are built lazily from
//! [`AuthzConfig::load`] on first use. Initialization happens at most once
//! under a mutex; a second [`install_engine`] is rejected. [`engine`] is the
//! only fatal path of the subsystem: a construction failure is logged and the
//! process exits. Tests install fakes and clear them with the hidden reset
//! helpers.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;
use std::sync::Mutex;

use tracing::error;

use crate::interfaces::RevisionProvider;
use crate::runtime::config::AuthzConfig;
use crate::runtime::errors::AuthzError;
use crate::runtime::revision::FileRevisionProvider;
use crate::runtime::service::DecisionEngine;

// ============================================================================
// SECTION: State
// ============================================================================

/// Shared decision engine.
static ENGINE: Mutex<Option<Arc<DecisionEngine>>> = Mutex::new(None);
/// Shared revision provider.
static REVISION: Mutex<Option<Arc<dyn RevisionProvider>>> = Mutex::new(None);

// ============================================================================
// SECTION: Decision Engine
// ============================================================================

/// Returns the shared engine, building it from configuration on first use.
///
/// # Errors
///
/// Returns [`AuthzError::Config`] when configuration or rule loading fails.
pub fn try_engine() -> Result<Arc<DecisionEngine>, AuthzError> {
    let mut guard =
        ENGINE.lock().map_err(|_| AuthzError::Config("engine guard poisoned".to_string()))?;
    if let Some(engine) = guard.as_ref() {
        return Ok(Arc::clone(engine));
    }
    let config = AuthzConfig::load(None).map_err(|err| AuthzError::Config(err.to_string()))?;
    let engine = Arc::new(DecisionEngine::from_config(&config)?);
    *guard = Some(Arc::clone(&engine));
    Ok(engine)
}

/// Returns the shared engine, terminating the process if it cannot be built.
#[must_use]
#[allow(clippy::exit, reason = "Engine construction failure is the one fatal path.")]
pub fn engine() -> Arc<DecisionEngine> {
    match try_engine() {
        Ok(engine) => engine,
        Err(err) => {
            error!(error = %err, "authz engine initialization failed");
            std::process::exit(1)
        }
    }
}

/// Installs an explicitly built engine as the shared instance.
///
/// # Errors
///
/// Returns [`AuthzError::Config`] when an engine is already installed.
pub fn install_engine(engine: Arc<DecisionEngine>) -> Result<(), AuthzError> {
    let mut guard =
        ENGINE.lock().map_err(|_| AuthzError::Config("engine guard poisoned".to_string()))?;
    if guard.is_some() {
        return Err(AuthzError::Config("authz engine already initialized".to_string()));
    }
    *guard = Some(engine);
    Ok(())
}

/// Clears the shared engine so tests can install another one.
#[doc(hidden)]
pub fn reset_engine() {
    if let Ok(mut guard) = ENGINE.lock() {
        *guard = None;
    }
}

// ============================================================================
// SECTION: Revision Provider
// ============================================================================

/// Returns the shared revision provider, building it on first use.
///
/// # Errors
///
/// Returns [`AuthzError::Config`] when configuration cannot be loaded.
pub fn revision_provider() -> Result<Arc<dyn RevisionProvider>, AuthzError> {
    let mut guard =
        REVISION.lock().map_err(|_| AuthzError::Config("revision guard poisoned".to_string()))?;
    if let Some(provider) = guard.as_ref() {
        return Ok(Arc::clone(provider));
    }
    let config = AuthzConfig::load(None).map_err(|err| AuthzError::Config(err.to_string()))?;
    let provider: Arc<dyn RevisionProvider> =
        Arc::new(FileRevisionProvider::new(config.revision_path()));
    *guard = Some(Arc::clone(&provider));
    Ok(provider)
}

/// Installs an explicit revision provider as the shared instance.
///
/// # Errors
///
/// Returns [`AuthzError::Config`] when a provider is already installed.
pub fn install_revision_provider(provider: Arc<dyn RevisionProvider>) -> Result<(), AuthzError> {
    let mut guard =
        REVISION.lock().map_err(|_| AuthzError::Config("revision guard poisoned".to_string()))?;
    if guard.is_some() {
        return Err(AuthzError::Config("revision provider already initialized".to_string()));
    }
    *guard = Some(provider);
    Ok(())
}

/// Clears the shared revision provider.
#[doc(hidden)]
pub fn reset_revision_provider() {
    if let Ok(mut guard) = REVISION.lock() {
        *guard = None;
    }
}
