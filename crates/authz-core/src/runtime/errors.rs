// crates/authz-core/src/runtime/errors.rs
// ============================================================================
// Module: Authz Errors
// Description: Error taxonomy for the decision engine.
// Purpose: Separate configuration, engine and forbidden outcomes.
// Dependencies: serde, thiserror
// ============================================================================

//! ## Overview
//! [`AuthzError::Forbidden`] is the only error a caller is expected to render
//! to end users. It carries the decision coordinates, a stable code and a
//! localization key. Engine failures are opaque strings so rule engine
//! internals never leak.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Serialize;
use thiserror::Error;

use crate::core::request::AuthzRequest;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Stable error code for forbidden decisions.
pub const FORBIDDEN_CODE: &str = "AUTHZ_FORBIDDEN";
/// Localization key for forbidden decisions.
pub const FORBIDDEN_LOCALE_KEY: &str = "Authorization.PermissionDenied";
/// Default message for forbidden decisions.
pub const FORBIDDEN_MESSAGE: &str = "permission denied";

// ============================================================================
// SECTION: Types
// ============================================================================

/// Denied decision surfaced in enforce mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
#[error("permission denied")]
pub struct ForbiddenError {
    /// Subject that was denied.
    pub subject: String,
    /// Domain of the decision.
    pub domain: String,
    /// Object that was denied.
    pub object: String,
    /// Action that was denied.
    pub action: String,
}

impl ForbiddenError {
    /// Builds the error from a denied request.
    #[must_use]
    pub fn from_request(request: &AuthzRequest) -> Self {
        Self {
            subject: request.subject.clone(),
            domain: request.domain.clone(),
            object: request.object.clone(),
            action: request.action.clone(),
        }
    }

    /// Returns the stable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        FORBIDDEN_CODE
    }

    /// Returns the localization key.
    #[must_use]
    pub const fn locale_key(&self) -> &'static str {
        FORBIDDEN_LOCALE_KEY
    }
}

/// Decision engine errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthzError {
    /// Engine misconfiguration.
    #[error("authz config error: {0}")]
    Config(String),
    /// Rule engine failure; message is intentionally generic.
    #[error("authz engine error: {0}")]
    Engine(String),
    /// Request denied in enforce mode.
    #[error(transparent)]
    Forbidden(#[from] ForbiddenError),
}

impl AuthzError {
    /// Returns the forbidden payload when this is a denial.
    #[must_use]
    pub const fn as_forbidden(&self) -> Option<&ForbiddenError> {
        match self {
            Self::Forbidden(forbidden) => Some(forbidden),
            _ => None,
        }
    }
}
