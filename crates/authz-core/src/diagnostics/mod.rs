// crates/authz-core/src/diagnostics/mod.rs
// ============================================================================
// Module: Request Diagnostics
// Description: View state, capability checks, forbidden payloads and retries.
// Purpose: Turn denials into actionable, self-describing responses.
// Dependencies: crate::interfaces, http, url, hmac
// ============================================================================

//! ## Overview
//! Diagnostics helpers run inside a single request. They read decisions
//! through the [`crate::interfaces::Decider`] seam and never hold engine
//! state of their own.

// ============================================================================
// SECTION: Submodules
// ============================================================================

pub mod capability;
pub mod forbidden;
pub mod retry_limiter;
pub mod retry_token;
pub mod viewstate;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use capability::CapabilityDecision;
pub use capability::check_capability;
pub use forbidden::FORBIDDEN_ERROR;
pub use forbidden::ForbiddenContext;
pub use forbidden::ForbiddenPayload;
pub use forbidden::ForbiddenPayloadBuilder;
pub use retry_limiter::DEFAULT_RETRY_LIMITER_CAPACITY;
pub use retry_limiter::RetryLimiter;
pub use retry_limiter::allow_bot_retry;
pub use retry_limiter::bot_retry_limiter;
pub use retry_token::RetryTokenError;
pub use retry_token::RetryTokenSigner;
pub use viewstate::MissingPolicy;
pub use viewstate::OptionalViewState;
pub use viewstate::PolicySuggestion;
pub use viewstate::SUGGESTION_EFFECT;
pub use viewstate::ViewState;
