// crates/authz-core/src/diagnostics/retry_token.rs
// ============================================================================
// Module: Retry Tokens
// Description: Stateless HMAC-signed retry authorization tokens.
// Purpose: Let a denied request id retry an action within a short window.
// Dependencies: base64, hmac, sha2, subtle, serde_json, time, uuid
// ============================================================================

//! ## Overview
//! A token is `base64url(payload) "." base64url(HMAC-SHA256(payload))`, where
//! the payload is `{request_id, exp, nonce}` JSON and the MAC covers the
//! encoded payload text. Nothing is stored server-side.
//!
//! Security posture: signatures are compared in constant time, and the
//! signature is verified before the payload is decoded. Invalid and expired
//! tokens are distinct errors so callers can tell a stale link from tampering.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use hmac::Hmac;
use hmac::Mac;
use serde::Deserialize;
use serde::Serialize;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

// ============================================================================
// SECTION: Types
// ============================================================================

/// HMAC-SHA256 instance.
type HmacSha256 = Hmac<Sha256>;

/// Signed token payload.
#[derive(Debug, Serialize, Deserialize)]
struct RetryTokenPayload {
    /// Request id the token is bound to.
    request_id: String,
    /// Expiry as unix seconds.
    exp: i64,
    /// Random nonce so two tokens for one request differ.
    nonce: String,
}

/// Retry token errors.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum RetryTokenError {
    /// Signature, structure or request binding is wrong.
    #[error("invalid retry token")]
    Invalid,
    /// Token is well-formed but past its expiry.
    #[error("retry token expired")]
    Expired,
    /// Signing secret is missing or empty.
    #[error("retry token secret is not configured")]
    MissingSecret,
}

/// Issues and validates retry tokens with a shared secret.
#[derive(Clone)]
pub struct RetryTokenSigner {
    /// HMAC key.
    secret: Vec<u8>,
}

impl fmt::Debug for RetryTokenSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryTokenSigner").finish_non_exhaustive()
    }
}

impl RetryTokenSigner {
    /// Creates a signer.
    ///
    /// # Errors
    ///
    /// Returns [`RetryTokenError::MissingSecret`] for a blank secret.
    pub fn new(secret: &str) -> Result<Self, RetryTokenError> {
        let secret = secret.trim();
        if secret.is_empty() {
            return Err(RetryTokenError::MissingSecret);
        }
        Ok(Self { secret: secret.as_bytes().to_vec() })
    }

    /// Creates a signer from an optional configured secret.
    ///
    /// # Errors
    ///
    /// Returns [`RetryTokenError::MissingSecret`] when no secret is set.
    pub fn from_config(secret: Option<&str>) -> Result<Self, RetryTokenError> {
        Self::new(secret.unwrap_or_default())
    }

    /// Issues a token for `request_id` valid for `ttl`.
    ///
    /// # Errors
    ///
    /// Returns [`RetryTokenError::Invalid`] for the nil request id.
    pub fn generate(&self, request_id: Uuid, ttl: Duration) -> Result<String, RetryTokenError> {
        self.generate_at(request_id, ttl, OffsetDateTime::now_utc())
    }

    /// Issues a token relative to `now`.
    ///
    /// # Errors
    ///
    /// Returns [`RetryTokenError::Invalid`] for the nil request id.
    pub fn generate_at(
        &self,
        request_id: Uuid,
        ttl: Duration,
        now: OffsetDateTime,
    ) -> Result<String, RetryTokenError> {
        if request_id.is_nil() {
            return Err(RetryTokenError::Invalid);
        }
        let ttl_secs = i64::try_from(ttl.as_secs()).map_err(|_| RetryTokenError::Invalid)?;
        let payload = RetryTokenPayload {
            request_id: request_id.to_string(),
            exp: now.unix_timestamp().saturating_add(ttl_secs),
            nonce: Uuid::new_v4().to_string(),
        };
        let raw = serde_json::to_vec(&payload).map_err(|_| RetryTokenError::Invalid)?;
        let encoded = URL_SAFE_NO_PAD.encode(raw);
        let signature = URL_SAFE_NO_PAD.encode(self.sign(&encoded)?);
        Ok(format!("{encoded}.{signature}"))
    }

    /// Validates `token` for `request_id` against the current time.
    ///
    /// # Errors
    ///
    /// Returns [`RetryTokenError::Invalid`] or [`RetryTokenError::Expired`].
    pub fn validate(&self, token: &str, request_id: Uuid) -> Result<(), RetryTokenError> {
        self.validate_at(token, request_id, OffsetDateTime::now_utc())
    }

    /// Validates `token` for `request_id` at `now`.
    ///
    /// # Errors
    ///
    /// Returns [`RetryTokenError::Invalid`] or [`RetryTokenError::Expired`].
    pub fn validate_at(
        &self,
        token: &str,
        request_id: Uuid,
        now: OffsetDateTime,
    ) -> Result<(), RetryTokenError> {
        let mut parts = token.split('.');
        let (Some(encoded), Some(signature), None) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(RetryTokenError::Invalid);
        };
        let presented = URL_SAFE_NO_PAD.decode(signature).map_err(|_| RetryTokenError::Invalid)?;
        let expected = self.sign(encoded)?;
        if !bool::from(expected.as_slice().ct_eq(presented.as_slice())) {
            return Err(RetryTokenError::Invalid);
        }
        let raw = URL_SAFE_NO_PAD.decode(encoded).map_err(|_| RetryTokenError::Invalid)?;
        let payload: RetryTokenPayload =
            serde_json::from_slice(&raw).map_err(|_| RetryTokenError::Invalid)?;
        if payload.request_id != request_id.to_string() {
            return Err(RetryTokenError::Invalid);
        }
        if payload.exp <= now.unix_timestamp() {
            return Err(RetryTokenError::Expired);
        }
        Ok(())
    }

    /// Computes the MAC over the encoded payload.
    fn sign(&self, encoded: &str) -> Result<Vec<u8>, RetryTokenError> {
        let mut mac =
            HmacSha256::new_from_slice(&self.secret).map_err(|_| RetryTokenError::MissingSecret)?;
        mac.update(encoded.as_bytes());
        Ok(mac.finalize().into_bytes().to_vec())
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, reason = "Test-only assertions and helpers are permitted.")]

    use super::*;

    #[test]
    fn blank_secret_is_a_configuration_error() {
        assert_eq!(RetryTokenSigner::new("  ").err(), Some(RetryTokenError::MissingSecret));
        assert_eq!(RetryTokenSigner::from_config(None).err(), Some(RetryTokenError::MissingSecret));
    }

    #[test]
    fn tampered_payload_is_invalid() {
        let signer = RetryTokenSigner::new("secret").unwrap();
        let request = Uuid::new_v4();
        let token = signer.generate(request, Duration::from_secs(60)).unwrap();
        let (payload, signature) = token.split_once('.').unwrap();
        let mut forged = payload.to_string();
        forged.push('A');
        let tampered = format!("{forged}.{signature}");
        assert_eq!(signer.validate(&tampered, request), Err(RetryTokenError::Invalid));
        assert_eq!(signer.validate("no-dot", request), Err(RetryTokenError::Invalid));
        assert_eq!(signer.validate(&format!("{token}.extra"), request), Err(RetryTokenError::Invalid));
    }

    #[test]
    fn other_secret_is_invalid() {
        let request = Uuid::new_v4();
        let token =
            RetryTokenSigner::new("one").unwrap().generate(request, Duration::from_secs(60)).unwrap();
        let other = RetryTokenSigner::new("two").unwrap();
        assert_eq!(other.validate(&token, request), Err(RetryTokenError::Invalid));
    }

    #[test]
    fn nil_request_id_is_rejected() {
        let signer = RetryTokenSigner::new("secret").unwrap();
        assert_eq!(
            signer.generate(Uuid::nil(), Duration::from_secs(60)),
            Err(RetryTokenError::Invalid)
        );
    }
}
