// crates/authz-core/src/diagnostics/retry_limiter.rs
// ============================================================================
// Module: Retry Limiter
// Description: Per-request-id cooldown for bot retries.
// Purpose: Stop repeated retry submissions for the same request inside a window.
// Dependencies: std
// ============================================================================

//! ## Overview
//! [`RetryLimiter::allow`] admits a request id once per cooldown window. Each
//! admitted observation restarts the window. The map is bounded: when it is
//! full, entries older than the window go first, then the oldest entry.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::OnceLock;
use std::time::Duration;
use std::time::Instant;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default number of tracked request ids.
pub const DEFAULT_RETRY_LIMITER_CAPACITY: usize = 10_000;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Mutex-guarded cooldown map.
#[derive(Debug)]
pub struct RetryLimiter {
    /// Maximum tracked ids.
    capacity: usize,
    /// Last admitted time per request id.
    last_seen: Mutex<HashMap<String, Instant>>,
}

impl Default for RetryLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_RETRY_LIMITER_CAPACITY)
    }
}

impl RetryLimiter {
    /// Creates a limiter tracking at most `capacity` ids (minimum 1).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self { capacity: capacity.max(1), last_seen: Mutex::new(HashMap::new()) }
    }

    /// Returns true when `request_id` may retry at `now`.
    ///
    /// Blank ids are never allowed. A poisoned lock denies.
    pub fn allow(&self, request_id: &str, now: Instant, window: Duration) -> bool {
        if request_id.is_empty() {
            return false;
        }
        let Ok(mut last_seen) = self.last_seen.lock() else {
            return false;
        };
        if let Some(last) = last_seen.get(request_id)
            && now.saturating_duration_since(*last) < window
        {
            return false;
        }
        if !last_seen.contains_key(request_id) && last_seen.len() >= self.capacity {
            last_seen.retain(|_, seen| now.saturating_duration_since(*seen) < window);
            if last_seen.len() >= self.capacity
                && let Some(oldest) =
                    last_seen.iter().min_by_key(|(_, seen)| **seen).map(|(id, _)| id.clone())
            {
                last_seen.remove(&oldest);
            }
        }
        last_seen.insert(request_id.to_string(), now);
        true
    }

    /// Returns the number of tracked ids.
    #[must_use]
    pub fn len(&self) -> usize {
        self.last_seen.lock().map(|map| map.len()).unwrap_or(0)
    }

    /// Returns true when no ids are tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Process-wide limiter used for bot retries.
#[must_use]
pub fn bot_retry_limiter() -> &'static RetryLimiter {
    static LIMITER: OnceLock<RetryLimiter> = OnceLock::new();
    LIMITER.get_or_init(RetryLimiter::default)
}

/// Checks the process-wide limiter for `request_id`.
pub fn allow_bot_retry(request_id: &str, window: Duration) -> bool {
    bot_retry_limiter().allow(request_id, Instant::now(), window)
}

// ============================================================================
// SECTION: Tests
// ============================================================================
