// crates/authz-core/src/diagnostics/capability.rs
// ============================================================================
// Module: Capability Check
// Description: Cached per-request capability evaluation.
// Purpose: Evaluate a capability once per request and record denials.
// Dependencies: crate::interfaces, crate::diagnostics::viewstate
// ============================================================================

//! ## Overview
//! [`check_capability`] is the middleware helper handlers call before
//! rendering an action. The first evaluation of a capability is cached in the
//! view state; denials also append a [`MissingPolicy`] for the tenant domain so
//! the forbidden payload can explain what was missing.

// ============================================================================
// SECTION: Imports
// ============================================================================

use uuid::Uuid;

use crate::core::identifiers::capability_key;
use crate::core::identifiers::domain_from_tenant;
use crate::core::identifiers::normalize_action;
use crate::core::identifiers::subject_for_user;
use crate::core::request::AuthzRequest;
use crate::diagnostics::viewstate::MissingPolicy;
use crate::diagnostics::viewstate::OptionalViewState;
use crate::diagnostics::viewstate::ViewState;
use crate::interfaces::Decider;
use crate::runtime::errors::AuthzError;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Outcome of [`check_capability`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CapabilityDecision {
    /// Whether the capability is granted.
    pub allowed: bool,
    /// Whether rules were consulted (or the cache answered).
    pub decided: bool,
}

// ============================================================================
// SECTION: Check
// ============================================================================

/// Evaluates `object`/`action` for `user` in `tenant`, caching in `state`.
///
/// A blank object or an absent user returns an undecided denial without
/// consulting the rules.
///
/// # Errors
///
/// Returns the decider's error unchanged.
pub fn check_capability(
    decider: &dyn Decider,
    mut state: Option<&mut ViewState>,
    tenant: Uuid,
    user: Option<Uuid>,
    object: &str,
    action: &str,
) -> Result<CapabilityDecision, AuthzError> {
    let object = object.trim();
    if user.is_none() || object.is_empty() {
        return Ok(CapabilityDecision::default());
    }
    let action = normalize_action(action);
    let key = capability_key(object, &action);
    if let Some(allowed) = state.capability_value(&key) {
        return Ok(CapabilityDecision { allowed, decided: true });
    }
    let domain = domain_from_tenant(tenant);
    let request = AuthzRequest::new(subject_for_user(tenant, user), domain.clone(), object, &action);
    let allowed = decider.check(&request)?;
    state.set_capability(&key, allowed);
    if !allowed {
        state.add_missing_policy(MissingPolicy { domain, object: object.to_string(), action });
    }
    Ok(CapabilityDecision { allowed, decided: true })
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;

    use super::*;

    /// Decider that allows one object and counts calls.
    struct CountingDecider {
        /// Object that is allowed.
        allowed_object: &'static str,
        /// Number of evaluations.
        calls: AtomicUsize,
    }

    impl Decider for CountingDecider {
        fn check(&self, request: &AuthzRequest) -> Result<bool, AuthzError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(request.object == self.allowed_object)
        }
    }

    /// Decider that always fails.
    struct FailingDecider;

    impl Decider for FailingDecider {
        fn check(&self, _request: &AuthzRequest) -> Result<bool, AuthzError> {
            Err(AuthzError::Engine("rule engine unavailable".to_string()))
        }
    }

    #[test]
    fn cached_decisions_skip_evaluation() {
        let decider = CountingDecider { allowed_object: "core.users", calls: AtomicUsize::new(0) };
        let tenant = Uuid::nil();
        let user = Some(Uuid::from_u128(7));
        let mut state = ViewState::new(subject_for_user(tenant, user), "global");

        let first =
            check_capability(&decider, Some(&mut state), tenant, user, "core.users", " LIST ")
                .unwrap_or_default();
        let second =
            check_capability(&decider, Some(&mut state), tenant, user, "core.users", "list")
                .unwrap_or_default();

        assert_eq!(first, CapabilityDecision { allowed: true, decided: true });
        assert_eq!(second, first);
        assert_eq!(decider.calls.load(Ordering::SeqCst), 1);
        assert!(state.capability("core.users.list"));
        assert!(state.missing_policies.is_empty());
    }

    #[test]
    fn denial_records_missing_policy_for_tenant_domain() {
        let decider = CountingDecider { allowed_object: "core.users", calls: AtomicUsize::new(0) };
        let tenant = Uuid::from_u128(0xAB);
        let mut state = ViewState::new("subject", "tenant");

        let decision = check_capability(
            &decider,
            Some(&mut state),
            tenant,
            Some(Uuid::from_u128(1)),
            "core.roles",
            "",
        )
        .unwrap_or_default();

        assert_eq!(decision, CapabilityDecision { allowed: false, decided: true });
        assert_eq!(
            state.missing_policies,
            vec![MissingPolicy {
                domain: domain_from_tenant(tenant),
                object: "core.roles".to_string(),
                action: "*".to_string(),
            }]
        );
    }

    #[test]
    fn blank_object_or_missing_user_is_undecided() {
        let decider = CountingDecider { allowed_object: "core.users", calls: AtomicUsize::new(0) };
        let tenant = Uuid::nil();
        assert_eq!(
            check_capability(&decider, None, tenant, None, "core.users", "list").ok(),
            Some(CapabilityDecision::default())
        );
        assert_eq!(
            check_capability(&decider, None, tenant, Some(Uuid::from_u128(1)), "  ", "list").ok(),
            Some(CapabilityDecision::default())
        );
        assert_eq!(decider.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn evaluation_errors_surface_unchanged() {
        let result = check_capability(
            &FailingDecider,
            None,
            Uuid::nil(),
            Some(Uuid::from_u128(1)),
            "core.users",
            "list",
        );
        assert_eq!(result, Err(AuthzError::Engine("rule engine unavailable".to_string())));
    }
}
