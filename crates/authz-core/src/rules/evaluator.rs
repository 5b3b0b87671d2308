// crates/authz-core/src/rules/evaluator.rs
// ============================================================================
// Module: Rule Evaluator
// Description: RBAC-with-domains and ABAC matching over a loaded rule set.
// Purpose: Produce allow/deny plus the matched rows for a request.
// Dependencies: crate::rules
// ============================================================================

//! ## Overview
//! A row matches a request when all of the following hold:
//! - subject: equal, wildcard, or a role the subject inherits in the request
//!   domain (grants in the global domain count for every domain)
//! - domain: equal, wildcard, or the global domain
//! - object: equal, wildcard, or a `<module>.*` prefix pattern
//! - action: equal or wildcard
//! - condition: absent or true for the request attributes
//!
//! Matched rows are combined with the model's [`EffectStrategy`].
//! Evaluation is pure and performs no I/O.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::collections::VecDeque;

use crate::core::request::AuthzRequest;
use crate::rules::model::EffectStrategy;
use crate::rules::model::RuleModel;
use crate::rules::policy::Effect;
use crate::rules::policy::PolicyRule;
use crate::rules::policy::PolicySet;
use crate::rules::policy::RoleGrant;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Outcome of a rule evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evaluation {
    /// Final decision.
    pub allowed: bool,
    /// Canonical text of the rows that contributed to the decision.
    pub trace: Vec<String>,
}

/// Immutable, indexed rule set.
///
/// # Invariants
/// - Grants are indexed by member; the index is never mutated after build.
#[derive(Debug, Clone)]
pub struct RuleSet {
    /// Evaluation model.
    model: RuleModel,
    /// Policy rules in file order.
    rules: Vec<PolicyRule>,
    /// Role grants keyed by member.
    grants: BTreeMap<String, Vec<RoleGrant>>,
}

impl RuleSet {
    /// Builds an indexed rule set.
    #[must_use]
    pub fn new(model: RuleModel, policies: PolicySet) -> Self {
        let mut grants: BTreeMap<String, Vec<RoleGrant>> = BTreeMap::new();
        for grant in policies.grants {
            grants.entry(grant.member.clone()).or_default().push(grant);
        }
        Self { model, rules: policies.rules, grants }
    }

    /// Returns the evaluation model.
    #[must_use]
    pub const fn model(&self) -> &RuleModel {
        &self.model
    }

    /// Returns the number of policy rules.
    #[must_use]
    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// Evaluates a request.
    #[must_use]
    pub fn evaluate(&self, request: &AuthzRequest) -> Evaluation {
        let roles = self.roles_for(&request.subject, &request.domain);
        let mut allows = Vec::new();
        let mut denies = Vec::new();
        for rule in &self.rules {
            if !self.rule_matches(rule, request, &roles) {
                continue;
            }
            if self.model.effect == EffectStrategy::Priority {
                return Evaluation {
                    allowed: rule.effect == Effect::Allow,
                    trace: vec![rule.canonical()],
                };
            }
            match rule.effect {
                Effect::Allow => allows.push(rule.canonical()),
                Effect::Deny => denies.push(rule.canonical()),
            }
        }
        match self.model.effect {
            EffectStrategy::AllowOverride => Evaluation { allowed: !allows.is_empty(), trace: allows },
            EffectStrategy::DenyOverride | EffectStrategy::Priority => {
                if denies.is_empty() {
                    Evaluation { allowed: !allows.is_empty(), trace: allows }
                } else {
                    allows.extend(denies);
                    Evaluation { allowed: false, trace: allows }
                }
            }
        }
    }

    /// Collects the subject plus every role it inherits in `domain`.
    fn roles_for(&self, subject: &str, domain: &str) -> BTreeSet<String> {
        let mut seen = BTreeSet::from([subject.to_string()]);
        let mut queue = VecDeque::from([(subject.to_string(), 0_usize)]);
        while let Some((member, depth)) = queue.pop_front() {
            if depth >= self.model.max_role_depth {
                continue;
            }
            let Some(grants) = self.grants.get(&member) else {
                continue;
            };
            for grant in grants {
                if !self.grant_applies(grant, domain) {
                    continue;
                }
                if seen.insert(grant.role.clone()) {
                    queue.push_back((grant.role.clone(), depth + 1));
                }
            }
        }
        seen
    }

    /// Returns true when a grant is effective in `domain`.
    fn grant_applies(&self, grant: &RoleGrant, domain: &str) -> bool {
        grant.domain.as_deref().is_none_or(|grant_domain| {
            grant_domain == domain
                || grant_domain == self.model.global_domain
                || grant_domain == self.model.wildcard
        })
    }

    /// Returns true when every coordinate of `rule` matches `request`.
    fn rule_matches(
        &self,
        rule: &PolicyRule,
        request: &AuthzRequest,
        roles: &BTreeSet<String>,
    ) -> bool {
        let wildcard = self.model.wildcard.as_str();
        let subject_ok = rule.subject == wildcard || roles.contains(&rule.subject);
        let domain_ok = rule.domain == request.domain
            || rule.domain == wildcard
            || rule.domain == self.model.global_domain;
        let action_ok = rule.action == wildcard || rule.action == request.action;
        subject_ok
            && domain_ok
            && action_ok
            && object_matches(&rule.object, &request.object, wildcard)
            && rule.condition.as_ref().is_none_or(|condition| condition.matches(request))
    }
}

/// Matches an object pattern: exact, wildcard, or `<prefix>.*`.
fn object_matches(pattern: &str, object: &str, wildcard: &str) -> bool {
    if pattern == wildcard || pattern == object {
        return true;
    }
    pattern
        .strip_suffix(".*")
        .and_then(|prefix| object.strip_prefix(prefix))
        .is_some_and(|rest| rest.starts_with('.'))
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, reason = "Test-only assertions and helpers are permitted.")]

    use super::*;
    use crate::rules::policy::read_policy_rows;

    fn rule_set(effect: EffectStrategy, text: &str) -> RuleSet {
        let rows = read_policy_rows(text.as_bytes()).unwrap();
        let model = RuleModel { effect, ..RuleModel::default() };
        RuleSet::new(model, PolicySet::from_rows(&rows).unwrap())
    }

    #[test]
    fn roles_inherit_transitively_within_domain() {
        let set = rule_set(
            EffectStrategy::DenyOverride,
            "p, role:viewer, tenant-a, core.users, list\n\
             g, role:admin, role:viewer, tenant-a\n\
             g, alice, role:admin, tenant-a\n\
             g, bob, role:admin, tenant-b\n",
        );
        assert!(set.evaluate(&AuthzRequest::new("alice", "tenant-a", "core.users", "list")).allowed);
        assert!(!set.evaluate(&AuthzRequest::new("bob", "tenant-a", "core.users", "list")).allowed);
    }

    #[test]
    fn deny_overrides_allow_and_trace_lists_both() {
        let set = rule_set(
            EffectStrategy::DenyOverride,
            "p, alice, global, core.*, *, allow\np, alice, global, core.secrets, read, deny\n",
        );
        let evaluation = set.evaluate(&AuthzRequest::new("alice", "tenant-a", "core.secrets", "read"));
        assert!(!evaluation.allowed);
        assert_eq!(evaluation.trace.len(), 2);
        assert!(set.evaluate(&AuthzRequest::new("alice", "tenant-a", "core.users", "read")).allowed);
    }

    #[test]
    fn priority_uses_first_match() {
        let set = rule_set(
            EffectStrategy::Priority,
            "p, alice, global, core.secrets, read, allow\np, alice, global, core.secrets, read, deny\n",
        );
        assert!(set.evaluate(&AuthzRequest::new("alice", "global", "core.secrets", "read")).allowed);
    }

    #[test]
    fn module_wildcard_requires_separator() {
        assert!(object_matches("core.*", "core.users", "*"));
        assert!(!object_matches("core.*", "corex.users", "*"));
        assert!(!object_matches("core.*", "core", "*"));
    }
}
