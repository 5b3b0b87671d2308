// crates/authz-core/src/core/identifiers.rs
// ============================================================================
// Module: Authz Identifiers
// Description: Canonical subject, domain, object and action strings.
// Purpose: Keep every caller on one spelling of the four decision coordinates.
// Dependencies: uuid
// ============================================================================

//! ## Overview
//! Subjects, domains, objects and actions are plain strings by contract. The
//! helpers here produce their canonical forms; the rule engine never parses
//! them back.
//!
//! - Users: `tenant:<domain>:user:<user-id|anonymous>`
//! - Roles: `role:<slug>` with the slug lowercased
//! - Domains: `global` or the lowercased tenant UUID
//! - Objects: `<module>.<resource>`
//! - Actions: lowercased, `*` when empty

// ============================================================================
// SECTION: Imports
// ============================================================================

use uuid::Uuid;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Domain used when no tenant is present.
pub const GLOBAL_DOMAIN: &str = "global";
/// Wildcard action used for blank actions.
pub const ACTION_WILDCARD: &str = "*";
/// User identifier used when no user is present.
pub const ANONYMOUS_USER: &str = "anonymous";
/// Prefix of role subjects.
pub const ROLE_PREFIX: &str = "role:";
/// Prefix of system subjects.
pub const SYSTEM_PREFIX: &str = "system:";
/// Namespace for UUIDv5 user identifiers derived from numeric keys.
pub const USER_NAMESPACE: Uuid = Uuid::from_u128(0x7f1d_14be_672e_49c7_91ad_e50e_b1d3_5815);

/// Module placeholder for blank modules.
const DEFAULT_MODULE: &str = "global";
/// Resource placeholder for blank resources.
const DEFAULT_RESOURCE: &str = "resource";
/// Role slug placeholder for blank slugs.
const DEFAULT_ROLE: &str = "unnamed";

// ============================================================================
// SECTION: Subjects
// ============================================================================

/// Builds `tenant:<domain>:user:<user>` for a user UUID.
///
/// A `None` or nil user renders as `anonymous`.
#[must_use]
pub fn subject_for_user(tenant: Uuid, user: Option<Uuid>) -> String {
    match user {
        Some(user) if !user.is_nil() => subject_for_user_id(tenant, &user.to_string()),
        _ => subject_for_user_id(tenant, ANONYMOUS_USER),
    }
}

/// Builds a user subject from an arbitrary user identifier string.
#[must_use]
pub fn subject_for_user_id(tenant: Uuid, user_id: &str) -> String {
    let domain = domain_from_tenant(tenant);
    let user = match user_id.trim() {
        "" => ANONYMOUS_USER,
        trimmed => trimmed,
    };
    let mut subject = String::with_capacity(domain.len() + user.len() + 13);
    subject.push_str("tenant:");
    subject.push_str(&domain);
    subject.push_str(":user:");
    subject.push_str(user);
    subject
}

/// Returns the canonical `role:<slug>` subject.
///
/// Slugs already carrying the `role:` prefix are returned unchanged.
#[must_use]
pub fn subject_for_role(slug: &str) -> String {
    let slug = match slug.trim() {
        "" => DEFAULT_ROLE,
        trimmed => trimmed,
    };
    if slug.starts_with(ROLE_PREFIX) {
        return slug.to_string();
    }
    format!("{ROLE_PREFIX}{}", slug.to_lowercase())
}

/// Returns the `system:<actor>` subject used by background jobs.
#[must_use]
pub fn system_subject(actor: &str) -> String {
    let actor = match actor.trim() {
        "" => "unknown",
        trimmed => trimmed,
    };
    format!("{SYSTEM_PREFIX}{}", actor.to_lowercase())
}

/// Maps an integer user key into a stable UUIDv5 scoped to the tenant.
#[must_use]
pub fn normalized_user_uuid(tenant: Uuid, user_key: i64) -> Uuid {
    let payload = format!("{tenant}:{user_key}");
    Uuid::new_v5(&USER_NAMESPACE, payload.as_bytes())
}

// ============================================================================
// SECTION: Domains, Objects, Actions
// ============================================================================

/// Returns the domain for a tenant: `global` for the nil UUID.
#[must_use]
pub fn domain_from_tenant(tenant: Uuid) -> String {
    if tenant.is_nil() {
        return GLOBAL_DOMAIN.to_string();
    }
    tenant.to_string().to_lowercase()
}

/// Returns `<module>.<resource>` lowercased with blank halves substituted.
#[must_use]
pub fn object_name(module: &str, resource: &str) -> String {
    let module = module.trim().to_lowercase();
    let resource = resource.trim().to_lowercase();
    let module = if module.is_empty() { DEFAULT_MODULE.to_string() } else { module };
    let resource = if resource.is_empty() { DEFAULT_RESOURCE.to_string() } else { resource };
    format!("{module}.{resource}")
}

/// Lowercases and trims an action; blank actions become `*`.
#[must_use]
pub fn normalize_action(action: &str) -> String {
    let action = action.trim().to_lowercase();
    if action.is_empty() {
        return ACTION_WILDCARD.to_string();
    }
    action
}

/// Returns the capability cache key `<object>.<action>`.
#[must_use]
pub fn capability_key(object: &str, action: &str) -> String {
    format!("{}.{}", object.trim().to_lowercase(), normalize_action(action))
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_prefix_is_preserved_verbatim() {
        assert_eq!(subject_for_role("role:Core.Admin"), "role:Core.Admin");
        assert_eq!(subject_for_role(" Core.Admin "), "role:core.admin");
        assert_eq!(subject_for_role("   "), "role:unnamed");
    }

    #[test]
    fn system_subject_lowercases_actor() {
        assert_eq!(system_subject("AuthzBot"), "system:authzbot");
        assert_eq!(system_subject(""), "system:unknown");
    }

    #[test]
    fn normalized_user_uuid_is_stable_per_tenant() {
        let tenant = Uuid::from_u128(42);
        assert_eq!(normalized_user_uuid(tenant, 7), normalized_user_uuid(tenant, 7));
        assert_ne!(normalized_user_uuid(tenant, 7), normalized_user_uuid(Uuid::nil(), 7));
        assert_eq!(normalized_user_uuid(tenant, 7).get_version_num(), 5);
    }
}
