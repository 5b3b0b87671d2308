// crates/authz-core/tests/diagnostics.rs
// ============================================================================
// Module: Diagnostics Tests
// Description: Retry tokens, retry limiter, view state and configuration.
// Purpose: Validate request-scoped helpers through the public API.
// Dependencies: authz-core, proptest, tempfile, time
// ============================================================================

//! ## Overview
//! Covers the retry token lifecycle, view state key normalization and the
//! configuration loader's environment overrides.

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    clippy::missing_docs_in_private_items,
    reason = "Test-only assertions and helpers are permitted."
)]

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use std::time::Instant;

use authz_core::AuthzConfig;
use authz_core::EnforcementMode;
use authz_core::ModeSetting;
use authz_core::ViewState;
use authz_core::diagnostics::MissingPolicy;
use authz_core::diagnostics::OptionalViewState;
use authz_core::diagnostics::RetryLimiter;
use authz_core::diagnostics::RetryTokenError;
use authz_core::diagnostics::RetryTokenSigner;
use authz_core::runtime::ConfigError;
use proptest::prelude::*;
use time::OffsetDateTime;
use uuid::Uuid;

// ============================================================================
// SECTION: Retry Tokens
// ============================================================================

#[test]
fn retry_token_lifecycle() {
    let signer = RetryTokenSigner::new("sid-cookie-key").unwrap();
    let request = Uuid::new_v4();
    let issued_at = OffsetDateTime::now_utc();
    let token = signer.generate_at(request, Duration::from_secs(60), issued_at).unwrap();

    assert_eq!(signer.validate_at(&token, request, issued_at), Ok(()));
    assert_eq!(signer.validate(&token, request), Ok(()));
    assert_eq!(
        signer.validate_at(&token, Uuid::new_v4(), issued_at),
        Err(RetryTokenError::Invalid)
    );
    assert_eq!(
        signer.validate_at(&token, request, issued_at + time::Duration::seconds(61)),
        Err(RetryTokenError::Expired)
    );

    let limiter = RetryLimiter::default();
    let now = Instant::now();
    let window = Duration::from_secs(60);
    let id = request.to_string();
    assert!(limiter.allow(&id, now, window));
    assert!(!limiter.allow(&id, now + Duration::from_secs(1), window));
}

#[test]
fn tokens_for_the_same_request_differ() {
    let signer = RetryTokenSigner::new("secret").unwrap();
    let request = Uuid::new_v4();
    let first = signer.generate(request, Duration::from_secs(30)).unwrap();
    let second = signer.generate(request, Duration::from_secs(30)).unwrap();
    assert_ne!(first, second);
}

// ============================================================================
// SECTION: View State
// ============================================================================

#[test]
fn absent_view_state_is_tolerated() {
    let mut state: Option<&mut ViewState> = None;
    state.set_capability("core.users.list", true);
    state.add_missing_policy(MissingPolicy {
        domain: "global".to_string(),
        object: "core.users".to_string(),
        action: "list".to_string(),
    });
    assert!(!state.capability("core.users.list"));
    assert_eq!(state.capability_value("core.users.list"), None);
    assert!(
        state
            .suggest_diff(&MissingPolicy {
                domain: String::new(),
                object: "core.users".to_string(),
                action: "list".to_string(),
            })
            .is_empty()
    );
}

#[test]
fn missing_policies_keep_order_and_duplicates() {
    let mut state = ViewState::new("role:test", "global");
    let policy = MissingPolicy {
        domain: "global".to_string(),
        object: "core.users".to_string(),
        action: "read".to_string(),
    };
    state.add_missing_policy(policy.clone());
    state.add_missing_policy(policy.clone());
    assert_eq!(state.missing_policies, vec![policy.clone(), policy.clone()]);
    let suggestions = state.suggest_diff(&policy);
    assert_eq!(suggestions.len(), 1);
    assert_eq!(suggestions[0].subject, "role:test");
    assert_eq!(suggestions[0].effect, "allow");
    let wire = serde_json::to_value(&state).unwrap();
    assert!(wire.get("missingPolicies").is_some());
}

proptest! {
    #[test]
    fn capability_keys_collapse_case_and_whitespace(
        key in "[a-z]{1,8}\\.[a-z]{1,8}",
        writes in proptest::collection::vec(any::<bool>(), 1 .. 8),
        pad in 0_usize .. 3,
    ) {
        let mut state = ViewState::default();
        for (index, allowed) in writes.iter().enumerate() {
            let spelled = if index % 2 == 0 { key.to_uppercase() } else { key.clone() };
            state.set_capability(&format!("{}{spelled}{}", " ".repeat(pad), " ".repeat(pad)), *allowed);
        }
        let last = *writes.last().unwrap();
        prop_assert_eq!(state.capability_value(&key), Some(last));
        prop_assert_eq!(state.capability(&format!(" {} ", key.to_uppercase())), last);
        prop_assert_eq!(state.capabilities.len(), 1);
    }
}

// ============================================================================
// SECTION: Configuration
// ============================================================================

#[test]
fn environment_overrides_apply_after_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("authz.toml");
    fs::write(
        &path,
        r#"
[engine]
model_path = "file/model.toml"
policy_path = "file/policy.csv"
mode = "enforce"

[diagnostics]
retry_cooldown_secs = 5
"#,
    )
    .unwrap();
    let mut config = AuthzConfig::from_file(&path).unwrap();
    assert_eq!(config.engine.mode, EnforcementMode::Enforce);
    assert_eq!(config.diagnostics.retry_cooldown(), Duration::from_secs(5));
    assert_eq!(config.revision_path(), PathBuf::from("file/policy.csv.rev"));

    let env: HashMap<&str, &str> = HashMap::from([
        ("AUTHZ_MODE", "bogus"),
        ("AUTHZ_POLICY_PATH", "env/policy.csv"),
        ("AUTHZ_FLAG_CONFIG", "env/flags.yaml"),
        ("AUTHZ_MODEL_PATH", "  "),
    ]);
    config.apply_overrides(|key| env.get(key).map(|value| (*value).to_string()));
    assert_eq!(config.engine.model_path, PathBuf::from("file/model.toml"));
    assert_eq!(config.engine.policy_path, PathBuf::from("env/policy.csv"));
    assert_eq!(config.engine.flag_path, PathBuf::from("env/flags.yaml"));
    assert_eq!(config.engine.mode_override, Some(ModeSetting::Unknown("bogus".to_string())));
    assert_eq!(config.validate(), Ok(()));
}

#[test]
fn validation_names_the_missing_setting() {
    let mut config = AuthzConfig::default();
    config.engine.model_path = PathBuf::new();
    assert_eq!(
        config.validate(),
        Err(ConfigError::Invalid("authz: missing model path".to_string()))
    );
    let mut config = AuthzConfig::default();
    config.engine.flag_path = PathBuf::new();
    assert_eq!(
        config.validate(),
        Err(ConfigError::Invalid("authz: missing flag configuration path".to_string()))
    );
}

#[test]
fn unknown_config_fields_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("authz.toml");
    fs::write(&path, "[engine]\nmodle_path = \"typo\"\n").unwrap();
    assert!(matches!(AuthzConfig::from_file(&path), Err(ConfigError::Parse(_))));
}
