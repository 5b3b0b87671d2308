// crates/authz-core/src/diagnostics/forbidden.rs
// ============================================================================
// Module: Forbidden Payload Builder
// Description: Structured denial response assembly.
// Purpose: Give denied callers the exact object/action and the missing policies.
// Dependencies: http, serde, serde_json, url
// ============================================================================

//! ## Overview
//! [`ForbiddenPayloadBuilder::build`] maps a denied call plus the request view
//! state to the stable JSON body served with HTTP 403. The mapping is
//! deterministic for a given input; the revision and request id are optional
//! enrichments that are omitted when unavailable.

// ============================================================================
// SECTION: Imports
// ============================================================================

use http::HeaderMap;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use serde_json::json;
use url::form_urlencoded;
use uuid::Uuid;

use crate::core::identifiers::domain_from_tenant;
use crate::core::identifiers::normalize_action;
use crate::diagnostics::viewstate::MissingPolicy;
use crate::diagnostics::viewstate::SUGGESTION_EFFECT;
use crate::diagnostics::viewstate::ViewState;
use crate::interfaces::RevisionProvider;
use crate::runtime::config::DEFAULT_DEBUG_PATH;
use crate::runtime::config::DEFAULT_REQUEST_ID_HEADER;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Value of the `error` field.
pub const FORBIDDEN_ERROR: &str = "forbidden";

// ============================================================================
// SECTION: Types
// ============================================================================

/// Wire body for a denied call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForbiddenPayload {
    /// Always `forbidden`.
    pub error: String,
    /// Human-readable summary: `Forbidden: <object> <action>.`.
    pub message: String,
    /// Denied object.
    pub object: String,
    /// Denied action, normalized.
    pub action: String,
    /// Subject from the view state; may be empty.
    pub subject: String,
    /// Domain the decision was made in.
    pub domain: String,
    /// Denials recorded during the request.
    pub missing_policies: Vec<MissingPolicy>,
    /// Debug endpoint URL for this decision.
    pub debug_url: String,
    /// Deployed policy revision.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_revision: Option<String>,
    /// Request id from the request headers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl ForbiddenPayload {
    /// Returns a JSON patch adding an allow rule for every missing policy.
    ///
    /// The patch can be submitted directly as a draft diff.
    #[must_use]
    pub fn suggest_diff(&self) -> Value {
        let ops: Vec<Value> = self
            .missing_policies
            .iter()
            .map(|policy| {
                let domain =
                    if policy.domain.is_empty() { &self.domain } else { &policy.domain };
                json!({
                    "op": "add",
                    "path": "/p/-",
                    "value": [self.subject, domain, policy.object, policy.action, SUGGESTION_EFFECT],
                })
            })
            .collect();
        Value::Array(ops)
    }
}

/// Request-side inputs for the builder.
#[derive(Debug, Clone, Copy)]
pub struct ForbiddenContext<'a> {
    /// Inbound request headers.
    pub headers: &'a HeaderMap,
    /// Domain resolved by the host for this request, if any.
    pub domain: Option<&'a str>,
    /// Tenant of the request, if any.
    pub tenant: Option<Uuid>,
}

/// Builds [`ForbiddenPayload`] values.
#[derive(Clone, Copy)]
pub struct ForbiddenPayloadBuilder<'a> {
    /// Header carrying the request id.
    request_id_header: &'a str,
    /// Debug endpoint path.
    debug_path: &'a str,
    /// Revision source; absent disables `base_revision`.
    revisions: Option<&'a dyn RevisionProvider>,
}

impl Default for ForbiddenPayloadBuilder<'_> {
    fn default() -> Self {
        Self {
            request_id_header: DEFAULT_REQUEST_ID_HEADER,
            debug_path: DEFAULT_DEBUG_PATH,
            revisions: None,
        }
    }
}

impl<'a> ForbiddenPayloadBuilder<'a> {
    /// Creates a builder with default header and debug path.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the request id header.
    #[must_use]
    pub const fn with_request_id_header(mut self, header: &'a str) -> Self {
        self.request_id_header = header;
        self
    }

    /// Sets the debug endpoint path.
    #[must_use]
    pub const fn with_debug_path(mut self, path: &'a str) -> Self {
        self.debug_path = path;
        self
    }

    /// Sets the revision source.
    #[must_use]
    pub fn with_revisions(mut self, revisions: &'a dyn RevisionProvider) -> Self {
        self.revisions = Some(revisions);
        self
    }

    /// Assembles the payload for a denied `object`/`action`.
    #[must_use]
    pub fn build(
        &self,
        context: &ForbiddenContext<'_>,
        state: Option<&ViewState>,
        object: &str,
        action: &str,
    ) -> ForbiddenPayload {
        let action = normalize_action(action);
        let object = object.trim().to_string();
        let domain = resolve_domain(context, state);
        let subject = state.map(|state| state.subject.clone()).unwrap_or_default();
        let mut missing_policies =
            state.map(|state| state.missing_policies.clone()).unwrap_or_default();
        if missing_policies.is_empty() && !object.is_empty() {
            missing_policies.push(MissingPolicy {
                domain: domain.clone(),
                object: object.clone(),
                action: action.clone(),
            });
        }
        let debug_url = self.debug_url(&subject, &domain, &object, &action);
        ForbiddenPayload {
            error: FORBIDDEN_ERROR.to_string(),
            message: format!("Forbidden: {object} {action}."),
            object,
            action,
            subject,
            domain,
            missing_policies,
            debug_url,
            base_revision: self
                .revisions
                .and_then(|revisions| revisions.current().ok())
                .map(|metadata| metadata.revision),
            request_id: self.request_id(context.headers),
        }
    }

    /// Builds the debug URL; the bare path when the subject is unknown.
    fn debug_url(&self, subject: &str, domain: &str, object: &str, action: &str) -> String {
        if subject.is_empty() || object.is_empty() {
            return self.debug_path.to_string();
        }
        let mut query = form_urlencoded::Serializer::new(String::new());
        query.append_pair("action", action);
        if !domain.is_empty() {
            query.append_pair("domain", domain);
        }
        query.append_pair("object", object);
        query.append_pair("subject", subject);
        format!("{}?{}", self.debug_path, query.finish())
    }

    /// Reads the request id from the configured header, then the default one.
    fn request_id(&self, headers: &HeaderMap) -> Option<String> {
        [self.request_id_header, DEFAULT_REQUEST_ID_HEADER]
            .into_iter()
            .filter(|name| !name.trim().is_empty())
            .find_map(|name| {
                headers
                    .get(name.trim())
                    .and_then(|value| value.to_str().ok())
                    .map(str::trim)
                    .filter(|value| !value.is_empty())
                    .map(str::to_string)
            })
    }
}

/// View-state tenant, then host domain, then the tenant-derived domain.
fn resolve_domain(context: &ForbiddenContext<'_>, state: Option<&ViewState>) -> String {
    if let Some(tenant) = state.map(|state| state.tenant.trim()).filter(|tenant| !tenant.is_empty())
    {
        return tenant.to_string();
    }
    if let Some(domain) = context.domain.map(str::trim).filter(|domain| !domain.is_empty()) {
        return domain.to_string();
    }
    domain_from_tenant(context.tenant.unwrap_or_else(Uuid::nil))
}

// ============================================================================
// SECTION: Tests
// ============================================================================
