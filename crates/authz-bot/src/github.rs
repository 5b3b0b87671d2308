// crates/authz-bot/src/github.rs
// ============================================================================
// Module: Code Host Client
// Description: Pull request creation against the GitHub REST API.
// Purpose: Turn a pushed feature branch into a reviewable pull request.
// Dependencies: async-trait, reqwest, serde, url, crate::process
// ============================================================================

//! ## Overview
//! [`GitHubClient`] posts to `{api}/repos/{owner}/{name}/pulls`. A `422`
//! usually means a pull request for the branch already exists, so the client
//! looks up the open pull request with the same head and reuses its URL.
//! Every call times out after 30 seconds and is abandoned on shutdown.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::RequestBuilder;
use reqwest::Response;
use reqwest::StatusCode;
use reqwest::header::ACCEPT;
use reqwest::header::AUTHORIZATION;
use reqwest::header::CONTENT_TYPE;
use reqwest::header::HeaderMap;
use reqwest::header::HeaderValue;
use reqwest::header::USER_AGENT;
use serde::Deserialize;
use serde::Serialize;
use tracing::debug;
use url::Url;

use crate::error::BotError;
use crate::process::Shutdown;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Per-call timeout.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
/// User agent sent with every call.
const USER_AGENT_VALUE: &str = "authzbot";
/// Media type the API expects.
const ACCEPT_VALUE: &str = "application/vnd.github+json";
/// Longest error body kept in messages.
const MAX_ERROR_BODY: usize = 512;

// ============================================================================
// SECTION: Interface
// ============================================================================

/// Pull request to open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequestDraft {
    /// Title line.
    pub title: String,
    /// Pushed feature branch.
    pub branch: String,
    /// Markdown body.
    pub body: String,
}

/// Hosting service that accepts pull requests.
#[async_trait]
pub trait CodeHost: Send + Sync {
    /// Opens (or finds) the pull request and returns its URL.
    ///
    /// # Errors
    ///
    /// Returns [`BotError::CodeHost`] when the host rejects the request.
    async fn open_pull_request(&self, draft: &PullRequestDraft) -> Result<String, BotError>;
}

// ============================================================================
// SECTION: GitHub Client
// ============================================================================

/// Repository coordinates and credentials for [`GitHubClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitHubSettings {
    /// API base URL.
    pub api_base: String,
    /// Repository owner.
    pub owner: String,
    /// Repository name.
    pub name: String,
    /// Bearer token.
    pub token: String,
    /// Branch pull requests target.
    pub base_branch: String,
}

/// Pull request creation payload.
#[derive(Debug, Serialize)]
struct CreatePullRequest<'a> {
    /// Title line.
    title: &'a str,
    /// `<owner>:<branch>`.
    head: &'a str,
    /// Target branch.
    base: &'a str,
    /// Markdown body.
    body: &'a str,
}

/// Subset of the pull request resource.
#[derive(Debug, Deserialize)]
struct PullRequestResource {
    /// Browser URL.
    #[serde(default)]
    html_url: String,
}

/// [`CodeHost`] for the GitHub REST API.
#[derive(Debug, Clone)]
pub struct GitHubClient {
    /// Repository settings with the API base trimmed.
    settings: GitHubSettings,
    /// HTTP client with the default headers installed.
    client: Client,
    /// Signal that abandons in-flight calls.
    shutdown: Shutdown,
}

impl GitHubClient {
    /// Builds a client.
    ///
    /// # Errors
    ///
    /// Returns [`BotError::Config`] when the token is not a valid header or
    /// the HTTP client cannot be built.
    pub fn new(mut settings: GitHubSettings, shutdown: Shutdown) -> Result<Self, BotError> {
        let trimmed_len = settings.api_base.trim_end_matches('/').len();
        settings.api_base.truncate(trimmed_len);
        let mut headers = HeaderMap::new();
        let bearer = HeaderValue::from_str(&format!("Bearer {}", settings.token))
            .map_err(|_| BotError::Config("invalid code host token".to_string()))?;
        headers.insert(AUTHORIZATION, bearer);
        headers.insert(ACCEPT, HeaderValue::from_static(ACCEPT_VALUE));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_VALUE));
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .default_headers(headers)
            .build()
            .map_err(|err| BotError::Config(format!("http client: {err}")))?;
        Ok(Self { settings, client, shutdown })
    }

    /// Returns `{api}/repos/{owner}/{name}/pulls`.
    fn pulls_endpoint(&self) -> String {
        format!("{}/repos/{}/{}/pulls", self.settings.api_base, self.settings.owner, self.settings.name)
    }

    /// Returns `<owner>:<branch>`.
    fn head(&self, branch: &str) -> String {
        format!("{}:{branch}", self.settings.owner)
    }

    /// Sends `request`, giving up on shutdown.
    async fn send(&self, request: RequestBuilder) -> Result<Response, BotError> {
        let mut shutdown = self.shutdown.clone();
        tokio::select! {
            response = request.send() => response.map_err(|err| BotError::CodeHost(err.to_string())),
            () = shutdown.triggered() => Err(BotError::Cancelled),
        }
    }

    /// Looks up the open pull request whose head is `branch`.
    async fn find_existing(&self, branch: &str) -> Result<Option<String>, BotError> {
        let head = self.head(branch);
        let url = Url::parse_with_params(&self.pulls_endpoint(), [("head", head.as_str()), ("state", "open")])
            .map_err(|err| BotError::CodeHost(format!("invalid pulls url: {err}")))?;
        let response = self.send(self.client.get(url)).await?;
        if response.status() != StatusCode::OK {
            return Err(BotError::CodeHost(format!("find pull request status {}", response.status())));
        }
        let existing: Vec<PullRequestResource> =
            response.json().await.map_err(|err| BotError::CodeHost(err.to_string()))?;
        Ok(existing.into_iter().map(|pull| pull.html_url).find(|url| !url.is_empty()))
    }
}

#[async_trait]
impl CodeHost for GitHubClient {
    async fn open_pull_request(&self, draft: &PullRequestDraft) -> Result<String, BotError> {
        let head = self.head(&draft.branch);
        let payload = CreatePullRequest {
            title: &draft.title,
            head: &head,
            base: &self.settings.base_branch,
            body: &draft.body,
        };
        let response = self.send(self.client.post(self.pulls_endpoint()).json(&payload)).await?;
        let status = response.status();
        if status == StatusCode::UNPROCESSABLE_ENTITY {
            match self.find_existing(&draft.branch).await {
                Ok(Some(url)) => {
                    debug!(branch = %draft.branch, url = %url, "reusing open pull request");
                    return Ok(url);
                }
                Err(BotError::Cancelled) => return Err(BotError::Cancelled),
                Ok(None) | Err(_) => {}
            }
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BotError::CodeHost(format!(
                "create pull request failed: status {}: {}",
                status.as_u16(),
                snippet(&body)
            )));
        }
        let created: PullRequestResource =
            response.json().await.map_err(|err| BotError::CodeHost(err.to_string()))?;
        if created.html_url.is_empty() {
            return Err(BotError::CodeHost("empty pull request url".to_string()));
        }
        Ok(created.html_url)
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Trims `body` and caps it at [`MAX_ERROR_BODY`] bytes on a char boundary.
fn snippet(body: &str) -> &str {
    let body = body.trim();
    if body.len() <= MAX_ERROR_BODY {
        return body;
    }
    let mut end = MAX_ERROR_BODY;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    &body[.. end]
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snippet_caps_long_bodies() {
        assert_eq!(snippet("  short \n"), "short");
        let long = "é".repeat(MAX_ERROR_BODY);
        let capped = snippet(&long);
        assert!(capped.len() <= MAX_ERROR_BODY);
        assert!(capped.chars().all(|ch| ch == 'é'));
    }
}
