// crates/authz-bot/tests/github_client.rs
// ============================================================================
// Module: Code Host Client Tests
// Description: Drive GitHubClient against a local fake API.
// Purpose: Validate the pull request payload, headers and 422 fallback.
// Dependencies: authz-bot, serde_json, tiny_http, tokio
// ============================================================================

//! ## Overview
//! A `tiny_http` server stands in for the GitHub REST API and records every
//! request it receives, so tests can assert both sides of the exchange.

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

use std::thread;

use authz_bot::BotError;
use authz_bot::CodeHost;
use authz_bot::GitHubClient;
use authz_bot::GitHubSettings;
use authz_bot::PullRequestDraft;
use authz_bot::Shutdown;
use serde_json::Value;
use tiny_http::Response;
use tiny_http::Server;

// ============================================================================
// SECTION: Helpers
// ============================================================================

struct Recorded {
    method: String,
    url: String,
    headers: Vec<(String, String)>,
    body: String,
}

impl Recorded {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers.iter().find(|(field, _)| field == name).map(|(_, value)| value.as_str())
    }
}

/// Serves `responses` in order, then returns what was received.
fn spawn_server(responses: Vec<(u16, &'static str)>) -> (String, thread::JoinHandle<Vec<Recorded>>) {
    let server = Server::http("127.0.0.1:0").unwrap();
    let addr = server.server_addr().to_ip().unwrap();
    let handle = thread::spawn(move || {
        let mut recorded = Vec::new();
        for (status, body) in responses {
            let mut request = server.recv().unwrap();
            let mut text = String::new();
            request.as_reader().read_to_string(&mut text).unwrap();
            recorded.push(Recorded {
                method: request.method().to_string(),
                url: request.url().to_string(),
                headers: request
                    .headers()
                    .iter()
                    .map(|header| {
                        (header.field.as_str().as_str().to_ascii_lowercase(), header.value.as_str().to_string())
                    })
                    .collect(),
                body: text,
            });
            request.respond(Response::from_string(body).with_status_code(status)).unwrap();
        }
        recorded
    });
    (format!("http://{addr}"), handle)
}

fn client(api_base: String) -> GitHubClient {
    GitHubClient::new(
        GitHubSettings {
            api_base,
            owner: "acme".to_string(),
            name: "platform".to_string(),
            token: "secret-token".to_string(),
            base_branch: "main".to_string(),
        },
        Shutdown::never(),
    )
    .unwrap()
}

fn draft() -> PullRequestDraft {
    PullRequestDraft {
        title: "Authz policy update 42".to_string(),
        branch: "authz/bot/42".to_string(),
        body: "## Policy Draft 42\n".to_string(),
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[tokio::test]
async fn posts_pull_request_with_headers_and_payload() {
    let (base, handle) =
        spawn_server(vec![(201, r#"{"html_url":"https://github.test/acme/platform/pull/7","number":7}"#)]);
    let url = client(format!("{base}/")).open_pull_request(&draft()).await.unwrap();
    assert_eq!(url, "https://github.test/acme/platform/pull/7");

    let recorded = handle.join().unwrap();
    assert_eq!(recorded.len(), 1);
    let post = &recorded[0];
    assert_eq!(post.method, "POST");
    assert_eq!(post.url, "/repos/acme/platform/pulls");
    assert_eq!(post.header("authorization"), Some("Bearer secret-token"));
    assert_eq!(post.header("accept"), Some("application/vnd.github+json"));
    assert_eq!(post.header("user-agent"), Some("authzbot"));
    assert_eq!(post.header("content-type"), Some("application/json"));
    let payload: Value = serde_json::from_str(&post.body).unwrap();
    assert_eq!(payload["title"], "Authz policy update 42");
    assert_eq!(payload["head"], "acme:authz/bot/42");
    assert_eq!(payload["base"], "main");
    assert_eq!(payload["body"], "## Policy Draft 42\n");
}

#[tokio::test]
async fn unprocessable_entity_reuses_the_open_pull_request() {
    let (base, handle) = spawn_server(vec![
        (422, r#"{"message":"A pull request already exists for acme:authz/bot/42."}"#),
        (200, r#"[{"html_url":"https://github.test/acme/platform/pull/3"}]"#),
    ]);
    let url = client(base).open_pull_request(&draft()).await.unwrap();
    assert_eq!(url, "https://github.test/acme/platform/pull/3");

    let recorded = handle.join().unwrap();
    assert_eq!(recorded[1].method, "GET");
    assert_eq!(recorded[1].url, "/repos/acme/platform/pulls?head=acme%3Aauthz%2Fbot%2F42&state=open");
    assert_eq!(recorded[1].header("authorization"), Some("Bearer secret-token"));
}

#[tokio::test]
async fn unprocessable_entity_without_existing_pull_request_fails() {
    let (base, handle) = spawn_server(vec![(422, r#"{"message":"Validation Failed"}"#), (200, "[]")]);
    let err = client(base).open_pull_request(&draft()).await.unwrap_err();
    let BotError::CodeHost(message) = &err else {
        panic!("expected code host error, got {err:?}");
    };
    assert!(message.contains("status 422"));
    assert!(message.contains("Validation Failed"));
    handle.join().unwrap();
}

#[tokio::test]
async fn server_errors_carry_the_body_snippet() {
    let (base, handle) = spawn_server(vec![(500, "  upstream exploded  ")]);
    let err = client(base).open_pull_request(&draft()).await.unwrap_err();
    assert_eq!(
        err,
        BotError::CodeHost("create pull request failed: status 500: upstream exploded".to_string())
    );
    handle.join().unwrap();
}

#[tokio::test]
async fn success_without_url_is_an_error() {
    let (base, handle) = spawn_server(vec![(201, r#"{"number":9}"#)]);
    let err = client(base).open_pull_request(&draft()).await.unwrap_err();
    assert_eq!(err, BotError::CodeHost("empty pull request url".to_string()));
    handle.join().unwrap();
}
