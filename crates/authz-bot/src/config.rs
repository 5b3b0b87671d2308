// crates/authz-bot/src/config.rs
// ============================================================================
// Module: Bot Configuration
// Description: Environment-driven settings for the policy bot.
// Purpose: Resolve repository layout, git identity and code-host credentials.
// Dependencies: url, crate::error
// ============================================================================

//! ## Overview
//! [`BotConfig`] is read from `AUTHZ_BOT_*` variables. Values are trimmed and
//! blank values fall back to defaults. Repository facts that are not set
//! explicitly (root, slug, base branch) are probed from git once at startup.
//! Relative policy paths resolve against the repository root.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::env;
use std::fs;
use std::path::Path;
use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use url::Url;

use crate::error::BotError;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default code-host API base.
pub const DEFAULT_GITHUB_API: &str = "https://api.github.com";
/// Default policy fragment directory.
const DEFAULT_POLICY_DIR: &str = "config/access/policies";
/// Default aggregated policy file.
const DEFAULT_POLICY_FILE: &str = "config/access/policy.csv";
/// Default repository database.
pub const DEFAULT_DATABASE: &str = "var/authz/policy_changes.sqlite3";
/// Default polling interval.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);
/// Default feature branch prefix.
const DEFAULT_BRANCH_PREFIX: &str = "authz/bot/";
/// Default git remote.
const DEFAULT_REMOTE: &str = "origin";
/// Default base branch when HEAD cannot be read.
const DEFAULT_BASE_BRANCH: &str = "main";
/// Default commit author name.
const DEFAULT_AUTHOR: &str = "Authz Bot";
/// Default commit author email.
const DEFAULT_EMAIL: &str = "authz-bot@example.com";

// ============================================================================
// SECTION: Types
// ============================================================================

/// Runtime settings for the bot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BotConfig {
    /// Lock owner identity.
    pub locker_id: String,
    /// Delay between polling iterations.
    pub poll_interval: Duration,
    /// Repository root; commands run here.
    pub root_dir: PathBuf,
    /// Policy fragment directory.
    pub policy_dir: PathBuf,
    /// Aggregated policy file.
    pub policy_path: PathBuf,
    /// Revision metadata file.
    pub revision_path: PathBuf,
    /// Repository database.
    pub database_path: PathBuf,
    /// Feature branch prefix.
    pub branch_prefix: String,
    /// Git remote name.
    pub remote_name: String,
    /// Branch pull requests target.
    pub base_branch: String,
    /// Repository owner on the code host.
    pub repo_owner: String,
    /// Repository name on the code host.
    pub repo_name: String,
    /// Commit author name.
    pub git_author_name: String,
    /// Commit author email.
    pub git_author_email: String,
    /// Code-host API token.
    pub github_token: String,
    /// Code-host API base URL.
    pub github_api: String,
}

impl BotConfig {
    /// Loads settings from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`BotError::Config`] when the token is missing or the repo slug
    /// cannot be resolved.
    pub fn from_env() -> Result<Self, BotError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Loads settings through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns [`BotError::Config`] when the token is missing or the repo slug
    /// cannot be resolved.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, BotError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let value = |key: &str| lookup(key).map(|raw| raw.trim().to_string()).filter(|raw| !raw.is_empty());
        let root_dir = discover_repo_root(value("AUTHZ_BOT_REPO_DIR"))?;
        let policy_file = value("AUTHZ_BOT_POLICY_FILE").unwrap_or_else(|| DEFAULT_POLICY_FILE.to_string());
        let revision_file = value("AUTHZ_BOT_REVISION_FILE").unwrap_or_else(|| format!("{policy_file}.rev"));
        let remote_name = value("AUTHZ_BOT_GIT_REMOTE").unwrap_or_else(|| DEFAULT_REMOTE.to_string());
        let (repo_owner, repo_name) = match value("AUTHZ_BOT_REPO_SLUG") {
            Some(slug) => split_slug(&slug)?,
            None => parse_remote_url(&remote_url(&root_dir, &remote_name)?)?,
        };
        let base_branch = value("AUTHZ_BOT_BASE_BRANCH")
            .or_else(|| current_branch(&root_dir))
            .unwrap_or_else(|| DEFAULT_BASE_BRANCH.to_string());
        let poll_interval = value("AUTHZ_BOT_POLL_INTERVAL")
            .and_then(|raw| parse_duration(&raw))
            .unwrap_or(DEFAULT_POLL_INTERVAL);
        let github_token = value("AUTHZ_BOT_GITHUB_TOKEN")
            .ok_or_else(|| BotError::Config("AUTHZ_BOT_GITHUB_TOKEN is required".to_string()))?;

        Ok(Self {
            locker_id: value("AUTHZ_BOT_LOCKER").unwrap_or_else(default_locker_id),
            poll_interval,
            policy_dir: absolute(
                &root_dir,
                &value("AUTHZ_BOT_POLICY_DIR").unwrap_or_else(|| DEFAULT_POLICY_DIR.to_string()),
            ),
            policy_path: absolute(&root_dir, &policy_file),
            revision_path: absolute(&root_dir, &revision_file),
            database_path: database_path(&lookup),
            branch_prefix: value("AUTHZ_BOT_GIT_BRANCH_PREFIX")
                .unwrap_or_else(|| DEFAULT_BRANCH_PREFIX.to_string()),
            remote_name,
            base_branch,
            repo_owner,
            repo_name,
            git_author_name: value("AUTHZ_BOT_GIT_AUTHOR").unwrap_or_else(|| DEFAULT_AUTHOR.to_string()),
            git_author_email: value("AUTHZ_BOT_GIT_EMAIL").unwrap_or_else(|| DEFAULT_EMAIL.to_string()),
            github_token,
            github_api: value("AUTHZ_BOT_GITHUB_API").unwrap_or_else(|| DEFAULT_GITHUB_API.to_string()),
            root_dir,
        })
    }
}

/// Resolves the repository database path without the rest of the config.
///
/// The force-release path needs only the database, so it skips the token
/// and slug requirements.
pub fn database_path<F>(lookup: F) -> PathBuf
where
    F: Fn(&str) -> Option<String>,
{
    lookup("AUTHZ_BOT_DATABASE")
        .map(|raw| raw.trim().to_string())
        .filter(|raw| !raw.is_empty())
        .map_or_else(|| PathBuf::from(DEFAULT_DATABASE), PathBuf::from)
}

// ============================================================================
// SECTION: Parsing
// ============================================================================

/// Parses `30s`, `5m`, `250ms`, `1h` or a bare number of seconds.
#[must_use]
pub fn parse_duration(raw: &str) -> Option<Duration> {
    let raw = raw.trim();
    let split = raw.find(|ch: char| !ch.is_ascii_digit()).unwrap_or(raw.len());
    let (digits, unit) = raw.split_at(split);
    let amount: u64 = digits.parse().ok()?;
    match unit.trim() {
        "" | "s" => Some(Duration::from_secs(amount)),
        "ms" => Some(Duration::from_millis(amount)),
        "m" => amount.checked_mul(60).map(Duration::from_secs),
        "h" => amount.checked_mul(3600).map(Duration::from_secs),
        _ => None,
    }
}

/// Splits `owner/name`.
///
/// # Errors
///
/// Returns [`BotError::Config`] unless the slug has exactly two parts.
pub fn split_slug(slug: &str) -> Result<(String, String), BotError> {
    let parts: Vec<&str> = slug.trim_matches('/').split('/').collect();
    match parts.as_slice() {
        [owner, name] if !owner.is_empty() && !name.is_empty() => {
            Ok(((*owner).to_string(), (*name).to_string()))
        }
        _ => Err(BotError::Config(format!("invalid repo slug `{slug}`"))),
    }
}

/// Extracts `(owner, name)` from an ssh, `ssh://` or http(s) remote URL.
///
/// # Errors
///
/// Returns [`BotError::Config`] when the URL carries no `owner/name` path.
pub fn parse_remote_url(raw: &str) -> Result<(String, String), BotError> {
    let trimmed = raw.trim();
    let trimmed = trimmed.strip_suffix(".git").unwrap_or(trimmed);
    if trimmed.contains("://") {
        let url = Url::parse(trimmed)
            .map_err(|err| BotError::Config(format!("invalid remote url `{raw}`: {err}")))?;
        return split_slug(url.path());
    }
    if let Some((host, path)) = trimmed.split_once(':')
        && host.contains('@')
    {
        return split_slug(path);
    }
    split_slug(trimmed)
}

// ============================================================================
// SECTION: Discovery
// ============================================================================

/// Resolves the repository root: override, git top-level, then the cwd.
fn discover_repo_root(override_dir: Option<String>) -> Result<PathBuf, BotError> {
    if let Some(dir) = override_dir {
        let dir = PathBuf::from(dir);
        if dir.is_absolute() {
            return Ok(dir);
        }
        let cwd = env::current_dir().map_err(|err| BotError::Config(err.to_string()))?;
        return Ok(cwd.join(dir));
    }
    if let Some(top) = git_output(None, &["rev-parse", "--show-toplevel"]) {
        return Ok(PathBuf::from(top));
    }
    env::current_dir().map_err(|err| BotError::Config(err.to_string()))
}

/// Reads the URL of `remote`.
fn remote_url(root: &Path, remote: &str) -> Result<String, BotError> {
    let key = format!("remote.{remote}.url");
    git_output(Some(root), &["config", &key])
        .ok_or_else(|| BotError::Config(format!("failed to read remote {remote} url")))
}

/// Reads the checked-out branch name.
fn current_branch(root: &Path) -> Option<String> {
    git_output(Some(root), &["rev-parse", "--abbrev-ref", "HEAD"])
}

/// Runs a short git query synchronously; startup only.
fn git_output(root: Option<&Path>, args: &[&str]) -> Option<String> {
    let mut command = Command::new("git");
    if let Some(root) = root {
        command.arg("-C").arg(root);
    }
    let output = command.args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!text.is_empty()).then_some(text)
}

/// Returns `<hostname>-<pid>`.
fn default_locker_id() -> String {
    let host = env::var("HOSTNAME")
        .ok()
        .or_else(|| fs::read_to_string("/etc/hostname").ok())
        .map(|host| host.trim().to_string())
        .filter(|host| !host.is_empty())
        .unwrap_or_else(|| "authz-bot".to_string());
    format!("{host}-{}", std::process::id())
}

/// Joins relative paths onto `root`.
fn absolute(root: &Path, path: &str) -> PathBuf {
    let path = Path::new(path);
    if path.is_absolute() { path.to_path_buf() } else { root.join(path) }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, reason = "Test-only assertions and helpers are permitted.")]

    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            pairs.iter().map(|(key, value)| ((*key).to_string(), (*value).to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn durations_accept_common_units() {
        assert_eq!(parse_duration("30s"), Some(Duration::from_secs(30)));
        assert_eq!(parse_duration("5m"), Some(Duration::from_secs(300)));
        assert_eq!(parse_duration("250ms"), Some(Duration::from_millis(250)));
        assert_eq!(parse_duration("2h"), Some(Duration::from_secs(7200)));
        assert_eq!(parse_duration("45"), Some(Duration::from_secs(45)));
        assert_eq!(parse_duration("soon"), None);
        assert_eq!(parse_duration("5 days"), None);
    }

    #[test]
    fn remote_urls_yield_owner_and_name() {
        let expected = ("acme".to_string(), "platform".to_string());
        assert_eq!(parse_remote_url("git@github.com:acme/platform.git").unwrap(), expected);
        assert_eq!(parse_remote_url("ssh://git@github.com/acme/platform.git").unwrap(), expected);
        assert_eq!(parse_remote_url("https://github.com/acme/platform").unwrap(), expected);
        assert_eq!(parse_remote_url("http://git.internal/acme/platform.git").unwrap(), expected);
        assert_eq!(parse_remote_url("acme/platform").unwrap(), expected);
        assert!(parse_remote_url("https://github.com/acme").is_err());
        assert!(split_slug("a/b/c").is_err());
    }

    #[test]
    fn explicit_environment_skips_git_probes() {
        let config = BotConfig::from_lookup(lookup(&[
            ("AUTHZ_BOT_REPO_DIR", "/srv/repo"),
            ("AUTHZ_BOT_REPO_SLUG", "acme/platform"),
            ("AUTHZ_BOT_BASE_BRANCH", "develop"),
            ("AUTHZ_BOT_GITHUB_TOKEN", " secret "),
            ("AUTHZ_BOT_POLL_INTERVAL", "250ms"),
            ("AUTHZ_BOT_LOCKER", "worker-1"),
            ("AUTHZ_BOT_POLICY_FILE", "/etc/authz/policy.csv"),
        ]))
        .unwrap();
        assert_eq!(config.root_dir, PathBuf::from("/srv/repo"));
        assert_eq!(config.policy_dir, PathBuf::from("/srv/repo/config/access/policies"));
        assert_eq!(config.policy_path, PathBuf::from("/etc/authz/policy.csv"));
        assert_eq!(config.revision_path, PathBuf::from("/etc/authz/policy.csv.rev"));
        assert_eq!(config.database_path, PathBuf::from(DEFAULT_DATABASE));
        assert_eq!(config.base_branch, "develop");
        assert_eq!((config.repo_owner.as_str(), config.repo_name.as_str()), ("acme", "platform"));
        assert_eq!(config.github_token, "secret");
        assert_eq!(config.github_api, DEFAULT_GITHUB_API);
        assert_eq!(config.poll_interval, Duration::from_millis(250));
        assert_eq!(config.locker_id, "worker-1");
        assert_eq!(config.branch_prefix, "authz/bot/");
        assert_eq!(config.git_author_name, "Authz Bot");
        assert_eq!(config.git_author_email, "authz-bot@example.com");
    }

    #[test]
    fn missing_token_is_a_config_error() {
        let err = BotConfig::from_lookup(lookup(&[
            ("AUTHZ_BOT_REPO_DIR", "/srv/repo"),
            ("AUTHZ_BOT_REPO_SLUG", "acme/platform"),
            ("AUTHZ_BOT_BASE_BRANCH", "main"),
            ("AUTHZ_BOT_GITHUB_TOKEN", "   "),
        ]))
        .unwrap_err();
        assert_eq!(err, BotError::Config("AUTHZ_BOT_GITHUB_TOKEN is required".to_string()));
    }

    #[test]
    fn database_path_defaults_and_overrides() {
        assert_eq!(database_path(lookup(&[])), PathBuf::from(DEFAULT_DATABASE));
        assert_eq!(
            database_path(lookup(&[("AUTHZ_BOT_DATABASE", "/tmp/changes.sqlite3")])),
            PathBuf::from("/tmp/changes.sqlite3")
        );
    }

    #[test]
    fn default_locker_carries_the_pid() {
        assert!(default_locker_id().ends_with(&format!("-{}", std::process::id())));
    }
}
