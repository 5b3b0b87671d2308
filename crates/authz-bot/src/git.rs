// crates/authz-bot/src/git.rs
// ============================================================================
// Module: Git Workspace
// Description: Branch preparation, staging, commit and push via the git CLI.
// Purpose: Confine each request's file edits to a throwaway feature branch.
// Dependencies: async-trait, tracing, crate::process
// ============================================================================

//! ## Overview
//! [`GitWorkspace`] is the seam the scheduler drives. [`GitCli`] implements
//! it by shelling out to `git` in the repository root. A prepared branch
//! always starts from a hard reset to `<remote>/<base>`, and
//! [`GitWorkspace::cleanup_branch`] returns to the base branch and deletes
//! the feature branch even during shutdown.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::Path;
use std::path::PathBuf;

use async_trait::async_trait;
use tracing::warn;

use crate::error::BotError;
use crate::process::CommandError;
use crate::process::CommandRunner;

// ============================================================================
// SECTION: Interface
// ============================================================================

/// Version-control operations the bot needs.
#[async_trait]
pub trait GitWorkspace: Send + Sync {
    /// Checks out a fresh `branch` from the remote base branch.
    ///
    /// # Errors
    ///
    /// Returns [`BotError::Git`] when the tree is dirty or a command fails.
    async fn prepare_branch(&self, branch: &str) -> Result<(), BotError>;

    /// Switches back to the base branch and deletes `branch`. Best effort.
    async fn cleanup_branch(&self, branch: &str);

    /// Stages `paths`.
    ///
    /// # Errors
    ///
    /// Returns [`BotError::Git`] when staging fails.
    async fn stage(&self, paths: &[PathBuf]) -> Result<(), BotError>;

    /// Commits the staged changes.
    ///
    /// # Errors
    ///
    /// Returns [`BotError::Git`] when the commit fails.
    async fn commit(&self, message: &str) -> Result<(), BotError>;

    /// Pushes `branch` to the remote.
    ///
    /// # Errors
    ///
    /// Returns [`BotError::Git`] when the push fails.
    async fn push(&self, branch: &str) -> Result<(), BotError>;
}

// ============================================================================
// SECTION: Git CLI
// ============================================================================

/// Committer identity and remote coordinates for [`GitCli`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitSettings {
    /// Remote name.
    pub remote: String,
    /// Base branch.
    pub base_branch: String,
    /// Commit author name.
    pub author_name: String,
    /// Commit author email.
    pub author_email: String,
}

/// [`GitWorkspace`] backed by the `git` binary.
#[derive(Debug, Clone)]
pub struct GitCli {
    /// Runner rooted at the repository.
    runner: CommandRunner,
    /// Remote and identity settings.
    settings: GitSettings,
}

impl GitCli {
    /// Creates a git workspace over `runner`'s root.
    #[must_use]
    pub const fn new(runner: CommandRunner, settings: GitSettings) -> Self {
        Self { runner, settings }
    }

    /// Runs one git command.
    async fn git(&self, args: &[&str]) -> Result<(), BotError> {
        self.runner.run("git", args).await.map_err(git_error)
    }

    /// Fails when `git status --porcelain` reports changes.
    async fn ensure_clean(&self) -> Result<(), BotError> {
        let status = self.runner.output("git", &["status", "--porcelain"]).await.map_err(git_error)?;
        if status.is_empty() {
            Ok(())
        } else {
            Err(BotError::Git("working tree is dirty".to_string()))
        }
    }
}

#[async_trait]
impl GitWorkspace for GitCli {
    async fn prepare_branch(&self, branch: &str) -> Result<(), BotError> {
        let remote = self.settings.remote.as_str();
        let base = self.settings.base_branch.as_str();
        self.ensure_clean().await?;
        self.git(&["fetch", remote, base]).await?;
        self.git(&["checkout", base]).await?;
        self.git(&["reset", "--hard", &format!("{remote}/{base}")]).await?;
        if let Err(BotError::Cancelled) = self.git(&["branch", "-D", branch]).await {
            return Err(BotError::Cancelled);
        }
        self.git(&["checkout", "-b", branch]).await?;
        self.git(&["config", "user.name", &self.settings.author_name]).await?;
        self.git(&["config", "user.email", &self.settings.author_email]).await
    }

    async fn cleanup_branch(&self, branch: &str) {
        let runner = self.runner.detached();
        let steps: [&[&str]; 2] =
            [&["checkout", self.settings.base_branch.as_str()], &["branch", "-D", branch]];
        for args in steps {
            if let Err(err) = runner.run("git", args).await {
                warn!(branch, error = %err, "git cleanup step failed");
            }
        }
    }

    async fn stage(&self, paths: &[PathBuf]) -> Result<(), BotError> {
        let relative: Vec<String> = paths
            .iter()
            .filter(|path| !path.as_os_str().is_empty())
            .map(|path| relative_to(self.runner.root(), path))
            .collect();
        if relative.is_empty() {
            return Ok(());
        }
        let mut args = vec!["add"];
        args.extend(relative.iter().map(String::as_str));
        self.git(&args).await
    }

    async fn commit(&self, message: &str) -> Result<(), BotError> {
        self.git(&["commit", "-m", message]).await
    }

    async fn push(&self, branch: &str) -> Result<(), BotError> {
        self.git(&["push", &self.settings.remote, branch]).await
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Maps a command failure into the git stage error.
fn git_error(err: CommandError) -> BotError {
    match err {
        CommandError::Cancelled => BotError::Cancelled,
        other => BotError::Git(other.to_string()),
    }
}

/// Returns `path` relative to `root` when it lies inside it.
fn relative_to(root: &Path, path: &Path) -> String {
    path.strip_prefix(root).unwrap_or(path).to_string_lossy().into_owned()
}

// ============================================================================
// SECTION: Tests
// ============================================================================
