// crates/authz-bot/src/process.rs
// ============================================================================
// Module: External Commands
// Description: Cancellable child-process runner and the shutdown signal.
// Purpose: Run git and make in the repository root with operator-visible output.
// Dependencies: thiserror, tokio, tracing
// ============================================================================

//! ## Overview
//! [`CommandRunner`] spawns programs in the repository root with inherited
//! stdout/stderr. A running child is killed when [`Shutdown`] fires, and the
//! call returns [`CommandError::Cancelled`]. Cleanup paths use
//! [`CommandRunner::detached`] so they still run during shutdown.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::Path;
use std::path::PathBuf;
use std::process::ExitStatus;
use std::process::Stdio;

use thiserror::Error;
use tokio::process::Command;
use tokio::sync::watch;
use tracing::debug;
use tracing::warn;

// ============================================================================
// SECTION: Shutdown
// ============================================================================

/// Receiving side of the process-wide shutdown signal.
#[derive(Debug, Clone)]
pub struct Shutdown {
    /// Flag channel; `true` once shutdown was requested.
    receiver: watch::Receiver<bool>,
}

/// Sending side of the shutdown signal.
#[derive(Debug)]
pub struct ShutdownTrigger {
    /// Flag channel sender.
    sender: watch::Sender<bool>,
}

/// Creates a connected trigger and signal.
#[must_use]
pub fn shutdown_channel() -> (ShutdownTrigger, Shutdown) {
    let (sender, receiver) = watch::channel(false);
    (ShutdownTrigger { sender }, Shutdown { receiver })
}

impl ShutdownTrigger {
    /// Requests shutdown. Idempotent.
    pub fn trigger(&self) {
        self.sender.send_replace(true);
    }
}

impl Shutdown {
    /// Returns a signal that never fires.
    #[must_use]
    pub fn never() -> Self {
        let (_sender, receiver) = watch::channel(false);
        Self { receiver }
    }

    /// Returns true once shutdown was requested.
    #[must_use]
    pub fn is_triggered(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Completes when shutdown is requested.
    pub async fn triggered(&mut self) {
        loop {
            if *self.receiver.borrow_and_update() {
                return;
            }
            if self.receiver.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Command failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// The program could not be started or awaited.
    #[error("{0}")]
    Spawn(String),
    /// The program exited unsuccessfully.
    #[error("{0}")]
    Failed(String),
    /// Shutdown interrupted the program.
    #[error("command cancelled")]
    Cancelled,
}

// ============================================================================
// SECTION: Runner
// ============================================================================

/// Runs programs in a fixed working directory.
#[derive(Debug, Clone)]
pub struct CommandRunner {
    /// Working directory for every command.
    root: PathBuf,
    /// Signal that kills running children.
    shutdown: Shutdown,
}

impl CommandRunner {
    /// Creates a runner rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, shutdown: Shutdown) -> Self {
        Self { root: root.into(), shutdown }
    }

    /// Returns the working directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns a runner with the same root that ignores shutdown.
    #[must_use]
    pub fn detached(&self) -> Self {
        Self { root: self.root.clone(), shutdown: Shutdown::never() }
    }

    /// Runs `program` with inherited stdout/stderr.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError`] when the program cannot start, exits
    /// non-zero, or is cancelled.
    pub async fn run(&self, program: &str, args: &[&str]) -> Result<(), CommandError> {
        let label = describe(program, args);
        if self.shutdown.is_triggered() {
            return Err(CommandError::Cancelled);
        }
        debug!(command = %label, root = %self.root.display(), "running command");
        let mut child = self
            .command(program, args)
            .stdout(Stdio::inherit())
            .spawn()
            .map_err(|err| CommandError::Spawn(format!("{label}: {err}")))?;
        let mut shutdown = self.shutdown.clone();
        let outcome = tokio::select! {
            status = child.wait() => Some(status),
            () = shutdown.triggered() => None,
        };
        let Some(status) = outcome else {
            if let Err(err) = child.kill().await {
                warn!(command = %label, error = %err, "failed to kill cancelled command");
            }
            return Err(CommandError::Cancelled);
        };
        let status = status.map_err(|err| CommandError::Spawn(format!("{label}: {err}")))?;
        check_status(&label, status)
    }

    /// Runs `program` and returns its trimmed stdout.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError`] when the program cannot start, exits
    /// non-zero, or is cancelled.
    pub async fn output(&self, program: &str, args: &[&str]) -> Result<String, CommandError> {
        let label = describe(program, args);
        if self.shutdown.is_triggered() {
            return Err(CommandError::Cancelled);
        }
        let child = self
            .command(program, args)
            .stdout(Stdio::piped())
            .spawn()
            .map_err(|err| CommandError::Spawn(format!("{label}: {err}")))?;
        let mut shutdown = self.shutdown.clone();
        let output = tokio::select! {
            output = child.wait_with_output() => output,
            () = shutdown.triggered() => return Err(CommandError::Cancelled),
        }
        .map_err(|err| CommandError::Spawn(format!("{label}: {err}")))?;
        check_status(&label, output.status)?;
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Builds the base command.
    fn command(&self, program: &str, args: &[&str]) -> Command {
        let mut command = Command::new(program);
        command
            .args(args)
            .current_dir(&self.root)
            .stdin(Stdio::null())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        command
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Formats a command line for messages.
fn describe(program: &str, args: &[&str]) -> String {
    let mut label = String::from(program);
    for arg in args {
        label.push(' ');
        label.push_str(arg);
    }
    label
}

/// Maps a non-zero exit into [`CommandError::Failed`].
fn check_status(label: &str, status: ExitStatus) -> Result<(), CommandError> {
    if status.success() {
        return Ok(());
    }
    Err(CommandError::Failed(match status.code() {
        Some(code) => format!("{label} exited with status {code}"),
        None => format!("{label} was terminated by a signal"),
    }))
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, reason = "Test-only assertions and helpers are permitted.")]

    use super::*;

    #[test]
    fn describe_joins_arguments() {
        assert_eq!(describe("make", &["authz-pack"]), "make authz-pack");
    }

    #[tokio::test]
    async fn triggered_signal_refuses_new_commands() {
        let (trigger, shutdown) = shutdown_channel();
        let runner = CommandRunner::new(".", shutdown);
        trigger.trigger();
        assert_eq!(runner.run("true", &[]).await, Err(CommandError::Cancelled));
        assert!(!runner.detached().shutdown.is_triggered());
    }

    #[tokio::test]
    async fn missing_program_is_a_spawn_error() {
        let runner = CommandRunner::new(".", Shutdown::never());
        let err = runner.run("authz-bot-definitely-missing-program", &[]).await.unwrap_err();
        assert!(matches!(err, CommandError::Spawn(_)));
    }
}
