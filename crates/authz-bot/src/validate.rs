// crates/authz-bot/src/validate.rs
// ============================================================================
// Module: Policy Validation
// Description: Build-and-test gate run after a diff is applied.
// Purpose: Repack policy artifacts and run the authz test suite.
// Dependencies: async-trait, crate::process
// ============================================================================

//! ## Overview
//! [`MakeValidator`] runs `make authz-pack` and then `make authz-test` in the
//! repository root. The pack target regenerates the aggregated policy file
//! and its revision metadata, which the scheduler reads afterwards.

// ============================================================================
// SECTION: Imports
// ============================================================================

use async_trait::async_trait;

use crate::error::BotError;
use crate::process::CommandError;
use crate::process::CommandRunner;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Make targets, run in order.
pub const VALIDATION_TARGETS: [&str; 2] = ["authz-pack", "authz-test"];

// ============================================================================
// SECTION: Interface
// ============================================================================

/// Gate that must pass before a change is committed.
#[async_trait]
pub trait PolicyValidator: Send + Sync {
    /// Rebuilds artifacts and runs tests.
    ///
    /// # Errors
    ///
    /// Returns [`BotError::Validation`] when any step fails.
    async fn validate(&self) -> Result<(), BotError>;
}

/// [`PolicyValidator`] that runs make targets.
#[derive(Debug, Clone)]
pub struct MakeValidator {
    /// Runner rooted at the repository.
    runner: CommandRunner,
}

impl MakeValidator {
    /// Creates a validator over `runner`'s root.
    #[must_use]
    pub const fn new(runner: CommandRunner) -> Self {
        Self { runner }
    }
}

#[async_trait]
impl PolicyValidator for MakeValidator {
    async fn validate(&self) -> Result<(), BotError> {
        for target in VALIDATION_TARGETS {
            self.runner.run("make", &[target]).await.map_err(|err| match err {
                CommandError::Cancelled => BotError::Cancelled,
                other => BotError::Validation(other.to_string()),
            })?;
        }
        Ok(())
    }
}
