// crates/authz-bot/src/lib.rs
// ============================================================================
// Module: Authz Bot
// Description: Worker that turns approved policy drafts into pull requests.
// Purpose: Expose the scheduler and its git, make and code-host adapters.
// Dependencies: authz-core, authz-policy-store, authz-store-sqlite, reqwest, tokio
// ============================================================================

//! ## Overview
//! The bot polls the policy-change repository for approved drafts. For each
//! one it applies the diff on a throwaway branch, runs the pack and test
//! gates, pushes, opens a pull request and records the reverse patch. The
//! adapters sit behind traits ([`GitWorkspace`], [`PolicyValidator`],
//! [`CodeHost`]) so the scheduler can be driven without git or a network.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod config;
pub mod error;
pub mod git;
pub mod github;
pub mod process;
pub mod scheduler;
pub mod validate;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use config::BotConfig;
pub use error::BotError;
pub use git::GitCli;
pub use git::GitSettings;
pub use git::GitWorkspace;
pub use github::CodeHost;
pub use github::GitHubClient;
pub use github::GitHubSettings;
pub use github::PullRequestDraft;
pub use process::CommandRunner;
pub use process::Shutdown;
pub use process::ShutdownTrigger;
pub use process::shutdown_channel;
pub use scheduler::BotDependencies;
pub use scheduler::BotSettings;
pub use scheduler::IterationOutcome;
pub use scheduler::PolicyBot;
pub use validate::MakeValidator;
pub use validate::PolicyValidator;
