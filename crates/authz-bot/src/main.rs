// crates/authz-bot/src/main.rs
// ============================================================================
// Module: Authz Bot Entry Point
// Description: CLI for the policy bot polling loop and lock recovery.
// Purpose: Wire configuration, the SQLite repository and adapters into the bot.
// Dependencies: authz-bot, authz-core, authz-store-sqlite, clap, tokio, tracing-subscriber
// ============================================================================

//! ## Overview
//! `authz-bot` polls until SIGINT/SIGTERM. `--once` processes at most one
//! request and exits. `--force-release <id>` clears a wedged bot lock and
//! exits without reading the rest of the configuration. Logs are JSON lines
//! on stderr filtered by `RUST_LOG`.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::env;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use authz_bot::BotConfig;
use authz_bot::BotDependencies;
use authz_bot::BotError;
use authz_bot::BotSettings;
use authz_bot::CommandRunner;
use authz_bot::GitCli;
use authz_bot::GitHubClient;
use authz_bot::GitHubSettings;
use authz_bot::GitSettings;
use authz_bot::MakeValidator;
use authz_bot::PolicyBot;
use authz_bot::ShutdownTrigger;
use authz_bot::config::database_path;
use authz_bot::shutdown_channel;
use authz_core::PolicyChangeRepository;
use authz_core::runtime::FileRevisionProvider;
use authz_store_sqlite::SqlitePolicyChangeStore;
use authz_store_sqlite::SqliteStoreConfig;
use clap::Parser;
use tracing::error;
use tracing::info;
use tracing::warn;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

// ============================================================================
// SECTION: CLI
// ============================================================================

/// Command-line arguments.
#[derive(Parser, Debug)]
#[command(name = "authz-bot", about = "Apply approved authz policy drafts as pull requests")]
struct Cli {
    /// Process at most one request and exit.
    #[arg(long)]
    once: bool,
    /// Release the bot lock on the given request and exit.
    #[arg(long = "force-release", value_name = "REQUEST_ID")]
    force_release: Option<Uuid>,
}

// ============================================================================
// SECTION: Entry Point
// ============================================================================

/// Bot entry point returning an exit code.
#[tokio::main(flavor = "multi_thread")]
async fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "authz bot terminated");
            ExitCode::FAILURE
        }
    }
}

/// Dispatches the selected mode.
async fn run(cli: Cli) -> Result<(), BotError> {
    if let Some(id) = cli.force_release {
        return force_release(id).await;
    }

    let config = BotConfig::from_env()?;
    let store = open_store(&config.database_path)?;
    let (trigger, shutdown) = shutdown_channel();
    tokio::spawn(forward_signals(trigger));

    let runner = CommandRunner::new(&config.root_dir, shutdown.clone());
    let git = GitCli::new(
        runner.clone(),
        GitSettings {
            remote: config.remote_name.clone(),
            base_branch: config.base_branch.clone(),
            author_name: config.git_author_name.clone(),
            author_email: config.git_author_email.clone(),
        },
    );
    let code_host = GitHubClient::new(
        GitHubSettings {
            api_base: config.github_api.clone(),
            owner: config.repo_owner.clone(),
            name: config.repo_name.clone(),
            token: config.github_token.clone(),
            base_branch: config.base_branch.clone(),
        },
        shutdown.clone(),
    )?;
    let bot = PolicyBot::new(
        BotSettings::from_config(&config),
        BotDependencies {
            repository: Arc::new(store),
            revisions: Arc::new(FileRevisionProvider::new(config.revision_path.clone())),
            git: Arc::new(git),
            validator: Arc::new(MakeValidator::new(runner)),
            code_host: Arc::new(code_host),
        },
    );
    info!(
        root = %config.root_dir.display(),
        repo = %format!("{}/{}", config.repo_owner, config.repo_name),
        base = %config.base_branch,
        "authz bot configured"
    );
    bot.run(shutdown, cli.once).await;
    Ok(())
}

/// Clears the bot lock on `id`.
async fn force_release(id: Uuid) -> Result<(), BotError> {
    let store = open_store(&database_path(|key| env::var(key).ok()))?;
    tokio::task::spawn_blocking(move || store.force_release_bot_lock(id))
        .await
        .map_err(|err| BotError::Task(err.to_string()))??;
    info!(request_id = %id, "released bot lock");
    Ok(())
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Installs the JSON log subscriber.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().json().with_env_filter(filter).with_writer(std::io::stderr).init();
}

/// Opens the policy-change database.
fn open_store(path: &Path) -> Result<SqlitePolicyChangeStore, BotError> {
    SqlitePolicyChangeStore::new(&SqliteStoreConfig::new(path))
        .map_err(|err| BotError::Config(format!("policy change store: {err}")))
}

/// Triggers shutdown on the first SIGINT or SIGTERM.
async fn forward_signals(trigger: ShutdownTrigger) {
    tokio::select! {
        () = interrupt() => {}
        () = terminate() => {}
    }
    info!("shutdown requested");
    trigger.trigger();
}

/// Completes on Ctrl-C.
async fn interrupt() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "ctrl-c handler unavailable");
        std::future::pending::<()>().await;
    }
}

/// Completes on SIGTERM.
#[cfg(unix)]
async fn terminate() {
    use tokio::signal::unix::SignalKind;
    use tokio::signal::unix::signal;

    match signal(SignalKind::terminate()) {
        Ok(mut stream) => {
            stream.recv().await;
        }
        Err(err) => {
            warn!(error = %err, "sigterm handler unavailable");
            std::future::pending::<()>().await;
        }
    }
}

/// Never completes on platforms without SIGTERM.
#[cfg(not(unix))]
async fn terminate() {
    std::future::pending::<()>().await;
}
