//! CLI entry point for usagebar.
//!
//! This binary provides the `usagebar` command with subcommands for
//! signing in, signing out, and inspecting the stored credential.

mod cli;

use std::path::Path;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;
use usagebar_auth::{AuthConfig, TokenStore};

use crate::cli::{Cli, Commands};

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<ExitCode> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match cli.command {
        Commands::Login => init_tracing("info"),
        Commands::Logout | Commands::Status | Commands::Token => init_tracing("warn"),
    }

    let store = build_store(&cli.config, &cli.data_dir)?;

    match cli.command {
        Commands::Login => cmd_login(&store).await,
        Commands::Logout => cmd_logout(&store).await,
        Commands::Status => cmd_status(&store).await,
        Commands::Token => cmd_token(&store).await,
    }
}

// ---------------------------------------------------------------------------
// Subcommands
// ---------------------------------------------------------------------------

async fn cmd_login(store: &TokenStore) -> Result<ExitCode> {
    println!("Opening your browser to sign in...");

    match store.login().await {
        Ok(()) => {
            println!("Signed in.");
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            eprintln!("Sign-in failed: {}", e.user_message());
            Ok(ExitCode::FAILURE)
        }
    }
}

async fn cmd_logout(store: &TokenStore) -> Result<ExitCode> {
    store.logout().await;
    println!("Signed out.");
    Ok(ExitCode::SUCCESS)
}

async fn cmd_status(store: &TokenStore) -> Result<ExitCode> {
    let authenticated = store.is_authenticated().await;

    println!();
    println!("  usagebar Status");
    println!("  ===============");
    println!();

    match store.expires_at().await {
        Some(expires_at) => {
            let state = if authenticated { "SIGNED IN" } else { "EXPIRED" };
            println!("  Session:          {state}");
            println!("  Token expires:    {}", format_expiry(expires_at));
        }
        None => println!("  Session:          SIGNED OUT (run `usagebar login`)"),
    }

    println!();
    Ok(ExitCode::SUCCESS)
}

async fn cmd_token(store: &TokenStore) -> Result<ExitCode> {
    match store.get_access_token().await {
        Some(token) => {
            println!("{token}");
            Ok(ExitCode::SUCCESS)
        }
        None => {
            eprintln!("Not signed in. Run `usagebar login` first.");
            Ok(ExitCode::FAILURE)
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn build_store(config_path: &Path, data_dir: &Path) -> Result<TokenStore> {
    let config = AuthConfig::load(Some(config_path))
        .with_context(|| format!("failed to load configuration from {}", config_path.display()))?;

    let storage = usagebar_vault::platform_secret_store(data_dir);
    TokenStore::from_config(config, storage).context("failed to initialize token store")
}

fn format_expiry(expires_at_ms: i64) -> String {
    match chrono::DateTime::from_timestamp_millis(expires_at_ms) {
        Some(at) => at
            .with_timezone(&chrono::Local)
            .format("%Y-%m-%d %H:%M:%S")
            .to_string(),
        None => format!("{expires_at_ms} ms"),
    }
}

/// Initialize the tracing subscriber with the given default log level.
///
/// `RUST_LOG` takes precedence when set.
fn init_tracing(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}
