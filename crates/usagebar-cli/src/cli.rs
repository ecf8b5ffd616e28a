//! CLI argument definitions for usagebar.
//!
//! All `clap` structures live here so that `main.rs` stays focused on
//! dispatching subcommands.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// usagebar -- sign in and keep an access token fresh.
#[derive(Parser)]
#[command(
    name = "usagebar",
    version,
    about = "usagebar -- OAuth sign-in for usage reporting",
    long_about = "Signs in through the browser with OAuth 2.0 + PKCE and keeps the \
                  resulting credential in secure storage, refreshing it on demand."
)]
pub struct Cli {
    /// Path to the TOML configuration file (skipped if missing).
    #[arg(long, global = true, default_value = "usagebar.toml")]
    pub config: PathBuf,

    /// Directory for the encrypted credential file (non-macOS).
    #[arg(long, global = true, default_value = "data")]
    pub data_dir: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Sign in through the browser.
    Login,

    /// Forget the stored credential.
    Logout,

    /// Show whether a valid credential is stored.
    Status,

    /// Print a valid access token, refreshing it if needed.
    Token,
}
