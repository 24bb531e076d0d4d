//! Tether - session resilience toolkit
//!
//! Main entry point for the Tether CLI.

use std::path::PathBuf;

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};

mod commands;

use commands::{mirror, query, sign_out, status};

// ─────────────────────────────────────────────────────────────────────────────
// CLI Structure
// ─────────────────────────────────────────────────────────────────────────────

/// Tether - inspect and repair persisted sessions
#[derive(Parser)]
#[command(name = "tether")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output as JSON (for scripting)
    #[arg(long, global = true)]
    pub json: bool,

    /// Config file (skips discovery)
    #[arg(long, global = true, env = "TETHER_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show cached session and mirror state
    Status(status::StatusArgs),

    /// Run a query against the backend with the cached session
    Query(query::QueryArgs),

    /// Manage the durable session mirror
    Mirror(mirror::MirrorArgs),

    /// Forget the cached session and its mirror
    SignOut(sign_out::SignOutArgs),
}

// ─────────────────────────────────────────────────────────────────────────────
// Main
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing: console (human-readable) + rotating JSON file
    let filter = if cli.verbose {
        "tether=debug,tether_auth=debug,tether_client=debug,tether_session=debug,tether_config=debug,info"
    } else {
        "tether=info,tether_auth=info,tether_client=info,tether_session=info,warn"
    };

    let log_dir = tether_config::xdg_config_dir()
        .map(|d| d.join("logs"))
        .unwrap_or_else(|| PathBuf::from("logs"));
    let file_appender = tracing_appender::rolling::daily(&log_dir, "tether.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    use tracing_subscriber::prelude::*;
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_writer(std::io::stderr)
                .with_filter(tracing_subscriber::EnvFilter::new(filter)),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(non_blocking)
                .with_filter(tracing_subscriber::EnvFilter::new(
                    "tether=trace,tether_auth=trace,tether_client=trace,tether_session=trace,tether_config=trace,info",
                )),
        )
        .init();

    let loaded = tether_config::load_config(cli.config.as_deref())
        .context("Failed to load configuration")?;
    tracing::debug!(source = ?loaded.source, "Configuration loaded");

    let ctx = commands::Context {
        config: loaded.config,
        config_source: loaded.source,
        json_output: cli.json,
        verbose: cli.verbose,
    };

    // Dispatch to command handlers
    match cli.command {
        Commands::Status(args) => status::run(args, &ctx).await,
        Commands::Query(args) => query::run(args, &ctx).await,
        Commands::Mirror(args) => mirror::run(args, &ctx).await,
        Commands::SignOut(args) => sign_out::run(args, &ctx).await,
    }
}
