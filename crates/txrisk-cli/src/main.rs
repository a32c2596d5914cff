//! txrisk-cli: operator entry point for the risk-scoring pipeline.
//!
//! Subcommands are thin: each one loads `EnvConfig`, wires the ports it
//! needs, and hands off to the library crate that owns the behavior. No
//! business logic lives here.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "txrisk")]
#[command(about = "Transaction risk-scoring pipeline operator CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run embedded SQLx migrations and seed the baseline rule catalog.
    Migrate,

    /// Start the ingest + analytics-read HTTP surface (same router as the
    /// standalone `txrisk-daemon` binary).
    Serve,

    /// Run the worker pool (C8): consume `transactions`, score, ack/retry/
    /// dead-letter.
    Worker,

    /// Consume Debezium-shaped CDC row-change messages as newline-delimited
    /// JSON from stdin (or a file) and print periodic analytics snapshots.
    Cdc {
        /// Read from this file instead of stdin.
        #[arg(long)]
        input: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.cmd {
        Commands::Migrate => commands::migrate::run().await,
        Commands::Serve => commands::serve::run().await,
        Commands::Worker => commands::worker::run().await,
        Commands::Cdc { input } => commands::cdc::run(input).await,
    }
}
