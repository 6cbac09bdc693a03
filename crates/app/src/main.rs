use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;
mod config;

use crate::config::Config;

#[derive(Parser, Debug)]
#[command(name = "bankfeed")]
#[command(about = "Pull open-banking transactions into a local ledger")]
struct Cli {
    /// Configuration file (TOML). Defaults to ./bankfeed.toml when present.
    #[arg(long, env = "BANKFEED_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one sync cycle over every linked session.
    Sync {
        /// Decide every change but write nothing.
        #[arg(long)]
        dry_run: bool,
    },
    /// Start linking a bank; prints the consent URL.
    Link {
        /// Institution name, or "sandbox".
        bank: String,
    },
    /// List known sessions and their last observed status.
    Sessions,
    /// Set the classification of a stored transaction.
    Tag {
        id: String,
        /// unknown, one-off or periodic
        kind: String,
        #[arg(long)]
        from: Option<String>,
        #[arg(long)]
        to: Option<String>,
    },
    /// Print the most recent stored transactions.
    Show {
        #[arg(long, default_value_t = 50)]
        limit: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref()).context("Invalid configuration")?;

    let db_path = config.database_path()?;
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let pool = bankfeed_storage::create_db(&db_path)
        .await
        .with_context(|| format!("Failed to open database at {}", db_path.display()))?;
    tracing::debug!(path = %db_path.display(), "Database ready");

    match cli.command {
        Command::Sync { dry_run } => commands::sync(&config, pool, dry_run).await,
        Command::Link { bank } => commands::link(&config, pool, &bank).await,
        Command::Sessions => commands::sessions(&pool).await,
        Command::Tag { id, kind, from, to } => {
            commands::tag(&pool, &id, &kind, from.as_deref(), to.as_deref()).await
        }
        Command::Show { limit } => commands::show(&pool, limit).await,
    }
}
