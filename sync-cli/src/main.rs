//! # revmirror
//!
//! Mirror the revision history of a MediaWiki site into a local SQLite
//! replica.
//!
//! ## Commands
//!
//! - `sync`: Run one synchronization (bootstrap on first use)
//! - `status`: Show the checkpoint and replica row counts
//!
//! ## Example
//!
//! ```bash
//! # First run copies every revision
//! revmirror --config mirror.toml sync
//!
//! # Later runs apply what changed since the checkpoint
//! revmirror --config mirror.toml sync --with-content
//!
//! revmirror status
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod commands;
mod config;

use commands::{status, sync};
use config::Config;

/// Mirror MediaWiki revisions into a local replica.
#[derive(Parser, Debug)]
#[command(name = "revmirror")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Replica database, overriding the configured one
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    /// Log debug output
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run one synchronization
    Sync {
        /// Fetch and store revision text
        #[arg(long)]
        with_content: bool,
    },

    /// Show the checkpoint and replica row counts
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "revmirror=debug"
    } else {
        "revmirror=info"
    };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()))
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::load_default()?,
    };

    let database = match cli.database {
        Some(path) => path,
        None => match &config.storage.database {
            Some(path) => path.clone(),
            None => default_data_dir()?.join("replica.db"),
        },
    };

    tracing::debug!("using replica {}", database.display());

    match cli.command {
        Commands::Sync { with_content } => {
            sync::run(&config, &database, with_content).await?;
        }
        Commands::Status => {
            status::run(&config, &database).await?;
        }
    }

    Ok(())
}

/// Get the default data directory for revmirror.
fn default_data_dir() -> Result<PathBuf> {
    let dirs = directories::ProjectDirs::from("org", "revmirror", "revmirror")
        .context("Could not determine home directory")?;
    Ok(dirs.data_dir().to_path_buf())
}
