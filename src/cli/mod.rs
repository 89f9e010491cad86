//! Command-line interface.

mod create;
mod diff;
mod down;
mod generate;
mod snapshot;
mod status;
mod up;

use std::path::PathBuf;

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use colored::*;
use tracing_subscriber::EnvFilter;

use crate::config::{Config, DATABASE_URL_ENV};
use crate::migrate::{Migrator, Progress};
use crate::store::Database;
use crate::workspace::Workspace;

#[derive(Debug, Parser)]
#[command(name = "docshift")]
#[command(about = "Schema snapshots and versioned migrations for document databases", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Database connection string (memory://, jsondb://<dir>)
    #[arg(long, global = true, env = DATABASE_URL_ENV)]
    pub database_url: Option<String>,

    /// Directory holding model source files
    #[arg(long, global = true)]
    pub models: Option<PathBuf>,

    /// Directory holding migration units and snapshots
    #[arg(long, global = true)]
    pub migrations: Option<PathBuf>,

    /// Config file (default: ./docshift.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Apply all pending migrations
    #[command(alias = "migrate")]
    Up,

    /// Revert the most recently applied migration
    #[command(alias = "rollback")]
    Down,

    /// Show completed, pending and failed migrations
    Status,

    /// Diff models against the last snapshot and write a migration
    #[command(alias = "gen")]
    Generate {
        /// Migration name (derived from the changes by default)
        #[arg(long)]
        name: Option<String>,
    },

    /// Generate, then apply the new migration
    Auto {
        #[arg(long)]
        name: Option<String>,
    },

    /// Write a snapshot without generating a migration
    Snapshot,

    /// Print the diff against the last snapshot
    Diff {
        /// Print the raw diff as JSON
        #[arg(long)]
        json: bool,
    },

    /// Create an empty migration to fill in by hand
    Create {
        name: String,
    },
}

/// Install the tracing subscriber: `RUST_LOG` if set, else `warn`, or
/// `debug` with `-v`.
pub fn init_tracing(verbose: bool) {
    let default = if verbose { "docshift=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

/// Resolved configuration plus the handles commands are built from.
pub struct Context {
    pub config: Config,
}

impl Context {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    pub fn workspace(&self) -> Workspace {
        Workspace::from_config(&self.config)
    }

    pub fn migrator(&self) -> Migrator {
        Migrator::new(
            Database::new(self.config.database_url.clone()),
            &self.config.migrations_dir,
        )
        .executed_by(self.config.executed_by.clone())
        .lock_ttl(self.config.lock_ttl)
        .on_progress(print_progress)
    }
}

fn print_progress(event: &Progress) {
    match event {
        Progress::Applying {
            version,
            name,
            destructive,
        } => {
            println!("  {} {} {}", "→".cyan(), version.yellow(), name);
            if *destructive {
                println!(
                    "    {} destructive: removed data is not restored by rollback",
                    "⚠".yellow()
                );
            }
        }
        Progress::Applied { version, elapsed_ms } => {
            println!("  {} {} ({}ms)", "✓".green(), version, elapsed_ms);
        }
        Progress::Failed { version, error } => {
            println!("  {} {} {}", "✗".red(), version, error.red());
        }
        Progress::RollingBack { version, name } => {
            println!("  {} {} {}", "←".cyan(), version.yellow(), name);
        }
        Progress::Note {
            message,
            manual: true,
            ..
        } => println!("    {} manual step: {}", "⚠".yellow(), message),
        Progress::Note { message, .. } => println!("    {}", message.dimmed()),
    }
}

/// Load configuration, apply flag overrides and dispatch.
pub async fn run(cli: Cli) -> Result<()> {
    let mut config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(url) = cli.database_url {
        config.database_url = Some(url);
    }
    if let Some(dir) = cli.models {
        config.models_dir = dir;
    }
    if let Some(dir) = cli.migrations {
        config.migrations_dir = dir;
    }

    let ctx = Context::new(config);
    match cli.command {
        Command::Up => up::migrate_up(&ctx).await,
        Command::Down => down::migrate_down(&ctx).await,
        Command::Status => status::migrate_status(&ctx).await,
        Command::Generate { name } => generate::generate(&ctx, name.as_deref()).map(|_| ()),
        Command::Auto { name } => generate::auto(&ctx, name.as_deref()).await,
        Command::Snapshot => snapshot::snapshot(&ctx),
        Command::Diff { json } => diff::diff(&ctx, json),
        Command::Create { name } => create::create(&ctx, &name),
    }
}
