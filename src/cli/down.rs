//! Migration DOWN (rollback) operations

use anyhow::{Context as _, Result};
use colored::*;

use super::Context;
use crate::migrate::DownOutcome;

/// Revert the most recently applied migration unit.
pub async fn migrate_down(ctx: &Context) -> Result<()> {
    println!("{}", "Rolling back:".cyan().bold());

    let outcome = ctx.migrator().down().await.context("Rollback failed")?;

    match outcome {
        DownOutcome::NothingToRollBack => {
            println!("{}", "Nothing to roll back.".green());
        }
        DownOutcome::NoDown { version } => {
            println!(
                "{} Migration {} has no down; nothing was changed.",
                "⚠".yellow(),
                version.yellow()
            );
        }
        DownOutcome::RolledBack { version, name } => {
            println!(
                "{} Rolled back {} {}",
                "✓".green().bold(),
                version.yellow(),
                name
            );
        }
    }
    Ok(())
}
