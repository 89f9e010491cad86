//! Migration UP operations

use anyhow::{Context as _, Result};
use colored::*;

use super::Context;
use crate::migrate::UpOutcome;

/// Apply every pending migration unit in version order.
pub async fn migrate_up(ctx: &Context) -> Result<()> {
    println!(
        "{} {}",
        "Migrating UP:".cyan().bold(),
        ctx.config.migrations_dir.display().to_string().yellow()
    );

    let outcome = ctx
        .migrator()
        .up()
        .await
        .context("Migration batch aborted")?;

    report(&outcome);
    Ok(())
}

pub(super) fn report(outcome: &UpOutcome) {
    match outcome {
        UpOutcome::NothingPending => println!("{}", "No pending migrations.".green()),
        UpOutcome::Applied(units) => {
            println!();
            println!(
                "{} {} migration(s) applied",
                "✓".green().bold(),
                units.len()
            );
        }
    }
}
