//! Migration generation

use anyhow::{Context as _, Result};
use colored::*;

use super::{Context, up};
use crate::workspace::GenerateOutcome;

/// Diff the models against the last snapshot and write the next unit.
pub fn generate(ctx: &Context, name: Option<&str>) -> Result<GenerateOutcome> {
    println!("{}", "🔍 Comparing models with last snapshot".cyan().bold());

    let outcome = ctx
        .workspace()
        .generate(name)
        .context("Failed to generate migration")?;

    match &outcome {
        GenerateOutcome::NoChanges => {
            println!("{}", "No schema changes detected.".green());
        }
        GenerateOutcome::Generated {
            unit,
            path,
            snapshot,
        } => {
            println!("  {} {}", "✓ Created:".green(), path.display());
            println!("  {} {}", "✓ Snapshot:".green(), snapshot.display());
            for line in unit.description.split("; ").filter(|l| !l.is_empty()) {
                println!("    {}", line);
            }
            if unit.destructive {
                println!(
                    "  {} destructive migration: back up the database before applying",
                    "⚠".yellow()
                );
            }
        }
    }
    Ok(outcome)
}

/// Generate, then apply the new unit together with anything else pending.
pub async fn auto(ctx: &Context, name: Option<&str>) -> Result<()> {
    if let GenerateOutcome::NoChanges = generate(ctx, name)? {
        return Ok(());
    }
    println!();
    let outcome = ctx
        .migrator()
        .up()
        .await
        .context("Migration batch aborted")?;
    up::report(&outcome);
    Ok(())
}
