//! Migration status

use anyhow::{Context as _, Result};
use colored::*;

use super::Context;

/// Print completed, pending and failed migrations.
pub async fn migrate_status(ctx: &Context) -> Result<()> {
    println!("{}", "📋 Migration Status".cyan().bold());
    println!();

    let report = ctx
        .migrator()
        .status()
        .await
        .context("Failed to read migration status")?;

    println!("  {} ({})", "Completed".green().bold(), report.completed.len());
    for record in &report.completed {
        println!(
            "    {} {} {} {}",
            "✓".green(),
            record.version.yellow(),
            record.name,
            format!(
                "{} by {}",
                record.applied_at.format("%Y-%m-%d %H:%M:%S"),
                record.executed_by
            )
            .dimmed()
        );
    }

    println!("  {} ({})", "Pending".cyan().bold(), report.pending.len());
    for unit in &report.pending {
        println!("    {} {} {}", "○".dimmed(), unit.version.yellow(), unit.name);
    }

    println!("  {} ({})", "Failed".red().bold(), report.failed.len());
    for record in &report.failed {
        println!(
            "    {} {} {} {}",
            "✗".red(),
            record.version.yellow(),
            record.name,
            record.error.as_deref().unwrap_or("").red()
        );
    }

    if !report.modified.is_empty() {
        println!();
        for version in &report.modified {
            println!(
                "  {} {} was modified after it was applied; it will not run again",
                "⚠".yellow(),
                version.yellow()
            );
        }
    }

    Ok(())
}
