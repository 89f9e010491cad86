//! Diff printing

use anyhow::{Context as _, Result};
use colored::*;

use super::Context;

/// Print the diff between the models and the last snapshot. Writes nothing.
pub fn diff(ctx: &Context, json: bool) -> Result<()> {
    let report = ctx.workspace().diff().context("Failed to compute diff")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report.diff)?);
        return Ok(());
    }

    match &report.previous {
        Some(path) => println!("{} {}", "Against:".cyan(), path.display()),
        None => println!("{}", "No previous snapshot; every entity is new.".cyan()),
    }
    for skipped in &report.skipped {
        println!("  {} skipped {}: {}", "⚠".yellow(), skipped.origin, skipped.reason);
    }

    if report.diff.is_empty() {
        println!("{}", "No schema changes detected.".green());
        return Ok(());
    }

    for line in report.diff.describe().lines() {
        let colored = match line.chars().next() {
            Some('+') => line.green(),
            Some('-') => line.red(),
            _ => line.yellow(),
        };
        println!("  {}", colored);
    }
    Ok(())
}
