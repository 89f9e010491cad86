//! Snapshot writing

use anyhow::{Context as _, Result};
use colored::*;

use super::Context;

/// Save a snapshot of the current models without generating a unit.
pub fn snapshot(ctx: &Context) -> Result<()> {
    let (path, extraction) = ctx
        .workspace()
        .snapshot()
        .context("Failed to write snapshot")?;

    println!(
        "{} {} ({} entities)",
        "✓ Snapshot:".green(),
        path.display(),
        extraction.snapshot.len()
    );
    for skipped in &extraction.skipped {
        println!(
            "  {} skipped {}: {}",
            "⚠".yellow(),
            skipped.origin,
            skipped.reason
        );
    }
    Ok(())
}
