//! Migration creation

use anyhow::{Context as _, Result};
use colored::*;

use super::Context;

/// Create an empty, hand-written migration unit.
pub fn create(ctx: &Context, name: &str) -> Result<()> {
    println!("{}", "📝 Creating Migration".cyan().bold());

    let (unit, path) = ctx
        .workspace()
        .create(name)
        .context("Failed to create migration")?;

    println!("  {} {}", "✓ Created:".green(), path.display());
    println!("  Version: {}", unit.version.yellow());
    println!();
    println!("  Add operations to {} (and {} if it can be reverted), then run:", "up".cyan(), "down".cyan());
    println!("    {}", "docshift up".cyan());
    Ok(())
}
