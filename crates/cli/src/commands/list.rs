//! List command implementation

use anyhow::Result;
use devshim_runtime::{HandlerRegistry, ShimConfig};
use std::path::Path;

/// Print every handler name that currently resolves
pub fn execute_list_command(dir: &Path) -> Result<()> {
    if !dir.is_dir() {
        anyhow::bail!("Handler directory not found: {}", dir.display());
    }

    let registry = HandlerRegistry::new(ShimConfig::with_handler_dir(dir));
    let names = registry.list();

    println!("📂 Handlers in {} ({}):", dir.display(), names.len());
    for name in &names {
        println!("   /api/{}", name);
    }
    Ok(())
}
