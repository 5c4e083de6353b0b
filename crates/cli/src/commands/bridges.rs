use anyhow::{bail, Context, Result};
use vulnreach_core::db::BridgeMode;
use vulnreach_core::facts::load_ground_truth;
use vulnreach_core::graph::GraphStore;
use vulnreach_core::services::BridgeResolver;

use crate::commands::{open_project, print_json};
use crate::resolve_input;

fn require_library<S: GraphStore>(store: &S, library: &str) -> Result<()> {
    if store.get_library(library)?.is_none() {
        bail!("Unknown library '{}' (expected a key like soname@package)", library);
    }
    Ok(())
}

/// Attach ground-truth argument types to a library's functions.
pub fn apply_ground_truth_command(root: &str, library: &str, file: &str, json: bool) -> Result<()> {
    let ctx = open_project(root)?;
    require_library(&ctx.db, library)?;

    let path = resolve_input(&ctx.layout.root, file);
    let truth = load_ground_truth(&path)
        .with_context(|| format!("Failed to load ground truth from {}", path.display()))?;
    let report = BridgeResolver::new(&ctx.db)
        .apply_ground_truth(library, &truth)
        .context("Failed to apply ground truth")?;

    if json {
        return print_json(&report);
    }
    println!("Ground truth for {}:", report.library);
    println!("  Functions updated: {}", report.functions_updated);
    println!("  Names not found: {}", report.not_found.len());
    if let Some(rebuilt) = &report.rebuilt {
        println!(
            "  Precise bridges rebuilt: {} edge(s) removed, {} inserted",
            rebuilt.edges_removed, rebuilt.edges_inserted
        );
    }
    Ok(())
}

/// Migrate a library to the given bridge mode.
pub fn set_bridge_mode_command(root: &str, library: &str, mode: BridgeMode, json: bool) -> Result<()> {
    let ctx = open_project(root)?;
    require_library(&ctx.db, library)?;

    let report = BridgeResolver::new(&ctx.db)
        .migrate(library, mode)
        .with_context(|| format!("Failed to migrate {} to {} mode", library, mode.as_str()))?;

    if json {
        return print_json(&report);
    }
    println!("Bridge mode of {}: {} -> {}", report.library, report.from.as_str(), report.to.as_str());
    println!("  Removed: {} bridge(s), {} edge(s)", report.bridges_removed, report.edges_removed);
    println!("  Inserted: {} bridge(s), {} edge(s)", report.bridges_inserted, report.edges_inserted);
    Ok(())
}
