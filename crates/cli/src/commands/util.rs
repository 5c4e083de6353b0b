use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::Serialize;
use tracing::debug;
use vulnreach_core::db::ProjectContext;

use crate::{canonicalize_or_current, collect_fact_files, resolve_input};

/// Load the project at `root` and open its graph database.
pub fn open_project(root: &str) -> Result<ProjectContext> {
    let root_path = canonicalize_or_current(root)?;
    debug!(root = %root_path.display(), "opening project");
    ProjectContext::from_root(&root_path)
}

/// Helper to print whether a directory exists.
pub fn print_dir_status(label: &str, path: &Path) {
    let exists = path.is_dir();
    println!("- {label}: {} ({})", if exists { "OK" } else { "MISSING" }, path.display());
}

/// Pretty-print any serializable value as JSON on stdout.
pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let serialized = serde_json::to_string_pretty(value)?;
    println!("{}", serialized);
    Ok(())
}

/// Fact files named by `inputs` (files or directories), or found under the
/// project's `facts/` directory when no input is given.
pub fn discover_inputs(ctx: &ProjectContext, inputs: &[String], suffix: &str) -> Result<Vec<PathBuf>> {
    let roots: Vec<PathBuf> = if inputs.is_empty() {
        vec![ctx.layout.facts_dir.clone()]
    } else {
        inputs.iter().map(|input| resolve_input(&ctx.layout.root, input)).collect()
    };
    for path in &roots {
        if !path.exists() {
            bail!("Input does not exist: {}", path.display());
        }
    }
    collect_fact_files(&roots, suffix)
        .with_context(|| format!("Failed to collect *{suffix} fact files"))
}
