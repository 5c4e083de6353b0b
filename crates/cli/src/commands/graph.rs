use anyhow::{Context, Result};
use serde::Serialize;
use vulnreach_core::db::LibraryFilter;
use vulnreach_core::facts::load_elf_info;
use vulnreach_core::services::{
    build_library_graph, derive_package_graph, ingest_package_relations, LibraryGraphReport,
    PackageGraphReport,
};

use crate::commands::{discover_inputs, open_project, print_json};
use crate::{resolve_input, ELF_INFO_SUFFIX};

/// Build the library graph from dynamic-link fact files.
pub fn build_library_graph_command(
    root: &str,
    inputs: &[String],
    any_arch: bool,
    json: bool,
) -> Result<()> {
    let ctx = open_project(root)?;
    let files = discover_inputs(&ctx, inputs, ELF_INFO_SUFFIX)?;

    let mut facts = Vec::new();
    for file in &files {
        let parsed = load_elf_info(file)
            .with_context(|| format!("Failed to load dynamic-link facts from {}", file.display()))?;
        facts.extend(parsed);
    }

    let filter = if any_arch { LibraryFilter::any() } else { ctx.config.libraries.clone() };
    let report: LibraryGraphReport =
        build_library_graph(&ctx.db, &facts, &filter).context("Failed to build library graph")?;

    if json {
        return print_json(&report);
    }
    println!("Built library graph from {} file(s):", files.len());
    println!("  Facts: {} ({} filtered out)", report.facts_seen, report.facts_filtered);
    println!("  Libraries inserted: {}", report.libraries_inserted);
    println!("  depends_on edges inserted: {}", report.edges_inserted);
    if !report.missing_needed.is_empty() {
        println!("  Needed but not shipped: {}", report.missing_needed.join(", "));
    }
    Ok(())
}

/// Print (or write) dynamic-link facts read directly from ELF files.
#[cfg(feature = "elf-reader")]
pub fn extract_elf_info_command(
    paths: &[String],
    package: Option<&str>,
    output: Option<&str>,
) -> Result<()> {
    use std::path::Path;

    let mut rendered = String::new();
    for path in paths {
        if !vulnreach_core::facts::looks_like_elf(Path::new(path)) {
            anyhow::bail!("{} is not an ELF file", path);
        }
        let facts = vulnreach_core::facts::read_dyn_link_facts(Path::new(path), package)
            .with_context(|| format!("Failed to read ELF file {}", path))?;
        rendered.push_str(&facts.to_string());
    }

    match output {
        Some(out) => std::fs::write(out, &rendered)
            .with_context(|| format!("Failed to write {}", out))?,
        None => print!("{rendered}"),
    }
    Ok(())
}

#[derive(Debug, Default, Serialize)]
pub struct PackageGraphSummary {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub derived: Option<PackageGraphReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub declared: Option<PackageGraphReport>,
}

/// Build the package graph from the library graph and/or declared relations.
pub fn build_package_graph_command(
    root: &str,
    relations: Option<&str>,
    derive: bool,
    json: bool,
) -> Result<()> {
    let ctx = open_project(root)?;
    let mut summary = PackageGraphSummary::default();

    if derive {
        summary.derived =
            Some(derive_package_graph(&ctx.db).context("Failed to derive package graph")?);
    }
    if let Some(relations) = relations {
        let path = resolve_input(&ctx.layout.root, relations);
        let declared = vulnreach_core::facts::load_package_relations(&path)
            .with_context(|| format!("Failed to load package relations from {}", path.display()))?;
        summary.declared = Some(
            ingest_package_relations(&ctx.db, &declared)
                .context("Failed to ingest package relations")?,
        );
    }

    if json {
        return print_json(&summary);
    }
    if let Some(report) = &summary.derived {
        println!(
            "Derived from library graph: {} package_depends edges ({} packages added)",
            report.edges_inserted, report.packages_inserted
        );
    }
    if let Some(report) = &summary.declared {
        println!(
            "Declared relations: {} package_depends edges ({} packages added)",
            report.edges_inserted, report.packages_inserted
        );
    }
    if summary.derived.is_none() && summary.declared.is_none() {
        println!("Nothing to do: pass --relations or drop --no-derive.");
    }
    Ok(())
}
