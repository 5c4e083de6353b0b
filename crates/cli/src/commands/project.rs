use std::fs;

use crate::commands::{collect_graph_stats, open_project, print_dir_status, print_json, GraphStats};
use crate::{canonicalize_or_current, infer_project_name};
use anyhow::{Context, Result};
use serde::Serialize;
use vulnreach_core::db::{GraphDb, ProjectConfig, ProjectLayout};

#[derive(Serialize)]
pub struct ProjectInfoSnapshot {
    pub name: String,
    pub root: String,
    pub config_file: String,
    pub config_version: String,
    pub db_path: String,
    pub schema_version: i32,
    pub config: ProjectConfig,
    pub layout: ProjectInfoLayout,
    pub graph: GraphStats,
}

#[derive(Serialize)]
pub struct ProjectInfoLayout {
    pub meta_dir: String,
    pub markers_dir: String,
    pub results_dir: String,
    pub facts_dir: String,
}

/// Initialize a new project at `root`.
pub fn init_project_command(root: &str, name: Option<String>) -> Result<()> {
    let root_path = canonicalize_or_current(root)?;
    let layout = ProjectLayout::new(&root_path);

    // Derive project name if not provided.
    let project_name = match name {
        Some(n) => n,
        None => infer_project_name(&root_path),
    };

    // Ensure directories exist.
    for (label, dir) in [
        ("meta dir", &layout.meta_dir),
        ("markers dir", &layout.markers_dir),
        ("results dir", &layout.results_dir),
        ("facts dir", &layout.facts_dir),
    ] {
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {label}: {}", dir.display()))?;
    }

    // Build project config.
    let db_path_rel = layout.db_path_relative_string();
    let config = ProjectConfig::new(&project_name, db_path_rel);

    // Serialize and write config JSON.
    let json = serde_json::to_string_pretty(&config)?;
    fs::write(&layout.project_config_path, json).with_context(|| {
        format!("Failed to write project config: {}", layout.project_config_path.display())
    })?;

    // Create the graph database immediately so follow-on commands (and tests)
    // can rely on its presence.
    GraphDb::open(&layout.db_path).with_context(|| {
        format!("Failed to initialize graph database at {}", layout.db_path.display())
    })?;

    println!("Initialized vulnreach project:");
    println!("  Name: {}", project_name);
    println!("  Root: {}", layout.root.display());
    println!("  Config: {}", layout.project_config_path.display());
    println!("  DB path (relative): {}", config.db.path);
    println!("  Facts dir: {}", layout.facts_dir.display());
    println!("  Results dir: {}", layout.results_dir.display());

    Ok(())
}

/// Show basic information about an existing project.
pub fn project_info_command(root: &str, json: bool) -> Result<()> {
    let ctx = open_project(root)?;
    let layout = &ctx.layout;
    let config = &ctx.config;
    let schema_version = ctx.db.schema_version().context("Failed to read schema version")?;
    let graph = collect_graph_stats(&ctx.db)?;

    if json {
        let snapshot = ProjectInfoSnapshot {
            name: config.name.clone(),
            root: layout.root.display().to_string(),
            config_file: layout.project_config_path.display().to_string(),
            config_version: config.config_version.clone(),
            db_path: config.db.path.clone(),
            schema_version,
            config: config.clone(),
            layout: ProjectInfoLayout {
                meta_dir: layout.meta_dir.display().to_string(),
                markers_dir: layout.markers_dir.display().to_string(),
                results_dir: layout.results_dir.display().to_string(),
                facts_dir: layout.facts_dir.display().to_string(),
            },
            graph,
        };
        return print_json(&snapshot);
    }

    println!("vulnreach Project Info");
    println!("======================");
    println!("Name: {}", config.name);
    println!("Root: {}", layout.root.display());
    println!("Config file: {}", layout.project_config_path.display());
    println!("Config version: {}", config.config_version);
    println!("DB path (config): {}", config.db.path);
    println!("Schema version: {}", schema_version);
    println!("Ingest workers: {}", config.ingest.workers);
    if let Some(year) = config.reach.cve_min_year {
        println!("CVE cut-off year: {}", year);
    }
    println!();

    println!("Directories:");
    print_dir_status("Meta dir (.vulnreach)", &layout.meta_dir);
    print_dir_status("Markers dir", &layout.markers_dir);
    print_dir_status("Results dir", &layout.results_dir);
    print_dir_status("Facts dir", &layout.facts_dir);
    println!();

    let vertices: u64 = graph.vertices.values().sum();
    let edges: u64 = graph.edges.values().sum();
    println!("Graph: {} vertices, {} edges", vertices, edges);

    Ok(())
}
