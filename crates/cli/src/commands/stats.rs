use std::collections::BTreeMap;

use anyhow::{Context, Result};
use serde::Serialize;
use vulnreach_core::db::{BridgeMode, Collection, EdgeKind};
use vulnreach_core::graph::GraphStore;

use crate::commands::{open_project, print_json};

const COLLECTIONS: [Collection; 5] = [
    Collection::Functions,
    Collection::Libraries,
    Collection::Packages,
    Collection::Cves,
    Collection::Bridges,
];

#[derive(Debug, Serialize)]
pub struct GraphStats {
    pub vertices: BTreeMap<String, u64>,
    pub edges: BTreeMap<String, u64>,
    /// Libraries currently resolved with precise bridges.
    pub precise_libraries: Vec<String>,
}

/// Count vertices per collection and edges per kind.
pub fn collect_graph_stats<S: GraphStore>(store: &S) -> Result<GraphStats> {
    let mut vertices = BTreeMap::new();
    for collection in COLLECTIONS {
        let count = store
            .count_vertices(collection)
            .with_context(|| format!("Failed to count {}", collection.as_str()))?;
        vertices.insert(collection.as_str().to_string(), count);
    }
    let mut edges = BTreeMap::new();
    for kind in EdgeKind::ALL {
        let count =
            store.count_edges(kind).with_context(|| format!("Failed to count {}", kind.as_str()))?;
        edges.insert(kind.as_str().to_string(), count);
    }
    let mut precise_libraries = Vec::new();
    for library in store.list_libraries().context("Failed to list libraries")? {
        if store.bridge_mode(&library.key)? == BridgeMode::Precise {
            precise_libraries.push(library.key);
        }
    }
    Ok(GraphStats { vertices, edges, precise_libraries })
}

/// Print vertex and edge counts of the project graph.
pub fn stats_command(root: &str, json: bool) -> Result<()> {
    let ctx = open_project(root)?;
    let stats = collect_graph_stats(&ctx.db)?;
    if json {
        return print_json(&stats);
    }

    println!("Graph: {}", ctx.db_path.display());
    println!("Vertices:");
    for (collection, count) in &stats.vertices {
        println!("  {collection}: {count}");
    }
    println!("Edges:");
    for (kind, count) in &stats.edges {
        println!("  {kind}: {count}");
    }
    if !stats.precise_libraries.is_empty() {
        println!("Precise bridge mode: {}", stats.precise_libraries.join(", "));
    }
    Ok(())
}
