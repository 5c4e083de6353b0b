use std::path::Path;

use anyhow::{Context, Result};
use vulnreach_core::db::GraphDb;
use vulnreach_core::facts::BinaryFacts;
use vulnreach_core::services::{BatchCoordinator, BatchSummary, IngestEngine};

use crate::commands::{discover_inputs, open_project, print_json};
use crate::BINARY_FACTS_SUFFIX;

/// Parse one fact file, with `package` as the fallback owning package.
fn load_binary_facts(path: &Path, package: Option<&str>) -> Result<BinaryFacts> {
    let facts = match package {
        Some(package) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            BinaryFacts::parse(&text, Some(package))?
        }
        None => BinaryFacts::from_path(path)?,
    };
    Ok(facts)
}

/// Ingest call-graph fact files with a worker pool.
///
/// Per-unit results land in `results/{batch}_worker_{i}.jsonl`, markers in
/// `.vulnreach/markers/{batch}/`. Files already marked done are skipped.
pub fn ingest_binaries_command(
    root: &str,
    inputs: &[String],
    package: Option<&str>,
    workers: Option<usize>,
    batch: &str,
    json: bool,
) -> Result<()> {
    let ctx = open_project(root)?;
    let files = discover_inputs(&ctx, inputs, BINARY_FACTS_SUFFIX)?;

    let coordinator = BatchCoordinator::new(
        batch,
        workers.unwrap_or(ctx.config.ingest.workers),
        ctx.layout.batch_markers_dir(batch),
        &ctx.layout.results_dir,
    );
    let db_path = ctx.db_path.clone();
    let busy_timeout_ms = ctx.config.db.busy_timeout_ms;
    let precise = ctx.config.ingest.precise_libraries.clone();

    let summary: BatchSummary = coordinator.run(
        files,
        |_worker| {
            GraphDb::open_with_timeout(&db_path, busy_timeout_ms)
                .with_context(|| format!("Failed to open graph database at {}", db_path.display()))
        },
        |db, path| {
            let facts = load_binary_facts(path, package)
                .with_context(|| format!("Failed to load {}", path.display()))?;
            let report = IngestEngine::new(db)
                .with_precise_libraries(precise.iter().cloned())
                .ingest_binary(&facts)?;
            Ok(report)
        },
    )?;

    if json {
        return print_json(&summary);
    }
    print_batch_summary(&summary);
    Ok(())
}

/// Human-readable batch outcome.
pub fn print_batch_summary(summary: &BatchSummary) {
    println!("Batch '{}': {} unit(s)", summary.batch, summary.total);
    println!("  Processed: {}", summary.processed);
    println!("  Skipped (already done): {}", summary.skipped);
    println!("  Failed: {}", summary.failed);
    for failure in &summary.failures {
        println!("  - {} (worker {}): {}", failure.unit, failure.worker, failure.error);
    }
}
