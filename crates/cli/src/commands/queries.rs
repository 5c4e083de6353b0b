use std::collections::BTreeSet;

use anyhow::{anyhow, bail, Context, Result};
use serde::Serialize;
use vulnreach_core::db::{Direction, GraphDb, ProjectContext};
use vulnreach_core::graph::GraphStore;
use vulnreach_core::services::{BatchCoordinator, CveIndex, ReachEngine};

use crate::commands::{open_project, print_batch_summary, print_json};

/// Graph level a reach query runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReachLevel {
    Function,
    Library,
    Package,
}

#[derive(Debug, Serialize)]
pub struct ReachResult {
    pub level: ReachLevel,
    pub start: String,
    pub direction: &'static str,
    pub count: usize,
    pub reach: BTreeSet<String>,
}

fn direction_name(direction: Direction) -> &'static str {
    match direction {
        Direction::Inbound => "in",
        Direction::Outbound => "out",
    }
}

/// Transitive reach of a single vertex.
pub fn reach_command(
    root: &str,
    level: ReachLevel,
    direction: Direction,
    key: &str,
    json: bool,
) -> Result<()> {
    let ctx = open_project(root)?;
    let engine = ReachEngine::new(&ctx.db).with_limits(ctx.config.reach.limits());
    let reach = match level {
        ReachLevel::Function => engine.function_level_reach(key, direction),
        ReachLevel::Library => engine.library_level_reach(key, direction),
        ReachLevel::Package => engine.package_level_reach(key, direction),
    }
    .with_context(|| format!("Reach query from {} failed", key))?;

    let result = ReachResult {
        level,
        start: key.to_string(),
        direction: direction_name(direction),
        count: reach.len(),
        reach,
    };
    if json {
        return print_json(&result);
    }
    if result.reach.is_empty() {
        println!("{} is not in the graph.", key);
        return Ok(());
    }
    println!("{} vertices ({}bound from {}):", result.count, result.direction, key);
    for vertex in &result.reach {
        println!("  {vertex}");
    }
    Ok(())
}

/// Run one query per unit, either inline for the given ids or as a batch over `all_units`.
fn run_query<R, F>(
    ctx: &ProjectContext,
    batch: &str,
    ids: &[String],
    all_units: impl FnOnce() -> Result<Vec<String>>,
    workers: Option<usize>,
    json: bool,
    query: F,
) -> Result<Option<Vec<R>>>
where
    R: Serialize,
    F: Fn(&GraphDb, &str) -> Result<R> + Sync,
{
    if !ids.is_empty() {
        let mut results = Vec::new();
        for id in ids {
            results.push(query(&ctx.db, id.as_str())?);
        }
        return Ok(Some(results));
    }

    let units = all_units()?;
    let coordinator = BatchCoordinator::new(
        batch,
        workers.unwrap_or(ctx.config.ingest.workers),
        ctx.layout.batch_markers_dir(batch),
        &ctx.layout.results_dir,
    );
    let db_path = ctx.db_path.clone();
    let busy_timeout_ms = ctx.config.db.busy_timeout_ms;
    let summary = coordinator.run(
        units,
        |_worker| {
            GraphDb::open_with_timeout(&db_path, busy_timeout_ms)
                .with_context(|| format!("Failed to open graph database at {}", db_path.display()))
        },
        |db, id: &String| query(db, id.as_str()),
    )?;
    if json {
        print_json(&summary)?;
    } else {
        print_batch_summary(&summary);
        println!("  Results: {}", ctx.layout.results_dir.display());
    }
    Ok(None)
}

fn require_selection(ids: &[String], all: bool, what: &str) -> Result<()> {
    match (ids.is_empty(), all) {
        (true, false) => bail!("Pass one or more {} or --all", what),
        (false, true) => bail!("Pass either {} or --all, not both", what),
        _ => Ok(()),
    }
}

fn cve_index(ctx: &ProjectContext) -> Result<CveIndex> {
    CveIndex::build(&ctx.db, ctx.config.reach.cve_min_year).context("Failed to load CVE index")
}

fn all_library_keys(ctx: &ProjectContext) -> Result<Vec<String>> {
    let libraries = ctx.db.list_libraries().context("Failed to list libraries")?;
    Ok(libraries.into_iter().map(|library| library.key).collect())
}

/// Function, library and package blast radius of CVEs.
pub fn cve_impact_command(
    root: &str,
    ids: &[String],
    all: bool,
    workers: Option<usize>,
    json: bool,
) -> Result<()> {
    require_selection(ids, all, "CVE ids")?;
    let ctx = open_project(root)?;
    let limits = ctx.config.reach.limits();
    let min_year = ctx.config.reach.cve_min_year;

    let results = run_query(
        &ctx,
        "cve_impact",
        ids,
        || {
            let index = cve_index(&ctx)?;
            Ok(index.ids().map(str::to_string).collect())
        },
        workers,
        json,
        |db, id| {
            if let Some(min) = min_year {
                if vulnreach_core::facts::cve_year(id).is_some_and(|year| year < min) {
                    bail!("{} predates the {} cut-off", id, min);
                }
            }
            let impact = ReachEngine::new(db)
                .with_limits(limits)
                .cve_impact(id)?
                .ok_or_else(|| anyhow!("Unknown CVE '{}'", id))?;
            if impact.affected.iter().any(|a| a.timed_out) {
                bail!("Reach traversal for {} timed out", id);
            }
            Ok(impact)
        },
    )?;

    let Some(impacts) = results else { return Ok(()) };
    if json {
        return print_json(&impacts);
    }
    for impact in impacts {
        println!("{} [{}]", impact.id, impact.status.as_deref().unwrap_or("unknown status"));
        for affected in &impact.affected {
            println!("  {}", affected.function);
            println!("    functions reaching it: {}", affected.function_reach_count);
            println!("    libraries owning those: {}", affected.libraries_reached.len());
            println!(
                "    libraries depending on {}: {}",
                affected.library, affected.library_reach_count
            );
            println!(
                "    packages depending on {}: {}",
                affected.package, affected.package_reach_count
            );
        }
        for missing in &impact.missing_functions {
            println!("  {} (not in graph)", missing);
        }
    }
    Ok(())
}

/// CVEs reachable from each library's exported functions.
pub fn exported_surface_command(
    root: &str,
    libraries: &[String],
    all: bool,
    workers: Option<usize>,
    json: bool,
) -> Result<()> {
    require_selection(libraries, all, "library keys")?;
    let ctx = open_project(root)?;
    let limits = ctx.config.reach.limits();
    let index = cve_index(&ctx)?;

    let results = run_query(
        &ctx,
        "exported_surface",
        libraries,
        || all_library_keys(&ctx),
        workers,
        json,
        |db, library| {
            let surface =
                ReachEngine::new(db).with_limits(limits).exported_surface_impact(library, &index)?;
            if !surface.timed_out.is_empty() {
                let count = surface.timed_out.len();
                bail!("{} exported function traversal(s) of {} timed out", count, library);
            }
            Ok(surface)
        },
    )?;

    let Some(surfaces) = results else { return Ok(()) };
    if json {
        return print_json(&surfaces);
    }
    for surface in surfaces {
        println!(
            "{}: {} functions, {} exported, {} exported reach CVEs",
            surface.library,
            surface.total_functions,
            surface.exported_functions.len(),
            surface.impacted.len()
        );
        for impacted in &surface.impacted {
            let cves: Vec<&str> = impacted.cves.iter().map(String::as_str).collect();
            println!("  {} -> {}", impacted.function, cves.join(", "));
        }
        if !surface.cves_reached.is_empty() {
            println!("  CVEs reached: {}", surface.cves_reached.len());
        }
    }
    Ok(())
}

/// CVEs a library is exposed to through calls and dependencies.
pub fn cve_exposure_command(
    root: &str,
    libraries: &[String],
    all: bool,
    workers: Option<usize>,
    json: bool,
) -> Result<()> {
    require_selection(libraries, all, "library keys")?;
    let ctx = open_project(root)?;
    let limits = ctx.config.reach.limits();
    let index = cve_index(&ctx)?;

    let results = run_query(
        &ctx,
        "cve_exposure",
        libraries,
        || all_library_keys(&ctx),
        workers,
        json,
        |db, library| {
            let exposure = ReachEngine::new(db).with_limits(limits).cve_exposure(library, &index)?;
            if exposure.timed_out {
                bail!("Exposure traversal of {} timed out", library);
            }
            Ok(exposure)
        },
    )?;

    let Some(exposures) = results else { return Ok(()) };
    if json {
        return print_json(&exposures);
    }
    for exposure in exposures {
        println!("{}:", exposure.library);
        println!("  via calls: {}", exposure.function_cves.len());
        for cve in &exposure.function_cves {
            println!("    {cve}");
        }
        println!("  via dependencies: {}", exposure.library_cves.len());
        for cve in &exposure.library_cves {
            println!("    {cve}");
        }
    }
    Ok(())
}
