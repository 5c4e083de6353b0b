use anyhow::{Context, Result};
use serde::Serialize;
use vulnreach_core::facts::load_cve_records;
use vulnreach_core::services::{merge_cve_logs, record_cve, CveIngestReport};

use crate::commands::{open_project, print_json};
use crate::resolve_input;

#[derive(Debug, Default, Serialize)]
pub struct AddCvesSummary {
    pub records: usize,
    pub cves_inserted: usize,
    pub edges_inserted: usize,
    pub cves_merged: usize,
    pub reports: Vec<CveIngestReport>,
}

/// Record CVE files and materialise the per-CVE library/package lists.
pub fn add_cves_command(root: &str, inputs: &[String], json: bool) -> Result<()> {
    let ctx = open_project(root)?;
    let mut summary = AddCvesSummary::default();

    for input in inputs {
        let path = resolve_input(&ctx.layout.root, input);
        let records = load_cve_records(&path)
            .with_context(|| format!("Failed to load CVE records from {}", path.display()))?;
        for record in &records {
            let report = record_cve(&ctx.db, record)
                .with_context(|| format!("Failed to record {}", record.id))?;
            summary.records += 1;
            summary.cves_inserted += usize::from(report.inserted);
            summary.edges_inserted += report.edges_inserted;
            summary.reports.push(report);
        }
    }
    summary.cves_merged = merge_cve_logs(&ctx.db).context("Failed to merge CVE fact logs")?;

    if json {
        return print_json(&summary);
    }
    println!("Recorded {} CVE record(s):", summary.records);
    println!("  New CVEs: {}", summary.cves_inserted);
    println!("  cve_affects edges inserted: {}", summary.edges_inserted);
    let missing: usize = summary.reports.iter().map(|r| r.missing_functions.len()).sum();
    if missing > 0 {
        println!("  Affected functions not yet in the graph: {}", missing);
    }
    Ok(())
}
