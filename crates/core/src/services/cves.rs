//! Recording vulnerability records against the call graph.

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::db::models::{CveFactKind, CveVertex, Edge, EdgeKind};
use crate::facts::CveRecord;
use crate::graph::{GraphStore, StoreResult};
use crate::keys;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CveIngestReport {
    pub id: String,
    pub inserted: bool,
    pub edges_inserted: usize,
    /// Affected function keys with no vertex in the graph yet. Their edges
    /// are stored all the same.
    pub missing_functions: Vec<String>,
}

/// Record one CVE: vertex if absent, logged library/package facts, affects edges.
///
/// The status of an already-known CVE is never changed. The materialised
/// library/package lists are only refreshed by [`merge_cve_logs`].
pub fn record_cve<S: GraphStore>(store: &S, record: &CveRecord) -> StoreResult<CveIngestReport> {
    let inserted = store.insert_cve(&CveVertex {
        id: record.id.clone(),
        status: record.status.clone(),
        libraries: Vec::new(),
        packages: Vec::new(),
    })?;
    let mut report = CveIngestReport { id: record.id.clone(), inserted, ..CveIngestReport::default() };

    for affect in &record.affects {
        store.append_cve_fact(&record.id, CveFactKind::Library, &affect.library)?;
        store.append_cve_fact(&record.id, CveFactKind::Package, &affect.package)?;

        let function_key = affect.function_key();
        if store.get_function(&function_key)?.is_none() {
            warn!(cve = %record.id, function = %function_key, "affected function not in graph");
            report.missing_functions.push(function_key.clone());
        }
        let edge = Edge {
            kind: EdgeKind::CveAffects,
            key: keys::cve_edge_key(&record.id, &function_key),
            from: record.id.clone(),
            to: function_key,
        };
        if store.insert_edge(&edge)? {
            report.edges_inserted += 1;
        }
    }
    debug!(cve = %record.id, edges = report.edges_inserted, "recorded CVE");
    Ok(report)
}

/// Materialise every CVE's library and package lists from its fact log.
///
/// Lists keep the order in which values were first logged, each value once.
/// Returns the number of CVEs merged.
pub fn merge_cve_logs<S: GraphStore>(store: &S) -> StoreResult<usize> {
    let cves = store.list_cves()?;
    store.in_transaction(|store| {
        for cve in &cves {
            let mut libraries: Vec<String> = Vec::new();
            let mut packages: Vec<String> = Vec::new();
            for (kind, value) in store.cve_facts(&cve.id)? {
                let list = match kind {
                    CveFactKind::Library => &mut libraries,
                    CveFactKind::Package => &mut packages,
                };
                if !list.contains(&value) {
                    list.push(value);
                }
            }
            store.set_cve_lists(&cve.id, &libraries, &packages)?;
        }
        Ok(())
    })?;
    info!(cves = cves.len(), "merged CVE fact logs");
    Ok(cves.len())
}
