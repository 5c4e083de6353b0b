//! Library and package dependency graphs.
//!
//! The library graph comes from dynamic-link facts. The package graph is
//! either lifted from the library graph or taken from declared package
//! relations, and both sources may be combined.

use std::collections::BTreeSet;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::db::config::LibraryFilter;
use crate::db::models::{Edge, EdgeKind, LibraryKind, LibraryVertex, PackageVertex};
use crate::facts::{DynLinkFacts, PackageRelations};
use crate::graph::{GraphStore, StoreResult};
use crate::keys;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LibraryGraphReport {
    pub facts_seen: usize,
    /// Facts rejected by the ELF class / machine filter.
    pub facts_filtered: usize,
    pub libraries_inserted: usize,
    pub edges_inserted: usize,
    /// Needed SONAMEs no package declares, sorted.
    pub missing_needed: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PackageGraphReport {
    pub packages_inserted: usize,
    pub edges_inserted: usize,
    pub self_edges_skipped: usize,
}

fn admits(filter: &LibraryFilter, facts: &DynLinkFacts) -> bool {
    let matches = |wanted: &Option<String>, actual: &Option<String>| match (wanted, actual) {
        (Some(wanted), Some(actual)) => wanted == actual,
        (Some(_), None) => false,
        (None, _) => true,
    };
    matches(&filter.elf_class, &facts.elf_class) && matches(&filter.machine, &facts.machine)
}

fn ensure_package<S: GraphStore>(store: &S, name: &str) -> StoreResult<bool> {
    store.insert_package(&PackageVertex { key: keys::package_key(name), name: name.to_string() })
}

/// Build library vertices and `depends_on` edges from dynamic-link facts.
///
/// All facts are indexed before any edge is drawn, so the order facts
/// arrive in does not matter. A needed library shipped by several
/// packages gets one edge per shipping package.
pub fn build_library_graph<S: GraphStore>(
    store: &S,
    facts: &[DynLinkFacts],
    filter: &LibraryFilter,
) -> StoreResult<LibraryGraphReport> {
    let mut report = LibraryGraphReport { facts_seen: facts.len(), ..LibraryGraphReport::default() };
    let admitted: Vec<&DynLinkFacts> = facts
        .iter()
        .filter(|fact| {
            let keep = admits(filter, fact);
            if !keep {
                debug!(soname = %fact.soname, package = %fact.package, "filtered out");
            }
            keep
        })
        .collect();
    report.facts_filtered = facts.len() - admitted.len();

    for fact in &admitted {
        store.record_shipping(&fact.soname, &fact.package)?;
        ensure_package(store, &fact.package)?;
    }

    let mut missing = BTreeSet::new();
    for fact in &admitted {
        let from = keys::library_key(&fact.soname, &fact.package);
        let inserted = store.insert_library(&LibraryVertex {
            key: from.clone(),
            soname: fact.soname.clone(),
            package: fact.package.clone(),
            arch: fact.machine.clone(),
            elf_class: fact.elf_class.clone(),
            kind: fact.kind,
        })?;
        if inserted {
            report.libraries_inserted += 1;
        }

        for needed in &fact.needed {
            let shipped_by = store.shipping_packages(needed)?;
            if shipped_by.is_empty() {
                if missing.insert(needed.clone()) {
                    warn!(needed = %needed, required_by = %fact.soname, "needed library not shipped by any package");
                }
                continue;
            }
            for package in shipped_by {
                let to = keys::library_key(needed, &package);
                if store.insert_library(&LibraryVertex {
                    key: to.clone(),
                    soname: needed.clone(),
                    package,
                    arch: fact.machine.clone(),
                    elf_class: fact.elf_class.clone(),
                    kind: LibraryKind::Shared,
                })? {
                    report.libraries_inserted += 1;
                }
                if store.insert_edge(&Edge::between(EdgeKind::LibraryDependsOn, &from, to))? {
                    report.edges_inserted += 1;
                }
            }
        }
    }

    report.missing_needed = missing.into_iter().collect();
    info!(
        facts = report.facts_seen,
        filtered = report.facts_filtered,
        libraries = report.libraries_inserted,
        edges = report.edges_inserted,
        missing = report.missing_needed.len(),
        "built library graph"
    );
    Ok(report)
}

/// Lift every library dependency to a dependency between the owning packages.
pub fn derive_package_graph<S: GraphStore>(store: &S) -> StoreResult<PackageGraphReport> {
    let mut report = PackageGraphReport::default();
    for edge in store.edges(EdgeKind::LibraryDependsOn)? {
        let (Some(from), Some(to)) = (store.get_library(&edge.from)?, store.get_library(&edge.to)?)
        else {
            continue;
        };
        report.packages_inserted += usize::from(ensure_package(store, &from.package)?);
        report.packages_inserted += usize::from(ensure_package(store, &to.package)?);
        if from.package == to.package {
            report.self_edges_skipped += 1;
            continue;
        }
        let edge = Edge::between(
            EdgeKind::PackageDependsOn,
            keys::package_key(&from.package),
            keys::package_key(&to.package),
        );
        if store.insert_edge(&edge)? {
            report.edges_inserted += 1;
        }
    }
    info!(edges = report.edges_inserted, "derived package graph from library graph");
    Ok(report)
}

/// Add declared package relations. `reverse_depends` entries are stored as
/// forward edges from the dependent package.
pub fn ingest_package_relations<S: GraphStore>(
    store: &S,
    relations: &PackageRelations,
) -> StoreResult<PackageGraphReport> {
    let mut report = PackageGraphReport::default();
    let link = |report: &mut PackageGraphReport, from: &str, to: &str| -> StoreResult<()> {
        report.packages_inserted += usize::from(ensure_package(store, from)?);
        report.packages_inserted += usize::from(ensure_package(store, to)?);
        if from == to {
            report.self_edges_skipped += 1;
            return Ok(());
        }
        let edge = Edge::between(
            EdgeKind::PackageDependsOn,
            keys::package_key(from),
            keys::package_key(to),
        );
        if store.insert_edge(&edge)? {
            report.edges_inserted += 1;
        }
        Ok(())
    };

    for (package, relation) in relations {
        report.packages_inserted += usize::from(ensure_package(store, package)?);
        for dependency in &relation.depends {
            link(&mut report, package, dependency)?;
        }
        for dependent in &relation.reverse_depends {
            link(&mut report, dependent, package)?;
        }
    }
    info!(
        packages = relations.len(),
        edges = report.edges_inserted,
        "ingested package relations"
    );
    Ok(report)
}
