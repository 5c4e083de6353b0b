//! Indirect-call approximation through bridge vertices.
//!
//! In coarse mode a library has one bridge: every function that makes
//! indirect calls points at it, and it points at every address-taken
//! function. Precise mode partitions both sides by argument signature so
//! a call site only reaches targets whose signature matches.
//!
//! The two edge sets never coexist for one library. [`BridgeResolver::migrate`]
//! removes the old set and writes the new one in a single transaction.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use tracing::{debug, info};

use crate::db::models::{BridgeMode, BridgeVertex, Edge, EdgeKind, FunctionVertex};
use crate::facts::GroundTruth;
use crate::graph::{GraphStore, StoreResult};
use crate::keys;

/// Canonical argument signature: the first character of every parameter type.
///
/// Distinct types that share a first letter collapse into one signature
/// (`struct a *` and `struct b *` both become `s`). Calls between them are
/// therefore still over-approximated in precise mode.
pub fn signature(arg_types: &[String]) -> String {
    arg_types.iter().filter_map(|t| t.chars().next()).collect()
}

/// Bridges and indirect edges one mode produces for one library.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BridgePlan {
    pub bridges: Vec<BridgeVertex>,
    pub edges: Vec<Edge>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ApplyCounts {
    pub bridges_inserted: usize,
    pub edges_inserted: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    pub library: String,
    pub from: BridgeMode,
    pub to: BridgeMode,
    pub bridges_removed: usize,
    pub edges_removed: usize,
    pub bridges_inserted: usize,
    pub edges_inserted: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GroundTruthReport {
    pub library: String,
    pub functions_updated: usize,
    /// Ground-truth functions with no matching vertex in the library.
    pub not_found: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rebuilt: Option<MigrationReport>,
}

/// Builds and maintains the bridge layer of individual libraries.
pub struct BridgeResolver<'a, S: GraphStore> {
    store: &'a S,
}

impl<'a, S: GraphStore> BridgeResolver<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// Connect an indirect-call source to its library's coarse bridge.
    pub fn wire_source(&self, function_key: &str, library_key: &str) -> StoreResult<usize> {
        let bridge = coarse_bridge(library_key);
        self.store.insert_bridge(&bridge)?;
        let edge = Edge::between(EdgeKind::IndirectCallOut, function_key, &bridge.key);
        let inserted = self.store.insert_edge(&edge)?;
        Ok(usize::from(inserted))
    }

    /// Connect the coarse bridge of a library to an indirect-call target.
    pub fn wire_target(&self, function_key: &str, library_key: &str) -> StoreResult<usize> {
        let bridge = coarse_bridge(library_key);
        self.store.insert_bridge(&bridge)?;
        let edge = Edge::between(EdgeKind::IndirectCallIn, &bridge.key, function_key);
        let inserted = self.store.insert_edge(&edge)?;
        Ok(usize::from(inserted))
    }

    /// Compute what `mode` would store for a library from its current function vertices.
    pub fn plan(&self, library_key: &str, mode: BridgeMode) -> StoreResult<BridgePlan> {
        let functions = self.store.functions_of_library(library_key)?;
        Ok(match mode {
            BridgeMode::Coarse => coarse_plan(library_key, &functions),
            BridgeMode::Precise => precise_plan(library_key, &functions),
        })
    }

    /// Insert a plan. Parts that already exist are left alone.
    pub fn apply(&self, plan: &BridgePlan) -> StoreResult<ApplyCounts> {
        let mut counts = ApplyCounts::default();
        for bridge in &plan.bridges {
            if self.store.insert_bridge(bridge)? {
                counts.bridges_inserted += 1;
            }
        }
        for edge in &plan.edges {
            if self.store.insert_edge(edge)? {
                counts.edges_inserted += 1;
            }
        }
        Ok(counts)
    }

    /// Re-apply the current mode's plan for a library without removing anything.
    pub fn refresh(&self, library_key: &str) -> StoreResult<ApplyCounts> {
        let mode = self.store.bridge_mode(library_key)?;
        let plan = self.plan(library_key, mode)?;
        self.apply(&plan)
    }

    /// Switch a library to `target` mode.
    ///
    /// Every bridge of the library and every indirect edge touching one is
    /// removed, then the target mode's plan is inserted. Running it again
    /// with the same target leaves the graph unchanged.
    pub fn migrate(&self, library_key: &str, target: BridgeMode) -> StoreResult<MigrationReport> {
        let report = self.store.in_transaction(|store| {
            let from = store.bridge_mode(library_key)?;
            let mut bridges_removed = 0;
            let mut edges_removed = 0;
            for bridge in store.bridges_of_library(library_key)? {
                for kind in [EdgeKind::IndirectCallOut, EdgeKind::IndirectCallIn] {
                    for edge in store.edges_touching(kind, &bridge.key)? {
                        if store.remove_edge(kind, &edge.key)? {
                            edges_removed += 1;
                        }
                    }
                }
                if store.remove_bridge(&bridge.key)? {
                    bridges_removed += 1;
                }
            }
            store.set_bridge_mode(library_key, target)?;

            let plan = self.plan(library_key, target)?;
            let counts = self.apply(&plan)?;
            Ok(MigrationReport {
                library: library_key.to_string(),
                from,
                to: target,
                bridges_removed,
                edges_removed,
                bridges_inserted: counts.bridges_inserted,
                edges_inserted: counts.edges_inserted,
            })
        })?;
        info!(
            library = %report.library,
            from = report.from.as_str(),
            to = report.to.as_str(),
            removed = report.edges_removed,
            inserted = report.edges_inserted,
            "migrated bridge mode"
        );
        Ok(report)
    }

    /// Attach ground-truth argument types to the library's functions.
    ///
    /// Functions are matched on their symbol stem. If the library is already
    /// in precise mode its bridges are rebuilt from the new signatures.
    pub fn apply_ground_truth(
        &self,
        library_key: &str,
        truth: &GroundTruth,
    ) -> StoreResult<GroundTruthReport> {
        let mut by_stem: BTreeMap<&str, Vec<&FunctionVertex>> = BTreeMap::new();
        let functions = self.store.functions_of_library(library_key)?;
        for function in &functions {
            by_stem.entry(keys::symbol_stem(&function.symbol)).or_default().push(function);
        }

        let mut report =
            GroundTruthReport { library: library_key.to_string(), ..GroundTruthReport::default() };
        for (name, args) in &truth.functions {
            match by_stem.get(name.as_str()) {
                Some(matches) => {
                    for function in matches {
                        self.store.set_function_signatures(
                            &function.key,
                            Some(&args.arg_types),
                            &args.call_sites,
                        )?;
                        report.functions_updated += 1;
                    }
                }
                None => {
                    debug!(library = library_key, function = %name, "ground truth function not in graph");
                    report.not_found.push(name.clone());
                }
            }
        }

        if self.store.bridge_mode(library_key)? == BridgeMode::Precise {
            report.rebuilt = Some(self.migrate(library_key, BridgeMode::Precise)?);
        }
        Ok(report)
    }
}

fn coarse_bridge(library_key: &str) -> BridgeVertex {
    BridgeVertex {
        key: keys::bridge_key(keys::COARSE_SELECTOR, library_key),
        library_key: library_key.to_string(),
        mode: BridgeMode::Coarse,
        selector: keys::COARSE_SELECTOR.to_string(),
    }
}

fn precise_bridge(library_key: &str, sig: &str) -> BridgeVertex {
    let selector = keys::signature_selector(sig);
    BridgeVertex {
        key: keys::bridge_key(&selector, library_key),
        library_key: library_key.to_string(),
        mode: BridgeMode::Precise,
        selector,
    }
}

fn coarse_plan(library_key: &str, functions: &[FunctionVertex]) -> BridgePlan {
    let mut plan = BridgePlan::default();
    if !functions.iter().any(|f| f.implicit_source || f.implicit_target) {
        return plan;
    }
    let bridge = coarse_bridge(library_key);
    for function in functions {
        if function.implicit_source {
            plan.edges.push(Edge::between(EdgeKind::IndirectCallOut, &function.key, &bridge.key));
        }
        if function.implicit_target {
            plan.edges.push(Edge::between(EdgeKind::IndirectCallIn, &bridge.key, &function.key));
        }
    }
    plan.bridges.push(bridge);
    plan
}

fn precise_plan(library_key: &str, functions: &[FunctionVertex]) -> BridgePlan {
    let mut targets: BTreeMap<String, Vec<&FunctionVertex>> = BTreeMap::new();
    for function in functions.iter().filter(|f| f.implicit_target) {
        if let Some(arg_types) = &function.arg_types {
            targets.entry(signature(arg_types)).or_default().push(function);
        }
    }

    let mut plan = BridgePlan::default();
    for (sig, members) in &targets {
        let bridge = precise_bridge(library_key, sig);
        for target in members {
            plan.edges.push(Edge::between(EdgeKind::IndirectCallIn, &bridge.key, &target.key));
        }
        plan.bridges.push(bridge);
    }

    for source in functions.iter().filter(|f| f.implicit_source) {
        let call_sigs: BTreeSet<String> =
            source.call_site_args.iter().map(|args| signature(args)).collect();
        for sig in call_sigs.iter().filter(|sig| targets.contains_key(*sig)) {
            let bridge_key = keys::bridge_key(&keys::signature_selector(sig), library_key);
            plan.edges.push(Edge::between(EdgeKind::IndirectCallOut, &source.key, bridge_key));
        }
    }
    plan
}
