//! Reachability queries over the call, library and package graphs.
//!
//! Conventions for every level: the start vertex is part of its own reach
//! set, and a start vertex that does not exist yields an empty set. At the
//! function level, bridges are traversed but never reported.
//!
//! Aggregate queries (CVE impact, exported surface, exposure) catch
//! traversal timeouts, log them and carry on with an empty set flagged as
//! timed out. The single-level queries return the timeout as an error.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use tracing::{debug, warn};

use crate::db::models::{Collection, Direction, EdgeKind, VertexId};
use crate::facts::cve_year;
use crate::graph::{GraphKind, GraphStore, StoreError, StoreResult, TraversalLimits};
use crate::keys;

/// CVE attribution loaded once and shared by every query of a batch.
#[derive(Debug, Clone, Default)]
pub struct CveIndex {
    by_function: BTreeMap<String, BTreeSet<String>>,
    libraries: BTreeMap<String, Vec<String>>,
}

impl CveIndex {
    /// Load every CVE-affects edge. CVEs older than `min_year` are left out.
    pub fn build<S: GraphStore>(store: &S, min_year: Option<u32>) -> StoreResult<Self> {
        let admitted = |id: &str| match min_year {
            Some(min) => cve_year(id).is_some_and(|year| year >= min),
            None => true,
        };

        let mut index = CveIndex::default();
        for cve in store.list_cves()? {
            if admitted(&cve.id) {
                index.libraries.insert(cve.id.clone(), cve.libraries);
            }
        }
        for edge in store.edges(EdgeKind::CveAffects)? {
            if index.libraries.contains_key(&edge.from) {
                index.by_function.entry(edge.to).or_default().insert(edge.from);
            }
        }
        Ok(index)
    }

    /// CVEs attributed directly to a function.
    pub fn cves_of(&self, function_key: &str) -> Option<&BTreeSet<String>> {
        self.by_function.get(function_key)
    }

    /// CVEs whose affected-library list names `soname`.
    pub fn cves_naming_library(&self, soname: &str) -> BTreeSet<String> {
        self.libraries
            .iter()
            .filter(|(_, libraries)| libraries.iter().any(|l| l == soname))
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Ids of every admitted CVE, sorted.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.libraries.keys().map(String::as_str)
    }

    pub fn cve_count(&self) -> usize {
        self.libraries.len()
    }

    /// Union of the CVEs of all `functions`, each counted once.
    pub fn union_over<'k, I>(&self, functions: I) -> BTreeSet<String>
    where
        I: IntoIterator<Item = &'k String>,
    {
        let mut out = BTreeSet::new();
        for key in functions {
            if let Some(cves) = self.by_function.get(key) {
                out.extend(cves.iter().cloned());
            }
        }
        out
    }
}

/// Blast radius of one function a CVE was attributed to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AffectedFunctionImpact {
    pub function: String,
    pub library: String,
    pub package: String,
    pub function_reach_count: usize,
    pub function_reach: BTreeSet<String>,
    /// Libraries owning any function in `function_reach`.
    pub libraries_reached: BTreeSet<String>,
    pub library_reach_count: usize,
    pub library_reach: BTreeSet<String>,
    pub package_reach_count: usize,
    pub package_reach: BTreeSet<String>,
    pub timed_out: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CveImpact {
    pub id: String,
    pub status: Option<String>,
    pub affected: Vec<AffectedFunctionImpact>,
    /// Functions the CVE names that are not (yet) in the graph.
    pub missing_functions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImpactedFunction {
    pub function: String,
    pub cves: BTreeSet<String>,
}

/// Externally triggerable CVE surface of one library.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SurfaceImpact {
    pub library: String,
    pub total_functions: usize,
    pub exported_functions: Vec<String>,
    /// Exported functions that reach at least one CVE-affected function.
    pub impacted: Vec<ImpactedFunction>,
    pub cves_reached: BTreeSet<String>,
    /// Exported functions whose traversal timed out.
    pub timed_out: Vec<String>,
}

/// CVEs a library is exposed to through its calls and its dependencies.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CveExposure {
    pub library: String,
    pub function_cves: BTreeSet<String>,
    pub library_cves: BTreeSet<String>,
    pub timed_out: bool,
}

/// Answers reachability questions against a graph store.
pub struct ReachEngine<'a, S: GraphStore> {
    store: &'a S,
    limits: TraversalLimits,
}

impl<'a, S: GraphStore> ReachEngine<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store, limits: TraversalLimits::unbounded() }
    }

    pub fn with_limits(mut self, limits: TraversalLimits) -> Self {
        self.limits = limits;
        self
    }

    fn reach(
        &self,
        graph: GraphKind,
        start: VertexId,
        direction: Direction,
    ) -> StoreResult<BTreeSet<String>> {
        if !self.store.vertex_exists(&start)? {
            return Ok(BTreeSet::new());
        }
        let collection = start.collection;
        let reached = self.store.traverse(graph, &start, direction, &self.limits)?;
        let mut out: BTreeSet<String> = reached
            .into_iter()
            .filter(|id| id.collection == collection)
            .map(|id| id.key)
            .collect();
        out.insert(start.key);
        Ok(out)
    }

    /// Functions reaching (inbound) or reached by (outbound) `function_key`.
    ///
    /// Bridges are pass-through hops and never appear in the result.
    pub fn function_level_reach(
        &self,
        function_key: &str,
        direction: Direction,
    ) -> StoreResult<BTreeSet<String>> {
        self.reach(GraphKind::CallGraph, VertexId::function(function_key), direction)
    }

    /// Libraries depending on (inbound) or depended on by (outbound) `library_key`.
    pub fn library_level_reach(
        &self,
        library_key: &str,
        direction: Direction,
    ) -> StoreResult<BTreeSet<String>> {
        self.reach(GraphKind::LibraryGraph, VertexId::library(library_key), direction)
    }

    /// Packages depending on (inbound) or depended on by (outbound) `package`.
    pub fn package_level_reach(
        &self,
        package: &str,
        direction: Direction,
    ) -> StoreResult<BTreeSet<String>> {
        self.reach(
            GraphKind::PackageGraph,
            VertexId::package(keys::package_key(package)),
            direction,
        )
    }

    /// Function-level outbound reach of several functions at once, starts included.
    fn outbound_union(&self, function_keys: &[String]) -> StoreResult<BTreeSet<String>> {
        let starts: Vec<VertexId> = function_keys.iter().map(VertexId::function).collect();
        let reached = self.store.traverse_from(
            GraphKind::CallGraph,
            &starts,
            Direction::Outbound,
            &self.limits,
        )?;
        let mut out: BTreeSet<String> = function_keys.iter().cloned().collect();
        out.extend(
            reached.into_iter().filter(|id| id.collection == Collection::Functions).map(|id| id.key),
        );
        Ok(out)
    }

    /// Function, library and package blast radius of every function a CVE affects.
    pub fn cve_impact(&self, cve_id: &str) -> StoreResult<Option<CveImpact>> {
        let Some(cve) = self.store.get_cve(cve_id)? else {
            return Ok(None);
        };
        let mut impact = CveImpact { id: cve.id.clone(), status: cve.status.clone(), ..CveImpact::default() };

        for edge in self.store.edges_touching(EdgeKind::CveAffects, cve_id)? {
            if edge.from != cve_id {
                continue;
            }
            let Some(function) = self.store.get_function(&edge.to)? else {
                warn!(cve = cve_id, function = %edge.to, "CVE names a function missing from the graph");
                impact.missing_functions.push(edge.to.clone());
                continue;
            };

            let mut entry = AffectedFunctionImpact {
                function: function.key.clone(),
                library: function.library_key.clone(),
                package: function.package.clone(),
                ..AffectedFunctionImpact::default()
            };
            let timed_out = |entry: &mut AffectedFunctionImpact, err: StoreError| {
                warn!(cve = cve_id, function = %function.key, error = %err, "reach query abandoned");
                entry.timed_out = true;
            };

            match self.function_level_reach(&function.key, Direction::Inbound) {
                Ok(reach) => entry.function_reach = reach,
                Err(err @ StoreError::TraversalTimeout { .. }) => timed_out(&mut entry, err),
                Err(err) => return Err(err),
            }
            for key in &entry.function_reach {
                if let Some(reached) = self.store.get_function(key)? {
                    entry.libraries_reached.insert(reached.library_key);
                }
            }
            match self.library_level_reach(&function.library_key, Direction::Inbound) {
                Ok(reach) => entry.library_reach = reach,
                Err(err @ StoreError::TraversalTimeout { .. }) => timed_out(&mut entry, err),
                Err(err) => return Err(err),
            }
            match self.package_level_reach(&function.package, Direction::Inbound) {
                Ok(reach) => entry.package_reach = reach,
                Err(err @ StoreError::TraversalTimeout { .. }) => timed_out(&mut entry, err),
                Err(err) => return Err(err),
            }

            entry.function_reach_count = entry.function_reach.len();
            entry.library_reach_count = entry.library_reach.len();
            entry.package_reach_count = entry.package_reach.len();
            impact.affected.push(entry);
        }
        Ok(Some(impact))
    }

    /// Exported functions of a library and the CVEs each can reach.
    pub fn exported_surface_impact(
        &self,
        library_key: &str,
        index: &CveIndex,
    ) -> StoreResult<SurfaceImpact> {
        let functions = self.store.functions_of_library(library_key)?;
        let mut surface = SurfaceImpact {
            library: library_key.to_string(),
            total_functions: functions.len(),
            ..SurfaceImpact::default()
        };

        for function in functions.iter().filter(|f| f.exported) {
            surface.exported_functions.push(function.key.clone());
            let reach = match self.function_level_reach(&function.key, Direction::Outbound) {
                Ok(reach) => reach,
                Err(err @ StoreError::TraversalTimeout { .. }) => {
                    warn!(function = %function.key, error = %err, "surface traversal abandoned");
                    surface.timed_out.push(function.key.clone());
                    continue;
                }
                Err(err) => return Err(err),
            };
            let cves = index.union_over(&reach);
            if !cves.is_empty() {
                surface.cves_reached.extend(cves.iter().cloned());
                surface.impacted.push(ImpactedFunction { function: function.key.clone(), cves });
            }
        }
        debug!(
            library = library_key,
            exported = surface.exported_functions.len(),
            impacted = surface.impacted.len(),
            "computed exported surface"
        );
        Ok(surface)
    }

    /// CVEs reachable from a library through calls and through dependencies.
    ///
    /// The function-level set unions the CVEs of every function reachable
    /// from any function of the library. The library-level set holds CVEs
    /// whose affected-library list names the library or anything it
    /// transitively depends on.
    pub fn cve_exposure(&self, library_key: &str, index: &CveIndex) -> StoreResult<CveExposure> {
        let mut exposure = CveExposure { library: library_key.to_string(), ..CveExposure::default() };

        let functions: Vec<String> =
            self.store.functions_of_library(library_key)?.into_iter().map(|f| f.key).collect();
        match self.outbound_union(&functions) {
            Ok(reach) => exposure.function_cves = index.union_over(&reach),
            Err(err @ StoreError::TraversalTimeout { .. }) => {
                warn!(library = library_key, error = %err, "function exposure abandoned");
                exposure.timed_out = true;
            }
            Err(err) => return Err(err),
        }

        match self.library_level_reach(library_key, Direction::Outbound) {
            Ok(reach) => {
                for key in &reach {
                    let soname = match self.store.get_library(key)? {
                        Some(library) => library.soname,
                        None => continue,
                    };
                    exposure.library_cves.extend(index.cves_naming_library(&soname));
                }
            }
            Err(err @ StoreError::TraversalTimeout { .. }) => {
                warn!(library = library_key, error = %err, "library exposure abandoned");
                exposure.timed_out = true;
            }
            Err(err) => return Err(err),
        }
        Ok(exposure)
    }
}
