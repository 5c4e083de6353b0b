//! Incremental, order-independent ingestion of per-binary call-graph facts.

use std::collections::{BTreeSet, HashMap};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::db::models::{
    BridgeMode, Direction, Edge, EdgeKind, FunctionVertex, LibraryKind, LibraryVertex,
    PackageVertex, VertexId,
};
use crate::facts::{BinaryFacts, FactsError, FunctionRef};
use crate::graph::{GraphKind, GraphStore, StoreError, TraversalLimits};
use crate::keys;
use crate::services::bridges::BridgeResolver;

/// Error type for ingestion of one binary.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Facts(#[from] FactsError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Why a library could not be attributed to a package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum UnresolvedReason {
    /// No dynamic-link facts name a package shipping this library.
    NoShippingRecord,
    /// Packages ship it, but none is in the binary's dependency closure.
    OutsideDependencyClosure { shipped_by: Vec<String> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnresolvedMapping {
    pub library: String,
    #[serde(flatten)]
    pub reason: UnresolvedReason,
}

/// What one ingestion changed in the graph.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub executable: String,
    pub package: String,
    pub functions_seen: usize,
    pub functions_inserted: usize,
    pub functions_promoted: usize,
    pub direct_edges_inserted: usize,
    pub self_edges_skipped: usize,
    pub indirect_edges_inserted: usize,
    pub unresolved: Vec<UnresolvedMapping>,
}

/// Writes binary facts into a graph store.
pub struct IngestEngine<'a, S: GraphStore> {
    store: &'a S,
    precise_libraries: BTreeSet<String>,
}

/// Library-to-package attribution for one binary's load scope.
struct PackageResolver<'s, S: GraphStore> {
    store: &'s S,
    closure: Vec<String>,
    resolved: HashMap<String, String>,
    unresolved: Vec<UnresolvedMapping>,
}

impl<'s, S: GraphStore> PackageResolver<'s, S> {
    fn package_of(&mut self, library: &str) -> Result<String, StoreError> {
        if let Some(package) = self.resolved.get(library) {
            return Ok(package.clone());
        }
        let shipped_by = self.store.shipping_packages(library)?;
        let found = self.closure.iter().find_map(|key| {
            shipped_by.iter().find(|package| keys::package_key(package) == *key).cloned()
        });
        let package = match found {
            Some(package) => package,
            None => {
                let reason = if shipped_by.is_empty() {
                    UnresolvedReason::NoShippingRecord
                } else {
                    UnresolvedReason::OutsideDependencyClosure { shipped_by }
                };
                warn!(library, ?reason, "library not attributable to a package");
                self.unresolved.push(UnresolvedMapping { library: library.to_string(), reason });
                keys::UNRESOLVED_PACKAGE.to_string()
            }
        };
        self.resolved.insert(library.to_string(), package.clone());
        Ok(package)
    }

    fn function_key(&mut self, function: &FunctionRef) -> Result<String, StoreError> {
        let package = self.package_of(&function.library)?;
        Ok(keys::function_key(&function.symbol, &function.library, &package))
    }
}

impl<'a, S: GraphStore> IngestEngine<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store, precise_libraries: BTreeSet::new() }
    }

    /// Libraries (by SONAME) that should be kept in precise bridge mode.
    pub fn with_precise_libraries<I, T>(mut self, libraries: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.precise_libraries = libraries.into_iter().map(Into::into).collect();
        self
    }

    /// Package keys of `package` and everything it transitively depends on,
    /// the package itself first and the rest in BFS order.
    pub fn dependency_closure(&self, package: &str) -> Result<Vec<String>, StoreError> {
        let start = VertexId::package(keys::package_key(package));
        let mut closure = vec![start.key.clone()];
        let reached = self.store.traverse(
            GraphKind::PackageGraph,
            &start,
            Direction::Outbound,
            &TraversalLimits::unbounded(),
        )?;
        closure.extend(reached.into_iter().map(|id| id.key));
        Ok(closure)
    }

    /// Ingest the facts of one analysed binary.
    ///
    /// Existing vertices are never overwritten. The only update applied to a
    /// known function is the promotion of `implicit_target` to true.
    pub fn ingest_binary(&self, facts: &BinaryFacts) -> Result<IngestReport, IngestError> {
        let mut report = IngestReport {
            executable: facts.executable.clone(),
            package: facts.package.clone(),
            functions_seen: facts.functions.len(),
            ..IngestReport::default()
        };

        self.store.insert_package(&PackageVertex {
            key: keys::package_key(&facts.package),
            name: facts.package.clone(),
        })?;

        let mut resolver = PackageResolver {
            store: self.store,
            closure: self.dependency_closure(&facts.package)?,
            resolved: HashMap::from([(facts.executable.clone(), facts.package.clone())]),
            unresolved: Vec::new(),
        };

        let mut libraries: BTreeSet<String> = BTreeSet::new();
        let mut ensure_library = |soname: &str, package: &str| -> Result<String, StoreError> {
            let key = keys::library_key(soname, package);
            if libraries.insert(key.clone()) {
                let kind = if soname == facts.executable {
                    LibraryKind::Executable
                } else {
                    LibraryKind::Shared
                };
                self.store.insert_library(&LibraryVertex {
                    key: key.clone(),
                    soname: soname.to_string(),
                    package: package.to_string(),
                    arch: None,
                    elf_class: None,
                    kind,
                })?;
            }
            Ok(key)
        };

        ensure_library(&facts.executable, &facts.package)?;
        for library in &facts.scope {
            let package = resolver.package_of(library)?;
            ensure_library(library, &package)?;
        }

        for function in &facts.functions {
            let package = resolver.package_of(&function.library)?;
            let library_key = ensure_library(&function.library, &package)?;
            let key = keys::function_key(&function.symbol, &function.library, &package);
            let vertex = FunctionVertex {
                key: key.clone(),
                symbol: function.symbol.clone(),
                name: function.demangled_name(),
                size: function.size,
                library: function.library.clone(),
                library_key,
                package,
                exported: function.exported(),
                implicit_source: function.implicit_source,
                implicit_target: function.implicit_target,
                target_updated: false,
                arg_types: None,
                call_site_args: Vec::new(),
            };
            if self.store.insert_function(&vertex)? {
                report.functions_inserted += 1;
            } else if function.implicit_target && self.store.promote_implicit_target(&key)? {
                debug!(function = %key, "promoted to implicit target");
                report.functions_promoted += 1;
            }
        }

        for (src, dst) in &facts.direct_edges {
            let from = resolver.function_key(src)?;
            let to = resolver.function_key(dst)?;
            if from == to {
                report.self_edges_skipped += 1;
                continue;
            }
            if self.store.insert_edge(&Edge::between(EdgeKind::DirectCall, from, to))? {
                report.direct_edges_inserted += 1;
            }
        }

        // Mode check and coarse write share one transaction.
        let wire_coarse = |function_key: &str, library_key: &str, outgoing: bool| {
            self.store.in_transaction(|store| {
                if store.bridge_mode(library_key)? != BridgeMode::Coarse {
                    return Ok(0);
                }
                let bridges = BridgeResolver::new(store);
                if outgoing {
                    bridges.wire_source(function_key, library_key)
                } else {
                    bridges.wire_target(function_key, library_key)
                }
            })
        };
        for source in &facts.indirect_sources {
            let key = resolver.function_key(source)?;
            let package = resolver.package_of(&source.library)?;
            let library_key = keys::library_key(&source.library, &package);
            report.indirect_edges_inserted += wire_coarse(&key, &library_key, true)?;
        }
        for target in &facts.indirect_targets {
            let key = resolver.function_key(target)?;
            let package = resolver.package_of(&target.library)?;
            let library_key = keys::library_key(&target.library, &package);
            report.indirect_edges_inserted += wire_coarse(&key, &library_key, false)?;
        }

        let bridges = BridgeResolver::new(self.store);
        for library_key in &libraries {
            let soname = library_key.split('@').next().unwrap_or(library_key);
            let wants_precise = self.precise_libraries.contains(&keys::unsanitize(soname));
            match self.store.bridge_mode(library_key)? {
                BridgeMode::Coarse if wants_precise => {
                    bridges.migrate(library_key, BridgeMode::Precise)?;
                }
                BridgeMode::Precise => {
                    report.indirect_edges_inserted += bridges.refresh(library_key)?.edges_inserted;
                }
                BridgeMode::Coarse => {}
            }
        }

        report.unresolved = resolver.unresolved;
        info!(
            executable = %report.executable,
            package = %report.package,
            inserted = report.functions_inserted,
            promoted = report.functions_promoted,
            direct_edges = report.direct_edges_inserted,
            unresolved = report.unresolved.len(),
            "ingested binary"
        );
        Ok(report)
    }
}
