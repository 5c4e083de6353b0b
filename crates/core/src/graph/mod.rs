//! Graph store abstraction.
//!
//! `GraphStore` is the seam between the ingestion/reachability services and
//! the backing database. Services take a `&S where S: GraphStore` so tests can
//! run against an in-memory store and batch workers can each own a connection.
//!
//! All inserts are insert-if-absent: inserting an existing vertex or edge is a
//! no-op reported as `Ok(false)`, never an error.

use std::collections::{HashSet, VecDeque};
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::db::models::{
    BridgeMode, BridgeVertex, Collection, CveFactKind, CveVertex, Direction, Edge, EdgeKind,
    FunctionVertex, LibraryVertex, PackageVertex, VertexId,
};

/// Error type for graph store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying SQLite error.
    #[error("SQLite error: {0}")]
    Sql(#[from] rusqlite::Error),

    /// The database was created with a newer schema version than we support.
    #[error(
        "Unsupported schema version {found}; supported range is {min_supported}..={max_supported}"
    )]
    UnsupportedSchemaVersion { found: i32, min_supported: i32, max_supported: i32 },

    /// A traversal exceeded its time limit.
    #[error("Traversal from {start} timed out after {elapsed_ms} ms")]
    TraversalTimeout { start: String, elapsed_ms: u128 },
}

/// Convenience result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// The three traversable graphs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphKind {
    /// Functions joined by direct calls, with bridges as pass-through hops.
    CallGraph,
    /// Libraries joined by dynamic-link dependencies.
    LibraryGraph,
    /// Packages joined by declared package dependencies.
    PackageGraph,
}

impl GraphKind {
    pub fn edge_kinds(self) -> &'static [EdgeKind] {
        match self {
            GraphKind::CallGraph => {
                &[EdgeKind::DirectCall, EdgeKind::IndirectCallOut, EdgeKind::IndirectCallIn]
            }
            GraphKind::LibraryGraph => &[EdgeKind::LibraryDependsOn],
            GraphKind::PackageGraph => &[EdgeKind::PackageDependsOn],
        }
    }
}

/// Bounds applied to a single traversal.
#[derive(Debug, Clone, Copy, Default)]
pub struct TraversalLimits {
    pub max_depth: Option<u32>,
    pub timeout: Option<Duration>,
}

impl TraversalLimits {
    pub fn unbounded() -> Self {
        Self::default()
    }
}

/// Typed access to the vertex and edge collections of the graph.
pub trait GraphStore {
    /// Insert a package vertex if absent. Returns true if it was inserted.
    fn insert_package(&self, package: &PackageVertex) -> StoreResult<bool>;
    fn get_package(&self, key: &str) -> StoreResult<Option<PackageVertex>>;

    fn insert_library(&self, library: &LibraryVertex) -> StoreResult<bool>;
    fn get_library(&self, key: &str) -> StoreResult<Option<LibraryVertex>>;
    fn list_libraries(&self) -> StoreResult<Vec<LibraryVertex>>;

    fn insert_function(&self, function: &FunctionVertex) -> StoreResult<bool>;
    fn get_function(&self, key: &str) -> StoreResult<Option<FunctionVertex>>;
    fn functions_of_library(&self, library_key: &str) -> StoreResult<Vec<FunctionVertex>>;

    /// Flip `implicit_target` to true and mark the vertex updated.
    /// Returns true only if the flag actually changed.
    fn promote_implicit_target(&self, key: &str) -> StoreResult<bool>;

    /// Attach ground-truth argument types to a function.
    fn set_function_signatures(
        &self,
        key: &str,
        arg_types: Option<&[String]>,
        call_site_args: &[Vec<String>],
    ) -> StoreResult<()>;

    /// Record that `package` ships a binary advertising `soname`.
    fn record_shipping(&self, soname: &str, package: &str) -> StoreResult<()>;
    /// Packages shipping `soname`, in the order they were first recorded.
    fn shipping_packages(&self, soname: &str) -> StoreResult<Vec<String>>;

    /// Insert a CVE vertex if absent. The status of an existing CVE is left untouched.
    fn insert_cve(&self, cve: &CveVertex) -> StoreResult<bool>;
    fn get_cve(&self, id: &str) -> StoreResult<Option<CveVertex>>;
    fn list_cves(&self) -> StoreResult<Vec<CveVertex>>;
    /// Append one fact to the CVE's log. Duplicate facts are ignored.
    fn append_cve_fact(&self, cve: &str, kind: CveFactKind, value: &str) -> StoreResult<()>;
    /// Facts logged for a CVE, in append order.
    fn cve_facts(&self, cve: &str) -> StoreResult<Vec<(CveFactKind, String)>>;
    /// Overwrite the materialised library/package lists of a CVE.
    fn set_cve_lists(&self, cve: &str, libraries: &[String], packages: &[String])
        -> StoreResult<()>;

    fn insert_bridge(&self, bridge: &BridgeVertex) -> StoreResult<bool>;
    fn bridges_of_library(&self, library_key: &str) -> StoreResult<Vec<BridgeVertex>>;
    fn remove_bridge(&self, key: &str) -> StoreResult<bool>;
    /// Current bridge mode of a library. Libraries never configured are coarse.
    fn bridge_mode(&self, library_key: &str) -> StoreResult<BridgeMode>;
    fn set_bridge_mode(&self, library_key: &str, mode: BridgeMode) -> StoreResult<()>;

    fn insert_edge(&self, edge: &Edge) -> StoreResult<bool>;
    fn remove_edge(&self, kind: EdgeKind, key: &str) -> StoreResult<bool>;
    /// Edges of `kind` with `key` at either end.
    fn edges_touching(&self, kind: EdgeKind, key: &str) -> StoreResult<Vec<Edge>>;
    fn edges(&self, kind: EdgeKind) -> StoreResult<Vec<Edge>>;

    /// Vertices one hop away from `id` over any of `kinds`.
    fn neighbors(
        &self,
        kinds: &[EdgeKind],
        id: &VertexId,
        direction: Direction,
    ) -> StoreResult<Vec<VertexId>>;

    fn vertex_exists(&self, id: &VertexId) -> StoreResult<bool>;
    fn count_vertices(&self, collection: Collection) -> StoreResult<u64>;
    fn count_edges(&self, kind: EdgeKind) -> StoreResult<u64>;

    /// Run `f` as one atomic unit of work.
    fn in_transaction<T, F>(&self, f: F) -> StoreResult<T>
    where
        Self: Sized,
        F: FnOnce(&Self) -> StoreResult<T>;

    /// Breadth-first traversal from `start` with a global visited set.
    ///
    /// Every vertex is visited at most once, so cyclic graphs terminate. The
    /// result is in BFS order and does not contain `start`.
    fn traverse(
        &self,
        graph: GraphKind,
        start: &VertexId,
        direction: Direction,
        limits: &TraversalLimits,
    ) -> StoreResult<Vec<VertexId>>
    where
        Self: Sized,
    {
        self.traverse_from(graph, std::slice::from_ref(start), direction, limits)
    }

    /// Breadth-first traversal seeded with several start vertices sharing one
    /// visited set. The result is the union of what each start reaches,
    /// without the starts themselves.
    fn traverse_from(
        &self,
        graph: GraphKind,
        starts: &[VertexId],
        direction: Direction,
        limits: &TraversalLimits,
    ) -> StoreResult<Vec<VertexId>>
    where
        Self: Sized,
    {
        let started = Instant::now();
        let mut visited: HashSet<VertexId> = starts.iter().cloned().collect();
        let mut queue: VecDeque<(VertexId, u32)> =
            starts.iter().map(|start| (start.clone(), 0u32)).collect();
        let mut reached = Vec::new();

        while let Some((current, depth)) = queue.pop_front() {
            if let Some(timeout) = limits.timeout {
                if started.elapsed() >= timeout {
                    let start = match starts {
                        [single] => single.to_string(),
                        _ => format!("{} start vertices", starts.len()),
                    };
                    return Err(StoreError::TraversalTimeout {
                        start,
                        elapsed_ms: started.elapsed().as_millis(),
                    });
                }
            }
            if limits.max_depth.is_some_and(|max| depth >= max) {
                continue;
            }
            for next in self.neighbors(graph.edge_kinds(), &current, direction)? {
                if visited.insert(next.clone()) {
                    reached.push(next.clone());
                    queue.push_back((next, depth + 1));
                }
            }
        }

        Ok(reached)
    }
}
