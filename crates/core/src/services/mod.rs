//! Services built on top of a [`GraphStore`](crate::graph::GraphStore).
//!
//! Each service borrows the store it works on, so the same code runs
//! against a shared connection in the CLI and a per-worker connection in
//! a batch.

pub mod batch;
pub mod bridges;
pub mod cves;
pub mod dependencies;
pub mod ingest;
pub mod reach;

pub use batch::{BatchCoordinator, BatchSummary, MarkerStore, UnitFailure, WorkUnit};
pub use bridges::{
    signature, ApplyCounts, BridgePlan, BridgeResolver, GroundTruthReport, MigrationReport,
};
pub use cves::{merge_cve_logs, record_cve, CveIngestReport};
pub use dependencies::{
    build_library_graph, derive_package_graph, ingest_package_relations, LibraryGraphReport,
    PackageGraphReport,
};
pub use ingest::{IngestEngine, IngestError, IngestReport, UnresolvedMapping, UnresolvedReason};
pub use reach::{
    AffectedFunctionImpact, CveExposure, CveImpact, CveIndex, ImpactedFunction, ReachEngine,
    SurfaceImpact,
};
