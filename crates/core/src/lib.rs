//! vulnreach-core
//!
//! Core library for a cross-layer dependency and vulnerability-impact graph
//! over a software distribution.
//!
//! Binaries, the functions they contain, the shared-library graph and the
//! package graph are stored as typed vertices and edges. CVEs are attached
//! to functions, and reachability queries answer how far a vulnerable
//! function, library or package can be reached at each level.
//!
//! All substantive logic lives here so it is testable and reusable from
//! multiple frontends.

pub mod db;
pub mod facts;
pub mod graph;
pub mod keys;
pub mod services;

/// Returns the library version as encoded at compile time.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
