//! Project layout, configuration and the SQLite graph database.
//!
//! - `ProjectConfig` / `ProjectLayout`: on-disk project metadata under `.vulnreach/`.
//! - `GraphDb`: SQLite implementation of [`crate::graph::GraphStore`] with
//!   schema migrations tracked in `PRAGMA user_version`.
//! - `models`: typed vertex and edge records stored in the graph.

pub mod config;
pub mod context;
pub mod graph_db;
pub mod layout;
pub mod models;
pub mod util;

pub use config::*;
pub use context::*;
pub use graph_db::*;
pub use layout::*;
pub use models::*;
pub use util::*;
