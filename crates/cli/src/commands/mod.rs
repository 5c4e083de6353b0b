pub mod bridges;
pub mod cves;
pub mod graph;
pub mod ingest;
pub mod project;
pub mod queries;
pub mod stats;
pub mod util;

pub use bridges::*;
pub use cves::*;
pub use graph::*;
pub use ingest::*;
pub use project::*;
pub use queries::*;
pub use stats::*;
pub use util::*;
