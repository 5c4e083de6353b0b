use serde::{Deserialize, Serialize};

/// Graph database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbConfig {
    /// Path to the graph database file (typically relative to project root).
    pub path: String,
    /// How long a connection waits on a locked database before failing.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

impl DbConfig {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into(), busy_timeout_ms: default_busy_timeout_ms() }
    }
}

fn default_busy_timeout_ms() -> u64 {
    30_000
}

/// Settings for batch ingestion of binary facts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Worker pool size for batch runs.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Libraries (by SONAME) whose indirect calls are resolved with argument signatures.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub precise_libraries: Vec<String>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self { workers: default_workers(), precise_libraries: Vec::new() }
    }
}

fn default_workers() -> usize {
    4
}

/// Settings for reachability queries.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReachConfig {
    /// Per-traversal time limit. `None` means unbounded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub traversal_timeout_ms: Option<u64>,
    /// Maximum BFS depth. `None` means unbounded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_depth: Option<u32>,
    /// Ignore CVEs published before this year.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cve_min_year: Option<u32>,
}

impl ReachConfig {
    /// Traversal bounds for every query of a run.
    pub fn limits(&self) -> crate::graph::TraversalLimits {
        crate::graph::TraversalLimits {
            max_depth: self.max_depth,
            timeout: self.traversal_timeout_ms.map(std::time::Duration::from_millis),
        }
    }
}

/// Which dynamic-link facts are admitted into the library graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LibraryFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elf_class: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub machine: Option<String>,
}

impl Default for LibraryFilter {
    fn default() -> Self {
        Self {
            elf_class: Some("ELF64".to_string()),
            machine: Some("Advanced_Micro_Devices_X86-64".to_string()),
        }
    }
}

impl LibraryFilter {
    /// Filter that admits everything.
    pub fn any() -> Self {
        Self { elf_class: None, machine: None }
    }
}

/// Serializable configuration describing a vulnreach project.
///
/// This lives at `.vulnreach/project.json` in the project root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// Human-friendly project name.
    pub name: String,
    /// Optional description / notes.
    pub description: Option<String>,
    /// Schema/config version. This is about the config format, not the graph schema.
    pub config_version: String,
    /// Database configuration (path is typically relative to project root).
    pub db: DbConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub reach: ReachConfig,
    #[serde(default)]
    pub libraries: LibraryFilter,
}

impl ProjectConfig {
    /// Create a new project configuration using the given name and db path.
    pub fn new(name: impl Into<String>, db_path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            config_version: "0.1.0".to_string(),
            db: DbConfig::new(db_path),
            ingest: IngestConfig::default(),
            reach: ReachConfig::default(),
            libraries: LibraryFilter::default(),
        }
    }
}
