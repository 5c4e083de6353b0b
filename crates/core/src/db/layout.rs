use std::path::{Path, PathBuf};

/// Logical layout of a project on disk.
///
/// This is derived from a chosen root path. It does *not* perform any IO itself.
/// The CLI or other frontends are responsible for actually creating directories
/// and files based on this layout.
#[derive(Debug, Clone)]
pub struct ProjectLayout {
    /// Root directory of the project.
    pub root: PathBuf,
    /// Directory for internal metadata (.vulnreach).
    pub meta_dir: PathBuf,
    /// Path to the project config file (JSON).
    pub project_config_path: PathBuf,
    /// Path to the graph database file.
    pub db_path: PathBuf,
    /// Completion/error markers, one subdirectory per batch.
    pub markers_dir: PathBuf,
    /// Per-worker JSON-lines results of batch runs.
    pub results_dir: PathBuf,
    /// Default location for input fact files.
    pub facts_dir: PathBuf,
}

impl ProjectLayout {
    /// Compute the default layout for a project rooted at `root`.
    ///
    /// This does *not* touch the filesystem.
    pub fn new(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref().to_path_buf();
        let meta_dir = root.join(".vulnreach");
        let project_config_path = meta_dir.join("project.json");
        let db_path = meta_dir.join("graph.db");
        let markers_dir = meta_dir.join("markers");
        let results_dir = root.join("results");
        let facts_dir = root.join("facts");

        Self { root, meta_dir, project_config_path, db_path, markers_dir, results_dir, facts_dir }
    }

    /// Compute a database path string suitable for storing in `ProjectConfig`,
    /// typically as a path relative to `root`.
    pub fn db_path_relative_string(&self) -> String {
        match self.db_path.strip_prefix(&self.root) {
            Ok(rel) => rel.to_string_lossy().to_string(),
            Err(_) => self.db_path.to_string_lossy().to_string(),
        }
    }

    /// Marker directory for one named batch.
    pub fn batch_markers_dir(&self, batch: &str) -> PathBuf {
        self.markers_dir.join(batch)
    }
}
