use std::path::{Path, PathBuf};

use anyhow::Result;

use crate::db::{open_project_db, GraphDb, ProjectConfig, ProjectLayout};

/// Convenience wrapper bundling layout, config, db path, and an open GraphDb.
#[derive(Debug)]
pub struct ProjectContext {
    pub layout: ProjectLayout,
    pub config: ProjectConfig,
    pub db_path: PathBuf,
    pub db: GraphDb,
}

impl ProjectContext {
    /// Load project config and open the database for a given root.
    pub fn from_root(root: impl AsRef<Path>) -> Result<Self> {
        let layout = ProjectLayout::new(root);
        let (config, db_path, db) = open_project_db(&layout)?;
        Ok(Self { layout, config, db_path, db })
    }

    /// Open an additional connection to the same database, e.g. for a batch worker.
    pub fn open_connection(&self) -> Result<GraphDb> {
        Ok(GraphDb::open_with_timeout(&self.db_path, self.config.db.busy_timeout_ms)?)
    }
}
