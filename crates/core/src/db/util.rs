use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::db::{GraphDb, ProjectConfig, ProjectLayout};

/// Load the project config JSON from disk for a given layout.
pub fn load_project_config(layout: &ProjectLayout) -> Result<ProjectConfig> {
    let config_json = std::fs::read_to_string(&layout.project_config_path).with_context(|| {
        format!("Failed to read project config at {}", layout.project_config_path.display())
    })?;
    let config: ProjectConfig =
        serde_json::from_str(&config_json).context("Failed to parse project config JSON")?;
    Ok(config)
}

/// Resolve the DB path, honoring absolute paths in the config.
pub fn resolve_db_path(layout: &ProjectLayout, config: &ProjectConfig) -> PathBuf {
    let config_db_path = std::path::Path::new(&config.db.path);
    if config_db_path.is_absolute() {
        config_db_path.to_path_buf()
    } else {
        layout.root.join(config_db_path)
    }
}

/// Load the config, resolve the DB path and open a GraphDb.
pub fn open_project_db(layout: &ProjectLayout) -> Result<(ProjectConfig, PathBuf, GraphDb)> {
    let config = load_project_config(layout)?;
    let db_path = resolve_db_path(layout, &config);
    let db = GraphDb::open_with_timeout(&db_path, config.db.busy_timeout_ms)
        .with_context(|| format!("Failed to open graph database at {}", db_path.display()))?;
    Ok((config, db_path, db))
}
