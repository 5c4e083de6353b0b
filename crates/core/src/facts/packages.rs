//! Declared package relationships (`depends` / `reverse_depends`).

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::facts::{read_to_string, FactsResult};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PackageRelation {
    /// Packages this package depends on.
    #[serde(default)]
    pub depends: Vec<String>,
    /// Packages that depend on this package.
    #[serde(default)]
    pub reverse_depends: Vec<String>,
}

/// Package relation facts keyed by package name.
pub type PackageRelations = BTreeMap<String, PackageRelation>;

/// Load relations from JSON or YAML, chosen by file extension.
pub fn load_package_relations(path: &Path) -> FactsResult<PackageRelations> {
    let text = read_to_string(path)?;
    let ext = path.extension().and_then(|s| s.to_str()).map(|s| s.to_ascii_lowercase());
    match ext.as_deref() {
        Some("yaml") | Some("yml") => Ok(serde_yaml::from_str(&text)?),
        _ => Ok(serde_json::from_str(&text)?),
    }
}
