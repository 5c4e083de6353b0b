use std::env;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use walkdir::WalkDir;

pub mod commands;

/// File name suffix of per-binary call-graph fact files.
pub const BINARY_FACTS_SUFFIX: &str = ".fcg.json";
/// File name suffix of dynamic-link fact files.
pub const ELF_INFO_SUFFIX: &str = "_elf_info.csv";

/// Canonicalize the root path if possible, falling back to the given string
/// relative to the current working directory.
pub fn canonicalize_or_current(root: &str) -> Result<PathBuf> {
    let path = Path::new(root);
    if path == Path::new(".") {
        Ok(env::current_dir().context("Failed to get current directory")?)
    } else {
        // The path may not exist yet (e.g. before init-project).
        match path.canonicalize() {
            Ok(p) => Ok(p),
            Err(_) => {
                let cwd = env::current_dir().context("Failed to get current directory")?;
                Ok(cwd.join(path))
            }
        }
    }
}

/// Infer a project name from the root path.
///
/// If the root has no final component (e.g., `/`), fallback to `unnamed-project`.
pub fn infer_project_name(root: &Path) -> String {
    root.file_name().and_then(|os_str| os_str.to_str()).unwrap_or("unnamed-project").to_string()
}

/// Resolve `path` against the project root unless it is absolute.
pub fn resolve_input(root: &Path, path: &str) -> PathBuf {
    let input = Path::new(path);
    if input.is_absolute() {
        input.to_path_buf()
    } else {
        root.join(input)
    }
}

/// Collect fact files ending in `suffix`.
///
/// Each input may be a file (taken as is) or a directory searched
/// recursively. Symlinks are not followed. The result is sorted and free
/// of duplicates.
pub fn collect_fact_files(inputs: &[PathBuf], suffix: &str) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for input in inputs {
        if input.is_file() {
            files.push(input.clone());
            continue;
        }
        for entry in WalkDir::new(input) {
            let entry = entry.with_context(|| format!("Failed to scan {}", input.display()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let matches =
                entry.file_name().to_str().is_some_and(|name| name.ends_with(suffix));
            if matches {
                files.push(entry.into_path());
            }
        }
    }
    files.sort();
    files.dedup();
    Ok(files)
}
