use std::fs;
use std::path::Path;

use tempfile::tempdir;
use vulnreach::{
    canonicalize_or_current, collect_fact_files, infer_project_name, resolve_input,
    BINARY_FACTS_SUFFIX,
};

#[test]
fn canonicalize_handles_dot_and_missing_paths() {
    let cwd = std::env::current_dir().expect("cwd");
    assert_eq!(canonicalize_or_current(".").expect("dot"), cwd);

    let missing = canonicalize_or_current("not-created-yet").expect("missing");
    assert_eq!(missing, cwd.join("not-created-yet"));
}

#[test]
fn project_name_falls_back_for_root() {
    assert_eq!(infer_project_name(Path::new("/srv/dist")), "dist");
    assert_eq!(infer_project_name(Path::new("/")), "unnamed-project");
}

#[test]
fn inputs_resolve_against_project_root() {
    let root = Path::new("/srv/dist");
    assert_eq!(resolve_input(root, "cves.csv"), root.join("cves.csv"));
    assert_eq!(resolve_input(root, "/tmp/cves.csv"), Path::new("/tmp/cves.csv"));
}

#[test]
fn fact_files_are_collected_recursively_sorted_and_deduplicated() {
    let dir = tempdir().expect("tempdir");
    let nested = dir.path().join("coreutils");
    fs::create_dir_all(&nested).expect("mkdir");
    fs::write(nested.join("ls.fcg.json"), "{}").expect("write");
    fs::write(dir.path().join("cat.fcg.json"), "{}").expect("write");
    fs::write(dir.path().join("notes.json"), "{}").expect("write");

    let explicit = nested.join("ls.fcg.json");
    let files = collect_fact_files(&[dir.path().to_path_buf(), explicit.clone()], BINARY_FACTS_SUFFIX)
        .expect("collect");
    assert_eq!(files, vec![dir.path().join("cat.fcg.json"), explicit]);

    // A file named explicitly is taken regardless of its suffix.
    let notes = dir.path().join("notes.json");
    let files = collect_fact_files(&[notes.clone()], BINARY_FACTS_SUFFIX).expect("collect");
    assert_eq!(files, vec![notes]);
}
