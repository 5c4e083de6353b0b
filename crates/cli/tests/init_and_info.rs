use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use tempfile::tempdir;
use vulnreach_core::db::{ProjectConfig, ProjectLayout, CURRENT_SCHEMA_VERSION};

#[test]
fn init_project_creates_layout_config_and_database() {
    let temp = tempdir().expect("tempdir");
    let root = temp.path().to_string_lossy().to_string();

    cargo_bin_cmd!("vulnreach")
        .arg("init-project")
        .arg("--root")
        .arg(&root)
        .arg("--name")
        .arg("DistGraph")
        .assert()
        .success()
        .stdout(predicate::str::contains("Initialized vulnreach project:"))
        .stdout(predicate::str::contains("DistGraph"));

    let layout = ProjectLayout::new(&root);
    assert!(layout.meta_dir.is_dir());
    assert!(layout.markers_dir.is_dir());
    assert!(layout.results_dir.is_dir());
    assert!(layout.facts_dir.is_dir());
    assert!(layout.db_path.is_file());

    let config: ProjectConfig = serde_json::from_str(
        &std::fs::read_to_string(&layout.project_config_path).expect("read config"),
    )
    .expect("parse config");
    assert_eq!(config.name, "DistGraph");
    assert_eq!(config.db.path, layout.db_path_relative_string());
}

#[test]
fn project_info_reports_schema_and_empty_graph() {
    let temp = tempdir().expect("tempdir");
    let root = temp.path().to_string_lossy().to_string();
    vulnreach::commands::init_project_command(&root, Some("InfoProj".into())).expect("init");

    let output = cargo_bin_cmd!("vulnreach")
        .arg("project-info")
        .arg("--root")
        .arg(&root)
        .arg("--json")
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let body: serde_json::Value = serde_json::from_slice(&output).expect("project-info json");
    assert_eq!(body["name"], "InfoProj");
    assert_eq!(body["schema_version"], CURRENT_SCHEMA_VERSION);
    assert_eq!(body["graph"]["vertices"]["functions"], 0);
    assert_eq!(body["config"]["ingest"]["workers"], 4);

    cargo_bin_cmd!("vulnreach")
        .arg("project-info")
        .arg("--root")
        .arg(&root)
        .assert()
        .success()
        .stdout(predicate::str::contains("Name: InfoProj"))
        .stdout(predicate::str::contains("Facts dir: OK"));
}

#[test]
fn project_info_without_project_fails() {
    let temp = tempdir().expect("tempdir");
    cargo_bin_cmd!("vulnreach")
        .arg("project-info")
        .arg("--root")
        .arg(temp.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to read project config"));
}

#[test]
fn stats_on_fresh_project_lists_every_collection() {
    let temp = tempdir().expect("tempdir");
    let root = temp.path().to_string_lossy().to_string();
    vulnreach::commands::init_project_command(&root, None).expect("init");

    let output = cargo_bin_cmd!("vulnreach")
        .arg("stats")
        .arg("--root")
        .arg(&root)
        .arg("--json")
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let body: serde_json::Value = serde_json::from_slice(&output).expect("stats json");
    for collection in ["functions", "libraries", "packages", "cves", "bridges"] {
        assert_eq!(body["vertices"][collection], 0, "collection {collection}");
    }
    for kind in [
        "direct_calls",
        "indirect_calls_out",
        "indirect_calls_in",
        "depends_on",
        "package_depends",
        "cve_affects",
    ] {
        assert_eq!(body["edges"][kind], 0, "edge kind {kind}");
    }
}
