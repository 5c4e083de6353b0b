use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use anyhow::bail;
use tempfile::tempdir;
use vulnreach_core::services::{BatchCoordinator, MarkerStore};

fn units(ids: &[&str]) -> Vec<String> {
    ids.iter().map(|id| id.to_string()).collect()
}

fn result_lines(coordinator: &BatchCoordinator, workers: usize) -> Vec<serde_json::Value> {
    let mut lines = Vec::new();
    for worker in 0..workers {
        let path = coordinator.results_path(worker);
        let Ok(text) = fs::read_to_string(&path) else { continue };
        for line in text.lines() {
            lines.push(serde_json::from_str(line).expect("valid result line"));
        }
    }
    lines
}

#[test]
fn every_unit_runs_once_and_results_are_written_per_worker() {
    let dir = tempdir().expect("tempdir");
    let coordinator =
        BatchCoordinator::new("demo", 3, dir.path().join("markers"), dir.path().join("results"));
    let opened = AtomicUsize::new(0);

    let summary = coordinator
        .run(
            units(&["a", "b", "c", "d", "e"]),
            |worker| {
                opened.fetch_add(1, Ordering::SeqCst);
                Ok(worker)
            },
            |_worker, unit: &String| Ok(unit.len()),
        )
        .expect("run batch");

    assert_eq!(summary.total, 5);
    assert_eq!(summary.processed, 5);
    assert_eq!(summary.failed, 0);
    assert_eq!(opened.load(Ordering::SeqCst), 3);

    let lines = result_lines(&coordinator, 3);
    assert_eq!(lines.len(), 5);
    let mut seen: Vec<String> =
        lines.iter().map(|l| l["unit"].as_str().expect("unit").to_string()).collect();
    seen.sort();
    assert_eq!(seen, units(&["a", "b", "c", "d", "e"]));
    assert!(lines.iter().all(|l| l["result"] == 1));

    for id in ["a", "b", "c", "d", "e"] {
        assert!(coordinator.markers().is_done(id));
    }
    assert!(coordinator.results_path(0).ends_with("demo_worker_0.jsonl"));
}

#[test]
fn rerun_skips_units_with_done_markers() {
    let dir = tempdir().expect("tempdir");
    let coordinator =
        BatchCoordinator::new("resume", 2, dir.path().join("markers"), dir.path().join("results"));
    coordinator.markers().mark_done("a").expect("pre-mark");

    let calls = Mutex::new(Vec::new());
    let summary = coordinator
        .run(
            units(&["a", "b"]),
            |_| Ok(()),
            |_, unit: &String| {
                calls.lock().expect("lock").push(unit.clone());
                Ok(())
            },
        )
        .expect("run batch");

    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.processed, 1);
    assert_eq!(calls.into_inner().expect("lock"), vec!["b".to_string()]);

    let again = coordinator
        .run(units(&["a", "b"]), |_| Ok(()), |_, _unit: &String| Ok(()))
        .expect("second run");
    assert_eq!(again.skipped, 2);
    assert_eq!(again.processed, 0);
}

#[test]
fn failing_unit_gets_error_marker_and_siblings_still_finish() {
    let dir = tempdir().expect("tempdir");
    let coordinator =
        BatchCoordinator::new("mixed", 2, dir.path().join("markers"), dir.path().join("results"));

    let summary = coordinator
        .run(
            units(&["good-1", "bad", "good-2"]),
            |_| Ok(()),
            |_, unit: &String| {
                if unit == "bad" {
                    bail!("cannot parse {unit}");
                }
                Ok(unit.clone())
            },
        )
        .expect("run batch");

    assert_eq!(summary.processed, 2);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.failures[0].unit, "bad");
    assert!(summary.failures[0].error.contains("cannot parse bad"));

    let markers = coordinator.markers();
    assert!(!markers.is_done("bad"));
    let error = fs::read_to_string(markers.error_path("bad")).expect("error marker");
    assert!(error.contains("error bad: cannot parse bad"));
    assert!(markers.is_done("good-1"));
    assert!(markers.is_done("good-2"));

    // A failed unit is retried on the next run and its error history is kept.
    let retry = coordinator
        .run(units(&["good-1", "bad", "good-2"]), |_| Ok(()), |_, _unit: &String| -> anyhow::Result<()> {
            bail!("still broken")
        })
        .expect("retry");
    assert_eq!(retry.skipped, 2);
    assert_eq!(retry.failed, 1);
    let error = fs::read_to_string(markers.error_path("bad")).expect("error marker");
    assert_eq!(error.lines().count(), 2);
}

#[test]
fn worker_that_cannot_open_its_store_fails_the_batch() {
    let dir = tempdir().expect("tempdir");
    let coordinator =
        BatchCoordinator::new("broken", 2, dir.path().join("markers"), dir.path().join("results"));

    let result = coordinator.run(
        units(&["a", "b"]),
        |worker| -> anyhow::Result<()> {
            if worker == 1 {
                bail!("database locked");
            }
            Ok(())
        },
        |_, _unit: &String| Ok(()),
    );
    let err = result.expect_err("batch fails");
    assert!(format!("{err:#}").contains("database locked"));
}

#[test]
fn marker_names_are_safe_file_stems() {
    let dir = tempdir().expect("tempdir");
    let markers = MarkerStore::new(dir.path());

    let path_id = "/srv/facts/coreutils/ls.fcg.json";
    let name = markers.done_path(path_id);
    let name = name.file_name().and_then(|n| n.to_str()).expect("file name");
    assert!(name.starts_with("_srv_facts_coreutils_ls.fcg.json-"));
    assert!(name.ends_with(".done"));
    assert!(name.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')));

    let long_id = "x".repeat(500);
    let name = markers.error_path(&long_id);
    let stem = name.file_stem().and_then(|n| n.to_str()).expect("stem");
    assert_eq!(stem.len(), 200 + 1 + 12);
    assert_ne!(markers.error_path(&long_id), markers.error_path(&"x".repeat(501)));

    markers.mark_done(path_id).expect("mark");
    markers.mark_done(path_id).expect("mark again");
    let text = fs::read_to_string(markers.done_path(path_id)).expect("read marker");
    assert_eq!(text.lines().count(), 2);
    assert!(text.lines().all(|line| line.ends_with(&format!("done {path_id}"))));
}

#[test]
fn ids_that_sanitize_alike_keep_separate_markers() {
    let dir = tempdir().expect("tempdir");
    let markers = MarkerStore::new(dir.path());

    assert_ne!(markers.done_path("pkg/a+/b"), markers.done_path("pkg/a/+b"));
    markers.mark_done("pkg/a+/b").expect("mark");
    assert!(markers.is_done("pkg/a+/b"));
    assert!(!markers.is_done("pkg/a/+b"));
}

#[test]
fn result_line_is_on_disk_before_the_next_unit_starts() {
    let dir = tempdir().expect("tempdir");
    let coordinator =
        BatchCoordinator::new("durable", 1, dir.path().join("markers"), dir.path().join("results"));
    let seen_while_b = Mutex::new(None);

    let summary = coordinator
        .run(
            units(&["a", "b"]),
            |_| Ok(()),
            |_, unit: &String| {
                if unit == "b" {
                    let done = coordinator.markers().is_done("a");
                    let text = fs::read_to_string(coordinator.results_path(0)).unwrap_or_default();
                    *seen_while_b.lock().expect("lock") = Some((done, text));
                }
                Ok(unit.clone())
            },
        )
        .expect("run batch");
    assert_eq!(summary.processed, 2);

    let (a_done, text) = seen_while_b.into_inner().expect("lock").expect("b was processed");
    assert!(a_done);
    let first: serde_json::Value =
        serde_json::from_str(text.lines().next().expect("a's line")).expect("json line");
    assert_eq!(first["unit"], "a");
    assert_eq!(first["result"], "a");
}
