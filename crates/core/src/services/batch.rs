//! Fixed-size worker pool with resumable, per-unit completion markers.
//!
//! Every worker opens its own store connection and pulls units from a
//! shared queue. A unit that already has a done marker is skipped, so an
//! interrupted batch can be re-run as is. A failing unit gets an error
//! marker and never blocks its siblings.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::keys;

/// Longest readable prefix of a marker file stem.
const MAX_MARKER_STEM: usize = 200;
/// Hex digits of the unit id hash appended to every marker stem.
const MARKER_HASH_LEN: usize = 12;

/// A unit of batch work that can be identified across runs.
pub trait WorkUnit: Send {
    /// Stable identifier used for markers and result lines.
    fn id(&self) -> String;
}

impl WorkUnit for PathBuf {
    fn id(&self) -> String {
        self.to_string_lossy().into_owned()
    }
}

impl WorkUnit for String {
    fn id(&self) -> String {
        self.clone()
    }
}

/// Done and error markers of one batch, keyed by unit id.
#[derive(Debug, Clone)]
pub struct MarkerStore {
    dir: PathBuf,
}

impl MarkerStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// A readable prefix of the unit id plus a hash of the whole id, so ids
    /// that sanitize to the same prefix still get distinct markers.
    fn stem(unit_id: &str) -> String {
        let readable: String = unit_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') { c } else { '_' })
            .take(MAX_MARKER_STEM)
            .collect();
        let hash = keys::sha256_hex(unit_id);
        format!("{readable}-{}", &hash[..MARKER_HASH_LEN])
    }

    pub fn done_path(&self, unit_id: &str) -> PathBuf {
        self.dir.join(format!("{}.done", Self::stem(unit_id)))
    }

    pub fn error_path(&self, unit_id: &str) -> PathBuf {
        self.dir.join(format!("{}.error", Self::stem(unit_id)))
    }

    pub fn is_done(&self, unit_id: &str) -> bool {
        self.done_path(unit_id).exists()
    }

    pub fn mark_done(&self, unit_id: &str) -> Result<()> {
        self.append(&self.done_path(unit_id), &format!("done {unit_id}"))
    }

    /// Append an error entry. Earlier errors for the same unit are kept.
    pub fn mark_error(&self, unit_id: &str, error: &anyhow::Error) -> Result<()> {
        self.append(&self.error_path(unit_id), &format!("error {unit_id}: {error:#}"))
    }

    fn append(&self, path: &Path, message: &str) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create marker directory {}", self.dir.display()))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open marker {}", path.display()))?;
        writeln!(file, "{} {message}", chrono::Utc::now().to_rfc3339())
            .with_context(|| format!("Failed to write marker {}", path.display()))?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnitFailure {
    pub unit: String,
    pub worker: usize,
    pub error: String,
}

/// Outcome of one batch run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub batch: String,
    pub total: usize,
    pub processed: usize,
    /// Units skipped because a done marker already existed.
    pub skipped: usize,
    pub failed: usize,
    pub failures: Vec<UnitFailure>,
}

#[derive(Serialize)]
struct ResultLine<'r, R: Serialize> {
    unit: &'r str,
    result: &'r R,
}

enum Outcome {
    Skipped,
    Processed,
    Failed(UnitFailure),
}

/// Drives a batch of units through a pool of workers.
#[derive(Debug, Clone)]
pub struct BatchCoordinator {
    name: String,
    workers: usize,
    markers: MarkerStore,
    results_dir: PathBuf,
}

impl BatchCoordinator {
    /// `markers_dir` holds this batch's markers. Result lines are written to
    /// `results_dir/{name}_worker_{i}.jsonl`.
    pub fn new(
        name: impl Into<String>,
        workers: usize,
        markers_dir: impl Into<PathBuf>,
        results_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            name: name.into(),
            workers: workers.max(1),
            markers: MarkerStore::new(markers_dir),
            results_dir: results_dir.into(),
        }
    }

    pub fn markers(&self) -> &MarkerStore {
        &self.markers
    }

    pub fn results_path(&self, worker: usize) -> PathBuf {
        self.results_dir.join(format!("{}_worker_{worker}.jsonl", self.name))
    }

    /// Run every unit once.
    ///
    /// `open_store` is called once per worker with the worker index. A worker
    /// whose store cannot be opened fails the whole batch. Errors returned by
    /// `process` only fail their unit.
    pub fn run<U, S, R, O, P>(&self, units: Vec<U>, open_store: O, process: P) -> Result<BatchSummary>
    where
        U: WorkUnit,
        R: Serialize,
        O: Fn(usize) -> Result<S> + Sync,
        P: Fn(&S, &U) -> Result<R> + Sync,
    {
        fs::create_dir_all(&self.results_dir).with_context(|| {
            format!("Failed to create results directory {}", self.results_dir.display())
        })?;

        let mut summary = BatchSummary { batch: self.name.clone(), total: units.len(), ..BatchSummary::default() };
        info!(batch = %self.name, units = units.len(), workers = self.workers, "starting batch");

        let (work_tx, work_rx) = crossbeam_channel::unbounded::<U>();
        for unit in units {
            work_tx.send(unit).map_err(|_| anyhow!("Failed to queue work unit"))?;
        }
        drop(work_tx);
        let (outcome_tx, outcome_rx) = crossbeam_channel::unbounded::<Outcome>();

        let worker_results: Vec<Result<()>> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..self.workers)
                .map(|worker| {
                    let work_rx = work_rx.clone();
                    let outcome_tx = outcome_tx.clone();
                    let open_store = &open_store;
                    let process = &process;
                    scope.spawn(move || -> Result<()> {
                        let store = open_store(worker)
                            .with_context(|| format!("Worker {worker} could not open its store"))?;
                        let path = self.results_path(worker);
                        let file = OpenOptions::new()
                            .create(true)
                            .append(true)
                            .open(&path)
                            .with_context(|| format!("Failed to open {}", path.display()))?;
                        let mut results = BufWriter::new(file);

                        for unit in work_rx.iter() {
                            let outcome = self.run_unit(worker, &store, &unit, process, &mut results)?;
                            // The coordinator only stops listening once every worker is done.
                            let _ = outcome_tx.send(outcome);
                        }
                        Ok(())
                    })
                })
                .collect();
            drop(outcome_tx);

            for outcome in outcome_rx.iter() {
                match outcome {
                    Outcome::Skipped => summary.skipped += 1,
                    Outcome::Processed => summary.processed += 1,
                    Outcome::Failed(failure) => {
                        summary.failed += 1;
                        summary.failures.push(failure);
                    }
                }
            }

            handles
                .into_iter()
                .map(|handle| {
                    handle.join().unwrap_or_else(|_| Err(anyhow!("batch worker panicked")))
                })
                .collect()
        });

        for result in worker_results {
            result?;
        }
        info!(
            batch = %self.name,
            processed = summary.processed,
            skipped = summary.skipped,
            failed = summary.failed,
            "batch finished"
        );
        Ok(summary)
    }

    fn run_unit<U, S, R, P>(
        &self,
        worker: usize,
        store: &S,
        unit: &U,
        process: &P,
        results: &mut BufWriter<File>,
    ) -> Result<Outcome>
    where
        U: WorkUnit,
        R: Serialize,
        P: Fn(&S, &U) -> Result<R>,
    {
        let id = unit.id();
        if self.markers.is_done(&id) {
            debug!(unit = %id, "already done, skipping");
            return Ok(Outcome::Skipped);
        }

        match process(store, unit) {
            Ok(result) => {
                serde_json::to_writer(&mut *results, &ResultLine { unit: &id, result: &result })
                    .context("Failed to serialize unit result")?;
                results.write_all(b"\n").context("Failed to write unit result")?;
                // The result line must be on disk before the unit counts as done.
                results.flush().context("Failed to flush unit result")?;
                self.markers.mark_done(&id)?;
                Ok(Outcome::Processed)
            }
            Err(error) => {
                warn!(unit = %id, worker, error = %format!("{error:#}"), "unit failed");
                self.markers.mark_error(&id, &error)?;
                Ok(Outcome::Failed(UnitFailure { unit: id, worker, error: format!("{error:#}") }))
            }
        }
    }
}
