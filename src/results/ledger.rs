//! The story-run result ledger.
//!
//! Holds story run results while a benchmark executes: sequences run
//! creation/completion, enforces one-run-at-a-time and finalize-once,
//! validates measurement units globally across the whole ledger lifetime,
//! and serializes completed runs as newline-delimited JSON records with
//! deterministic key order.
//!
//! Call-order violations are caller bugs and fail with a panic; runtime
//! conditions (I/O, unit mismatches) are `Result`s.

use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File};
use std::io::Write;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::error;

use crate::results::progress::{NullProgressReporter, ProgressReporter, RunSummary};
use crate::results::story_run::{Samples, Story, StoryRun, TraceBundle};

/// File name of the newline-delimited results log
pub const TEST_RESULTS: &str = "_test_results.jsonl";

/// Artifact name of the per-run diagnostics document
pub const DIAGNOSTICS_NAME: &str = "diagnostics.json";

/// Result type for ledger operations
pub type LedgerResult<T> = Result<T, LedgerError>;

/// Error types for ledger operations
#[derive(Debug)]
pub enum LedgerError {
    /// A measurement name was reused with a different unit
    UnitMismatch {
        name: String,
        old_unit: String,
        new_unit: String,
    },

    /// I/O error
    Io(std::io::Error),

    /// Serialization error
    Serialization(serde_json::Error),
}

impl std::fmt::Display for LedgerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LedgerError::UnitMismatch {
                name,
                old_unit,
                new_unit,
            } => write!(
                f,
                "Unit for measurement '{}' changed from {} to {}.",
                name, old_unit, new_unit
            ),
            LedgerError::Io(err) => write!(f, "I/O error: {}", err),
            LedgerError::Serialization(err) => write!(f, "Serialization error: {}", err),
        }
    }
}

impl std::error::Error for LedgerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LedgerError::UnitMismatch { .. } => None,
            LedgerError::Io(err) => Some(err),
            LedgerError::Serialization(err) => Some(err),
        }
    }
}

impl From<std::io::Error> for LedgerError {
    fn from(err: std::io::Error) -> Self {
        LedgerError::Io(err)
    }
}

impl From<serde_json::Error> for LedgerError {
    fn from(err: serde_json::Error) -> Self {
        LedgerError::Serialization(err)
    }
}

/// Cross-run diagnostic fields shared by every run of the benchmark
#[derive(Debug, Clone, Default)]
pub struct SharedDiagnostics {
    pub owners: Vec<String>,
    pub bug_components: Vec<String>,
    /// (label, url) pairs
    pub documentation_urls: Vec<(String, String)>,
    pub architecture: Option<String>,
    pub device_id: Option<String>,
    pub os_name: Option<String>,
    pub os_version: Option<String>,
}

/// Options for constructing a [`ResultLedger`]
#[derive(Default)]
pub struct LedgerOptions {
    /// Directory where results and artifacts are stored
    pub output_dir: Option<PathBuf>,

    /// Artifact directory; defaults to `<output_dir>/artifacts`
    pub intermediate_dir: Option<PathBuf>,

    /// Name of the currently running benchmark
    pub benchmark_name: Option<String>,

    /// Description of the currently running benchmark
    pub benchmark_description: Option<String>,

    /// Identifier for this particular benchmark run
    pub results_label: Option<String>,

    /// Progress observer; defaults to no reporting
    pub reporter: Option<Box<dyn ProgressReporter>>,
}

impl LedgerOptions {
    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(dir.into());
        self
    }

    pub fn intermediate_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.intermediate_dir = Some(dir.into());
        self
    }

    pub fn benchmark_name(mut self, name: impl Into<String>) -> Self {
        self.benchmark_name = Some(name.into());
        self
    }

    pub fn benchmark_description(mut self, description: impl Into<String>) -> Self {
        self.benchmark_description = Some(description.into());
        self
    }

    pub fn results_label(mut self, label: impl Into<String>) -> Self {
        self.results_label = Some(label.into());
        self
    }

    pub fn reporter(mut self, reporter: Box<dyn ProgressReporter>) -> Self {
        self.reporter = Some(reporter);
        self
    }
}

/// Holds story run results while a benchmark is executed.
pub struct ResultLedger {
    benchmark_name: String,
    benchmark_description: String,
    results_label: Option<String>,
    output_dir: Option<PathBuf>,
    intermediate_dir: Option<PathBuf>,
    current_story_run: Option<StoryRun>,
    all_story_runs: Vec<StoryRun>,
    /// Validates that measurements across story runs use units consistently
    measurement_units: HashMap<String, String>,
    diagnostics: BTreeMap<String, serde_json::Value>,
    /// None until the benchmark hits an unrecoverable condition
    interruption: Option<String>,
    finalized: bool,
    start_time: DateTime<Utc>,
    results_stream: Option<File>,
    reporter: Box<dyn ProgressReporter>,
}

impl ResultLedger {
    /// Create a ledger; when an intermediate directory is available the
    /// results stream is opened here and stays open until `finalize()`.
    pub fn new(options: LedgerOptions) -> LedgerResult<Self> {
        let intermediate_dir = options.intermediate_dir.or_else(|| {
            options
                .output_dir
                .as_ref()
                .map(|dir| dir.join("artifacts"))
        });

        let results_stream = match &intermediate_dir {
            Some(dir) => {
                fs::create_dir_all(dir)?;
                Some(File::create(dir.join(TEST_RESULTS))?)
            }
            None => None,
        };

        let benchmark_name = options
            .benchmark_name
            .unwrap_or_else(|| "(unknown benchmark)".to_string());
        let benchmark_description = options.benchmark_description.unwrap_or_default();

        let mut diagnostics = BTreeMap::new();
        diagnostics.insert("benchmarks".to_string(), json!([benchmark_name]));
        if !benchmark_description.is_empty() {
            diagnostics.insert(
                "benchmarkDescriptions".to_string(),
                json!([benchmark_description]),
            );
        }

        Ok(Self {
            benchmark_name,
            benchmark_description,
            results_label: options.results_label,
            output_dir: options.output_dir,
            intermediate_dir,
            current_story_run: None,
            all_story_runs: Vec::new(),
            measurement_units: HashMap::new(),
            diagnostics,
            interruption: None,
            finalized: false,
            start_time: Utc::now(),
            results_stream,
            reporter: options
                .reporter
                .unwrap_or_else(|| Box::new(NullProgressReporter)),
        })
    }

    pub fn benchmark_name(&self) -> &str {
        &self.benchmark_name
    }

    pub fn benchmark_description(&self) -> &str {
        &self.benchmark_description
    }

    /// Benchmark start time in microseconds since the epoch
    pub fn benchmark_start_us(&self) -> f64 {
        self.start_time.timestamp_micros() as f64
    }

    pub fn label(&self) -> Option<&str> {
        self.results_label.as_deref()
    }

    pub fn output_dir(&self) -> Option<&PathBuf> {
        self.output_dir.as_ref()
    }

    pub fn finalized(&self) -> bool {
        self.finalized
    }

    pub fn benchmark_interrupted(&self) -> bool {
        self.interruption.is_some()
    }

    /// Why the benchmark was interrupted: always the first reason
    pub fn benchmark_interruption(&self) -> Option<&str> {
        self.interruption.as_deref()
    }

    /// The story currently being run; calling this between runs is a bug
    pub fn current_story(&self) -> &Story {
        self.current_story_run
            .as_ref()
            .expect("Not currently running test.")
            .story()
    }

    pub fn current_story_run(&self) -> Option<&StoryRun> {
        self.current_story_run.as_ref()
    }

    /// Register shared diagnostic fields; only non-empty values are kept.
    pub fn add_shared_diagnostics(&mut self, shared: SharedDiagnostics) {
        if !shared.owners.is_empty() {
            self.diagnostics.insert("owners".to_string(), json!(shared.owners));
        }
        if !shared.bug_components.is_empty() {
            self.diagnostics
                .insert("bugComponents".to_string(), json!(shared.bug_components));
        }
        if !shared.documentation_urls.is_empty() {
            let links: Vec<serde_json::Value> = shared
                .documentation_urls
                .iter()
                .map(|(label, url)| json!([label, url]))
                .collect();
            self.diagnostics
                .insert("documentationLinks".to_string(), json!(links));
        }
        if let Some(architecture) = shared.architecture {
            self.diagnostics
                .insert("architectures".to_string(), json!([architecture]));
        }
        if let Some(device_id) = shared.device_id {
            self.diagnostics.insert("deviceIds".to_string(), json!([device_id]));
        }
        if let Some(os_name) = shared.os_name {
            self.diagnostics.insert("osNames".to_string(), json!([os_name]));
        }
        if let Some(os_version) = shared.os_version {
            self.diagnostics
                .insert("osVersions".to_string(), json!([os_version]));
        }
    }

    /// Start a new story run and write its diagnostics artifact.
    pub fn will_run_page(&mut self, story: &Story, story_run_index: usize) -> LedgerResult<()> {
        assert!(
            !self.finalized,
            "Results are finalized, cannot run more stories."
        );
        assert!(self.current_story_run.is_none(), "Did not call did_run_page.");

        let mut run = StoryRun::new(
            story.clone(),
            &self.benchmark_name,
            story_run_index,
            self.intermediate_dir.as_deref(),
        );
        if run.supports_artifacts() {
            let path = run.create_artifact(DIAGNOSTICS_NAME)?;
            let document = json!({ "diagnostics": self.diagnostics });
            fs::write(&path, serde_json::to_string_pretty(&document)?)?;
        }
        self.current_story_run = Some(run);
        self.reporter
            .will_run_story(self.current_story_run.as_ref().expect("run just stored"));
        Ok(())
    }

    /// Finish the current story run and append it to the completed sequence.
    ///
    /// The run's serialized record is not written here: artifacts such as
    /// traces may still be attached before `finalize()`.
    pub fn did_run_page(&mut self) {
        let mut run = self
            .current_story_run
            .take()
            .expect("Did not call will_run_page.");
        run.finish();
        self.reporter.did_run_story(&run);
        self.all_story_runs.push(run);
    }

    /// Record a measurement of the currently running story.
    ///
    /// Unit-name pairs are canonical for the whole ledger, not per story:
    /// the first observed unit wins and any later mismatch is an error.
    pub fn add_measurement(
        &mut self,
        name: &str,
        unit: &str,
        samples: impl Into<Samples>,
        description: Option<&str>,
    ) -> LedgerResult<()> {
        assert!(
            self.current_story_run.is_some(),
            "Not currently running a story."
        );
        match self.measurement_units.get(name) {
            Some(old_unit) if old_unit != unit => {
                return Err(LedgerError::UnitMismatch {
                    name: name.to_string(),
                    old_unit: old_unit.clone(),
                    new_unit: unit.to_string(),
                });
            }
            Some(_) => {}
            None => {
                self.measurement_units
                    .insert(name.to_string(), unit.to_string());
            }
        }
        self.current_story_run
            .as_mut()
            .expect("checked above")
            .add_measurement(name, unit, samples, description);
        Ok(())
    }

    /// Mark the current story run as failed.
    pub fn fail(&mut self, failure: impl std::fmt::Display) {
        let run = self
            .current_story_run
            .as_mut()
            .expect("Not currently running test.");
        let failure_str = format!(
            "Failure recorded for page {}: {}",
            run.story().name,
            failure
        );
        error!("{}", failure_str);
        run.set_failed(failure_str);
    }

    /// Mark the current story run as skipped.
    pub fn skip(&mut self, reason: &str, expected: bool) {
        self.current_story_run
            .as_mut()
            .expect("Not currently running test.")
            .skip(reason, expected);
    }

    /// Mark the benchmark as stuck in an irrecoverably broken state.
    ///
    /// The stored reason is always the first one; later interruptions are
    /// assumed to be fallout from it and only logged.
    pub fn interrupt_benchmark(&mut self, reason: &str) {
        assert!(!self.finalized, "Results are finalized, cannot interrupt.");
        assert!(!reason.is_empty(), "A reason string to interrupt must be provided.");
        error!("{}", reason);
        if self.interruption.is_none() {
            self.interruption = Some(reason.to_string());
        }
    }

    /// Reserve an artifact path on the current story run.
    pub fn create_artifact(&mut self, name: &str) -> LedgerResult<PathBuf> {
        let run = self
            .current_story_run
            .as_mut()
            .expect("Not currently running test.");
        Ok(run.create_artifact(name)?)
    }

    /// Copy recorded trace parts into the current run's artifacts, under
    /// `trace/<part>/<file name>`, and attach any trace-based metrics.
    pub fn add_traces(
        &mut self,
        traces: &TraceBundle,
        tbm_metrics: Option<Vec<String>>,
    ) -> LedgerResult<()> {
        let run = self
            .current_story_run
            .as_mut()
            .expect("Not currently running test.");
        for (part, filename) in traces.iter_parts() {
            let base = filename
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| "trace".to_string());
            let artifact_name = format!("trace/{}/{}", part, base);
            let path = run.create_artifact(&artifact_name)?;
            fs::copy(filename, &path)?;
        }
        if let Some(metrics) = tbm_metrics {
            run.set_tbm_metrics(metrics);
        }
        Ok(())
    }

    /// Finalize the ledger; later calls are a no-op.
    ///
    /// With a cause (an uncaught fault) the in-progress run is discarded and
    /// the benchmark marked interrupted; without one, finalizing mid-run is
    /// a caller bug. Serialization of completed runs happens only here, so
    /// artifacts attached after `did_run_page()` are included.
    pub fn finalize(&mut self, cause_of_abnormal_exit: Option<&str>) -> LedgerResult<()> {
        if self.finalized {
            return Ok(());
        }

        if let Some(cause) = cause_of_abnormal_exit {
            self.interrupt_benchmark(cause);
            self.current_story_run = None;
        } else {
            assert!(
                self.current_story_run.is_none(),
                "Cannot finalize while stories are still running."
            );
        }

        self.finalized = true;
        let summary = self.summary();
        self.reporter.did_finish_all_stories(&summary);

        if let Some(stream) = self.results_stream.as_mut() {
            for run in &self.all_story_runs {
                let line = serde_json::to_string(&run.as_record())?;
                stream.write_all(line.as_bytes())?;
                stream.write_all(b"\n")?;
            }
            stream.flush()?;
        }
        self.results_stream = None;
        Ok(())
    }

    fn summary(&self) -> RunSummary {
        RunSummary {
            num_successful: self.num_successful(),
            num_failed: self.num_failed(),
            num_skipped: self.num_skipped(),
            failed_stories: self
                .all_story_runs
                .iter()
                .filter(|run| run.failed())
                .map(|run| run.test_path())
                .collect(),
            interruption: self.interruption.clone(),
        }
    }

    // Aggregates are recomputed by scanning the completed sequence rather
    // than maintained incrementally.

    /// Whether there were any actual successes, not counting skips
    pub fn had_successes(&self) -> bool {
        self.all_story_runs.iter().any(|run| run.ok())
    }

    pub fn num_successful(&self) -> usize {
        self.all_story_runs.iter().filter(|run| run.ok()).count()
    }

    /// Number of runs that passed or were expected skips
    pub fn num_expected(&self) -> usize {
        self.all_story_runs.iter().filter(|run| run.expected()).count()
    }

    pub fn had_failures(&self) -> bool {
        self.all_story_runs.iter().any(|run| run.failed())
    }

    pub fn num_failed(&self) -> usize {
        self.all_story_runs.iter().filter(|run| run.failed()).count()
    }

    pub fn had_skips(&self) -> bool {
        self.all_story_runs.iter().any(|run| run.skipped())
    }

    pub fn num_skipped(&self) -> usize {
        self.all_story_runs.iter().filter(|run| run.skipped()).count()
    }

    /// Whether there were any story runs at all
    pub fn empty(&self) -> bool {
        self.all_story_runs.is_empty()
    }

    /// Completed runs, in completion order
    pub fn iter_story_runs(&self) -> impl Iterator<Item = &StoryRun> {
        self.all_story_runs.iter()
    }

    /// Completed runs plus the in-progress one, if any, that carry traces
    pub fn iter_runs_with_traces(&self) -> impl Iterator<Item = &StoryRun> {
        self.all_story_runs
            .iter()
            .chain(self.current_story_run.iter())
            .filter(|run| run.has_artifacts_in("trace/"))
    }
}
