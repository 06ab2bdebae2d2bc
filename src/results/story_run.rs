//! Per-story run records.
//!
//! A [`StoryRun`] is the record of one story execution: status state machine
//! (`running → ok | failed | skipped`), named numeric measurements, artifact
//! files, optional trace-based metric names, and start/end timestamps. Runs
//! are created and sequenced by the result ledger and become immutable once
//! finished.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

/// One scenario to execute against the browser
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Story {
    /// Display name, also used in test paths
    pub name: String,

    /// Page to visit, when the story is a plain page visit
    pub url: Option<String>,
}

impl Story {
    /// Create a story with a name only
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: None,
        }
    }

    /// Create a story for a page visit
    pub fn with_url(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: Some(url.into()),
        }
    }
}

/// Numeric samples for a measurement: a scalar or a sequence of values
#[derive(Debug, Clone, PartialEq)]
pub struct Samples(Vec<f64>);

impl Samples {
    /// The recorded values, in insertion order
    pub fn values(&self) -> &[f64] {
        &self.0
    }
}

impl From<f64> for Samples {
    fn from(value: f64) -> Self {
        Samples(vec![value])
    }
}

impl From<Vec<f64>> for Samples {
    fn from(values: Vec<f64>) -> Self {
        Samples(values)
    }
}

impl From<&[f64]> for Samples {
    fn from(values: &[f64]) -> Self {
        Samples(values.to_vec())
    }
}

/// A named measurement recorded while a story was running
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Measurement {
    /// Unit string, e.g. "ms" or "count"
    pub unit: String,

    /// Ordered numeric samples
    pub samples: Vec<f64>,

    /// Optional short human-readable description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Metadata for a file associated with a story run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Artifact {
    /// Where the artifact lives on disk
    pub local_path: PathBuf,

    /// MIME content type inferred from the artifact name
    pub content_type: String,
}

/// Recorded trace parts to attach to a run
#[derive(Debug, Clone, Default)]
pub struct TraceBundle {
    parts: Vec<(String, PathBuf)>,
}

impl TraceBundle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one named trace part backed by a file
    pub fn add_part(&mut self, part: impl Into<String>, file: impl Into<PathBuf>) {
        self.parts.push((part.into(), file.into()));
    }

    /// Iterate over (part name, file path) pairs
    pub fn iter_parts(&self) -> impl Iterator<Item = (&str, &Path)> {
        self.parts
            .iter()
            .map(|(part, path)| (part.as_str(), path.as_path()))
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }
}

/// Status of a story run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStatus {
    /// Created but not yet finished
    Running,
    /// Finished without failure or skip
    Ok,
    /// Finished with the recorded failure message
    Failed(String),
    /// Deliberately not executed
    Skipped {
        reason: String,
        /// Whether the skip was anticipated (e.g. a known-broken story)
        expected: bool,
    },
}

/// The record of one story execution
#[derive(Debug, Clone)]
pub struct StoryRun {
    story: Story,
    index: usize,
    test_prefix: String,
    status: RunStatus,
    measurements: BTreeMap<String, Measurement>,
    artifacts: BTreeMap<String, Artifact>,
    tbm_metrics: Vec<String>,
    start_time: DateTime<Utc>,
    end_time: Option<DateTime<Utc>>,
    artifacts_dir: Option<PathBuf>,
}

impl StoryRun {
    /// Create a running record. Artifact files, when an intermediate
    /// directory is configured, land under
    /// `<intermediate>/<sanitized story name>/<index>/`.
    pub fn new(
        story: Story,
        test_prefix: impl Into<String>,
        index: usize,
        intermediate_dir: Option<&Path>,
    ) -> Self {
        let artifacts_dir = intermediate_dir
            .map(|dir| dir.join(sanitize_name(&story.name)).join(index.to_string()));
        Self {
            story,
            index,
            test_prefix: test_prefix.into(),
            status: RunStatus::Running,
            measurements: BTreeMap::new(),
            artifacts: BTreeMap::new(),
            tbm_metrics: Vec::new(),
            start_time: Utc::now(),
            end_time: None,
            artifacts_dir,
        }
    }

    pub fn story(&self) -> &Story {
        &self.story
    }

    /// 0-based run index for repeated executions of the same story
    pub fn index(&self) -> usize {
        self.index
    }

    /// "benchmark/story" identifier used in serialized records
    pub fn test_path(&self) -> String {
        format!("{}/{}", self.test_prefix, self.story.name)
    }

    pub fn status(&self) -> &RunStatus {
        &self.status
    }

    pub fn running(&self) -> bool {
        matches!(self.status, RunStatus::Running)
    }

    pub fn ok(&self) -> bool {
        matches!(self.status, RunStatus::Ok)
    }

    pub fn failed(&self) -> bool {
        matches!(self.status, RunStatus::Failed(_))
    }

    pub fn skipped(&self) -> bool {
        matches!(self.status, RunStatus::Skipped { .. })
    }

    /// Whether the outcome was anticipated: a pass, or an expected skip
    pub fn expected(&self) -> bool {
        match &self.status {
            RunStatus::Ok => true,
            RunStatus::Skipped { expected, .. } => *expected,
            _ => false,
        }
    }

    pub fn failure_message(&self) -> Option<&str> {
        match &self.status {
            RunStatus::Failed(message) => Some(message),
            _ => None,
        }
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        self.end_time
    }

    /// Wall-clock duration, available once the run finished
    pub fn duration_secs(&self) -> Option<f64> {
        self.end_time.map(|end| {
            (end - self.start_time)
                .num_microseconds()
                .map(|us| us as f64 / 1e6)
                .unwrap_or_default()
        })
    }

    /// Stamp the completion time. A run still `Running` here passed.
    pub fn finish(&mut self) {
        assert!(self.end_time.is_none(), "Story run already finished.");
        if self.running() {
            self.status = RunStatus::Ok;
        }
        self.end_time = Some(Utc::now());
    }

    /// Mark the run failed. Repeated failures overwrite the message; failing
    /// a skipped run is a caller bug.
    pub fn set_failed(&mut self, message: impl Into<String>) {
        assert!(
            !self.skipped(),
            "Cannot fail a story run that was already skipped."
        );
        self.status = RunStatus::Failed(message.into());
    }

    /// Mark the run skipped. Skipping a failed run is a caller bug.
    pub fn skip(&mut self, reason: impl Into<String>, expected: bool) {
        let reason = reason.into();
        assert!(!reason.is_empty(), "A skip reason must be provided.");
        assert!(
            !self.failed(),
            "Cannot skip a story run that already failed."
        );
        self.status = RunStatus::Skipped { reason, expected };
    }

    /// Record a measurement. Unit consistency across runs is the ledger's
    /// concern; within one run a name may only be recorded once.
    pub fn add_measurement(
        &mut self,
        name: &str,
        unit: &str,
        samples: impl Into<Samples>,
        description: Option<&str>,
    ) {
        assert!(
            !self.measurements.contains_key(name),
            "Measurement '{}' already recorded for this story run.",
            name
        );
        self.measurements.insert(
            name.to_string(),
            Measurement {
                unit: unit.to_string(),
                samples: samples.into().0,
                description: description.map(str::to_string),
            },
        );
    }

    pub fn measurements(&self) -> &BTreeMap<String, Measurement> {
        &self.measurements
    }

    /// Reserve a file path for a named artifact and register it.
    ///
    /// Namespaced names ("trace/chrome/trace.json") create subdirectories.
    /// The caller writes the file; re-registering a name is a caller bug.
    pub fn create_artifact(&mut self, name: &str) -> std::io::Result<PathBuf> {
        assert!(
            !self.artifacts.contains_key(name),
            "Artifact '{}' already created for this story run.",
            name
        );
        let base = self.artifacts_dir.as_ref().ok_or_else(|| {
            std::io::Error::other("No artifacts directory configured for this run")
        })?;
        let relative: PathBuf = name.split('/').map(sanitize_name).collect();
        let local_path = base.join(relative);
        if let Some(parent) = local_path.parent() {
            fs::create_dir_all(parent)?;
        }
        self.artifacts.insert(
            name.to_string(),
            Artifact {
                local_path: local_path.clone(),
                content_type: content_type_for(name).to_string(),
            },
        );
        Ok(local_path)
    }

    /// Whether this run can hold artifact files at all
    pub fn supports_artifacts(&self) -> bool {
        self.artifacts_dir.is_some()
    }

    pub fn get_artifact(&self, name: &str) -> Option<&Artifact> {
        self.artifacts.get(name)
    }

    pub fn artifacts(&self) -> &BTreeMap<String, Artifact> {
        &self.artifacts
    }

    /// Whether any artifact name starts with the given prefix
    pub fn has_artifacts_in(&self, prefix: &str) -> bool {
        self.artifacts.keys().any(|name| name.starts_with(prefix))
    }

    /// Attach names of trace-based metrics to compute after the run
    pub fn set_tbm_metrics(&mut self, metrics: Vec<String>) {
        self.tbm_metrics = metrics;
    }

    pub fn tbm_metrics(&self) -> &[String] {
        &self.tbm_metrics
    }

    fn status_label(&self) -> &'static str {
        match self.status {
            RunStatus::Running => "RUNNING",
            RunStatus::Ok => "PASS",
            RunStatus::Failed(_) => "FAIL",
            RunStatus::Skipped { .. } => "SKIP",
        }
    }

    /// Build the serializable `testResult` record for this run.
    ///
    /// Pure: derived entirely from the run's final state, so artifacts
    /// attached between completion and ledger finalization are included.
    /// Key order is deterministic (sorted) for reproducible diffs.
    pub fn as_record(&self) -> serde_json::Value {
        let mut record = serde_json::Map::new();
        record.insert("testPath".to_string(), json!(self.test_path()));
        record.insert("resultId".to_string(), json!(self.index.to_string()));
        record.insert("status".to_string(), json!(self.status_label()));
        record.insert("expected".to_string(), json!(self.expected()));
        record.insert("startTime".to_string(), json!(self.start_time.to_rfc3339()));
        if let Some(duration) = self.duration_secs() {
            record.insert("runDuration".to_string(), json!(format!("{:.2}s", duration)));
        }
        if !self.artifacts.is_empty() {
            let artifacts: serde_json::Map<String, serde_json::Value> = self
                .artifacts
                .iter()
                .map(|(name, artifact)| {
                    (
                        name.clone(),
                        json!({
                            "filePath": artifact.local_path.display().to_string(),
                            "contentType": artifact.content_type,
                        }),
                    )
                })
                .collect();
            record.insert("outputArtifacts".to_string(), artifacts.into());
        }
        if !self.measurements.is_empty() {
            record.insert(
                "measurements".to_string(),
                serde_json::to_value(&self.measurements).expect("measurements serialize"),
            );
        }
        if !self.tbm_metrics.is_empty() {
            let tags: Vec<serde_json::Value> = self
                .tbm_metrics
                .iter()
                .map(|metric| json!({"key": "tbmv2", "value": metric}))
                .collect();
            record.insert("tags".to_string(), json!(tags));
        }
        match &self.status {
            RunStatus::Failed(message) => {
                record.insert(
                    "failureReason".to_string(),
                    json!({"primaryErrorMessage": message}),
                );
            }
            RunStatus::Skipped { reason, .. } => {
                record.insert("skipReason".to_string(), json!(reason));
            }
            _ => {}
        }
        json!({ "testResult": record })
    }
}

/// Guess a MIME type from the artifact name
fn content_type_for(name: &str) -> &'static str {
    match name.rsplit('.').next() {
        Some("json") => "application/json",
        Some("txt") | Some("log") => "text/plain",
        Some("html") => "text/html",
        Some("png") => "image/png",
        _ => "application/octet-stream",
    }
}

/// Sanitize a name for use in filenames
fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' | '.' => c,
            _ => '_',
        })
        .collect()
}
