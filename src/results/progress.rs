//! Progress reporting for story runs.
//!
//! The ledger notifies a [`ProgressReporter`] as runs start and finish.
//! Implementations:
//! - `NullProgressReporter` to suppress reporting
//! - `GtestStyleReporter` for the familiar `[ RUN      ]` console format

use std::io::Write;

use crate::results::story_run::StoryRun;

/// Final counts handed to the reporter when the ledger is finalized
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub num_successful: usize,
    pub num_failed: usize,
    pub num_skipped: usize,
    /// Test paths of the failed runs, in completion order
    pub failed_stories: Vec<String>,
    /// Why the benchmark was interrupted, if it was
    pub interruption: Option<String>,
}

/// Observer of story-run lifecycle events
pub trait ProgressReporter {
    fn will_run_story(&mut self, run: &StoryRun);
    fn did_run_story(&mut self, run: &StoryRun);
    fn did_finish_all_stories(&mut self, summary: &RunSummary);
}

/// Reporter that suppresses all progress output
#[derive(Debug, Clone, Copy, Default)]
pub struct NullProgressReporter;

impl ProgressReporter for NullProgressReporter {
    fn will_run_story(&mut self, _run: &StoryRun) {}
    fn did_run_story(&mut self, _run: &StoryRun) {}
    fn did_finish_all_stories(&mut self, _summary: &RunSummary) {}
}

/// GTest-style console reporter.
///
/// Write errors are swallowed: progress output must never fail a run.
pub struct GtestStyleReporter<W: Write> {
    out: W,
}

impl<W: Write> GtestStyleReporter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }
}

impl GtestStyleReporter<std::io::Stderr> {
    /// Reporter writing to the harness's stderr
    pub fn stderr() -> Self {
        Self::new(std::io::stderr())
    }
}

impl<W: Write> ProgressReporter for GtestStyleReporter<W> {
    fn will_run_story(&mut self, run: &StoryRun) {
        let _ = writeln!(self.out, "[ RUN      ] {}", run.test_path());
    }

    fn did_run_story(&mut self, run: &StoryRun) {
        let millis = run
            .duration_secs()
            .map(|secs| (secs * 1000.0).round() as i64)
            .unwrap_or(0);
        let label = if run.failed() {
            "[  FAILED  ]"
        } else if run.skipped() {
            "[  SKIPPED ]"
        } else {
            "[       OK ]"
        };
        let _ = writeln!(self.out, "{} {} ({} ms)", label, run.test_path(), millis);
    }

    fn did_finish_all_stories(&mut self, summary: &RunSummary) {
        let _ = writeln!(self.out, "[  PASSED  ] {} tests.", summary.num_successful);
        if summary.num_failed > 0 {
            let _ = writeln!(
                self.out,
                "[  FAILED  ] {} tests, listed below:",
                summary.num_failed
            );
            for test_path in &summary.failed_stories {
                let _ = writeln!(self.out, "[  FAILED  ]  {}", test_path);
            }
        }
        if let Some(reason) = &summary.interruption {
            let _ = writeln!(self.out, "Benchmark interrupted: {}", reason);
        }
    }
}
