//! Story-run results: ledger, run records, progress reporting.

pub mod ledger;
pub mod progress;
pub mod story_run;

pub use ledger::{
    DIAGNOSTICS_NAME, LedgerError, LedgerOptions, LedgerResult, ResultLedger, SharedDiagnostics,
    TEST_RESULTS,
};
pub use progress::{GtestStyleReporter, NullProgressReporter, ProgressReporter, RunSummary};
pub use story_run::{Artifact, Measurement, RunStatus, Samples, Story, StoryRun, TraceBundle};
