//! Orchestration glue: drive a sequence of stories against a supervised
//! browser and record each outcome in the ledger.

use tracing::warn;

use crate::backend::crash::CrashReportCollector;
use crate::backend::supervisor::ProcessSupervisor;
use crate::results::ledger::{LedgerResult, ResultLedger};
use crate::results::story_run::Story;

/// Error from a story body; the runner folds it into the run's failure
pub type StoryError = Box<dyn std::error::Error>;

/// Run each story once, in order, recording results in the ledger.
///
/// Per story: `will_run_page`, the caller-supplied body (which records
/// measurements, artifacts, failures or skips), `did_run_page`. When a body
/// fails and the browser is found dead, the captured browser output is
/// logged and the latest crash stack is folded into the failure message
/// before the run is marked failed. A dead browser between stories
/// interrupts the benchmark instead of starting more runs. Always
/// finalizes the ledger, with the fault as the cause when the loop itself
/// cannot proceed.
pub fn run_stories<F>(
    supervisor: &mut ProcessSupervisor,
    crashes: &mut CrashReportCollector,
    results: &mut ResultLedger,
    stories: &[Story],
    mut body: F,
) -> LedgerResult<()>
where
    F: FnMut(&Story, &mut ResultLedger) -> Result<(), StoryError>,
{
    for (index, story) in stories.iter().enumerate() {
        if results.benchmark_interrupted() {
            break;
        }
        if !supervisor.is_running() {
            results.interrupt_benchmark("Browser process is gone; cannot run more stories");
            break;
        }

        if let Err(err) = results.will_run_page(story, index) {
            let cause = format!("Could not start story run: {}", err);
            results.finalize(Some(&cause))?;
            return Err(err);
        }

        if let Err(err) = body(story, results) {
            let mut message = err.to_string();
            if !supervisor.is_running() {
                let output = supervisor.get_standard_output();
                if !output.is_empty() {
                    warn!("Browser output:\n{}", output);
                }
                if let Some(dump_dir) = supervisor.minidump_dir() {
                    let stack = crashes.latest_stack_trace(dump_dir);
                    message = format!("{}\n{}", message, stack.text());
                }
            }
            results.fail(message);
        }
        results.did_run_page();
    }

    results.finalize(None)
}
