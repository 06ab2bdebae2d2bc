//! Integration tests for the story-run result ledger

use std::fs;
use std::path::Path;

use pretty_assertions::assert_eq;

use browser_harness::results::{
    DIAGNOSTICS_NAME, LedgerOptions, ResultLedger, SharedDiagnostics, Story, TEST_RESULTS,
    TraceBundle,
};

fn stories() -> Vec<Story> {
    vec![
        Story::with_url("http://www.foo.com/", "http://www.foo.com/"),
        Story::with_url("http://www.bar.com/", "http://www.bar.com/"),
        Story::with_url("http://www.baz.com/", "http://www.baz.com/"),
    ]
}

fn create_results(output_dir: &Path) -> ResultLedger {
    ResultLedger::new(
        LedgerOptions::default()
            .benchmark_name("benchmark")
            .output_dir(output_dir),
    )
    .expect("create ledger")
}

fn read_records(output_dir: &Path) -> Vec<serde_json::Value> {
    let path = output_dir.join("artifacts").join(TEST_RESULTS);
    fs::read_to_string(path)
        .expect("results file readable")
        .lines()
        .map(|line| serde_json::from_str(line).expect("valid record"))
        .collect()
}

#[test]
fn test_failures() {
    let dir = tempfile::tempdir().unwrap();
    let pages = stories();
    let mut results = create_results(dir.path());

    results.will_run_page(&pages[0], 0).unwrap();
    results.fail("banana error");
    results.did_run_page();

    results.will_run_page(&pages[1], 0).unwrap();
    results.did_run_page();

    results.finalize(None).unwrap();

    let runs: Vec<_> = results.iter_story_runs().collect();
    assert_eq!(runs.len(), 2);
    assert!(results.had_failures());
    assert!(runs[0].failed());
    assert!(runs[1].ok());
    assert!(runs[0].failure_message().unwrap().contains("banana error"));
    assert!(
        runs[0]
            .failure_message()
            .unwrap()
            .contains("http://www.foo.com/")
    );
    assert_eq!(results.num_failed(), 1);
    assert_eq!(results.num_successful(), 1);
}

#[test]
fn test_skips() {
    let dir = tempfile::tempdir().unwrap();
    let pages = stories();
    let mut results = create_results(dir.path());

    results.will_run_page(&pages[0], 0).unwrap();
    results.skip("testing reason", true);
    results.did_run_page();

    results.will_run_page(&pages[1], 0).unwrap();
    results.did_run_page();

    results.finalize(None).unwrap();

    let runs: Vec<_> = results.iter_story_runs().collect();
    assert_eq!(runs.len(), 2);
    assert!(results.had_skips());
    assert!(runs[0].skipped());
    assert!(runs[0].expected());
    assert_eq!(runs[0].story(), &pages[0]);
    assert!(runs[1].ok());
}

#[test]
fn test_fail_ok_and_skip_sequence() {
    let dir = tempfile::tempdir().unwrap();
    let pages = stories();
    let mut results = create_results(dir.path());

    results.will_run_page(&pages[0], 0).unwrap();
    results.fail("message");
    results.did_run_page();

    results.will_run_page(&pages[1], 0).unwrap();
    results.did_run_page();

    results.will_run_page(&pages[2], 0).unwrap();
    results.skip("testing reason", true);
    results.did_run_page();

    results.finalize(None).unwrap();

    let runs: Vec<_> = results.iter_story_runs().collect();
    assert_eq!(runs.len(), 3);
    assert!(runs[0].failed());
    assert!(runs[1].ok());
    assert!(runs[2].skipped());
    // Expected outcomes: the pass and the expected skip.
    assert_eq!(results.num_expected(), 2);
}

#[test]
fn test_no_successes_when_all_pages_fail_or_skip() {
    let dir = tempfile::tempdir().unwrap();
    let pages = stories();
    let mut results = create_results(dir.path());

    results.will_run_page(&pages[0], 0).unwrap();
    results.fail("message");
    results.did_run_page();

    results.will_run_page(&pages[1], 0).unwrap();
    results.skip("message", true);
    results.did_run_page();

    results.finalize(None).unwrap();
    assert!(!results.had_successes());
}

#[test]
fn test_benchmark_interruption() {
    let dir = tempfile::tempdir().unwrap();
    let mut results = create_results(dir.path());
    let reason = "This is a reason";

    assert!(!results.benchmark_interrupted());
    assert_eq!(results.benchmark_interruption(), None);

    results.interrupt_benchmark(reason);
    results.finalize(None).unwrap();

    assert!(results.benchmark_interrupted());
    assert_eq!(results.benchmark_interruption(), Some(reason));
}

#[test]
fn test_uncaught_fault_interrupts_benchmark() {
    let dir = tempfile::tempdir().unwrap();
    let pages = stories();
    let mut results = create_results(dir.path());

    results.will_run_page(&pages[0], 0).unwrap();
    // The run never reaches did_run_page; finalize with the fault's
    // description discards it.
    results.finalize(Some("ValueError: expected error")).unwrap();

    assert!(results.benchmark_interrupted());
    assert_eq!(
        results.benchmark_interruption(),
        Some("ValueError: expected error")
    );
    assert!(results.empty());
    assert_eq!(read_records(dir.path()).len(), 0);
}

#[test]
fn test_add_measurement_as_scalar() {
    let dir = tempfile::tempdir().unwrap();
    let pages = stories();
    let mut results = create_results(dir.path());

    results.will_run_page(&pages[0], 0).unwrap();
    results.add_measurement("a", "seconds", 3.0, None).unwrap();
    results.did_run_page();
    results.finalize(None).unwrap();

    let records = read_records(dir.path());
    assert_eq!(records.len(), 1);
    assert_eq!(
        records[0]["testResult"]["measurements"]["a"],
        serde_json::json!({"unit": "seconds", "samples": [3.0]})
    );
}

#[test]
fn test_add_measurement_as_list() {
    let dir = tempfile::tempdir().unwrap();
    let pages = stories();
    let mut results = create_results(dir.path());

    results.will_run_page(&pages[0], 0).unwrap();
    results
        .add_measurement("a", "seconds", vec![1.0, 2.0, 3.0], None)
        .unwrap();
    results.did_run_page();
    results.finalize(None).unwrap();

    let records = read_records(dir.path());
    assert_eq!(
        records[0]["testResult"]["measurements"]["a"],
        serde_json::json!({"unit": "seconds", "samples": [1.0, 2.0, 3.0]})
    );
}

#[test]
fn test_measurement_unit_change_errors() {
    let dir = tempfile::tempdir().unwrap();
    let pages = stories();
    let mut results = create_results(dir.path());

    results.will_run_page(&pages[0], 0).unwrap();
    results.add_measurement("a", "seconds", 3.0, None).unwrap();
    results.did_run_page();

    results.will_run_page(&pages[1], 0).unwrap();
    let err = results
        .add_measurement("a", "foobgrobbers", 3.0, None)
        .unwrap_err();
    assert!(err.to_string().contains("changed from seconds to foobgrobbers"));
    results.did_run_page();
    results.finalize(None).unwrap();
}

#[test]
fn test_same_unit_across_runs_keeps_samples_per_run() {
    let dir = tempfile::tempdir().unwrap();
    let pages = stories();
    let mut results = create_results(dir.path());

    results.will_run_page(&pages[0], 0).unwrap();
    results.add_measurement("a", "seconds", 1.0, None).unwrap();
    results.did_run_page();

    results.will_run_page(&pages[1], 0).unwrap();
    results.add_measurement("a", "seconds", 2.0, None).unwrap();
    results.did_run_page();

    results.finalize(None).unwrap();

    let runs: Vec<_> = results.iter_story_runs().collect();
    assert_eq!(runs[0].measurements()["a"].samples, vec![1.0]);
    assert_eq!(runs[1].measurements()["a"].samples, vec![2.0]);
}

#[test]
fn test_finalize_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let pages = stories();
    let mut results = create_results(dir.path());

    results.will_run_page(&pages[0], 0).unwrap();
    results.did_run_page();

    results.finalize(None).unwrap();
    assert_eq!(read_records(dir.path()).len(), 1);

    // Later calls are a no-op: no error, no duplicate records.
    results.finalize(None).unwrap();
    assert_eq!(read_records(dir.path()).len(), 1);
}

#[test]
fn test_completed_sequence_matches_did_run_page_calls() {
    let dir = tempfile::tempdir().unwrap();
    let pages = stories();
    let mut results = create_results(dir.path());

    for page in &pages {
        results.will_run_page(page, 0).unwrap();
        results.did_run_page();
    }
    results.finalize(None).unwrap();

    let names: Vec<_> = results
        .iter_story_runs()
        .map(|run| run.story().name.clone())
        .collect();
    let expected: Vec<_> = pages.iter().map(|page| page.name.clone()).collect();
    assert_eq!(names, expected);
    assert_eq!(read_records(dir.path()).len(), pages.len());
}

#[test]
fn test_diagnostics_as_artifact() {
    let dir = tempfile::tempdir().unwrap();
    let pages = stories();
    let mut results = ResultLedger::new(
        LedgerOptions::default()
            .benchmark_name("some benchmark")
            .benchmark_description("a description")
            .output_dir(dir.path()),
    )
    .unwrap();

    results.add_shared_diagnostics(SharedDiagnostics {
        owners: vec!["test".to_string()],
        bug_components: vec!["1".to_string(), "2".to_string()],
        documentation_urls: vec![("documentation".to_string(), "url".to_string())],
        architecture: Some("arch".to_string()),
        device_id: Some("id".to_string()),
        os_name: Some("os".to_string()),
        os_version: Some("ver".to_string()),
    });

    results.will_run_page(&pages[0], 0).unwrap();
    results.did_run_page();
    results.will_run_page(&pages[1], 0).unwrap();
    results.did_run_page();
    results.finalize(None).unwrap();

    let records = read_records(dir.path());
    assert_eq!(records.len(), 2);
    for record in &records {
        assert_eq!(record["testResult"]["status"], "PASS");
        let artifacts = &record["testResult"]["outputArtifacts"];
        let file_path = artifacts[DIAGNOSTICS_NAME]["filePath"].as_str().unwrap();
        let diagnostics: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(file_path).unwrap()).unwrap();
        assert_eq!(
            diagnostics,
            serde_json::json!({
                "diagnostics": {
                    "benchmarks": ["some benchmark"],
                    "benchmarkDescriptions": ["a description"],
                    "owners": ["test"],
                    "bugComponents": ["1", "2"],
                    "documentationLinks": [["documentation", "url"]],
                    "architectures": ["arch"],
                    "deviceIds": ["id"],
                    "osNames": ["os"],
                    "osVersions": ["ver"],
                },
            })
        );
    }
}

#[test]
fn test_artifacts_for_different_pages() {
    let dir = tempfile::tempdir().unwrap();
    let pages = stories();
    let mut results = create_results(dir.path());

    results.will_run_page(&pages[0], 0).unwrap();
    let log0 = results.create_artifact("log.txt").unwrap();
    fs::write(&log0, "page0\n").unwrap();
    results.did_run_page();

    results.will_run_page(&pages[1], 0).unwrap();
    let log1 = results.create_artifact("log.txt").unwrap();
    fs::write(&log1, "page1\n").unwrap();
    results.did_run_page();

    results.finalize(None).unwrap();

    let runs: Vec<_> = results.iter_story_runs().collect();
    let path0 = &runs[0].get_artifact("log.txt").unwrap().local_path;
    assert_eq!(fs::read_to_string(path0).unwrap(), "page0\n");
    let path1 = &runs[1].get_artifact("log.txt").unwrap().local_path;
    assert_eq!(fs::read_to_string(path1).unwrap(), "page1\n");
    assert_ne!(path0, path1);
}

#[test]
fn test_add_traces() {
    let dir = tempfile::tempdir().unwrap();
    let pages = stories();
    let mut results = create_results(dir.path());

    let trace_file = dir.path().join("trace.json");
    fs::write(&trace_file, "{\"events\":[]}").unwrap();
    let mut bundle = TraceBundle::new();
    bundle.add_part("chrome", &trace_file);

    results.will_run_page(&pages[0], 0).unwrap();
    results
        .add_traces(&bundle, Some(vec!["loading".to_string()]))
        .unwrap();
    results.did_run_page();

    results.will_run_page(&pages[1], 0).unwrap();
    results.did_run_page();

    results.finalize(None).unwrap();

    assert_eq!(results.iter_runs_with_traces().count(), 1);
    let traced = results.iter_runs_with_traces().next().unwrap();
    let artifact = traced.get_artifact("trace/chrome/trace.json").unwrap();
    assert_eq!(
        fs::read_to_string(&artifact.local_path).unwrap(),
        "{\"events\":[]}"
    );

    let records = read_records(dir.path());
    assert_eq!(
        records[0]["testResult"]["tags"],
        serde_json::json!([{"key": "tbmv2", "value": "loading"}])
    );
}

#[test]
fn test_traces_attached_after_completion_are_serialized() {
    let dir = tempfile::tempdir().unwrap();
    let pages = stories();
    let mut results = create_results(dir.path());

    results.will_run_page(&pages[0], 0).unwrap();
    results.did_run_page();

    // Nothing written yet: serialization is deferred to finalize.
    let results_file = dir.path().join("artifacts").join(TEST_RESULTS);
    assert_eq!(fs::read_to_string(&results_file).unwrap(), "");

    results.finalize(None).unwrap();
    assert_eq!(read_records(dir.path()).len(), 1);
}

#[test]
fn test_records_are_compact_and_deterministic() {
    let dir = tempfile::tempdir().unwrap();
    let pages = stories();
    let mut results = create_results(dir.path());

    results.will_run_page(&pages[0], 0).unwrap();
    results.add_measurement("b", "ms", 2.0, None).unwrap();
    results.did_run_page();
    results.finalize(None).unwrap();

    let raw = fs::read_to_string(dir.path().join("artifacts").join(TEST_RESULTS)).unwrap();
    let line = raw.lines().next().unwrap();
    // Compact separators, deterministic key order.
    assert!(line.contains("\"status\":\"PASS\""));
    assert!(!line.contains(": "));
    assert!(line.find("\"expected\"").unwrap() < line.find("\"status\"").unwrap());
}
