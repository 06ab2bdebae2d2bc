//! Crash dump discovery, upload and symbolization.
//!
//! Sits on top of the supervisor's private minidump directory:
//! - finds the most recent dump (or all dumps) through a [`MinidumpFinder`]
//! - waits, with bounded polling, for a dump newer than a given timestamp
//! - uploads raw dumps and symbolizes them, memoizing successes so repeated
//!   polls do not re-symbolize the same file

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, SystemTime};

use chrono::Utc;
use tracing::{error, info};

use crate::config;

/// Finds crash dump files below a directory.
///
/// Both lookups return an explanation trace alongside the result; the
/// collector logs it unconditionally so a fruitless search still leaves a
/// post-mortem trail.
pub trait MinidumpFinder {
    /// The most recent dump below `dir`, with the search explanation
    fn most_recent_minidump(&self, dir: &Path) -> (Option<PathBuf>, Vec<String>);

    /// All dumps below `dir`, with the search explanation
    fn all_minidumps(&self, dir: &Path) -> (Vec<PathBuf>, Vec<String>);
}

/// Error raised by a cloud storage collaborator
#[derive(Debug)]
pub struct UploadError(pub String);

impl std::fmt::Display for UploadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Upload error: {}", self.0)
    }
}

impl std::error::Error for UploadError {}

/// Uploads artifacts to cloud storage, returning the remote URL
pub trait CloudStorage {
    fn insert(&self, remote_name: &str, local_path: &Path) -> Result<String, UploadError>;
}

/// Resolves a raw dump into a human-readable stack, or nothing on failure
pub trait MinidumpSymbolizer {
    fn symbolize(&self, minidump: &Path) -> Option<String>;
}

/// Outcome of a symbolization attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StackTrace {
    /// Human-readable stack frames
    Resolved(String),
    /// No stack available; the message explains why and links the raw dump
    Unavailable(String),
}

impl StackTrace {
    /// Whether symbolization produced a usable stack
    pub fn is_resolved(&self) -> bool {
        matches!(self, StackTrace::Resolved(_))
    }

    /// The stack text or the failure message
    pub fn text(&self) -> &str {
        match self {
            StackTrace::Resolved(text) | StackTrace::Unavailable(text) => text,
        }
    }
}

/// Collects and symbolizes crash reports left behind by the browser.
///
/// Successful symbolizations are memoized by dump path; failures are not,
/// so a transiently-unavailable symbol source can be retried on the next
/// poll.
pub struct CrashReportCollector {
    finder: Box<dyn MinidumpFinder>,
    storage: Box<dyn CloudStorage>,
    symbolizer: Box<dyn MinidumpSymbolizer>,
    symbolized_paths: HashSet<PathBuf>,
}

impl CrashReportCollector {
    pub fn new(
        finder: Box<dyn MinidumpFinder>,
        storage: Box<dyn CloudStorage>,
        symbolizer: Box<dyn MinidumpSymbolizer>,
    ) -> Self {
        Self {
            finder,
            storage,
            symbolizer,
            symbolized_paths: HashSet::new(),
        }
    }

    /// The most recent dump below `dir`, logging the finder's explanation
    pub fn most_recent_dump(&self, dir: &Path) -> Option<PathBuf> {
        let (dump_path, explanation) = self.finder.most_recent_minidump(dir);
        info!("{}", explanation.join("\n"));
        dump_path
    }

    /// All dumps below `dir`, logging the finder's explanation
    pub fn all_dumps(&self, dir: &Path) -> Vec<PathBuf> {
        let (paths, explanation) = self.finder.all_minidumps(dir);
        info!("{}", explanation.join("\n"));
        paths
    }

    /// Poll for a dump whose modification time is at or after `oldest`.
    ///
    /// Returns `None` when `timeout` elapses with no qualifying dump. The
    /// finder's last explanation is logged on every exit path, success or
    /// timeout.
    pub fn wait_for_dump_since(
        &self,
        dir: &Path,
        timeout: Duration,
        oldest: SystemTime,
    ) -> Option<PathBuf> {
        assert!(!timeout.is_zero(), "A positive dump wait timeout is required");

        let deadline = std::time::Instant::now() + timeout;
        let mut explanation = vec!["No explanation returned.".to_string()];
        let mut found = None;

        while std::time::Instant::now() < deadline {
            let (dump_path, trace) = self.finder.most_recent_minidump(dir);
            explanation = trace;
            let Some(path) = dump_path else {
                thread::sleep(config::poll_interval());
                continue;
            };
            let fresh_enough = fs::metadata(&path)
                .and_then(|meta| meta.modified())
                .map(|mtime| mtime >= oldest)
                .unwrap_or(false);
            if fresh_enough {
                found = Some(path);
                break;
            }
            thread::sleep(config::poll_interval());
        }

        info!("{}", explanation.join("\n"));
        found
    }

    /// Dumps below `dir` that have not yet been successfully symbolized
    pub fn unsymbolized_dumps(&self, dir: &Path) -> Vec<PathBuf> {
        self.all_dumps(dir)
            .into_iter()
            .filter(|path| !self.symbolized_paths.contains(path))
            .collect()
    }

    /// Upload the raw dump, then resolve it into a stack.
    ///
    /// The upload is always attempted first so the raw dump is preserved
    /// even when symbolization fails; an upload failure degrades to a
    /// placeholder link and does not abort symbolization.
    pub fn symbolize(&mut self, minidump_path: &Path) -> StackTrace {
        let cloud_link = self.upload_to_cloud_storage(minidump_path);

        match self.symbolizer.symbolize(minidump_path) {
            Some(stack) if !stack.is_empty() => {
                self.symbolized_paths.insert(minidump_path.to_path_buf());
                StackTrace::Resolved(stack)
            }
            _ => StackTrace::Unavailable(format!(
                "Failed to symbolize minidump. Raw stack is uploaded to cloud storage: {}.",
                cloud_link
            )),
        }
    }

    /// Symbolize the most recent dump below `dir`
    pub fn latest_stack_trace(&mut self, dir: &Path) -> StackTrace {
        let Some(most_recent) = self.most_recent_dump(dir) else {
            return StackTrace::Unavailable("No crash dump found.".to_string());
        };
        info!("Minidump found: {}", most_recent.display());
        self.symbolize(&most_recent)
    }

    fn upload_to_cloud_storage(&self, minidump_path: &Path) -> String {
        let remote_name = format!(
            "minidump-{}-{}.dmp",
            Utc::now().format("%Y-%m-%d_%H-%M-%S"),
            std::process::id()
        );
        match self.storage.insert(&remote_name, minidump_path) {
            Ok(url) => url,
            Err(err) => {
                error!("Cloud storage error while trying to upload dump: {}", err);
                "<Missing link>".to_string()
            }
        }
    }
}

/// Directory-scanning [`MinidumpFinder`]: newest `.dmp` file by mtime.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirScanMinidumpFinder;

impl DirScanMinidumpFinder {
    fn scan(&self, dir: &Path) -> (Vec<(PathBuf, SystemTime)>, Vec<String>) {
        let mut explanation = vec![format!("Looking for minidumps in {}", dir.display())];
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(err) => {
                explanation.push(format!("Could not read directory: {}", err));
                return (Vec::new(), explanation);
            }
        };

        let mut dumps = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().map(|ext| ext == "dmp").unwrap_or(false) {
                let mtime = entry
                    .metadata()
                    .and_then(|meta| meta.modified())
                    .unwrap_or(SystemTime::UNIX_EPOCH);
                dumps.push((path, mtime));
            }
        }
        dumps.sort_by_key(|(_, mtime)| *mtime);
        explanation.push(format!("Found {} candidate dump file(s)", dumps.len()));
        (dumps, explanation)
    }
}

impl MinidumpFinder for DirScanMinidumpFinder {
    fn most_recent_minidump(&self, dir: &Path) -> (Option<PathBuf>, Vec<String>) {
        let (dumps, mut explanation) = self.scan(dir);
        let most_recent = dumps.into_iter().next_back().map(|(path, _)| path);
        match &most_recent {
            Some(path) => explanation.push(format!("Most recent: {}", path.display())),
            None => explanation.push("No minidump found".to_string()),
        }
        (most_recent, explanation)
    }

    fn all_minidumps(&self, dir: &Path) -> (Vec<PathBuf>, Vec<String>) {
        let (dumps, explanation) = self.scan(dir);
        (dumps.into_iter().map(|(path, _)| path).collect(), explanation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullStorage;
    impl CloudStorage for NullStorage {
        fn insert(&self, remote_name: &str, _local_path: &Path) -> Result<String, UploadError> {
            Ok(format!("https://storage.example/{}", remote_name))
        }
    }

    struct FailingStorage;
    impl CloudStorage for FailingStorage {
        fn insert(&self, _remote_name: &str, _local_path: &Path) -> Result<String, UploadError> {
            Err(UploadError("bucket unavailable".to_string()))
        }
    }

    struct FixedSymbolizer(Option<String>);
    impl MinidumpSymbolizer for FixedSymbolizer {
        fn symbolize(&self, _minidump: &Path) -> Option<String> {
            self.0.clone()
        }
    }

    fn collector(symbolizer: FixedSymbolizer) -> CrashReportCollector {
        CrashReportCollector::new(
            Box::new(DirScanMinidumpFinder),
            Box::new(NullStorage),
            Box::new(symbolizer),
        )
    }

    fn write_dump(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, b"MDMP").unwrap();
        path
    }

    #[test]
    fn test_dir_scan_finds_newest_dump() {
        let dir = tempfile::tempdir().unwrap();
        let older = write_dump(dir.path(), "first.dmp");
        // Push the second dump measurably past the first one's mtime.
        let newer = dir.path().join("second.dmp");
        loop {
            fs::write(&newer, b"MDMP").unwrap();
            let t0 = fs::metadata(&older).unwrap().modified().unwrap();
            let t1 = fs::metadata(&newer).unwrap().modified().unwrap();
            if t1 > t0 {
                break;
            }
            thread::sleep(Duration::from_millis(20));
        }
        write_dump(dir.path(), "ignored.txt");

        let (found, explanation) = DirScanMinidumpFinder.most_recent_minidump(dir.path());
        assert_eq!(found, Some(newer));
        assert!(explanation.iter().any(|line| line.contains("2 candidate")));
    }

    #[test]
    fn test_dir_scan_explains_empty_dir() {
        let dir = tempfile::tempdir().unwrap();
        let (found, explanation) = DirScanMinidumpFinder.most_recent_minidump(dir.path());
        assert_eq!(found, None);
        assert!(explanation.iter().any(|line| line.contains("No minidump found")));
    }

    #[test]
    fn test_latest_stack_trace_without_dump() {
        let dir = tempfile::tempdir().unwrap();
        let mut collector = collector(FixedSymbolizer(Some("stack".to_string())));
        let stack = collector.latest_stack_trace(dir.path());
        assert_eq!(stack, StackTrace::Unavailable("No crash dump found.".to_string()));
    }

    #[test]
    fn test_symbolize_success_removes_from_unsymbolized() {
        let dir = tempfile::tempdir().unwrap();
        let dump = write_dump(dir.path(), "crash.dmp");
        let mut collector = collector(FixedSymbolizer(Some("#0 main".to_string())));

        assert_eq!(collector.unsymbolized_dumps(dir.path()), vec![dump.clone()]);
        let stack = collector.symbolize(&dump);
        assert!(stack.is_resolved());
        assert_eq!(stack.text(), "#0 main");
        assert!(collector.unsymbolized_dumps(dir.path()).is_empty());

        // A second call is still permitted.
        assert!(collector.symbolize(&dump).is_resolved());
    }

    #[test]
    fn test_symbolize_failure_is_not_memoized() {
        let dir = tempfile::tempdir().unwrap();
        let dump = write_dump(dir.path(), "crash.dmp");
        let mut collector = collector(FixedSymbolizer(None));

        let stack = collector.symbolize(&dump);
        assert!(!stack.is_resolved());
        assert!(stack.text().starts_with("Failed to symbolize minidump."));
        assert!(stack.text().contains("https://storage.example/minidump-"));
        // Still listed, so a later poll can retry.
        assert_eq!(collector.unsymbolized_dumps(dir.path()), vec![dump]);
    }

    #[test]
    fn test_upload_failure_degrades_to_placeholder() {
        let dir = tempfile::tempdir().unwrap();
        let dump = write_dump(dir.path(), "crash.dmp");
        let mut collector = CrashReportCollector::new(
            Box::new(DirScanMinidumpFinder),
            Box::new(FailingStorage),
            Box::new(FixedSymbolizer(None)),
        );

        let stack = collector.symbolize(&dump);
        assert!(stack.text().contains("<Missing link>"));
    }

    #[test]
    fn test_wait_for_dump_since_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let collector = collector(FixedSymbolizer(None));
        let found = collector.wait_for_dump_since(
            dir.path(),
            Duration::from_millis(300),
            SystemTime::UNIX_EPOCH,
        );
        assert_eq!(found, None);
    }

    #[test]
    fn test_wait_for_dump_since_rejects_older_dumps() {
        let dir = tempfile::tempdir().unwrap();
        write_dump(dir.path(), "stale.dmp");
        let collector = collector(FixedSymbolizer(None));
        let future = SystemTime::now() + Duration::from_secs(3600);
        let found = collector.wait_for_dump_since(dir.path(), Duration::from_millis(300), future);
        assert_eq!(found, None);
    }

    #[test]
    fn test_wait_for_dump_since_accepts_fresh_dump() {
        let dir = tempfile::tempdir().unwrap();
        let dump = write_dump(dir.path(), "fresh.dmp");
        let collector = collector(FixedSymbolizer(None));
        let found = collector.wait_for_dump_since(
            dir.path(),
            Duration::from_secs(5),
            SystemTime::UNIX_EPOCH,
        );
        assert_eq!(found, Some(dump));
    }
}
