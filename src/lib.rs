//! Browser Harness - browser test-run supervision with structured results.
//!
//! This crate provides:
//! - Supervised launch and escalating shutdown of a local browser binary
//! - DevTools readiness detection via the browser's control-port file
//! - Crash dump discovery, upload and symbolization after abnormal exits
//! - An append-only ledger of story-run results with measurements and artifacts
//! - Orchestration glue to run a story sequence against one browser
//!
//! # Example
//!
//! ```rust,no_run
//! use browser_harness::backend::{HostPlatform, ProcessSupervisor, SupervisorOptions};
//! use std::time::Duration;
//!
//! let options = SupervisorOptions::new("/usr/bin/chromium", "/tmp/profile");
//! let mut supervisor = ProcessSupervisor::new(options, Box::new(HostPlatform)).unwrap();
//! supervisor.start(&["--remote-debugging-port=0".to_string()]).unwrap();
//! let endpoint = supervisor.wait_for_devtools(Duration::from_secs(30)).unwrap();
//! println!("DevTools listening on port {}", endpoint.port);
//! supervisor.close();
//! ```

pub mod backend;
pub mod config;
pub mod results;
pub mod runner;

// Re-export backend types
pub use backend::{
    CrashReportCollector, DevToolsEndpoint, DirScanMinidumpFinder, HostPlatform,
    LoggingVerbosity, MinidumpFinder, Platform, ProcessSupervisor, StackTrace, SupervisorError,
    SupervisorOptions,
};

// Re-export results types
pub use results::{
    LedgerError, LedgerOptions, ResultLedger, RunStatus, SharedDiagnostics, Story, StoryRun,
    TraceBundle,
};

// Re-export the story loop
pub use runner::{StoryError, run_stories};
