use clap::Parser;
use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::{Duration, Instant};

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use browser_harness::backend::crash::{CloudStorage, MinidumpSymbolizer, UploadError};
use browser_harness::backend::{
    CrashReportCollector, DirScanMinidumpFinder, HostPlatform, LoggingVerbosity, Platform,
    ProcessSupervisor, SupervisorOptions,
};
use browser_harness::config;
use browser_harness::results::{
    GtestStyleReporter, LedgerOptions, ResultLedger, SharedDiagnostics, Story,
};
use browser_harness::run_stories;

/// Browser test-run harness
#[derive(Parser, Debug)]
#[command(
    name = "browser-harness",
    about = "Launches a local browser under supervision and records story run results",
    after_help = "ENVIRONMENT VARIABLES:\n\
        BROWSER_HARNESS_OUTPUT_DIR        Base directory for results and artifacts\n\
        BROWSER_HARNESS_DEVTOOLS_TIMEOUT  DevTools readiness timeout (seconds)\n\
        BROWSER_HARNESS_DUMP_TIMEOUT      Crash dump discovery timeout (seconds)\n\
        BROWSER_HARNESS_POLL_INTERVAL_MS  Poll interval between readiness checks (ms)"
)]
struct Args {
    /// Path to the browser executable
    #[arg(short, long)]
    browser: PathBuf,

    /// Benchmark name used in test paths and diagnostics
    #[arg(short = 'n', long, default_value = "smoke")]
    benchmark_name: String,

    /// Benchmark description recorded in diagnostics
    #[arg(long, default_value = "")]
    description: String,

    /// Output directory for results (default: BROWSER_HARNESS_OUTPUT_DIR)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Inherit browser stdout/stderr instead of capturing them
    #[arg(long)]
    show_stdout: bool,

    /// Enable the browser's own log file
    #[arg(long)]
    verbose_logging: bool,

    /// Log the full start command instead of a trimmed summary
    #[arg(long)]
    full_logs: bool,

    /// DevTools readiness timeout in seconds
    #[arg(long, env = "BROWSER_HARNESS_DEVTOOLS_TIMEOUT")]
    devtools_timeout: Option<u64>,

    /// Extra argument appended to the browser command line (repeatable)
    #[arg(long = "extra-arg", value_name = "ARG", allow_hyphen_values = true)]
    extra_args: Vec<String>,

    /// Story URLs to visit
    #[arg(required = true)]
    stories: Vec<String>,
}

/// Keeps raw dumps next to the results instead of a real cloud bucket.
struct LocalDumpStore {
    dir: PathBuf,
}

impl CloudStorage for LocalDumpStore {
    fn insert(&self, remote_name: &str, local_path: &Path) -> Result<String, UploadError> {
        fs::create_dir_all(&self.dir).map_err(|err| UploadError(err.to_string()))?;
        let dest = self.dir.join(remote_name);
        fs::copy(local_path, &dest).map_err(|err| UploadError(err.to_string()))?;
        Ok(format!("file://{}", dest.display()))
    }
}

/// Placeholder symbolizer: resolving frames needs the external symbol
/// toolchain, which the CLI does not ship.
struct UnavailableSymbolizer;

impl MinidumpSymbolizer for UnavailableSymbolizer {
    fn symbolize(&self, _minidump: &Path) -> Option<String> {
        None
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    match run(&args) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            eprintln!("Error: {}", err);
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<bool, Box<dyn Error>> {
    let output_dir = args
        .output
        .clone()
        .unwrap_or_else(|| PathBuf::from(config::output_base_dir()));
    let profile_dir = tempfile::tempdir()?;

    let verbosity = if args.verbose_logging {
        LoggingVerbosity::Verbose
    } else {
        LoggingVerbosity::Disabled
    };
    let options = SupervisorOptions::new(&args.browser, profile_dir.path())
        .show_stdout(args.show_stdout)
        .logging_verbosity(verbosity)
        .trim_logs(!args.full_logs);
    let mut supervisor = ProcessSupervisor::new(options, Box::new(HostPlatform))?;

    let mut crashes = CrashReportCollector::new(
        Box::new(DirScanMinidumpFinder),
        Box::new(LocalDumpStore {
            dir: output_dir.join("minidumps"),
        }),
        Box::new(UnavailableSymbolizer),
    );

    let mut results = ResultLedger::new(
        LedgerOptions::default()
            .benchmark_name(args.benchmark_name.clone())
            .benchmark_description(args.description.clone())
            .output_dir(&output_dir)
            .reporter(Box::new(GtestStyleReporter::stderr())),
    )?;

    let platform = HostPlatform;
    results.add_shared_diagnostics(SharedDiagnostics {
        architecture: Some(platform.arch_name().to_string()),
        os_name: Some(platform.os_name().to_string()),
        device_id: hostname::get()
            .ok()
            .map(|name| name.to_string_lossy().into_owned()),
        ..Default::default()
    });

    let mut startup_args = vec![
        format!("--user-data-dir={}", profile_dir.path().display()),
        "--remote-debugging-port=0".to_string(),
    ];
    startup_args.extend(args.extra_args.clone());

    supervisor.start(&startup_args)?;
    let launch = Instant::now();

    let timeout = args
        .devtools_timeout
        .map(Duration::from_secs)
        .unwrap_or_else(|| config::get().timeouts.devtools_timeout());
    let endpoint = match supervisor.wait_for_devtools(timeout) {
        Ok(endpoint) => endpoint,
        Err(err) => {
            let output = supervisor.get_standard_output();
            if !output.is_empty() {
                warn!("Browser output:\n{}", output);
            }
            if let Some(dump_dir) = supervisor.minidump_dir() {
                let stack = crashes.latest_stack_trace(dump_dir);
                warn!("{}", stack.text());
            }
            supervisor.close();
            results.finalize(Some(&format!("Browser did not become ready: {}", err)))?;
            return Ok(false);
        }
    };
    let startup = launch.elapsed();
    info!("DevTools ready on port {}", endpoint.port);

    let stories: Vec<Story> = args
        .stories
        .iter()
        .map(|url| Story::with_url(url.clone(), url.clone()))
        .collect();

    let mut recorded_startup = false;
    let outcome = run_stories(
        &mut supervisor,
        &mut crashes,
        &mut results,
        &stories,
        |_story, results| {
            if !recorded_startup {
                recorded_startup = true;
                results.add_measurement(
                    "startup_time",
                    "ms",
                    startup.as_secs_f64() * 1000.0,
                    Some("Time from launch to DevTools readiness"),
                )?;
            }
            results.add_measurement(
                "uptime",
                "s",
                launch.elapsed().as_secs_f64(),
                Some("Browser uptime at story completion"),
            )?;
            Ok(())
        },
    );

    supervisor.close();
    outcome?;
    Ok(!results.had_failures() && !results.benchmark_interrupted())
}
