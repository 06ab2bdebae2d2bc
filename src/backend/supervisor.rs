//! Browser process supervision.
//!
//! Owns the lifecycle of one locally-launched browser process:
//! - controlled launch with a scrubbed environment and private crash-dump dir
//! - out-of-band readiness detection through the `DevToolsActivePort` file
//! - escalating shutdown (cooperative, then SIGINT, then kill)
//! - captured stdout/stderr retrieval

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use tempfile::{NamedTempFile, TempDir};
use tracing::{info, warn};

use crate::backend::platform::Platform;
use crate::config;

/// Name of the readiness file the browser writes inside its profile directory
pub const DEVTOOLS_ACTIVE_PORT_FILE: &str = "DevToolsActivePort";

/// Locale forced onto the browser so text output does not vary between hosts
const FORCED_ENCODING: &str = "en_US.UTF-8";

/// Long timeout for cooperative shutdown, covering slow debug builds
const COOPERATIVE_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(15);
/// Timeout for the SIGINT shutdown step
const POLITE_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);
const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Logging verbosity requested for the browser process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoggingVerbosity {
    /// Browser logging disabled
    #[default]
    Disabled,
    NonVerbose,
    Verbose,
    SuperVerbose,
}

impl LoggingVerbosity {
    /// Whether any browser log file should be produced
    pub fn is_enabled(self) -> bool {
        !matches!(self, LoggingVerbosity::Disabled)
    }
}

/// Options controlling how the browser is launched and supervised
#[derive(Debug, Clone)]
pub struct SupervisorOptions {
    /// Path to the browser executable
    pub executable: PathBuf,

    /// Profile directory the browser writes its readiness file into
    pub profile_dir: PathBuf,

    /// Inherit stdout/stderr instead of capturing them to a temp file
    pub show_stdout: bool,

    /// Browser log file verbosity
    pub logging_verbosity: LoggingVerbosity,

    /// Trim the logged start command to keep log volume down
    pub trim_logs: bool,
}

impl SupervisorOptions {
    /// Options with capture enabled and logging disabled
    pub fn new(executable: impl Into<PathBuf>, profile_dir: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            profile_dir: profile_dir.into(),
            show_stdout: false,
            logging_verbosity: LoggingVerbosity::Disabled,
            trim_logs: true,
        }
    }

    /// Set whether browser output is inherited rather than captured
    pub fn show_stdout(mut self, show: bool) -> Self {
        self.show_stdout = show;
        self
    }

    /// Set the browser log verbosity
    pub fn logging_verbosity(mut self, verbosity: LoggingVerbosity) -> Self {
        self.logging_verbosity = verbosity;
        self
    }

    /// Set whether the logged start command is trimmed
    pub fn trim_logs(mut self, trim: bool) -> Self {
        self.trim_logs = trim;
        self
    }
}

/// Contents of a fully-written `DevToolsActivePort` file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DevToolsEndpoint {
    /// Remote-debugging port the browser is listening on
    pub port: u16,
    /// Optional browser target identifier from the second line
    pub browser_target: Option<String>,
}

/// Result type for supervisor operations
pub type SupervisorResult<T> = Result<T, SupervisorError>;

/// Error types for supervisor operations
#[derive(Debug)]
pub enum SupervisorError {
    /// The configured browser executable does not exist
    MissingExecutable(PathBuf),

    /// The browser process could not be spawned
    Spawn(String),

    /// The browser process exited when it was expected to be alive
    ProcessGone(Option<i32>),

    /// Readiness data is not available yet; callers should retry with backoff
    NotReady(String),

    /// I/O error
    Io(std::io::Error),
}

impl SupervisorError {
    /// Whether this is a retryable "not ready yet" condition rather than a fault
    pub fn is_not_ready(&self) -> bool {
        matches!(self, SupervisorError::NotReady(_))
    }
}

impl std::fmt::Display for SupervisorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SupervisorError::MissingExecutable(path) => {
                write!(f, "Cannot create browser, no executable found: {}", path.display())
            }
            SupervisorError::Spawn(msg) => write!(f, "Spawn error: {}", msg),
            SupervisorError::ProcessGone(Some(code)) => {
                write!(f, "Browser process gone, return code: {}", code)
            }
            SupervisorError::ProcessGone(None) => {
                write!(f, "Browser process gone, terminated by signal")
            }
            SupervisorError::NotReady(msg) => write!(f, "Not ready: {}", msg),
            SupervisorError::Io(err) => write!(f, "I/O error: {}", err),
        }
    }
}

impl std::error::Error for SupervisorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SupervisorError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for SupervisorError {
    fn from(err: std::io::Error) -> Self {
        SupervisorError::Io(err)
    }
}

/// Supervises one locally-launched browser process.
///
/// At most one live process per supervisor: `start()` asserts that any
/// previous process was closed first. `close()` is best-effort and
/// idempotent so it can be called from every exit path, including drop.
pub struct ProcessSupervisor {
    options: SupervisorOptions,
    platform: Box<dyn Platform>,
    proc: Option<Child>,
    launch_command: Vec<String>,
    tmp_output_file: Option<NamedTempFile>,
    tmp_minidump_dir: Option<TempDir>,
    log_file_path: Option<PathBuf>,
}

impl ProcessSupervisor {
    /// Create a supervisor for the given executable.
    ///
    /// Fails if the executable does not exist; a supervisor cannot operate
    /// without a launchable browser. The private minidump directory is
    /// created here so crash-dump redirection is in place before `start()`.
    pub fn new(options: SupervisorOptions, platform: Box<dyn Platform>) -> SupervisorResult<Self> {
        if !options.executable.exists() {
            return Err(SupervisorError::MissingExecutable(options.executable.clone()));
        }

        let tmp_minidump_dir = TempDir::new()?;
        // The log file outlives close() so post-mortem inspection works;
        // only the minidump dir is reclaimed on shutdown.
        let log_file_path = if options.logging_verbosity.is_enabled() {
            Some(tempfile::tempdir()?.keep().join("browser.log"))
        } else {
            None
        };

        Ok(Self {
            options,
            platform,
            proc: None,
            launch_command: Vec::new(),
            tmp_output_file: None,
            tmp_minidump_dir: Some(tmp_minidump_dir),
            log_file_path,
        })
    }

    /// Launch the browser with the given startup arguments.
    ///
    /// The command line is the executable, platform-conditional flags, the
    /// caller's arguments, and a fixed final `about:blank` navigation target.
    /// Fails with [`SupervisorError::ProcessGone`] if the process exits
    /// immediately after spawn.
    pub fn start(&mut self, startup_args: &[String]) -> SupervisorResult<()> {
        assert!(self.proc.is_none(), "Must call close() before start()");

        let dump_dir = match &self.tmp_minidump_dir {
            Some(dir) => dir.path().to_path_buf(),
            None => {
                let dir = TempDir::new()?;
                let path = dir.path().to_path_buf();
                self.tmp_minidump_dir = Some(dir);
                path
            }
        };

        let mut cmd_line = vec![self.options.executable.display().to_string()];
        if self.platform.os_name() == "mac" {
            cmd_line.push("--use-mock-keychain".to_string());
        }
        cmd_line.extend(startup_args.iter().cloned());
        cmd_line.push("about:blank".to_string());

        let mut cmd = Command::new(&self.options.executable);
        cmd.args(&cmd_line[1..]);
        // CHROME_HEADLESS suppresses the browser's own crash uploader; dumps
        // land in the private directory instead.
        cmd.env("CHROME_HEADLESS", "1");
        cmd.env("BREAKPAD_DUMP_LOCATION", &dump_dir);
        if self.options.logging_verbosity.is_enabled() {
            if let Some(log_path) = &self.log_file_path {
                eprintln!("Browser log file will be saved in {}", log_path.display());
                cmd.env("CHROME_LOG_FILE", log_path);
            }
        }
        // Predictable language settings that don't differ between hosts.
        for name in ["LC_ALL", "LC_MESSAGES", "LANG"] {
            if let Ok(previous) = std::env::var(name) {
                if previous != FORCED_ENCODING {
                    warn!(
                        "Overriding env[{}]==\"{}\" with default value \"{}\"",
                        name, previous, FORCED_ENCODING
                    );
                }
            }
            cmd.env(name, FORCED_ENCODING);
        }

        self.log_start_command(&cmd_line, &dump_dir);

        if !self.options.show_stdout {
            let tmp = NamedTempFile::new()?;
            // stderr shares stdout's file description so the two streams
            // interleave instead of overwriting each other.
            let stdout = tmp.reopen()?;
            let stderr = stdout.try_clone()?;
            cmd.stdout(Stdio::from(stdout));
            cmd.stderr(Stdio::from(stderr));
            self.tmp_output_file = Some(tmp);
        }

        let mut child = cmd.spawn().map_err(|err| {
            SupervisorError::Spawn(format!(
                "Failed to launch '{}': {}",
                self.options.executable.display(),
                err
            ))
        })?;

        // Quick liveness check: a browser that dies right out of the gate
        // must fail start() rather than every later readiness poll.
        if let Some(status) = child.try_wait()? {
            return Err(SupervisorError::ProcessGone(status.code()));
        }

        self.launch_command = cmd_line;
        self.proc = Some(child);
        Ok(())
    }

    fn log_start_command(&self, command: &[String], dump_dir: &Path) {
        if self.options.trim_logs {
            info!("Starting browser: {} ({} args)", command[0], command.len() - 1);
        } else {
            info!("Starting browser: {}", command.join(" "));
            info!("Browser crash dumps redirected to {}", dump_dir.display());
        }
    }

    /// Whether a launched process exists and has not exited
    pub fn is_running(&mut self) -> bool {
        match self.proc.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    /// OS process id of the launched browser, if any
    pub fn pid(&self) -> Option<u32> {
        self.proc.as_ref().map(|child| child.id())
    }

    /// The full command line used for the last launch
    pub fn launch_command(&self) -> &[String] {
        &self.launch_command
    }

    /// Directory the browser writes crash dumps into (until `close()`)
    pub fn minidump_dir(&self) -> Option<&Path> {
        self.tmp_minidump_dir.as_ref().map(|dir| dir.path())
    }

    /// Path of the browser log file when logging is enabled
    pub fn log_file_path(&self) -> Option<&Path> {
        self.log_file_path.as_deref()
    }

    fn devtools_active_port_path(&self) -> PathBuf {
        self.options.profile_dir.join(DEVTOOLS_ACTIVE_PORT_FILE)
    }

    /// Read the DevTools readiness file.
    ///
    /// The file is written by the browser once its control channel is bound:
    /// line 1 is the port, optional line 2 a browser target id. A missing,
    /// empty, or partially-written file is the retryable
    /// [`SupervisorError::NotReady`], not a fault.
    pub fn devtools_endpoint(&self) -> SupervisorResult<DevToolsEndpoint> {
        let path = self.devtools_active_port_path();
        if !path.is_file() {
            return Err(SupervisorError::NotReady(
                "DevTools file does not exist yet".to_string(),
            ));
        }
        // Both stat and read may fail while the browser is mid-write; the
        // caller retries.
        let metadata = fs::metadata(&path)
            .map_err(|err| SupervisorError::NotReady(format!("DevTools file unreadable: {}", err)))?;
        if metadata.len() == 0 {
            return Err(SupervisorError::NotReady("DevTools file empty".to_string()));
        }
        let contents = fs::read_to_string(&path)
            .map_err(|err| SupervisorError::NotReady(format!("DevTools file unreadable: {}", err)))?;

        let first = contents
            .lines()
            .next()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .ok_or_else(|| SupervisorError::NotReady("DevTools file empty".to_string()))?;
        let port: u16 = first.parse().map_err(|_| {
            SupervisorError::NotReady("DevTools port not fully written yet".to_string())
        })?;
        let browser_target = contents
            .lines()
            .nth(1)
            .map(|line| line.trim_end().to_string())
            .filter(|line| !line.is_empty());

        Ok(DevToolsEndpoint { port, browser_target })
    }

    /// Poll for the DevTools endpoint until it is readable or `timeout` elapses.
    ///
    /// Fails fast with [`SupervisorError::ProcessGone`] if the browser dies
    /// while waiting.
    pub fn wait_for_devtools(&mut self, timeout: Duration) -> SupervisorResult<DevToolsEndpoint> {
        let deadline = Instant::now() + timeout;
        loop {
            if !self.is_running() {
                let code = self
                    .proc
                    .as_mut()
                    .and_then(|child| child.try_wait().ok().flatten())
                    .and_then(|status| status.code());
                return Err(SupervisorError::ProcessGone(code));
            }
            match self.devtools_endpoint() {
                Ok(endpoint) => return Ok(endpoint),
                Err(err) if err.is_not_ready() => {
                    if Instant::now() >= deadline {
                        return Err(err);
                    }
                    thread::sleep(config::poll_interval());
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Captured browser output, or an empty string when output was inherited.
    pub fn get_standard_output(&mut self) -> String {
        match &self.tmp_output_file {
            Some(tmp) => fs::read_to_string(tmp.path()).unwrap_or_default(),
            None => {
                if self.options.show_stdout {
                    // Printed directly: routing this through logging can
                    // recurse back into output collection.
                    eprintln!("Can't get standard output with show_stdout enabled");
                }
                String::new()
            }
        }
    }

    fn wait_for_exit(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if !self.is_running() {
                return true;
            }
            thread::sleep(SHUTDOWN_POLL_INTERVAL);
        }
        !self.is_running()
    }

    fn try_cooperative_shutdown(&mut self) {
        if !self.platform.is_cooperative_shutdown_supported() {
            return;
        }
        let Some(pid) = self.pid() else { return };
        let process_name = self
            .options
            .executable
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "browser".to_string());
        if self.platform.cooperatively_shutdown(pid, &process_name) {
            if self.wait_for_exit(COOPERATIVE_SHUTDOWN_TIMEOUT) {
                info!("Successfully shut down browser cooperatively");
            } else {
                warn!("Failed to cooperatively shutdown. Proceeding to terminate.");
            }
        }
    }

    #[cfg(unix)]
    fn send_interrupt(&mut self) -> bool {
        use nix::sys::signal::{Signal, kill};
        use nix::unistd::Pid;

        match self.pid() {
            Some(pid) => kill(Pid::from_raw(pid as i32), Signal::SIGINT).is_ok(),
            None => false,
        }
    }

    #[cfg(not(unix))]
    fn send_interrupt(&mut self) -> bool {
        false
    }

    /// Shut the browser down and release supervised resources.
    ///
    /// Best-effort and idempotent: every internal fault is logged and
    /// swallowed so cleanup never masks the original test outcome.
    /// Escalation order, each step only if the previous left the process
    /// alive: cooperative shutdown, SIGINT, kill.
    pub fn close(&mut self) {
        if self.is_running() {
            self.try_cooperative_shutdown();
        }

        // SIGINT rather than SIGTERM: the browser treats SIGTERM as an
        // urgent shutdown and may not free all resources.
        if self.is_running() && self.platform.os_name() != "win" && self.send_interrupt() {
            if self.wait_for_exit(POLITE_SHUTDOWN_TIMEOUT) {
                self.proc = None;
            } else {
                warn!("Failed to gracefully shutdown.");
            }
        }

        if self.is_running() {
            warn!("Proceed to kill the browser.");
            if let Some(child) = self.proc.as_mut() {
                if let Err(err) = child.kill() {
                    warn!("Failed to kill browser process: {}", err);
                }
                let _ = child.wait();
            }
        } else if let Some(child) = self.proc.as_mut() {
            // Reap a process that exited during one of the waits above.
            let _ = child.wait();
        }
        self.proc = None;

        // Dropping the handle removes the captured-output temp file.
        self.tmp_output_file = None;

        if let Some(dump_dir) = self.tmp_minidump_dir.take() {
            if let Err(err) = dump_dir.close() {
                warn!("Failed to remove minidump dir: {}", err);
            }
        }
    }
}

impl Drop for ProcessSupervisor {
    fn drop(&mut self) {
        // Callers are expected to close() on every exit path; this is the
        // backstop for fault paths that skipped it.
        self.close();
    }
}
