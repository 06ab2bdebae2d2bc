//! Configuration management with environment variable support.
//!
//! This module provides centralized configuration for the harness, supporting:
//! - Environment variables for all configurable values
//! - Sensible defaults for local runs
//!
//! # Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `BROWSER_HARNESS_OUTPUT_DIR` | Base directory for results and artifacts | `./harness_results` |
//! | `BROWSER_HARNESS_DEVTOOLS_TIMEOUT` | DevTools readiness timeout in seconds | `30` |
//! | `BROWSER_HARNESS_DUMP_TIMEOUT` | Crash dump discovery timeout in seconds | `20` |
//! | `BROWSER_HARNESS_POLL_INTERVAL_MS` | Sleep between readiness/dump polls (ms) | `100` |
//!
//! # Example
//!
//! ```bash
//! # Collect results somewhere persistent
//! export BROWSER_HARNESS_OUTPUT_DIR="/var/tmp/harness-results"
//! export BROWSER_HARNESS_DEVTOOLS_TIMEOUT="60"
//! ```

use std::env;
use std::sync::OnceLock;
use std::time::Duration;

// ============================================================================
// Default Values
// ============================================================================

/// Default base directory for results and artifacts
pub const DEFAULT_OUTPUT_DIR: &str = "./harness_results";

/// Default DevTools readiness timeout (seconds)
pub const DEFAULT_DEVTOOLS_TIMEOUT: u64 = 30;

/// Default crash dump discovery timeout (seconds)
pub const DEFAULT_DUMP_TIMEOUT: u64 = 20;

/// Default sleep between readiness/dump polls (milliseconds)
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 100;

// ============================================================================
// Environment Variable Names
// ============================================================================

/// Environment variable for the output directory
pub const ENV_OUTPUT_DIR: &str = "BROWSER_HARNESS_OUTPUT_DIR";

/// Environment variable for the DevTools readiness timeout
pub const ENV_DEVTOOLS_TIMEOUT: &str = "BROWSER_HARNESS_DEVTOOLS_TIMEOUT";

/// Environment variable for the crash dump discovery timeout
pub const ENV_DUMP_TIMEOUT: &str = "BROWSER_HARNESS_DUMP_TIMEOUT";

/// Environment variable for the poll interval
pub const ENV_POLL_INTERVAL_MS: &str = "BROWSER_HARNESS_POLL_INTERVAL_MS";

// ============================================================================
// Configuration Getters (with caching)
// ============================================================================

static CONFIG: OnceLock<Config> = OnceLock::new();

/// Get the global configuration (initialized from environment on first access)
pub fn get() -> &'static Config {
    CONFIG.get_or_init(Config::from_env)
}

/// Centralized configuration for the harness
#[derive(Debug, Clone)]
pub struct Config {
    /// Output locations
    pub output: OutputSettings,
    /// Timeouts and poll cadence
    pub timeouts: TimeoutSettings,
}

/// Output-related settings
#[derive(Debug, Clone)]
pub struct OutputSettings {
    /// Base directory for results and artifacts
    pub base_dir: String,
}

/// Timeout-related settings
#[derive(Debug, Clone)]
pub struct TimeoutSettings {
    /// DevTools readiness timeout (seconds)
    pub devtools_timeout: u64,
    /// Crash dump discovery timeout (seconds)
    pub dump_timeout: u64,
    /// Sleep between readiness/dump polls (milliseconds)
    pub poll_interval_ms: u64,
}

impl Config {
    /// Create configuration from environment variables, falling back to defaults
    pub fn from_env() -> Self {
        Self {
            output: OutputSettings::from_env(),
            timeouts: TimeoutSettings::from_env(),
        }
    }

    /// Create configuration with all defaults (ignoring environment)
    pub fn defaults() -> Self {
        Self {
            output: OutputSettings::defaults(),
            timeouts: TimeoutSettings::defaults(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}

impl OutputSettings {
    /// Create output settings from environment variables
    pub fn from_env() -> Self {
        Self {
            base_dir: env::var(ENV_OUTPUT_DIR).unwrap_or_else(|_| DEFAULT_OUTPUT_DIR.to_string()),
        }
    }

    /// Create output settings with defaults
    pub fn defaults() -> Self {
        Self {
            base_dir: DEFAULT_OUTPUT_DIR.to_string(),
        }
    }
}

impl TimeoutSettings {
    /// Create timeout settings from environment variables
    pub fn from_env() -> Self {
        Self {
            devtools_timeout: env::var(ENV_DEVTOOLS_TIMEOUT)
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_DEVTOOLS_TIMEOUT),
            dump_timeout: env::var(ENV_DUMP_TIMEOUT)
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_DUMP_TIMEOUT),
            poll_interval_ms: env::var(ENV_POLL_INTERVAL_MS)
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_POLL_INTERVAL_MS),
        }
    }

    /// Create timeout settings with defaults
    pub fn defaults() -> Self {
        Self {
            devtools_timeout: DEFAULT_DEVTOOLS_TIMEOUT,
            dump_timeout: DEFAULT_DUMP_TIMEOUT,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
        }
    }

    /// DevTools readiness timeout as a [`Duration`]
    pub fn devtools_timeout(&self) -> Duration {
        Duration::from_secs(self.devtools_timeout)
    }

    /// Crash dump discovery timeout as a [`Duration`]
    pub fn dump_timeout(&self) -> Duration {
        Duration::from_secs(self.dump_timeout)
    }

    /// Poll interval as a [`Duration`]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

// ============================================================================
// Convenience Functions
// ============================================================================

/// Get the output base directory (convenience function)
pub fn output_base_dir() -> String {
    get().output.base_dir.clone()
}

/// Get the poll interval (convenience function)
pub fn poll_interval() -> Duration {
    get().timeouts.poll_interval()
}
