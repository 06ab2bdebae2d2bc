//! Platform capability abstraction.
//!
//! The supervisor never talks to OS-specific shutdown or affinity APIs
//! directly; it asks a [`Platform`] object for capabilities and delegates.
//! This keeps the process state machine portable and lets tests substitute
//! a scripted platform.

/// Capability queries the supervisor makes against the host platform.
///
/// Implementations provide OS-specific behavior:
/// - `HostPlatform` for the machine the harness runs on
/// - test doubles that script capability answers
pub trait Platform {
    /// Short OS identifier: "linux", "mac", "win", ...
    fn os_name(&self) -> &str;

    /// CPU architecture identifier, e.g. "x86_64" or "aarch64"
    fn arch_name(&self) -> &str;

    /// Whether the platform can ask a process to exit without an OS signal
    fn is_cooperative_shutdown_supported(&self) -> bool {
        false
    }

    /// Ask the process to shut down cooperatively. Returns true if the
    /// request was delivered (not whether the process actually exited).
    fn cooperatively_shutdown(&self, _pid: u32, _process_name: &str) -> bool {
        false
    }
}

/// The platform the harness itself is running on.
///
/// Cooperative shutdown is reported as unsupported everywhere: the one
/// production implementation (window-message delivery on Windows) lives in
/// the external platform collaborator, not in this crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostPlatform;

impl Platform for HostPlatform {
    fn os_name(&self) -> &str {
        match std::env::consts::OS {
            "macos" => "mac",
            "windows" => "win",
            other => other,
        }
    }

    fn arch_name(&self) -> &str {
        std::env::consts::ARCH
    }
}
