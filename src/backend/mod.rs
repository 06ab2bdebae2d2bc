//! Browser process supervision and crash recovery.

pub mod crash;
pub mod platform;
pub mod supervisor;

pub use crash::{
    CloudStorage, CrashReportCollector, DirScanMinidumpFinder, MinidumpFinder,
    MinidumpSymbolizer, StackTrace, UploadError,
};
pub use platform::{HostPlatform, Platform};
pub use supervisor::{
    DEVTOOLS_ACTIVE_PORT_FILE, DevToolsEndpoint, LoggingVerbosity, ProcessSupervisor,
    SupervisorError, SupervisorOptions, SupervisorResult,
};
