//! Error types for process supervision.

use std::io;
use std::time::Duration;

use thiserror::Error;

/// Errors from spawning and talking to the simulator process.
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// A command was issued while the simulator is not running.
    #[error("simulator process is not running")]
    ProcessNotRunning,

    /// The child process could not be spawned.
    #[error("failed to spawn {binary}: {source}")]
    Spawn {
        binary: String,
        #[source]
        source: io::Error,
    },

    /// The spawned child is missing one of its piped streams.
    #[error("child process has no {stream} handle")]
    Stdio { stream: &'static str },

    /// The process came up but never announced readiness.
    #[error("simulator did not report startup within {waited:?}")]
    StartupTimeout { waited: Duration },

    /// The process exited before announcing readiness.
    #[error("simulator exited during startup")]
    EarlyExit,

    /// Writing a command to the child's stdin failed.
    #[error("failed to write command: {0}")]
    Write(#[from] sentinel::ScanError),

    /// A memory-point watch was requested while one is outstanding.
    #[error("a memory-point request is already in flight")]
    EchoInFlight,
}
