//! The session-level error taxonomy.

use std::time::Duration;

use snapshot::SnapshotError;
use supervisor::SupervisorError;
use thiserror::Error;

/// Why a session operation failed.
///
/// Malformed user input (`MalformedRange`, `RegisterWriteRejected`,
/// `UnknownExpression`) is returned synchronously and leaves the session
/// usable. Simulator-side failures (`ParseFailure`,
/// `UnrecoverableProcessExit`, `Timeout`) terminate the session; recovery
/// is an explicit relaunch or restart.
#[derive(Debug, Error)]
pub enum DebugError {
    /// The process layer refused or lost the command; includes
    /// `ProcessNotRunning`.
    #[error(transparent)]
    Supervisor(#[from] SupervisorError),

    /// A memory range specification did not parse.
    #[error("malformed memory range: {0}")]
    MalformedRange(String),

    /// The simulator rejected the program; diagnostics were published.
    #[error("the simulator rejected the program")]
    ParseFailure,

    /// A register write was refused, locally or by the simulator.
    #[error("register write rejected: {0}")]
    RegisterWriteRejected(String),

    /// The expression matches none of the recognized syntaxes.
    #[error("unknown expression: {0:?}")]
    UnknownExpression(String),

    /// The simulator reported a failed memory dump.
    #[error("memory dump failed")]
    DumpFailed,

    /// A required side-channel artifact was missing or malformed.
    #[error(transparent)]
    SnapshotUnavailable(#[from] SnapshotError),

    /// The simulator process died while a command was outstanding.
    #[error("simulator process exited unexpectedly")]
    UnrecoverableProcessExit,

    /// A sentinel-bounded wait ran out; the process was killed because an
    /// un-ID'd stream cannot be resynchronized after a missed deadline.
    #[error("no answer from the simulator within {waited:?}")]
    Timeout { waited: Duration },

    /// The console was torn down while the program waited for input.
    #[error("console closed while waiting for input")]
    ConsoleClosed,

    /// The operation needs a launched program.
    #[error("no program has been launched")]
    NothingLaunched,
}
