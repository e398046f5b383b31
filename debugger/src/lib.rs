//! Session state machine for the simulator debug bridge.
//!
//! [`Session`] is the orchestrator: it issues typed commands over a
//! [`supervisor::VmLink`], consumes the marker stream, reads side-channel
//! snapshots for context, drives the shared console during a run, and
//! exposes the stop/step/breakpoint/evaluate contract to whichever
//! front-end embeds it.
//!
//! Operations take `&mut self`, which makes the single-outstanding-command
//! discipline structural: a second command cannot be issued while one is
//! awaiting its terminating sentinel. Progress the client did not ask for
//! (stops, program output, termination) arrives on the [`SessionEvent`]
//! channel handed out at construction.

mod collaborators;
mod error;
mod parse;
mod session;
mod state;
pub mod testing;

pub use collaborators::{Diagnostic, DiagnosticsSink, MemoryPresenter, Severity, StatusDisplay};
pub use error::DebugError;
pub use parse::parse_ranges;
pub use session::{BreakpointOutcome, Session, SessionConfig};
pub use state::{
    Scope, SessionEvent, SessionState, StackFrame, StopReason, Thread, Variable,
    VariablesReference,
};
