//! Session lifecycle, events, and the client-visible introspection types.

use std::path::PathBuf;

/// Lifecycle of a debug session.
///
/// `Idle → Launching → Stopped ⇄ Running → Terminated`; a restart
/// re-enters `Launching` while keeping the file's confirmed breakpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Launching,
    Stopped,
    Running,
    Terminated,
}

/// Why execution stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Entry,
    Breakpoint,
    Step,
    Restart,
}

/// Progress the client did not explicitly request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Execution stopped; `line` is 1-based, 0 past the last instruction.
    Stopped { reason: StopReason, line: u32 },
    /// A block of the simulated program's output, as printed.
    Output(String),
    /// Cached variable views are stale after a register write.
    Invalidated,
    /// Session over; the process is gone.
    Terminated,
}

/// The one thread the simulator has.
pub const THREAD_ID: i64 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Thread {
    pub id: i64,
    pub name: String,
}

/// The single synthetic frame at the current line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackFrame {
    pub id: i64,
    pub name: String,
    pub source: Option<PathBuf>,
    pub line: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scope {
    pub name: String,
    pub variables_reference: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variable {
    pub name: String,
    pub value: String,
    /// Non-zero when the variable expands into children.
    pub variables_reference: i64,
}

/// The fixed handle table for variable groups.
///
/// The hierarchy never changes shape, so handles are compile-time
/// constants rather than an allocation scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariablesReference {
    /// The Registers scope, expanding into the three groups below.
    Registers,
    /// The VM State scope: line, program counter, retired count, status.
    VmState,
    GpRegisters,
    FpRegisters,
    CsrRegisters,
}

impl VariablesReference {
    pub fn as_i64(self) -> i64 {
        match self {
            VariablesReference::Registers => 1,
            VariablesReference::VmState => 2,
            VariablesReference::GpRegisters => 3,
            VariablesReference::FpRegisters => 4,
            VariablesReference::CsrRegisters => 5,
        }
    }

    pub fn from_i64(reference: i64) -> Option<Self> {
        match reference {
            1 => Some(VariablesReference::Registers),
            2 => Some(VariablesReference::VmState),
            3 => Some(VariablesReference::GpRegisters),
            4 => Some(VariablesReference::FpRegisters),
            5 => Some(VariablesReference::CsrRegisters),
            _ => None,
        }
    }

    /// Whether variables under this reference accept writes.
    pub fn is_register_group(self) -> bool {
        matches!(
            self,
            VariablesReference::GpRegisters
                | VariablesReference::FpRegisters
                | VariablesReference::CsrRegisters
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn references_round_trip() {
        for reference in [
            VariablesReference::Registers,
            VariablesReference::VmState,
            VariablesReference::GpRegisters,
            VariablesReference::FpRegisters,
            VariablesReference::CsrRegisters,
        ] {
            assert_eq!(
                VariablesReference::from_i64(reference.as_i64()),
                Some(reference)
            );
        }
        assert_eq!(VariablesReference::from_i64(0), None);
        assert_eq!(VariablesReference::from_i64(99), None);
    }

    #[test]
    fn only_register_groups_accept_writes() {
        assert!(VariablesReference::GpRegisters.is_register_group());
        assert!(VariablesReference::CsrRegisters.is_register_group());
        assert!(!VariablesReference::Registers.is_register_group());
        assert!(!VariablesReference::VmState.is_register_group());
    }
}
