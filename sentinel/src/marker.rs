//! Marker vocabulary emitted on the simulator's output stream.

/// Opening token of a program-output block.
pub const STDOUT_START: &str = "VM_STDOUT_START";
/// Closing token of a program-output block.
pub const STDOUT_END: &str = "VM_STDOUT_END";
/// Emitted when the simulated program blocks on a read from its stdin.
pub const STDIN_START: &str = "VM_STDIN_START";
/// Emitted once the pending read has been satisfied.
pub const STDIN_END: &str = "VM_STDIN_END";

/// A lifecycle event recognized on the simulator's output stream.
///
/// Markers carry no request correlation: which command a marker answers is
/// established purely by the single-in-flight command discipline upheld by
/// the session layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Marker {
    /// The simulator process is up and accepting commands.
    Started,
    /// A program was loaded and can be executed.
    ProgramLoaded,
    /// The program was rejected; details are in the errors artifact.
    ParseError,
    /// An instruction was executed and the simulator stopped again.
    StepCompleted,
    /// The final instruction was executed; there is no current line.
    LastInstructionStepped,
    /// Execution reached a breakpoint.
    BreakpointHit,
    /// The program ran to completion.
    ProgramEnd,
    /// A block of the simulated program's own output.
    Stdout(String),
    /// The simulated program is blocked reading from its stdin.
    StdinRequested,
    /// The simulated program's pending read was satisfied.
    StdinEnded,
    /// A requested memory dump was written to the side channel.
    MemoryDumped,
    /// A requested memory dump failed.
    MemoryDumpError,
    /// Outcome of a `modify_register` command.
    RegisterWrite { success: bool },
}

/// Tokens that stand for a complete event on their own.
///
/// `VM_STDIN_START`/`VM_STDIN_END` are listed here rather than scanned as a
/// pair: the end token is only emitted after input has been provided, so
/// waiting for a completed pair would deadlock the session against the user.
pub(crate) const SINGLETONS: [(&str, Marker); 13] = [
    ("VM_STARTED", Marker::Started),
    ("VM_PROGRAM_LOADED", Marker::ProgramLoaded),
    ("VM_PARSE_ERROR", Marker::ParseError),
    ("VM_STEP_COMPLETED", Marker::StepCompleted),
    ("VM_LAST_INSTRUCTION_STEPPED", Marker::LastInstructionStepped),
    ("VM_BREAKPOINT_HIT", Marker::BreakpointHit),
    ("VM_PROGRAM_END", Marker::ProgramEnd),
    ("VM_MEMORY_DUMPED", Marker::MemoryDumped),
    ("VM_MEMORY_DUMP_ERROR", Marker::MemoryDumpError),
    ("VM_MODIFY_REGISTER_SUCCESS", Marker::RegisterWrite { success: true }),
    ("VM_MODIFY_REGISTER_FAILURE", Marker::RegisterWrite { success: false }),
    (STDIN_START, Marker::StdinRequested),
    (STDIN_END, Marker::StdinEnded),
];
