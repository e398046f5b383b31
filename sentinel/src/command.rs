//! Typed command vocabulary for the simulator's input stream.

use std::fmt;
use std::path::PathBuf;

/// One segment of a memory dump request.
///
/// The start address is kept as the hex text the user supplied; the
/// simulator parses it on its side, and round-tripping through an integer
/// would silently normalize width and casing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemorySegment {
    pub start: String,
    pub byte_len: u64,
}

/// A command accepted by the simulator, newline-terminated on the wire.
///
/// [`Command::to_string`] renders the exact wire text (without the trailing
/// newline, which the codec appends).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `load <path>` — parse and load a program.
    Load { program: PathBuf },
    /// `run` — execute to completion without debugging.
    Run,
    /// `run_debug` — execute until a breakpoint or the end of the program.
    RunDebug,
    /// `step` — execute a single instruction.
    Step,
    /// `undo` — step backwards one instruction.
    Undo,
    /// `redo` — re-execute an undone instruction.
    Redo,
    /// `add_breakpoint <line>`
    AddBreakpoint { line: u32 },
    /// `remove_breakpoint <line>`
    RemoveBreakpoint { line: u32 },
    /// `dump_mem <start> <byteLen> ...` — one request covering every segment.
    DumpMemory { segments: Vec<MemorySegment> },
    /// `exit` — ask the simulator to shut down.
    Exit,
    /// `get_mem_point <addr>` — echo one memory word on stderr.
    MemoryPoint { address: String },
    /// `modify_register <name> <value>`
    ModifyRegister { name: String, value: String },
    /// `modify_config <section> <key> <value>`
    ModifyConfig {
        section: String,
        key: String,
        value: String,
    },
    /// `vm_stdin <line>` — a line of input for the simulated program.
    Stdin { line: String },
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Load { program } => write!(f, "load {}", program.display()),
            Command::Run => f.write_str("run"),
            Command::RunDebug => f.write_str("run_debug"),
            Command::Step => f.write_str("step"),
            Command::Undo => f.write_str("undo"),
            Command::Redo => f.write_str("redo"),
            Command::AddBreakpoint { line } => write!(f, "add_breakpoint {line}"),
            Command::RemoveBreakpoint { line } => write!(f, "remove_breakpoint {line}"),
            Command::DumpMemory { segments } => {
                f.write_str("dump_mem")?;
                for segment in segments {
                    write!(f, " {} {}", segment.start, segment.byte_len)?;
                }
                Ok(())
            }
            Command::Exit => f.write_str("exit"),
            Command::MemoryPoint { address } => write!(f, "get_mem_point {address}"),
            Command::ModifyRegister { name, value } => {
                write!(f, "modify_register {name} {value}")
            }
            Command::ModifyConfig {
                section,
                key,
                value,
            } => write!(f, "modify_config {section} {key} {value}"),
            Command::Stdin { line } => write!(f, "vm_stdin {line}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_text() {
        let cases = [
            (
                Command::Load {
                    program: PathBuf::from("/tmp/prog.s"),
                },
                "load /tmp/prog.s",
            ),
            (Command::Run, "run"),
            (Command::RunDebug, "run_debug"),
            (Command::Step, "step"),
            (Command::Undo, "undo"),
            (Command::Redo, "redo"),
            (Command::AddBreakpoint { line: 12 }, "add_breakpoint 12"),
            (
                Command::RemoveBreakpoint { line: 3 },
                "remove_breakpoint 3",
            ),
            (Command::Exit, "exit"),
            (
                Command::MemoryPoint {
                    address: "0x10FF".to_string(),
                },
                "get_mem_point 0x10FF",
            ),
            (
                Command::ModifyRegister {
                    name: "x5".to_string(),
                    value: "0x0000000000000005".to_string(),
                },
                "modify_register x5 0x0000000000000005",
            ),
            (
                Command::ModifyConfig {
                    section: "Execution".to_string(),
                    key: "run_step_delay".to_string(),
                    value: "100".to_string(),
                },
                "modify_config Execution run_step_delay 100",
            ),
            (
                Command::Stdin {
                    line: "some user input".to_string(),
                },
                "vm_stdin some user input",
            ),
        ];

        for (command, expected) in cases {
            assert_eq!(command.to_string(), expected);
        }
    }

    #[test]
    fn dump_memory_renders_all_segments() {
        let command = Command::DumpMemory {
            segments: vec![
                MemorySegment {
                    start: "0x1000".to_string(),
                    byte_len: 2,
                },
                MemorySegment {
                    start: "0x2000".to_string(),
                    byte_len: 4,
                },
            ],
        };
        assert_eq!(command.to_string(), "dump_mem 0x1000 2 0x2000 4");
    }
}
