//! On-demand reads of the simulator's side-channel exports.
//!
//! The simulator never streams structured state; instead it writes JSON
//! artifacts into a `vm_state/` directory next to its binary whenever it
//! stops, and the debugger reads whichever artifact it needs at that
//! moment. [`SnapshotReader`] wraps that directory: every accessor is a
//! fresh, uncached read, so the caller always sees the simulator's latest
//! self-reported state.
//!
//! A missing or malformed artifact surfaces as
//! [`SnapshotError::Unavailable`]. Callers decide severity: a stop-event
//! refresh can keep its previous values, while the errors artifact after a
//! parse failure has no acceptable default.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

/// Directory the simulator exports into, below its working directory.
pub const EXPORT_DIR: &str = "vm_state";

const STATE_FILE: &str = "vm_state_dump.json";
const REGISTERS_FILE: &str = "registers_dump.json";
const ERRORS_FILE: &str = "errors_dump.json";
const MEMORY_FILE: &str = "memory_dump.json";
const DISASSEMBLY_FILE: &str = "disassembly_dump.txt";

/// Why a snapshot artifact could not be produced.
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// The backing artifact is missing or malformed.
    #[error("snapshot artifact {artifact:?} is unavailable: {message}")]
    Unavailable { artifact: String, message: String },
}

impl SnapshotError {
    fn unavailable(artifact: &str, message: impl ToString) -> Self {
        Self::Unavailable {
            artifact: artifact.to_string(),
            message: message.to_string(),
        }
    }
}

/// Point-in-time execution state, as last exported by the simulator.
///
/// Every field defaults when absent: the simulator omits fields it has no
/// value for (e.g. `current_line` before anything ran).
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct StateSnapshot {
    #[serde(default)]
    pub program_counter: Option<String>,
    /// 1-based source line, 0 = unknown/past the end.
    #[serde(default)]
    pub current_line: u32,
    #[serde(default)]
    pub current_instruction: Option<String>,
    #[serde(default)]
    pub instructions_retired: u64,
    #[serde(default)]
    pub output_status: Option<String>,
    /// Authoritative breakpoint list as last reported by the simulator.
    #[serde(default)]
    pub breakpoints: Vec<u32>,
}

/// Register file contents; keys are register names, values hex strings.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct RegisterSnapshot {
    #[serde(default)]
    pub gp_registers: BTreeMap<String, String>,
    #[serde(default)]
    pub fp_registers: BTreeMap<String, String>,
    #[serde(default, rename = "control and status registers")]
    pub csr_registers: BTreeMap<String, String>,
}

/// One program error reported by the simulator's parser.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ProgramError {
    /// 1-based source line.
    pub line: u32,
    pub message: String,
}

/// Contents of the errors artifact written after a rejected program.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct ErrorReport {
    #[serde(default, rename = "errorCode")]
    pub error_code: Option<i32>,
    #[serde(default)]
    pub errors: Vec<ProgramError>,
}

/// Dumped memory: hex address string to hex-encoded value string.
pub type MemoryDump = BTreeMap<String, String>;

/// Reader over the simulator's export directory.
///
/// ```ignore
/// let reader = SnapshotReader::for_binary("/opt/vm/simulator");
/// let state = reader.state()?;
/// println!("stopped at line {}", state.current_line);
/// ```
#[derive(Debug, Clone)]
pub struct SnapshotReader {
    dir: PathBuf,
}

impl SnapshotReader {
    /// Read from an explicit export directory.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Read from the `vm_state/` directory next to the simulator binary,
    /// which is where the simulator puts its exports.
    pub fn for_binary(binary: impl AsRef<Path>) -> Self {
        let dir = binary
            .as_ref()
            .parent()
            .map(|parent| parent.join(EXPORT_DIR))
            .unwrap_or_else(|| PathBuf::from(EXPORT_DIR));
        Self { dir }
    }

    /// The directory artifacts are read from.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Latest execution state.
    pub fn state(&self) -> Result<StateSnapshot, SnapshotError> {
        self.read_json(STATE_FILE)
    }

    /// Latest register file contents.
    pub fn registers(&self) -> Result<RegisterSnapshot, SnapshotError> {
        self.read_json(REGISTERS_FILE)
    }

    /// Errors from the most recent program load.
    pub fn errors(&self) -> Result<ErrorReport, SnapshotError> {
        self.read_json(ERRORS_FILE)
    }

    /// Most recently dumped memory segments.
    pub fn memory(&self) -> Result<MemoryDump, SnapshotError> {
        self.read_json(MEMORY_FILE)
    }

    /// Disassembly listing of the loaded program, when the simulator
    /// exports one.
    pub fn disassembly(&self) -> Result<String, SnapshotError> {
        self.read_text(DISASSEMBLY_FILE)
    }

    fn read_text(&self, artifact: &str) -> Result<String, SnapshotError> {
        let path = self.dir.join(artifact);
        fs::read_to_string(&path).map_err(|err| {
            tracing::debug!(path = %path.display(), %err, "snapshot read failed");
            SnapshotError::unavailable(artifact, err)
        })
    }

    fn read_json<T>(&self, artifact: &str) -> Result<T, SnapshotError>
    where
        T: serde::de::DeserializeOwned,
    {
        let content = self.read_text(artifact)?;
        serde_json::from_str(&content).map_err(|err| {
            tracing::warn!(artifact, %err, "snapshot artifact is malformed");
            SnapshotError::unavailable(artifact, err)
        })
    }
}
