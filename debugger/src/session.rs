//! The session orchestrator.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use console::ConsoleHandle;
use sentinel::{Command, Marker};
use snapshot::{MemoryDump, SnapshotReader, StateSnapshot};
use supervisor::{VmLink, VmMessage};
use tokio::sync::mpsc;

use crate::collaborators::{
    Diagnostic, DiagnosticsSink, MemoryPresenter, NoopCollaborator, Severity, StatusDisplay,
};
use crate::error::DebugError;
use crate::parse::{self, Expression};
use crate::state::{
    Scope, SessionEvent, SessionState, StackFrame, StopReason, THREAD_ID, Thread, Variable,
    VariablesReference,
};

/// Timeout policy for sentinel-bounded waits.
///
/// `run_timeout` defaults to unbounded: between run-loop events the
/// simulated program owns the clock, and a correct long computation emits
/// nothing. The knob exists for deployments that cannot trust their input.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub command_timeout: Duration,
    pub run_timeout: Option<Duration>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            command_timeout: Duration::from_secs(10),
            run_timeout: None,
        }
    }
}

/// Per-line result of a breakpoint batch.
///
/// `verified` is optimistic at request time; the simulator's next snapshot
/// is the authority and overwrites the confirmed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakpointOutcome {
    pub line: u32,
    pub verified: bool,
}

/// A debug session against one simulator process.
///
/// Generic over [`VmLink`] so tests drive it with a scripted in-memory VM.
/// All operations take `&mut self`; the borrow checker is the command
/// queue, with its length fixed at one.
pub struct Session<L: VmLink> {
    link: L,
    snapshots: SnapshotReader,
    console: ConsoleHandle,
    config: SessionConfig,
    events: mpsc::UnboundedSender<SessionEvent>,

    diagnostics: Box<dyn DiagnosticsSink>,
    pc_display: Box<dyn StatusDisplay>,
    retired_display: Box<dyn StatusDisplay>,
    memory_presenter: Box<dyn MemoryPresenter>,

    state: SessionState,
    source: Option<PathBuf>,
    current_line: u32,
    /// Lines last reported (or optimistically accepted) as set.
    confirmed: BTreeSet<u32>,
    /// Most recent state artifact, kept for views when a re-read fails.
    last_snapshot: StateSnapshot,
}

impl<L: VmLink> Session<L> {
    pub fn new(
        link: L,
        snapshots: SnapshotReader,
        console: ConsoleHandle,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        Self::with_config(link, snapshots, console, SessionConfig::default())
    }

    pub fn with_config(
        link: L,
        snapshots: SnapshotReader,
        console: ConsoleHandle,
        config: SessionConfig,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let session = Self {
            link,
            snapshots,
            console,
            config,
            events,
            diagnostics: Box::new(NoopCollaborator),
            pc_display: Box::new(NoopCollaborator),
            retired_display: Box::new(NoopCollaborator),
            memory_presenter: Box::new(NoopCollaborator),
            state: SessionState::Idle,
            source: None,
            current_line: 0,
            confirmed: BTreeSet::new(),
            last_snapshot: StateSnapshot::default(),
        };
        (session, events_rx)
    }

    pub fn set_diagnostics_sink(&mut self, sink: Box<dyn DiagnosticsSink>) {
        self.diagnostics = sink;
    }

    /// Install the program-counter and instructions-retired labels.
    pub fn set_status_displays(
        &mut self,
        pc: Box<dyn StatusDisplay>,
        retired: Box<dyn StatusDisplay>,
    ) {
        self.pc_display = pc;
        self.retired_display = retired;
    }

    pub fn set_memory_presenter(&mut self, presenter: Box<dyn MemoryPresenter>) {
        self.memory_presenter = presenter;
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// 1-based current source line; 0 when unknown or past the end.
    pub fn current_line(&self) -> u32 {
        self.current_line
    }

    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    pub fn breakpoints(&self) -> &BTreeSet<u32> {
        &self.confirmed
    }

    /// The underlying link, for inspection.
    pub fn link(&self) -> &L {
        &self.link
    }

    /// Load a program and stop at its entry.
    pub async fn launch(
        &mut self,
        program: impl Into<PathBuf>,
        stop_on_entry: bool,
    ) -> Result<(), DebugError> {
        let program = program.into();
        self.source = Some(program.clone());
        let reason = if stop_on_entry {
            StopReason::Entry
        } else {
            StopReason::Breakpoint
        };
        self.launch_inner(program, reason).await
    }

    async fn launch_inner(
        &mut self,
        program: PathBuf,
        reason: StopReason,
    ) -> Result<(), DebugError> {
        self.state = SessionState::Launching;
        self.link.start().await?;
        self.link
            .send(Command::Load {
                program: program.clone(),
            })
            .await?;

        let marker = self
            .await_terminal(Some(self.config.command_timeout), |marker| {
                matches!(marker, Marker::ProgramLoaded | Marker::ParseError)
            })
            .await?;

        match marker {
            Marker::ProgramLoaded => {
                self.diagnostics.set(&program, Vec::new());
                // Line and labels from the load-time snapshot; its
                // breakpoint list predates the re-issue below and is not
                // consulted.
                self.refresh_stop_state(false, false);
                let carried: Vec<u32> = self.confirmed.iter().copied().collect();
                for line in carried {
                    if let Err(err) = self.link.send(Command::AddBreakpoint { line }).await {
                        tracing::warn!(line, %err, "failed to re-issue breakpoint");
                        self.confirmed.remove(&line);
                    }
                }
                self.state = SessionState::Stopped;
                tracing::info!(program = %program.display(), line = self.current_line, "program loaded");
                let _ = self.events.send(SessionEvent::Stopped {
                    reason,
                    line: self.current_line,
                });
                Ok(())
            }
            Marker::ParseError => {
                // No acceptable default here: the whole point of the stop
                // is the error list.
                let report = self.snapshots.errors()?;
                let diagnostics = report
                    .errors
                    .iter()
                    .map(|error| Diagnostic {
                        line: error.line.saturating_sub(1),
                        message: error.message.clone(),
                        severity: Severity::Error,
                    })
                    .collect();
                tracing::warn!(
                    errors = report.errors.len(),
                    "simulator rejected the program"
                );
                self.diagnostics.set(&program, diagnostics);
                self.link.stop().await;
                self.mark_terminated();
                Err(DebugError::ParseFailure)
            }
            _ => unreachable!("await_terminal returned a non-terminal marker"),
        }
    }

    /// Replace the breakpoint set for `file`.
    ///
    /// Results are optimistic: a line is verified when its add command was
    /// accepted for delivery (or queued for launch), and the confirmed set
    /// is overwritten by the authoritative list in the next snapshot.
    pub async fn set_breakpoints(
        &mut self,
        file: &Path,
        lines: &[u32],
    ) -> Result<Vec<BreakpointOutcome>, DebugError> {
        if self.source.as_deref() != Some(file) {
            tracing::debug!(file = %file.display(), "breakpoints for an inactive file");
            return Ok(lines
                .iter()
                .map(|&line| BreakpointOutcome {
                    line,
                    verified: false,
                })
                .collect());
        }

        if self.link.is_running() {
            for line in self.confirmed.clone() {
                if let Err(err) = self.link.send(Command::RemoveBreakpoint { line }).await {
                    tracing::warn!(line, %err, "failed to remove breakpoint");
                }
            }
        }

        let mut outcomes = Vec::with_capacity(lines.len());
        let mut candidates = BTreeSet::new();
        for &line in lines {
            // Each add stands alone: one failure must not abort the batch.
            let verified = if self.link.is_running() {
                match self.link.send(Command::AddBreakpoint { line }).await {
                    Ok(()) => true,
                    Err(err) => {
                        tracing::warn!(line, %err, "failed to add breakpoint");
                        false
                    }
                }
            } else {
                // Not running yet: recorded now, issued at launch.
                true
            };
            if verified {
                candidates.insert(line);
            }
            outcomes.push(BreakpointOutcome { line, verified });
        }
        self.confirmed = candidates;
        Ok(outcomes)
    }

    /// Run until a breakpoint, the last instruction, or program end.
    pub async fn resume(&mut self) -> Result<(), DebugError> {
        self.run(Command::RunDebug).await
    }

    /// Execute one instruction. The simulator has a single frame, so step
    /// over, step in, and step out are the same movement.
    pub async fn step_over(&mut self) -> Result<(), DebugError> {
        self.run(Command::Step).await
    }

    pub async fn step_in(&mut self) -> Result<(), DebugError> {
        self.run(Command::Step).await
    }

    pub async fn step_out(&mut self) -> Result<(), DebugError> {
        self.run(Command::Step).await
    }

    /// Undo one instruction. No sentinel answers `undo`; completion is
    /// immediate and the snapshot is the result.
    pub async fn step_back(&mut self) -> Result<(), DebugError> {
        self.link.send(Command::Undo).await?;
        self.stopped(StopReason::Step, false);
        Ok(())
    }

    /// Re-execute an undone instruction; the mirror of [`Self::step_back`].
    pub async fn step_forward(&mut self) -> Result<(), DebugError> {
        self.link.send(Command::Redo).await?;
        self.stopped(StopReason::Step, false);
        Ok(())
    }

    async fn run(&mut self, command: Command) -> Result<(), DebugError> {
        self.link.send(command).await?;
        self.state = SessionState::Running;

        let marker = self
            .await_terminal(self.config.run_timeout, |marker| {
                matches!(
                    marker,
                    Marker::StepCompleted
                        | Marker::LastInstructionStepped
                        | Marker::BreakpointHit
                        | Marker::ProgramEnd
                )
            })
            .await?;

        match marker {
            Marker::StepCompleted => self.stopped(StopReason::Step, false),
            Marker::LastInstructionStepped => self.stopped(StopReason::Step, true),
            Marker::BreakpointHit => self.stopped(StopReason::Breakpoint, false),
            Marker::ProgramEnd => {
                tracing::info!("program ran to completion");
                let _ = self.link.send(Command::Exit).await;
                self.link.stop().await;
                self.mark_terminated();
            }
            _ => unreachable!("await_terminal returned a non-terminal marker"),
        }
        Ok(())
    }

    /// Relaunch the current program, keeping its confirmed breakpoints.
    pub async fn restart(&mut self) -> Result<(), DebugError> {
        let program = self.source.clone().ok_or(DebugError::NothingLaunched)?;
        if self.link.is_running() {
            let _ = self.link.send(Command::Exit).await;
            self.link.stop().await;
        }
        self.launch_inner(program, StopReason::Restart).await
    }

    pub async fn terminate(&mut self) -> Result<(), DebugError> {
        if self.link.is_running() {
            let _ = self.link.send(Command::Exit).await;
        }
        self.link.stop().await;
        self.mark_terminated();
        Ok(())
    }

    pub async fn disconnect(&mut self) -> Result<(), DebugError> {
        self.terminate().await
    }

    /// Evaluate a watch expression against the latest simulator state.
    pub async fn evaluate(&mut self, expression: &str) -> Result<String, DebugError> {
        match parse::parse_expression(expression)? {
            Expression::GpRegister(index) => self.read_register(|registers| {
                registers.gp_registers.get(&format!("x{index}")).cloned()
            }),
            Expression::FpRegister(index) => self.read_register(|registers| {
                registers.fp_registers.get(&format!("f{index}")).cloned()
            }),
            Expression::Csr(name) => {
                self.read_register(|registers| registers.csr_registers.get(&name).cloned())
            }
            Expression::OutputStatus => {
                let state = self.snapshots.state()?;
                Ok(state
                    .output_status
                    .unwrap_or_else(|| "undefined".to_string()))
            }
            Expression::Memory(address) => self.read_memory_point(address).await,
        }
    }

    fn read_register(
        &self,
        pick: impl FnOnce(&snapshot::RegisterSnapshot) -> Option<String>,
    ) -> Result<String, DebugError> {
        let registers = self.snapshots.registers()?;
        // Absent keys display as undefined rather than failing the watch.
        Ok(pick(&registers).unwrap_or_else(|| "undefined".to_string()))
    }

    /// Round-trip one memory word through the stderr echo channel.
    async fn read_memory_point(&mut self, address: String) -> Result<String, DebugError> {
        let echo = self.link.watch_memory_point(&address)?;
        self.link
            .send(Command::MemoryPoint {
                address: address.clone(),
            })
            .await?;

        let waited = self.config.command_timeout;
        match tokio::time::timeout(waited, echo).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_)) => {
                self.mark_terminated();
                Err(DebugError::UnrecoverableProcessExit)
            }
            Err(_) => {
                tracing::error!(address, ?waited, "memory point echo never arrived");
                self.fail_session().await;
                Err(DebugError::Timeout { waited })
            }
        }
    }

    /// Write a register, returning the simulator's verdict.
    pub async fn modify_register(
        &mut self,
        name: &str,
        value: &str,
    ) -> Result<bool, DebugError> {
        if matches!(name, "x0" | "zero") {
            return Err(DebugError::RegisterWriteRejected(
                "the zero register is hard-wired".to_string(),
            ));
        }
        let value = parse::pad_register_value(value);
        self.link
            .send(Command::ModifyRegister {
                name: name.to_string(),
                value,
            })
            .await?;

        let marker = self
            .await_terminal(Some(self.config.command_timeout), |marker| {
                matches!(marker, Marker::RegisterWrite { .. })
            })
            .await?;
        match marker {
            Marker::RegisterWrite { success } => Ok(success),
            _ => unreachable!("await_terminal returned a non-terminal marker"),
        }
    }

    /// The client-facing variable write: register scopes only.
    pub async fn set_variable(
        &mut self,
        reference: i64,
        name: &str,
        value: &str,
    ) -> Result<String, DebugError> {
        let writable = VariablesReference::from_i64(reference)
            .is_some_and(VariablesReference::is_register_group);
        if !writable {
            return Err(DebugError::RegisterWriteRejected(
                "only registers can be modified".to_string(),
            ));
        }

        let stored = parse::pad_register_value(value);
        if self.modify_register(name, value).await? {
            let _ = self.events.send(SessionEvent::Invalidated);
            Ok(stored)
        } else {
            Err(DebugError::RegisterWriteRejected(format!(
                "the simulator rejected the write to {name}"
            )))
        }
    }

    /// Dump the given ranges and hand the result to the presenter.
    pub async fn dump_memory(&mut self, range_spec: &str) -> Result<MemoryDump, DebugError> {
        let segments = parse::parse_ranges(range_spec)?;
        self.link.send(Command::DumpMemory { segments }).await?;

        let marker = self
            .await_terminal(Some(self.config.command_timeout), |marker| {
                matches!(marker, Marker::MemoryDumped | Marker::MemoryDumpError)
            })
            .await?;
        match marker {
            Marker::MemoryDumped => {
                let dump = self.snapshots.memory()?;
                self.memory_presenter.show(&dump);
                Ok(dump)
            }
            Marker::MemoryDumpError => Err(DebugError::DumpFailed),
            _ => unreachable!("await_terminal returned a non-terminal marker"),
        }
    }

    pub fn threads(&self) -> Vec<Thread> {
        vec![Thread {
            id: THREAD_ID,
            name: "main".to_string(),
        }]
    }

    pub fn stack_trace(&self) -> Vec<StackFrame> {
        vec![StackFrame {
            id: 1,
            name: "main".to_string(),
            source: self.source.clone(),
            line: self.current_line,
        }]
    }

    pub fn scopes(&self) -> Vec<Scope> {
        vec![
            Scope {
                name: "Registers".to_string(),
                variables_reference: VariablesReference::Registers.as_i64(),
            },
            Scope {
                name: "VM State".to_string(),
                variables_reference: VariablesReference::VmState.as_i64(),
            },
        ]
    }

    pub fn variables(&self, reference: i64) -> Result<Vec<Variable>, DebugError> {
        let Some(reference) = VariablesReference::from_i64(reference) else {
            return Ok(Vec::new());
        };
        match reference {
            VariablesReference::Registers => Ok(vec![
                group("General purpose", VariablesReference::GpRegisters),
                group("Floating point", VariablesReference::FpRegisters),
                group("Control and status", VariablesReference::CsrRegisters),
            ]),
            VariablesReference::GpRegisters => {
                Ok(register_variables(&self.snapshots.registers()?.gp_registers))
            }
            VariablesReference::FpRegisters => {
                Ok(register_variables(&self.snapshots.registers()?.fp_registers))
            }
            VariablesReference::CsrRegisters => Ok(register_variables(
                &self.snapshots.registers()?.csr_registers,
            )),
            VariablesReference::VmState => {
                let state = self
                    .snapshots
                    .state()
                    .unwrap_or_else(|_| self.last_snapshot.clone());
                Ok(vec![
                    plain("Current line", state.current_line.to_string()),
                    plain(
                        "Program counter",
                        state
                            .program_counter
                            .unwrap_or_else(|| "undefined".to_string()),
                    ),
                    plain(
                        "Instructions retired",
                        state.instructions_retired.to_string(),
                    ),
                    plain(
                        "Output status",
                        state
                            .output_status
                            .unwrap_or_else(|| "undefined".to_string()),
                    ),
                ])
            }
        }
    }

    /// Drive the message stream until `is_terminal` matches, forwarding
    /// program I/O through the console on the way.
    ///
    /// This is the one await pipeline every command goes through; a
    /// command with no sentinel simply never calls it. The bound is the
    /// allowed silence between consecutive messages, not a total budget:
    /// every message received re-arms it, so a stdin round-trip or a
    /// stream of program output never starves the wait for the sentinel.
    async fn await_terminal(
        &mut self,
        bound: Option<Duration>,
        is_terminal: fn(&Marker) -> bool,
    ) -> Result<Marker, DebugError> {
        loop {
            let message = match bound {
                Some(waited) => match tokio::time::timeout(waited, self.link.recv()).await {
                    Ok(message) => message,
                    Err(_) => {
                        tracing::error!(
                            ?waited,
                            "no terminating sentinel; the stream cannot be trusted any more"
                        );
                        self.fail_session().await;
                        return Err(DebugError::Timeout { waited });
                    }
                },
                None => self.link.recv().await,
            };

            let Some(message) = message else {
                self.mark_terminated();
                return Err(DebugError::UnrecoverableProcessExit);
            };

            match message {
                VmMessage::Exited(code) => {
                    tracing::error!(?code, "simulator exited with a command outstanding");
                    self.mark_terminated();
                    return Err(DebugError::UnrecoverableProcessExit);
                }
                VmMessage::Marker(marker) if is_terminal(&marker) => return Ok(marker),
                VmMessage::Marker(Marker::Stdout(text)) => {
                    self.console.print(&text);
                    let _ = self.events.send(SessionEvent::Output(text));
                }
                VmMessage::Marker(Marker::StdinRequested) => {
                    // User-paced; deliberately unbounded.
                    let line = self
                        .console
                        .read_line()
                        .await
                        .map_err(|_| DebugError::ConsoleClosed)?;
                    self.link.send(Command::Stdin { line }).await?;
                }
                VmMessage::Marker(Marker::StdinEnded) => {}
                VmMessage::Marker(other) => {
                    tracing::warn!(?other, "marker outside its protocol window");
                }
            }
        }
    }

    /// Refresh line, labels, and (optionally) the confirmed breakpoint set
    /// from the state artifact. Unavailable snapshots keep prior values.
    fn refresh_stop_state(&mut self, past_end: bool, reconcile_breakpoints: bool) {
        match self.snapshots.state() {
            Ok(state) => {
                self.current_line = state.current_line;
                if reconcile_breakpoints {
                    self.confirmed = state.breakpoints.iter().copied().collect();
                }
                self.pc_display.set_text(format!(
                    "PC: {}",
                    state.program_counter.as_deref().unwrap_or("0x0")
                ));
                self.retired_display
                    .set_text(format!("Instructions: {}", state.instructions_retired));
                self.last_snapshot = state;
            }
            Err(err) => {
                tracing::warn!(%err, "state snapshot unavailable; keeping previous values");
            }
        }
        if past_end {
            // There is no current line after the final instruction.
            self.current_line = 0;
        }
    }

    fn stopped(&mut self, reason: StopReason, past_end: bool) {
        self.refresh_stop_state(past_end, true);
        self.state = SessionState::Stopped;
        let _ = self.events.send(SessionEvent::Stopped {
            reason,
            line: self.current_line,
        });
    }

    fn mark_terminated(&mut self) {
        if self.state == SessionState::Terminated {
            return;
        }
        self.state = SessionState::Terminated;
        self.console.cancel_reads();
        let _ = self.events.send(SessionEvent::Terminated);
    }

    async fn fail_session(&mut self) {
        self.link.stop().await;
        self.mark_terminated();
    }
}

fn group(name: &str, reference: VariablesReference) -> Variable {
    Variable {
        name: name.to_string(),
        value: String::new(),
        variables_reference: reference.as_i64(),
    }
}

fn plain(name: &str, value: String) -> Variable {
    Variable {
        name: name.to_string(),
        value,
        variables_reference: 0,
    }
}

/// Register maps come back keyed by name; `x10` must sort after `x2`.
fn register_variables(map: &BTreeMap<String, String>) -> Vec<Variable> {
    let mut entries: Vec<(&String, &String)> = map.iter().collect();
    entries.sort_by_key(|(name, _)| numeric_rank(name));
    entries
        .into_iter()
        .map(|(name, value)| plain(name, value.clone()))
        .collect()
}

fn numeric_rank(name: &str) -> (u32, String) {
    let index = name
        .strip_prefix(['x', 'f'])
        .and_then(|digits| digits.parse().ok())
        .unwrap_or(u32::MAX);
    (index, name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registers_sort_numerically() {
        let mut map = BTreeMap::new();
        for name in ["x10", "x2", "x0", "x31"] {
            map.insert(name.to_string(), "0x0".to_string());
        }
        let names: Vec<String> = register_variables(&map)
            .into_iter()
            .map(|variable| variable.name)
            .collect();
        assert_eq!(names, ["x0", "x2", "x10", "x31"]);
    }

    #[test]
    fn named_registers_sort_after_numbered() {
        let mut map = BTreeMap::new();
        map.insert("mstatus".to_string(), "0x0".to_string());
        map.insert("mcause".to_string(), "0x0".to_string());
        let names: Vec<String> = register_variables(&map)
            .into_iter()
            .map(|variable| variable.name)
            .collect();
        assert_eq!(names, ["mcause", "mstatus"]);
    }
}
