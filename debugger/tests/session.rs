//! End-to-end session behavior over the scripted VM.

use std::io::IsTerminal;
use std::path::Path;
use std::time::Duration;

use console::ConsoleHandle;
use console::testing::RecordingSurface;
use debugger::testing::{
    RecordingDiagnostics, RecordingPresenter, RecordingStatus, ScriptedVm,
};
use debugger::{
    DebugError, Session, SessionConfig, SessionEvent, SessionState, StopReason,
    VariablesReference,
};
use supervisor::VmLink;
use sentinel::Marker;
use supervisor::VmMessage;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

const PROGRAM: &str = "prog.s";

struct Fixture {
    dir: tempfile::TempDir,
}

impl Fixture {
    fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
        }
    }

    fn write(&self, artifact: &str, content: &str) {
        std::fs::write(self.dir.path().join(artifact), content).unwrap();
    }

    fn state(&self, line: u32, breakpoints: &[u32]) {
        let breakpoints = breakpoints
            .iter()
            .map(u32::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        self.write(
            "vm_state_dump.json",
            &format!(
                r#"{{
                    "program_counter": "0x10074",
                    "current_line": {line},
                    "instructions_retired": 42,
                    "output_status": "ok",
                    "breakpoints": [{breakpoints}]
                }}"#
            ),
        );
    }

    fn reader(&self) -> snapshot::SnapshotReader {
        snapshot::SnapshotReader::new(self.dir.path())
    }
}

type Harness = (
    Session<ScriptedVm>,
    mpsc::UnboundedReceiver<SessionEvent>,
    RecordingSurface,
    ConsoleHandle,
);

fn build(vm: ScriptedVm, fixture: &Fixture) -> Harness {
    let surface = RecordingSurface::new();
    let console = ConsoleHandle::over(surface.clone());
    console.open();
    let (session, events) = Session::with_config(
        vm,
        fixture.reader(),
        console.clone(),
        SessionConfig {
            command_timeout: Duration::from_secs(5),
            run_timeout: Some(Duration::from_secs(5)),
        },
    );
    (session, events, surface, console)
}

fn loaded_vm() -> ScriptedVm {
    ScriptedVm::new().on_markers("load", [Marker::ProgramLoaded])
}

fn drain(events: &mut mpsc::UnboundedReceiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

#[tokio::test]
async fn launch_stops_at_entry() {
    let fixture = Fixture::new();
    fixture.state(1, &[]);
    let (mut session, mut events, _surface, _console) = build(loaded_vm(), &fixture);

    session.launch(PROGRAM, true).await.unwrap();

    assert_eq!(session.state(), SessionState::Stopped);
    assert_eq!(session.current_line(), 1);
    assert_eq!(
        drain(&mut events),
        vec![SessionEvent::Stopped {
            reason: StopReason::Entry,
            line: 1,
        }]
    );
    assert_eq!(session.link().sent_wire(), vec![format!("load {PROGRAM}")]);
}

#[tokio::test]
async fn launch_without_stop_on_entry_reports_breakpoint() {
    let fixture = Fixture::new();
    fixture.state(4, &[4]);
    let (mut session, mut events, _surface, _console) = build(loaded_vm(), &fixture);

    session.launch(PROGRAM, false).await.unwrap();

    assert_eq!(
        drain(&mut events),
        vec![SessionEvent::Stopped {
            reason: StopReason::Breakpoint,
            line: 4,
        }]
    );
}

#[tokio::test]
async fn launch_pushes_status_labels() {
    let fixture = Fixture::new();
    fixture.state(1, &[]);
    let (mut session, _events, _surface, _console) = build(loaded_vm(), &fixture);
    let pc = RecordingStatus::new();
    let retired = RecordingStatus::new();
    session.set_status_displays(Box::new(pc.clone()), Box::new(retired.clone()));

    session.launch(PROGRAM, true).await.unwrap();

    assert_eq!(pc.latest().as_deref(), Some("PC: 0x10074"));
    assert_eq!(retired.latest().as_deref(), Some("Instructions: 42"));
}

#[tokio::test]
async fn parse_error_publishes_diagnostics_and_terminates() {
    let fixture = Fixture::new();
    fixture.write(
        "errors_dump.json",
        r#"{
            "errorCode": 2,
            "errors": [
                {"line": 3, "message": "unknown mnemonic"},
                {"line": 9, "message": "bad operand"}
            ]
        }"#,
    );
    let vm = ScriptedVm::new().on_markers("load", [Marker::ParseError]);
    let (mut session, mut events, _surface, _console) = build(vm, &fixture);
    let diagnostics = RecordingDiagnostics::new();
    session.set_diagnostics_sink(Box::new(diagnostics.clone()));

    let err = session.launch(PROGRAM, true).await.unwrap_err();

    assert!(matches!(err, DebugError::ParseFailure));
    assert_eq!(session.state(), SessionState::Terminated);
    assert_eq!(drain(&mut events), vec![SessionEvent::Terminated]);

    let published = diagnostics.latest_for(Path::new(PROGRAM));
    assert_eq!(published.len(), 2);
    // 1-based artifact lines come out 0-based.
    assert_eq!(published[0].line, 2);
    assert_eq!(published[0].message, "unknown mnemonic");
    assert_eq!(published[1].line, 8);
}

#[tokio::test]
async fn resume_forwards_stdout_and_stops_at_breakpoint() {
    let fixture = Fixture::new();
    fixture.state(4, &[4]);
    let vm = loaded_vm().on_markers(
        "run_debug",
        [
            Marker::Stdout("hello world".to_string()),
            Marker::BreakpointHit,
        ],
    );
    let (mut session, mut events, surface, _console) = build(vm, &fixture);

    session.launch(PROGRAM, false).await.unwrap();
    drain(&mut events);
    session.resume().await.unwrap();

    assert_eq!(
        drain(&mut events),
        vec![
            SessionEvent::Output("hello world".to_string()),
            SessionEvent::Stopped {
                reason: StopReason::Breakpoint,
                line: 4,
            },
        ]
    );
    assert!(surface.visible().contains("hello world"));
    assert_eq!(session.state(), SessionState::Stopped);
    assert_eq!(
        session.breakpoints().iter().copied().collect::<Vec<_>>(),
        vec![4]
    );
}

#[tokio::test]
async fn resume_round_trips_program_stdin() {
    let fixture = Fixture::new();
    fixture.state(5, &[]);
    let vm = loaded_vm()
        .on_markers("run_debug", [Marker::StdinRequested])
        .on_markers("vm_stdin", [Marker::StdinEnded, Marker::StepCompleted]);
    let (mut session, _events, _surface, console) = build(vm, &fixture);

    session.launch(PROGRAM, true).await.unwrap();

    let typist = console.clone();
    tokio::spawn(async move {
        // Let the session register its read first.
        tokio::time::sleep(Duration::from_millis(20)).await;
        for ch in "42".chars() {
            typist.handle_key(console::Key::Char(ch));
        }
        typist.handle_key(console::Key::Enter);
    });

    session.resume().await.unwrap();

    let sent = session.link().sent_wire();
    assert!(sent.contains(&"vm_stdin 42".to_string()), "sent: {sent:?}");
    assert_eq!(session.state(), SessionState::Stopped);
}

#[tokio::test]
async fn resume_to_program_end_terminates() {
    let fixture = Fixture::new();
    fixture.state(1, &[]);
    let vm = loaded_vm().on_markers("run_debug", [Marker::ProgramEnd]);
    let (mut session, mut events, _surface, _console) = build(vm, &fixture);

    session.launch(PROGRAM, true).await.unwrap();
    drain(&mut events);
    session.resume().await.unwrap();

    assert_eq!(session.state(), SessionState::Terminated);
    assert!(!session.link().is_running());
    assert_eq!(drain(&mut events), vec![SessionEvent::Terminated]);
    assert!(session.link().sent_wire().contains(&"exit".to_string()));
}

#[tokio::test]
async fn last_instruction_forces_line_zero() {
    let fixture = Fixture::new();
    fixture.state(7, &[]);
    let vm = loaded_vm().on_markers("step", [Marker::LastInstructionStepped]);
    let (mut session, mut events, _surface, _console) = build(vm, &fixture);

    session.launch(PROGRAM, true).await.unwrap();
    drain(&mut events);
    session.step_over().await.unwrap();

    assert_eq!(session.current_line(), 0);
    assert_eq!(
        drain(&mut events),
        vec![SessionEvent::Stopped {
            reason: StopReason::Step,
            line: 0,
        }]
    );
}

#[tokio::test]
async fn breakpoints_for_inactive_file_are_unverified() {
    let fixture = Fixture::new();
    fixture.state(1, &[]);
    let (mut session, _events, _surface, _console) = build(loaded_vm(), &fixture);
    session.launch(PROGRAM, true).await.unwrap();

    let outcomes = session
        .set_breakpoints(Path::new("other.s"), &[4, 9])
        .await
        .unwrap();

    assert!(outcomes.iter().all(|outcome| !outcome.verified));
    assert!(session.breakpoints().is_empty());
    // Nothing was sent for the inactive file.
    assert_eq!(session.link().sent_wire().len(), 1);
}

#[tokio::test]
async fn set_breakpoints_replaces_previous_confirmed_lines() {
    let fixture = Fixture::new();
    fixture.state(1, &[]);
    let (mut session, _events, _surface, _console) = build(loaded_vm(), &fixture);
    session.launch(PROGRAM, true).await.unwrap();

    session
        .set_breakpoints(Path::new(PROGRAM), &[4, 9])
        .await
        .unwrap();
    session
        .set_breakpoints(Path::new(PROGRAM), &[9, 12])
        .await
        .unwrap();

    let sent = session.link().sent_wire();
    assert_eq!(
        sent,
        vec![
            format!("load {PROGRAM}"),
            "add_breakpoint 4".to_string(),
            "add_breakpoint 9".to_string(),
            "remove_breakpoint 4".to_string(),
            "remove_breakpoint 9".to_string(),
            "add_breakpoint 9".to_string(),
            "add_breakpoint 12".to_string(),
        ]
    );
    assert_eq!(
        session.breakpoints().iter().copied().collect::<Vec<_>>(),
        vec![9, 12]
    );
}

#[tokio::test]
async fn failed_add_affects_only_its_own_line() {
    let fixture = Fixture::new();
    fixture.state(1, &[]);
    let vm = loaded_vm().fail_on("add_breakpoint 9");
    let (mut session, _events, _surface, _console) = build(vm, &fixture);
    session.launch(PROGRAM, true).await.unwrap();

    let outcomes = session
        .set_breakpoints(Path::new(PROGRAM), &[4, 9, 12])
        .await
        .unwrap();

    let verified: Vec<bool> = outcomes.iter().map(|outcome| outcome.verified).collect();
    assert_eq!(verified, vec![true, false, true]);
    assert_eq!(
        session.breakpoints().iter().copied().collect::<Vec<_>>(),
        vec![4, 12]
    );
}

#[tokio::test]
async fn confirmed_set_reconciles_to_snapshot_on_stop() {
    let fixture = Fixture::new();
    fixture.state(1, &[]);
    let vm = loaded_vm().on_markers("step", [Marker::StepCompleted]);
    let (mut session, _events, _surface, _console) = build(vm, &fixture);
    session.launch(PROGRAM, true).await.unwrap();
    session
        .set_breakpoints(Path::new(PROGRAM), &[4, 9])
        .await
        .unwrap();

    // The simulator only accepted line 4.
    fixture.state(2, &[4]);
    session.step_over().await.unwrap();

    assert_eq!(
        session.breakpoints().iter().copied().collect::<Vec<_>>(),
        vec![4]
    );
}

#[tokio::test]
async fn restart_reissues_confirmed_breakpoints() {
    let fixture = Fixture::new();
    fixture.state(1, &[]);
    let vm = loaded_vm().on_markers("load", [Marker::ProgramLoaded]);
    let (mut session, mut events, _surface, _console) = build(vm, &fixture);
    session.launch(PROGRAM, true).await.unwrap();
    session
        .set_breakpoints(Path::new(PROGRAM), &[4, 9])
        .await
        .unwrap();
    drain(&mut events);

    session.restart().await.unwrap();

    let sent = session.link().sent_wire();
    let second_load = sent
        .iter()
        .rposition(|wire| wire == &format!("load {PROGRAM}"))
        .unwrap();
    let reissued: Vec<&String> = sent[second_load + 1..]
        .iter()
        .filter(|wire| wire.starts_with("add_breakpoint"))
        .collect();
    assert_eq!(reissued, ["add_breakpoint 4", "add_breakpoint 9"]);
    assert!(sent.contains(&"exit".to_string()));
    assert_eq!(
        drain(&mut events),
        vec![SessionEvent::Stopped {
            reason: StopReason::Restart,
            line: 1,
        }]
    );
}

#[tokio::test]
async fn step_back_completes_without_a_sentinel() {
    let fixture = Fixture::new();
    fixture.state(3, &[]);
    let (mut session, mut events, _surface, _console) = build(loaded_vm(), &fixture);
    session.launch(PROGRAM, true).await.unwrap();
    drain(&mut events);

    session.step_back().await.unwrap();

    assert_eq!(session.link().sent_wire().last().unwrap(), "undo");
    assert_eq!(
        drain(&mut events),
        vec![SessionEvent::Stopped {
            reason: StopReason::Step,
            line: 3,
        }]
    );
}

#[tokio::test]
async fn zero_register_write_is_rejected_before_any_command() {
    let fixture = Fixture::new();
    let (mut session, _events, _surface, _console) = build(ScriptedVm::new(), &fixture);

    for name in ["x0", "zero"] {
        let err = session.modify_register(name, "0x5").await.unwrap_err();
        assert!(matches!(err, DebugError::RegisterWriteRejected(_)));
    }
    assert!(session.link().sent_wire().is_empty());
}

#[tokio::test]
async fn register_write_pads_value_and_returns_verdict() {
    let fixture = Fixture::new();
    fixture.state(1, &[]);
    let vm = loaded_vm().on_markers("modify_register", [Marker::RegisterWrite { success: true }]);
    let (mut session, _events, _surface, _console) = build(vm, &fixture);
    session.launch(PROGRAM, true).await.unwrap();

    let accepted = session.modify_register("x5", "0x5").await.unwrap();

    assert!(accepted);
    assert_eq!(
        session.link().sent_wire().last().unwrap(),
        "modify_register x5 0x0000000000000005"
    );
}

#[tokio::test]
async fn set_variable_maps_refusal_and_scope() {
    let fixture = Fixture::new();
    fixture.state(1, &[]);
    let vm = loaded_vm().on_markers(
        "modify_register",
        [Marker::RegisterWrite { success: false }],
    );
    let (mut session, mut events, _surface, _console) = build(vm, &fixture);
    session.launch(PROGRAM, true).await.unwrap();
    drain(&mut events);

    // Non-register scope: rejected locally.
    let err = session
        .set_variable(VariablesReference::VmState.as_i64(), "x5", "0x5")
        .await
        .unwrap_err();
    assert!(matches!(err, DebugError::RegisterWriteRejected(_)));

    // Simulator refusal: mapped to the same error.
    let err = session
        .set_variable(VariablesReference::GpRegisters.as_i64(), "x5", "0x5")
        .await
        .unwrap_err();
    assert!(matches!(err, DebugError::RegisterWriteRejected(_)));
    assert!(!drain(&mut events).contains(&SessionEvent::Invalidated));
}

#[tokio::test]
async fn successful_set_variable_invalidates_views() {
    let fixture = Fixture::new();
    fixture.state(1, &[]);
    let vm = loaded_vm().on_markers("modify_register", [Marker::RegisterWrite { success: true }]);
    let (mut session, mut events, _surface, _console) = build(vm, &fixture);
    session.launch(PROGRAM, true).await.unwrap();
    drain(&mut events);

    let stored = session
        .set_variable(VariablesReference::GpRegisters.as_i64(), "x5", "0x5")
        .await
        .unwrap();

    assert_eq!(stored, "0x0000000000000005");
    assert!(drain(&mut events).contains(&SessionEvent::Invalidated));
}

#[tokio::test]
async fn dump_memory_presents_the_snapshot() {
    let fixture = Fixture::new();
    fixture.state(1, &[]);
    fixture.write(
        "memory_dump.json",
        r#"{"0x1000": "0xdeadbeef", "0x1008": "0x0"}"#,
    );
    let vm = loaded_vm().on_markers("dump_mem", [Marker::MemoryDumped]);
    let (mut session, _events, _surface, _console) = build(vm, &fixture);
    let presenter = RecordingPresenter::new();
    session.set_memory_presenter(Box::new(presenter.clone()));
    session.launch(PROGRAM, true).await.unwrap();

    let dump = session.dump_memory("0x1000-0x100F").await.unwrap();

    assert_eq!(dump["0x1000"], "0xdeadbeef");
    assert_eq!(presenter.dumps().len(), 1);
    assert_eq!(
        session.link().sent_wire().last().unwrap(),
        "dump_mem 0x1000 2"
    );
}

#[tokio::test]
async fn dump_memory_error_fails_typed() {
    let fixture = Fixture::new();
    fixture.state(1, &[]);
    let vm = loaded_vm().on_markers("dump_mem", [Marker::MemoryDumpError]);
    let (mut session, _events, _surface, _console) = build(vm, &fixture);
    session.launch(PROGRAM, true).await.unwrap();

    let err = session.dump_memory("0x1000+8").await.unwrap_err();
    assert!(matches!(err, DebugError::DumpFailed));
}

#[tokio::test]
async fn malformed_range_never_reaches_the_simulator() {
    let fixture = Fixture::new();
    fixture.state(1, &[]);
    let (mut session, _events, _surface, _console) = build(loaded_vm(), &fixture);
    session.launch(PROGRAM, true).await.unwrap();
    let before = session.link().sent_wire().len();

    let err = session.dump_memory("0x100F-0x1000").await.unwrap_err();

    assert!(matches!(err, DebugError::MalformedRange(_)));
    assert_eq!(session.link().sent_wire().len(), before);
}

#[tokio::test]
async fn evaluate_reads_registers_and_status() {
    let fixture = Fixture::new();
    fixture.state(1, &[]);
    fixture.write(
        "registers_dump.json",
        r#"{
            "gp_registers": {"x5": "0x2a"},
            "fp_registers": {"f0": "0x3ff0000000000000"},
            "control and status registers": {"mstatus": "0x8"}
        }"#,
    );
    let (mut session, _events, _surface, _console) = build(loaded_vm(), &fixture);
    session.launch(PROGRAM, true).await.unwrap();

    assert_eq!(session.evaluate("x5").await.unwrap(), "0x2a");
    assert_eq!(
        session.evaluate("f0").await.unwrap(),
        "0x3ff0000000000000"
    );
    assert_eq!(session.evaluate("csr.mstatus").await.unwrap(), "0x8");
    assert_eq!(session.evaluate("outputStatus").await.unwrap(), "ok");
    // Registers absent from the artifact display as undefined.
    assert_eq!(session.evaluate("x7").await.unwrap(), "undefined");
}

#[tokio::test]
async fn evaluate_memory_round_trips_the_echo() {
    let fixture = Fixture::new();
    fixture.state(1, &[]);
    let vm = loaded_vm().echo("0x10FF", "0xbeef");
    let (mut session, _events, _surface, _console) = build(vm, &fixture);
    session.launch(PROGRAM, true).await.unwrap();

    assert_eq!(session.evaluate("mem[0x10FF]").await.unwrap(), "0xbeef");
    assert_eq!(
        session.link().sent_wire().last().unwrap(),
        "get_mem_point 0x10FF"
    );
}

#[tokio::test]
async fn unknown_expression_fails_typed() {
    let fixture = Fixture::new();
    let (mut session, _events, _surface, _console) = build(ScriptedVm::new(), &fixture);

    let err = session.evaluate("pc + 4").await.unwrap_err();
    assert!(matches!(err, DebugError::UnknownExpression(_)));
}

#[tokio::test]
async fn unexpected_exit_fails_the_outstanding_command() {
    let fixture = Fixture::new();
    fixture.state(1, &[]);
    let vm = loaded_vm().on("run_debug", [VmMessage::Exited(None)]);
    let (mut session, mut events, _surface, _console) = build(vm, &fixture);
    session.launch(PROGRAM, true).await.unwrap();
    drain(&mut events);

    let err = session.resume().await.unwrap_err();

    assert!(matches!(err, DebugError::UnrecoverableProcessExit));
    assert_eq!(session.state(), SessionState::Terminated);
    assert_eq!(drain(&mut events), vec![SessionEvent::Terminated]);
}

#[tokio::test]
async fn command_timeout_kills_the_session() {
    let fixture = Fixture::new();
    fixture.state(1, &[]);
    let surface = RecordingSurface::new();
    let console = ConsoleHandle::over(surface.clone());
    console.open();
    // A load that never answers.
    let (mut session, mut events) = Session::with_config(
        ScriptedVm::new(),
        fixture.reader(),
        console,
        SessionConfig {
            command_timeout: Duration::from_millis(100),
            run_timeout: None,
        },
    );

    let err = session.launch(PROGRAM, true).await.unwrap_err();

    assert!(matches!(err, DebugError::Timeout { .. }));
    assert_eq!(session.state(), SessionState::Terminated);
    assert_eq!(drain(&mut events), vec![SessionEvent::Terminated]);
    assert!(!session.link().is_running());
}

#[tokio::test]
async fn slow_stdin_answer_does_not_consume_the_run_budget() {
    let fixture = Fixture::new();
    fixture.state(5, &[]);
    let surface = RecordingSurface::new();
    let console = ConsoleHandle::over(surface.clone());
    console.open();
    let vm = loaded_vm()
        .on_markers("run_debug", [Marker::StdinRequested])
        .on_markers("vm_stdin", [Marker::StdinEnded, Marker::StepCompleted]);
    let (mut session, _events) = Session::with_config(
        vm,
        fixture.reader(),
        console.clone(),
        SessionConfig {
            command_timeout: Duration::from_secs(5),
            run_timeout: Some(Duration::from_millis(200)),
        },
    );
    session.launch(PROGRAM, true).await.unwrap();

    // The answer arrives well after the inter-message bound; the wait
    // re-arms on every message, so only silence counts against it.
    let typist = console.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(350)).await;
        for ch in "42".chars() {
            typist.handle_key(console::Key::Char(ch));
        }
        typist.handle_key(console::Key::Enter);
    });

    session.resume().await.unwrap();

    let sent = session.link().sent_wire();
    assert!(sent.contains(&"vm_stdin 42".to_string()), "sent: {sent:?}");
    assert_eq!(session.state(), SessionState::Stopped);
}

#[tokio::test]
async fn introspection_has_one_thread_and_one_frame() {
    let fixture = Fixture::new();
    fixture.state(6, &[]);
    let (mut session, _events, _surface, _console) = build(loaded_vm(), &fixture);
    session.launch(PROGRAM, true).await.unwrap();

    let threads = session.threads();
    assert_eq!(threads.len(), 1);
    assert_eq!(threads[0].name, "main");

    let frames = session.stack_trace();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].line, 6);
    assert_eq!(frames[0].source.as_deref(), Some(Path::new(PROGRAM)));

    let scopes = session.scopes();
    assert_eq!(scopes.len(), 2);
    assert_eq!(scopes[0].name, "Registers");
    assert_eq!(scopes[1].name, "VM State");

    let groups = session
        .variables(VariablesReference::Registers.as_i64())
        .unwrap();
    assert_eq!(groups.len(), 3);
    assert!(groups.iter().all(|group| group.variables_reference != 0));

    let vm_state = session
        .variables(VariablesReference::VmState.as_i64())
        .unwrap();
    assert!(
        vm_state
            .iter()
            .any(|variable| variable.name == "Current line" && variable.value == "6")
    );
}

// test suite "constructor"
#[ctor::ctor]
fn init() {
    let in_ci = std::env::var("CI").map(|val| val == "true").unwrap_or(false);

    if std::io::stderr().is_terminal() || in_ci {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .try_init();
    } else {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .json()
            .try_init();
    }

    let _ = color_eyre::install();
}
