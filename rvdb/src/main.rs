//! Command-line debugger front-end for the RISC-V instruction-set simulator.
//!
//! Owns the terminal: a raw-mode key loop feeds the shared console, which
//! multiplexes the debugger prompt with the simulated program's stdin and
//! stdout. Everything else is the `debugger` crate's [`Session`] driven by
//! typed prompt commands.

use std::collections::BTreeSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::thread::JoinHandle;

use clap::Parser;
use color_eyre::eyre::{self, Context};
use console::{ConsoleHandle, Key, Surface};
use crossterm::event::{Event, KeyCode, KeyEventKind, KeyModifiers};
use debugger::{
    Diagnostic, DiagnosticsSink, Session, SessionEvent, StopReason, VariablesReference,
};
use snapshot::SnapshotReader;
use supervisor::Vm;
use tokio::sync::mpsc;
use tracing_subscriber::filter::EnvFilter;

mod config;

use config::Config;

#[derive(Debug, Parser)]
struct Args {
    /// Assembly program to debug.
    program: PathBuf,

    /// Simulator executable. Overrides the config file.
    #[clap(long)]
    vm: Option<PathBuf>,

    /// TOML configuration file.
    #[clap(long)]
    config: Option<PathBuf>,

    /// Stop at the first line instead of reporting a breakpoint stop.
    #[clap(long)]
    stop_on_entry: bool,

    /// Breakpoint line, repeatable.
    #[clap(short = 'b', long = "break")]
    breakpoints: Vec<u32>,

    /// Log destination; the terminal belongs to the console.
    #[clap(long)]
    log_file: Option<PathBuf>,
}

/// Renders console bytes on stdout. The console is the only writer, so a
/// failed write is logged and dropped rather than unwinding the session.
struct StdoutSurface;

impl Surface for StdoutSurface {
    fn write(&mut self, text: &str) {
        let mut stdout = std::io::stdout();
        if let Err(err) = stdout
            .write_all(text.as_bytes())
            .and_then(|_| stdout.flush())
        {
            tracing::error!(%err, "terminal write failed");
        }
    }
}

/// Prints load-time assembly errors at the prompt, 1-based.
struct ConsoleDiagnostics {
    console: ConsoleHandle,
}

impl DiagnosticsSink for ConsoleDiagnostics {
    fn set(&mut self, file: &Path, diagnostics: Vec<Diagnostic>) {
        for diagnostic in &diagnostics {
            self.console.print(&format!(
                "{}:{}: {}",
                file.display(),
                diagnostic.line + 1,
                diagnostic.message
            ));
        }
    }
}

/// Restores the terminal even when main errors out.
struct RawMode;

impl RawMode {
    fn enable() -> eyre::Result<Self> {
        crossterm::terminal::enable_raw_mode().wrap_err("enabling raw mode")?;
        Ok(Self)
    }
}

impl Drop for RawMode {
    fn drop(&mut self) {
        let _ = crossterm::terminal::disable_raw_mode();
    }
}

fn spawn_key_thread(
    console: ConsoleHandle,
    quit: mpsc::UnboundedSender<()>,
) -> JoinHandle<()> {
    std::thread::spawn(move || {
        loop {
            let event = match crossterm::event::read() {
                Ok(event) => event,
                Err(err) => {
                    tracing::error!(%err, "reading terminal events failed");
                    let _ = quit.send(());
                    return;
                }
            };
            let Event::Key(key) = event else { continue };
            if key.kind != KeyEventKind::Press {
                continue;
            }
            if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
                let _ = quit.send(());
                continue;
            }
            let translated = match key.code {
                KeyCode::Char(ch) => Key::Char(ch),
                KeyCode::Enter => Key::Enter,
                KeyCode::Backspace => Key::Backspace,
                KeyCode::Left => Key::Left,
                KeyCode::Right => Key::Right,
                KeyCode::Up => Key::Up,
                KeyCode::Down => Key::Down,
                _ => continue,
            };
            console.handle_key(translated);
        }
    })
}

struct App {
    session: Session<Vm>,
    events: mpsc::UnboundedReceiver<SessionEvent>,
    console: ConsoleHandle,
    program: PathBuf,
    /// Lines the user asked for; re-sent as a batch on every change.
    requested: BTreeSet<u32>,
}

enum ShouldQuit {
    True,
    False,
}

impl App {
    async fn start(&mut self, stop_on_entry: bool) -> eyre::Result<()> {
        let launched = self.session.launch(&self.program, stop_on_entry).await;
        if !self.requested.is_empty() && launched.is_ok() {
            self.apply_breakpoints().await;
        }
        self.show_events();
        launched.wrap_err_with(|| format!("launching {}", self.program.display()))
    }

    async fn run(&mut self, mut quit: mpsc::UnboundedReceiver<()>) -> eyre::Result<()> {
        loop {
            let read = self.console.read_line();
            tokio::select! {
                _ = quit.recv() => {
                    tracing::info!("interrupt received");
                    let _ = self.session.terminate().await;
                    return Ok(());
                }
                line = read => {
                    let Ok(line) = line else {
                        // Input side gone; nothing left to serve.
                        return Ok(());
                    };
                    let verdict = self.dispatch(&line).await;
                    self.show_events();
                    if matches!(verdict, ShouldQuit::True) {
                        return Ok(());
                    }
                }
            }
        }
    }

    async fn dispatch(&mut self, input: &str) -> ShouldQuit {
        let tokens: Vec<&str> = input.split_whitespace().collect();
        match tokens.as_slice() {
            [] => {}
            ["q"] | ["quit"] => {
                let _ = self.session.terminate().await;
                return ShouldQuit::True;
            }
            ["c"] | ["continue"] => {
                let result = self.session.resume().await;
                self.report(result);
            }
            ["s"] | ["step"] => {
                let result = self.session.step_over().await;
                self.report(result);
            }
            ["back"] => {
                let result = self.session.step_back().await;
                self.report(result);
            }
            ["forward"] => {
                let result = self.session.step_forward().await;
                self.report(result);
            }
            ["restart"] => {
                let result = self.session.restart().await;
                self.report(result);
            }
            ["b", line] => match line.parse::<u32>() {
                Ok(line) => {
                    self.requested.insert(line);
                    self.apply_breakpoints().await;
                }
                Err(_) => self.console.print(&format!("not a line number: {line}")),
            },
            ["d", line] => match line.parse::<u32>() {
                Ok(line) => {
                    if self.requested.remove(&line) {
                        self.apply_breakpoints().await;
                    } else {
                        self.console.print(&format!("no breakpoint at line {line}"));
                    }
                }
                Err(_) => self.console.print(&format!("not a line number: {line}")),
            },
            ["bp"] => {
                if self.session.breakpoints().is_empty() {
                    self.console.print("no breakpoints");
                }
                for line in self.session.breakpoints() {
                    self.console.print(&format!("line {line}"));
                }
            }
            ["p", expression] => match self.session.evaluate(expression).await {
                Ok(value) => self.console.print(&format!("{expression} = {value}")),
                Err(err) => self.console.print(&format!("error: {err}")),
            },
            ["set", register, value] => match self.session.modify_register(register, value).await
            {
                Ok(true) => self.console.print(&format!("{register} updated")),
                Ok(false) => self
                    .console
                    .print(&format!("the simulator rejected the write to {register}")),
                Err(err) => self.console.print(&format!("error: {err}")),
            },
            ["mem", spec] => match self.session.dump_memory(spec).await {
                Ok(dump) => {
                    for (address, value) in &dump {
                        self.console.print(&format!("{address}: {value}"));
                    }
                }
                Err(err) => self.console.print(&format!("error: {err}")),
            },
            ["regs"] => self.show_registers(),
            ["state"] => self.show_group(VariablesReference::VmState, None),
            ["stack"] => {
                for frame in self.session.stack_trace() {
                    let source = frame
                        .source
                        .as_deref()
                        .map(|path| path.display().to_string())
                        .unwrap_or_else(|| "<no program>".to_string());
                    self.console
                        .print(&format!("#{} {} at {}:{}", frame.id, frame.name, source, frame.line));
                }
            }
            _ => self.console.print(&format!("unhandled command: '{input}'")),
        }
        ShouldQuit::False
    }

    async fn apply_breakpoints(&mut self) {
        let lines: Vec<u32> = self.requested.iter().copied().collect();
        let program = self.program.clone();
        match self.session.set_breakpoints(&program, &lines).await {
            Ok(outcomes) => {
                for outcome in outcomes.iter().filter(|outcome| !outcome.verified) {
                    self.console
                        .print(&format!("breakpoint at line {} was not accepted", outcome.line));
                }
            }
            Err(err) => self.console.print(&format!("error: {err}")),
        }
    }

    fn show_registers(&mut self) {
        self.show_group(VariablesReference::GpRegisters, Some("general purpose"));
        self.show_group(VariablesReference::FpRegisters, Some("floating point"));
        self.show_group(VariablesReference::CsrRegisters, Some("control and status"));
    }

    fn show_group(&mut self, reference: VariablesReference, heading: Option<&str>) {
        match self.session.variables(reference.as_i64()) {
            Ok(variables) => {
                if let Some(heading) = heading {
                    self.console.print(heading);
                }
                for variable in &variables {
                    self.console
                        .print(&format!("  {} = {}", variable.name, variable.value));
                }
            }
            Err(err) => self.console.print(&format!("error: {err}")),
        }
    }

    fn report(&mut self, result: Result<(), debugger::DebugError>) {
        if let Err(err) = result {
            self.console.print(&format!("error: {err}"));
        }
    }

    fn show_events(&mut self) {
        while let Ok(event) = self.events.try_recv() {
            self.show_event(event);
        }
    }

    fn show_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Stopped { reason, line } => {
                let message = match (reason, line) {
                    (_, 0) => "stopped past the last instruction".to_string(),
                    (StopReason::Entry, line) => format!("stopped at entry (line {line})"),
                    (StopReason::Breakpoint, line) => format!("breakpoint hit at line {line}"),
                    (StopReason::Step, line) => format!("stopped at line {line}"),
                    (StopReason::Restart, line) => format!("restarted; stopped at line {line}"),
                };
                self.console.print(&message);
            }
            // Program output went through the console already.
            SessionEvent::Output(_) => {}
            SessionEvent::Invalidated => {}
            SessionEvent::Terminated => self.console.print("session ended"),
        }
    }
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    color_eyre::install()?;
    let args = Args::parse();

    let log_path = args
        .log_file
        .clone()
        .unwrap_or_else(|| PathBuf::from("rvdb.log"));
    let log_file = std::fs::File::create(&log_path)
        .wrap_err_with(|| format!("creating {}", log_path.display()))?;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(Mutex::new(log_file))
        .init();

    let config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    let binary = args
        .vm
        .clone()
        .or_else(|| config.vm.clone())
        .ok_or_else(|| eyre::eyre!("no simulator given: pass --vm or set `vm` in the config"))?;

    let snapshots = SnapshotReader::for_binary(&binary);
    let vm = Vm::new(config.spawn_options(binary));
    let console = ConsoleHandle::over(StdoutSurface);
    let (mut session, events) = Session::with_config(
        vm,
        snapshots,
        console.clone(),
        config.session_config(),
    );
    session.set_diagnostics_sink(Box::new(ConsoleDiagnostics {
        console: console.clone(),
    }));

    let _raw = RawMode::enable()?;
    console.open();
    let (quit_tx, quit_rx) = mpsc::unbounded_channel();
    let _keys = spawn_key_thread(console.clone(), quit_tx);

    let mut app = App {
        session,
        events,
        console,
        program: args.program,
        requested: args.breakpoints.iter().copied().collect(),
    };
    app.start(args.stop_on_entry).await?;
    app.run(quit_rx).await
}
