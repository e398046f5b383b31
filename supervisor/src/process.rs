//! The real simulator child process.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::StreamExt;
use sentinel::{Command, CommandWriter, Marker, MarkerReader};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdin};
use tokio::sync::{Mutex, mpsc, oneshot};

use crate::error::SupervisorError;
use crate::link::{VmLink, VmMessage};

/// How to spawn and configure the simulator.
#[derive(Debug, Clone)]
pub struct SpawnOptions {
    /// Path to the simulator executable.
    pub binary: PathBuf,
    /// Arguments; the defaults put the simulator into backend mode.
    pub args: Vec<String>,
    /// Working directory override. Falls back to the executable's parent
    /// directory, which is where the simulator writes its exports.
    pub working_dir: Option<PathBuf>,
    /// Bound on the wait for the `VM_STARTED` handshake.
    pub startup_timeout: Duration,
    /// Milliseconds between instructions during `run_debug`.
    pub run_step_delay: u64,
    /// Start address of the data section, hex text.
    pub data_section_start: String,
}

impl SpawnOptions {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            args: vec!["--vm-as-backend".to_string(), "--start-vm".to_string()],
            working_dir: None,
            startup_timeout: Duration::from_secs(10),
            run_step_delay: 100,
            data_section_start: "0x10000000".to_string(),
        }
    }
}

/// The watch slot for a pending `get_mem_point` echo.
///
/// One slot, shared with the stderr reader task. Arming it while a watch
/// is outstanding is an error rather than a silent replacement.
type EchoSlot = Arc<Mutex<Option<EchoWatch>>>;

struct EchoWatch {
    address: String,
    tx: oneshot::Sender<String>,
}

/// Handles owned while the child is alive.
struct Running {
    writer: CommandWriter<ChildStdin>,
    messages: mpsc::UnboundedReceiver<VmMessage>,
    alive: Arc<AtomicBool>,
    echo: EchoSlot,
    /// Tells the exit monitor to kill the child. Dropping it has the same
    /// effect, so an abandoned handle still reaps its process.
    kill_tx: Option<oneshot::Sender<()>>,
    /// Resolved by the exit monitor once the child has been reaped.
    reaped_rx: oneshot::Receiver<()>,
}

/// A supervised simulator process.
///
/// Owns the child and the three tasks around it: the stdout marker reader,
/// the stderr echo reader, and the exit monitor. The liveness flag flipped
/// by the monitor is the sole source of truth for [`Vm::is_running`].
pub struct Vm {
    options: SpawnOptions,
    running: Option<Running>,
}

impl Vm {
    pub fn new(options: SpawnOptions) -> Self {
        Self {
            options,
            running: None,
        }
    }

    pub fn options(&self) -> &SpawnOptions {
        &self.options
    }

    async fn spawn(&mut self) -> Result<(), SupervisorError> {
        let options = &self.options;
        let working_dir = options
            .working_dir
            .clone()
            .or_else(|| options.binary.parent().map(PathBuf::from));

        let mut command = tokio::process::Command::new(&options.binary);
        command
            .args(&options.args)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &working_dir {
            command.current_dir(dir);
        }

        tracing::debug!(binary = %options.binary.display(), ?working_dir, "spawning simulator");
        let mut child = command.spawn().map_err(|source| SupervisorError::Spawn {
            binary: options.binary.display().to_string(),
            source,
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or(SupervisorError::Stdio { stream: "stdin" })?;
        let stdout = child
            .stdout
            .take()
            .ok_or(SupervisorError::Stdio { stream: "stdout" })?;
        let stderr = child
            .stderr
            .take()
            .ok_or(SupervisorError::Stdio { stream: "stderr" })?;

        let (msg_tx, messages) = mpsc::unbounded_channel();
        let alive = Arc::new(AtomicBool::new(true));
        let echo: EchoSlot = Arc::new(Mutex::new(None));
        let (kill_tx, kill_rx) = oneshot::channel();
        let (reaped_tx, reaped_rx) = oneshot::channel();

        tokio::spawn(read_markers(stdout, msg_tx.clone()));
        tokio::spawn(read_echoes(stderr, Arc::clone(&echo)));
        tokio::spawn(monitor_exit(
            child,
            kill_rx,
            Arc::clone(&alive),
            msg_tx,
            reaped_tx,
        ));

        self.running = Some(Running {
            writer: CommandWriter::new(stdin),
            messages,
            alive,
            echo,
            kill_tx: Some(kill_tx),
            reaped_rx,
        });
        Ok(())
    }

    /// Wait for the `VM_STARTED` marker, bounded by the startup timeout.
    async fn await_started(&mut self) -> Result<(), SupervisorError> {
        let waited = self.options.startup_timeout;
        let handshake = async {
            loop {
                match self.recv().await {
                    Some(VmMessage::Marker(Marker::Started)) => return Ok(()),
                    Some(VmMessage::Marker(other)) => {
                        tracing::debug!(?other, "marker before startup handshake");
                    }
                    Some(VmMessage::Exited(code)) => {
                        tracing::error!(?code, "simulator exited during startup");
                        return Err(SupervisorError::EarlyExit);
                    }
                    None => return Err(SupervisorError::EarlyExit),
                }
            }
        };

        match tokio::time::timeout(waited, handshake).await {
            Ok(result) => result,
            Err(_) => {
                self.stop().await;
                Err(SupervisorError::StartupTimeout { waited })
            }
        }
    }

    /// Configuration commands pushed right after the handshake.
    async fn configure(&mut self) -> Result<(), SupervisorError> {
        let delay = self.options.run_step_delay.to_string();
        let data_start = self.options.data_section_start.clone();
        self.send(Command::ModifyConfig {
            section: "Execution".to_string(),
            key: "run_step_delay".to_string(),
            value: delay,
        })
        .await?;
        self.send(Command::ModifyConfig {
            section: "Memory".to_string(),
            key: "data_section_start".to_string(),
            value: data_start,
        })
        .await
    }
}

impl VmLink for Vm {
    async fn start(&mut self) -> Result<(), SupervisorError> {
        if self.is_running() {
            return Ok(());
        }
        // A dead handle from a previous run is stale state, not a live link.
        self.running = None;

        self.spawn().await?;
        self.await_started().await?;
        self.configure().await?;
        tracing::info!("simulator is up and configured");
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running
            .as_ref()
            .is_some_and(|running| running.alive.load(Ordering::SeqCst))
    }

    async fn send(&mut self, command: Command) -> Result<(), SupervisorError> {
        if !self.is_running() {
            return Err(SupervisorError::ProcessNotRunning);
        }
        let running = self
            .running
            .as_mut()
            .ok_or(SupervisorError::ProcessNotRunning)?;
        tracing::debug!(%command, "sending command");
        running.writer.send(command).await?;
        Ok(())
    }

    async fn recv(&mut self) -> Option<VmMessage> {
        self.running.as_mut()?.messages.recv().await
    }

    fn watch_memory_point(
        &mut self,
        address: &str,
    ) -> Result<oneshot::Receiver<String>, SupervisorError> {
        let running = self
            .running
            .as_ref()
            .ok_or(SupervisorError::ProcessNotRunning)?;
        let mut slot = running
            .echo
            .try_lock()
            .map_err(|_| SupervisorError::EchoInFlight)?;
        if slot.is_some() {
            return Err(SupervisorError::EchoInFlight);
        }
        let (tx, rx) = oneshot::channel();
        *slot = Some(EchoWatch {
            address: address.to_string(),
            tx,
        });
        Ok(rx)
    }

    async fn stop(&mut self) {
        let Some(mut running) = self.running.take() else {
            return;
        };
        running.alive.store(false, Ordering::SeqCst);
        if let Some(kill) = running.kill_tx.take() {
            let _ = kill.send(());
        }
        // The monitor owns the child; wait until it has been reaped so a
        // follow-up spawn never races the old process.
        let _ = running.reaped_rx.await;
        tracing::debug!("simulator stopped");
    }
}

/// Scan the child's stdout and forward recognized markers.
async fn read_markers(
    stdout: tokio::process::ChildStdout,
    msg_tx: mpsc::UnboundedSender<VmMessage>,
) {
    let mut reader = MarkerReader::new(stdout);
    while let Some(result) = reader.next().await {
        match result {
            Ok(marker) => {
                if msg_tx.send(VmMessage::Marker(marker)).is_err() {
                    break;
                }
            }
            Err(err) => {
                tracing::error!(%err, "marker scan failed");
                break;
            }
        }
    }
    tracing::debug!("stdout closed");
}

/// Watch stderr for the `<address>[<value>]` memory-point echo.
///
/// Everything else the simulator writes on stderr is diagnostic chatter.
async fn read_echoes(stderr: tokio::process::ChildStderr, echo: EchoSlot) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let mut slot = echo.lock().await;
        match slot.take() {
            Some(watch) => match parse_echo(&line, &watch.address) {
                Some(value) => {
                    let _ = watch.tx.send(value);
                }
                None => {
                    *slot = Some(watch);
                    tracing::debug!(line, "simulator stderr");
                }
            },
            None => tracing::debug!(line, "simulator stderr"),
        }
    }
    tracing::debug!("stderr closed");
}

/// Extract the value from an `<address>[<value>]` echo line.
fn parse_echo(line: &str, address: &str) -> Option<String> {
    let rest = line.trim().strip_prefix(address)?;
    let value = rest.strip_prefix('[')?.strip_suffix(']')?;
    Some(value.to_string())
}

/// Own the child until it exits, by itself or on request.
async fn monitor_exit(
    mut child: Child,
    mut kill_rx: oneshot::Receiver<()>,
    alive: Arc<AtomicBool>,
    msg_tx: mpsc::UnboundedSender<VmMessage>,
    reaped_tx: oneshot::Sender<()>,
) {
    let code = tokio::select! {
        status = child.wait() => {
            let code = status.ok().and_then(|status| status.code());
            tracing::info!(?code, "simulator exited");
            code
        }
        // Resolves on an explicit stop and when the Vm handle is dropped.
        _ = &mut kill_rx => {
            tracing::debug!("killing simulator");
            let _ = child.start_kill();
            child.wait().await.ok().and_then(|status| status.code())
        }
    };
    alive.store(false, Ordering::SeqCst);
    let _ = msg_tx.send(VmMessage::Exited(code));
    let _ = reaped_tx.send(());
}
