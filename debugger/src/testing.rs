//! In-memory counterparts for exercising a [`Session`](crate::Session)
//! without a simulator process.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use sentinel::{Command, Marker};
use snapshot::MemoryDump;
use supervisor::{SupervisorError, VmLink, VmMessage};
use tokio::sync::oneshot;

use crate::collaborators::{Diagnostic, DiagnosticsSink, MemoryPresenter, StatusDisplay};

enum Action {
    Reply(Vec<VmMessage>),
    FailSend,
}

struct Rule {
    prefix: String,
    action: Action,
    consumed: bool,
}

/// A scripted simulator.
///
/// Rules map a wire-text prefix to the messages the "simulator" emits in
/// response; each rule fires once, in declaration order. With the script
/// exhausted, `recv` pends forever — the session's timeout is the judge of
/// a test that expected more than it scripted.
#[derive(Default)]
pub struct ScriptedVm {
    running: bool,
    rules: Vec<Rule>,
    queue: VecDeque<VmMessage>,
    echoes: HashMap<String, String>,
    sent: Vec<Command>,
    /// Keeps unanswered echo senders alive so their receivers pend.
    parked_echoes: Vec<oneshot::Sender<String>>,
}

impl ScriptedVm {
    pub fn new() -> Self {
        Self::default()
    }

    /// Emit `messages` when a sent command's wire text starts with `prefix`.
    pub fn on(mut self, prefix: &str, messages: impl IntoIterator<Item = VmMessage>) -> Self {
        self.rules.push(Rule {
            prefix: prefix.to_string(),
            action: Action::Reply(messages.into_iter().collect()),
            consumed: false,
        });
        self
    }

    /// Like [`Self::on`], taking bare markers.
    pub fn on_markers(self, prefix: &str, markers: impl IntoIterator<Item = Marker>) -> Self {
        self.on(prefix, markers.into_iter().map(VmMessage::Marker))
    }

    /// Make the next command matching `prefix` fail to send.
    pub fn fail_on(mut self, prefix: &str) -> Self {
        self.rules.push(Rule {
            prefix: prefix.to_string(),
            action: Action::FailSend,
            consumed: false,
        });
        self
    }

    /// Answer `get_mem_point <address>` watches with `value`.
    pub fn echo(mut self, address: &str, value: &str) -> Self {
        self.echoes.insert(address.to_string(), value.to_string());
        self
    }

    /// Wire text of every command accepted so far, in order.
    pub fn sent_wire(&self) -> Vec<String> {
        self.sent.iter().map(Command::to_string).collect()
    }
}

impl VmLink for ScriptedVm {
    async fn start(&mut self) -> Result<(), SupervisorError> {
        self.running = true;
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running
    }

    async fn send(&mut self, command: Command) -> Result<(), SupervisorError> {
        if !self.running {
            return Err(SupervisorError::ProcessNotRunning);
        }
        let wire = command.to_string();
        let rule = self
            .rules
            .iter_mut()
            .find(|rule| !rule.consumed && wire.starts_with(&rule.prefix));
        if let Some(rule) = rule {
            rule.consumed = true;
            match &rule.action {
                Action::FailSend => return Err(SupervisorError::ProcessNotRunning),
                Action::Reply(messages) => {
                    for message in messages {
                        if matches!(message, VmMessage::Exited(_)) {
                            self.running = false;
                        }
                        self.queue.push_back(message.clone());
                    }
                }
            }
        }
        self.sent.push(command);
        Ok(())
    }

    async fn recv(&mut self) -> Option<VmMessage> {
        match self.queue.pop_front() {
            Some(message) => Some(message),
            None if !self.running => None,
            None => futures::future::pending().await,
        }
    }

    fn watch_memory_point(
        &mut self,
        address: &str,
    ) -> Result<oneshot::Receiver<String>, SupervisorError> {
        let (tx, rx) = oneshot::channel();
        match self.echoes.get(address) {
            Some(value) => {
                let _ = tx.send(value.clone());
            }
            None => self.parked_echoes.push(tx),
        }
        Ok(rx)
    }

    async fn stop(&mut self) {
        self.running = false;
    }
}

/// Records every diagnostic batch; clones share the record.
#[derive(Clone, Default)]
pub struct RecordingDiagnostics {
    batches: Arc<Mutex<Vec<(PathBuf, Vec<Diagnostic>)>>>,
}

impl RecordingDiagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn batches(&self) -> Vec<(PathBuf, Vec<Diagnostic>)> {
        self.batches.lock().unwrap().clone()
    }

    /// The diagnostics most recently published for `file`.
    pub fn latest_for(&self, file: &Path) -> Vec<Diagnostic> {
        self.batches
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(path, _)| path == file)
            .map(|(_, diagnostics)| diagnostics.clone())
            .unwrap_or_default()
    }
}

impl DiagnosticsSink for RecordingDiagnostics {
    fn set(&mut self, file: &Path, diagnostics: Vec<Diagnostic>) {
        self.batches
            .lock()
            .unwrap()
            .push((file.to_path_buf(), diagnostics));
    }
}

/// Records the label texts pushed to it; clones share the record.
#[derive(Clone, Default)]
pub struct RecordingStatus {
    texts: Arc<Mutex<Vec<String>>>,
}

impl RecordingStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn latest(&self) -> Option<String> {
        self.texts.lock().unwrap().last().cloned()
    }
}

impl StatusDisplay for RecordingStatus {
    fn set_text(&mut self, text: String) {
        self.texts.lock().unwrap().push(text);
    }
}

/// Records presented memory dumps; clones share the record.
#[derive(Clone, Default)]
pub struct RecordingPresenter {
    dumps: Arc<Mutex<Vec<MemoryDump>>>,
}

impl RecordingPresenter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dumps(&self) -> Vec<MemoryDump> {
        self.dumps.lock().unwrap().clone()
    }
}

impl MemoryPresenter for RecordingPresenter {
    fn show(&mut self, dump: &MemoryDump) {
        self.dumps.lock().unwrap().push(dump.clone());
    }
}
