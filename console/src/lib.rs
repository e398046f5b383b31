//! Line-editing console shared between the user and the simulated program.
//!
//! One visible terminal serves three producers: user keystrokes, output
//! from the simulated program, and the program's requests for a line of
//! input. [`Console`] is the arbitration state machine — edit buffer,
//! cursor, history, FIFO read queue — and renders through the [`Surface`]
//! trait so the binary can write ANSI to a raw-mode terminal while tests
//! capture plain text. [`ConsoleHandle`] is the cloneable, owned handle the
//! session and the key loop share; there is deliberately no process-wide
//! console instance.
//!
//! Reads are level-triggered promises: [`Console::read_line`] hands back a
//! [`oneshot::Receiver`] that resolves on the next committed line. Several
//! reads may be queued; only the head is active, and lines are delivered
//! strictly in FIFO order.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tokio::sync::oneshot;

/// Clears the current terminal line and returns the cursor to column 0.
const CLEAR_LINE: &str = "\x1b[2K\r";
/// Input prompt, drawn whenever the console is ready for a line.
const PROMPT: &str = "\x1b[32m=> \x1b[0m";
/// Move the cursor one cell left / right.
const CURSOR_LEFT: &str = "\x1b[D";
const CURSOR_RIGHT: &str = "\x1b[C";

/// A key event, already translated from whatever backend produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Char(char),
    Enter,
    Backspace,
    Left,
    Right,
    Up,
    Down,
}

/// Where console bytes are rendered.
///
/// Writes are infallible from the console's point of view; a surface that
/// can fail (a real terminal) decides for itself whether to log or ignore,
/// so a broken display can never poison session logic.
pub trait Surface: Send {
    fn write(&mut self, text: &str);
}

/// The line-editing multiplexer state machine.
///
/// All methods are synchronous; the only asynchronous surface is the
/// receiver returned by [`Console::read_line`].
pub struct Console {
    surface: Box<dyn Surface>,
    /// Current edit line.
    buffer: String,
    /// Cursor position as a char offset into `buffer`.
    cursor: usize,
    /// Committed non-blank lines, oldest first.
    history: Vec<String>,
    /// Browse position; `history.len()` means "not browsing".
    history_index: usize,
    /// Pending read requests, oldest first.
    pending_reads: VecDeque<oneshot::Sender<String>>,
    /// Program output received before the console was first rendered.
    pending_output: Vec<String>,
    rendered: bool,
    last_write_ended_newline: bool,
}

impl Console {
    pub fn new(surface: impl Surface + 'static) -> Self {
        Self {
            surface: Box::new(surface),
            buffer: String::new(),
            cursor: 0,
            history: Vec::new(),
            history_index: 0,
            pending_reads: VecDeque::new(),
            pending_output: Vec::new(),
            rendered: false,
            last_write_ended_newline: true,
        }
    }

    /// Mark the console as visible and flush output queued before the
    /// first render, in arrival order.
    pub fn open(&mut self) {
        self.rendered = true;
        let queued = std::mem::take(&mut self.pending_output);
        if !queued.is_empty() {
            tracing::debug!(lines = queued.len(), "flushing output queued before open");
        }
        for text in queued {
            self.write_translated(&text);
        }
    }

    /// Write program output verbatim, translating each line feed into the
    /// terminal's CRLF pair. Output before the first render is queued.
    pub fn print(&mut self, text: &str) {
        if !self.rendered {
            self.pending_output.push(text.to_string());
            return;
        }
        self.write_translated(text);
    }

    /// Request the next committed line.
    ///
    /// If this is the only pending read, the prompt is drawn now — preceded
    /// by a newline when the last write left a partial line, so the prompt
    /// never concatenates onto program output.
    pub fn read_line(&mut self) -> oneshot::Receiver<String> {
        let (tx, rx) = oneshot::channel();
        self.pending_reads.push_back(tx);
        if self.pending_reads.len() == 1 {
            if !self.last_write_ended_newline {
                self.write_raw("\r\n");
            }
            self.write_raw(PROMPT);
        }
        rx
    }

    /// Abort all pending reads; their receivers observe closure.
    pub fn cancel_reads(&mut self) {
        if !self.pending_reads.is_empty() {
            tracing::debug!(aborted = self.pending_reads.len(), "cancelling pending reads");
        }
        self.pending_reads.clear();
    }

    pub fn pending_read_count(&self) -> usize {
        self.pending_reads.len()
    }

    /// Apply one key event to the edit line.
    pub fn handle_key(&mut self, key: Key) {
        match key {
            Key::Char(ch) => {
                let at = self.byte_index();
                self.buffer.insert(at, ch);
                self.cursor += 1;
                self.redraw();
            }
            Key::Enter => self.commit(),
            Key::Backspace => {
                if self.cursor > 0 {
                    let before = self.buffer.chars().take(self.cursor - 1);
                    let after = self.buffer.chars().skip(self.cursor);
                    self.buffer = before.chain(after).collect();
                    self.cursor -= 1;
                    self.redraw();
                }
            }
            Key::Left => {
                if self.cursor > 0 {
                    self.cursor -= 1;
                    self.write_raw(CURSOR_LEFT);
                }
            }
            Key::Right => {
                if self.cursor < self.char_count() {
                    self.cursor += 1;
                    self.write_raw(CURSOR_RIGHT);
                }
            }
            Key::Up => {
                if self.history_index > 0 {
                    self.history_index -= 1;
                    self.recall_history();
                }
            }
            Key::Down => {
                if self.history_index < self.history.len() {
                    self.history_index += 1;
                    self.recall_history();
                }
            }
        }
    }

    /// Replace the whole visible line with the browsed history entry
    /// (or an empty line past the newest entry) without committing it.
    fn recall_history(&mut self) {
        self.buffer = self
            .history
            .get(self.history_index)
            .cloned()
            .unwrap_or_default();
        self.cursor = self.char_count();
        self.redraw();
    }

    fn commit(&mut self) {
        let line = std::mem::take(&mut self.buffer);
        self.cursor = 0;
        self.write_raw("\r\n");
        if !line.trim().is_empty() {
            self.history.push(line.clone());
        }
        self.history_index = self.history.len();
        if let Some(tx) = self.pending_reads.pop_front() {
            // The reader may have given up; a line nobody wants is dropped.
            let _ = tx.send(line);
        } else {
            tracing::debug!("line committed with no pending read");
        }
        if self.pending_reads.is_empty() {
            self.write_raw(PROMPT);
        }
    }

    fn redraw(&mut self) {
        let mut frame = String::from(CLEAR_LINE);
        frame.push_str(PROMPT);
        frame.push_str(&self.buffer);
        for _ in self.cursor..self.char_count() {
            frame.push_str(CURSOR_LEFT);
        }
        self.write_raw(&frame);
    }

    fn char_count(&self) -> usize {
        self.buffer.chars().count()
    }

    /// Byte offset of the cursor's char position.
    fn byte_index(&self) -> usize {
        self.buffer
            .char_indices()
            .map(|(index, _)| index)
            .nth(self.cursor)
            .unwrap_or(self.buffer.len())
    }

    fn write_translated(&mut self, text: &str) {
        let mut converted = String::with_capacity(text.len());
        for ch in text.chars() {
            if ch == '\n' {
                converted.push_str("\r\n");
            } else {
                converted.push(ch);
            }
        }
        self.write_raw(&converted);
    }

    fn write_raw(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        self.surface.write(text);
        self.last_write_ended_newline = text.ends_with('\n');
    }
}

impl std::fmt::Debug for Console {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Console")
            .field("buffer", &self.buffer)
            .field("cursor", &self.cursor)
            .field("history", &self.history.len())
            .field("pending_reads", &self.pending_reads.len())
            .field("rendered", &self.rendered)
            .finish()
    }
}

/// Cloneable handle to a shared [`Console`].
///
/// The session drives `print`/`read_line` while the key loop drives
/// `handle_key`; both go through this handle. Locking is internal and never
/// held across an await.
#[derive(Clone, Debug)]
pub struct ConsoleHandle {
    inner: Arc<Mutex<Console>>,
}

impl ConsoleHandle {
    pub fn new(console: Console) -> Self {
        Self {
            inner: Arc::new(Mutex::new(console)),
        }
    }

    /// Build a console over the given surface and hand back its handle.
    pub fn over(surface: impl Surface + 'static) -> Self {
        Self::new(Console::new(surface))
    }

    pub fn open(&self) {
        self.inner.lock().unwrap().open();
    }

    pub fn print(&self, text: &str) {
        self.inner.lock().unwrap().print(text);
    }

    pub fn read_line(&self) -> oneshot::Receiver<String> {
        self.inner.lock().unwrap().read_line()
    }

    pub fn handle_key(&self, key: Key) {
        self.inner.lock().unwrap().handle_key(key);
    }

    pub fn cancel_reads(&self) {
        self.inner.lock().unwrap().cancel_reads();
    }

    pub fn pending_read_count(&self) -> usize {
        self.inner.lock().unwrap().pending_read_count()
    }
}

pub mod testing {
    //! Surfaces for exercising the console without a terminal.

    use std::sync::{Arc, Mutex};

    use super::Surface;

    /// Records everything written to it; clones share the record.
    #[derive(Clone, Debug, Default)]
    pub struct RecordingSurface {
        written: Arc<Mutex<String>>,
    }

    impl RecordingSurface {
        pub fn new() -> Self {
            Self::default()
        }

        /// Everything written so far, ANSI sequences included.
        pub fn contents(&self) -> String {
            self.written.lock().unwrap().clone()
        }

        /// Contents with ANSI escape sequences stripped, for assertions
        /// about visible text.
        pub fn visible(&self) -> String {
            let raw = self.contents();
            let mut out = String::with_capacity(raw.len());
            let mut chars = raw.chars().peekable();
            while let Some(ch) = chars.next() {
                if ch == '\x1b' {
                    // Skip a CSI sequence: ESC '[' parameters final-byte.
                    if chars.peek() == Some(&'[') {
                        chars.next();
                        for follow in chars.by_ref() {
                            if follow.is_ascii_alphabetic() {
                                break;
                            }
                        }
                    }
                } else {
                    out.push(ch);
                }
            }
            out
        }
    }

    impl Surface for RecordingSurface {
        fn write(&mut self, text: &str) {
            self.written.lock().unwrap().push_str(text);
        }
    }
}
