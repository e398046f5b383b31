//! Narrow interfaces to the front-end widgets around the session.
//!
//! The session never renders anything itself; it pushes diagnostics, status
//! label text, and memory dumps through these traits. Front-ends implement
//! what they display and leave the rest on the no-op defaults.

use std::path::Path;

use snapshot::MemoryDump;

/// Severity of a published diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

/// One diagnostic for a source file; `line` is 0-based.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub line: u32,
    pub message: String,
    pub severity: Severity,
}

/// Receives the full diagnostic set for a file; an empty set clears it.
pub trait DiagnosticsSink: Send {
    fn set(&mut self, file: &Path, diagnostics: Vec<Diagnostic>);
}

/// A one-line status label.
pub trait StatusDisplay: Send {
    fn set_text(&mut self, text: String);
}

/// Receives dumped memory for presentation.
pub trait MemoryPresenter: Send {
    fn show(&mut self, dump: &MemoryDump);
}

/// Discards everything; the default collaborator.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCollaborator;

impl DiagnosticsSink for NoopCollaborator {
    fn set(&mut self, _file: &Path, _diagnostics: Vec<Diagnostic>) {}
}

impl StatusDisplay for NoopCollaborator {
    fn set_text(&mut self, _text: String) {}
}

impl MemoryPresenter for NoopCollaborator {
    fn show(&mut self, _dump: &MemoryDump) {}
}
