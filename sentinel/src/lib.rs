//! Sentinel-tagged text protocol for the RISC-V instruction-set simulator.
//!
//! The simulator reports lifecycle events by embedding fixed marker tokens
//! (`VM_STARTED`, `VM_STEP_COMPLETED`, ...) in its standard output, with no
//! framing and no request correlation. This crate provides the typed
//! vocabulary for both directions of that stream:
//!
//! - [`Marker`] — events recognized on the simulator's output,
//! - [`Command`] — newline-terminated commands written to its input,
//! - [`SentinelCodec`] — a [`tokio_util::codec`] codec that scans an
//!   accumulating byte buffer for markers and renders commands,
//! - [`MarkerReader`] / [`CommandWriter`] — framed stream/sink wrappers.
//!
//! # Scan discipline
//!
//! The codec consumes exactly one recognized event per scan, always the
//! earliest token in the buffer, so a later marker can never be observed
//! before an earlier one. Which command a marker answers is established
//! purely by the single-in-flight discipline upheld upstream; this crate
//! only guarantees order and lossless payload extraction.
//!
//! # Scope
//!
//! This crate intentionally handles only wire concerns. Process lifecycle
//! lives in `supervisor`; stop/step/breakpoint semantics live in
//! `debugger`.

mod codec;
mod command;
mod error;
mod marker;
mod reader;
mod writer;

pub use codec::{DEFAULT_MAX_BUFFERED, SentinelCodec};
pub use command::{Command, MemorySegment};
pub use error::ScanError;
pub use marker::Marker;
pub use reader::MarkerReader;
pub use writer::CommandWriter;
