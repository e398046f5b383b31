//! Error types for marker scanning.

use std::io;

use thiserror::Error;

/// Errors produced while scanning the simulator's output stream or writing
/// commands to its input.
#[derive(Debug, Error)]
pub enum ScanError {
    /// The underlying byte stream failed.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// A stdout block carried bytes that are not valid UTF-8.
    #[error("stdout block is not valid UTF-8: {0}")]
    InvalidPayload(#[from] std::str::Utf8Error),

    /// The unconsumed buffer grew past the configured cap without yielding
    /// an event, usually an unterminated stdout block.
    #[error("scan buffer holds {size} bytes, more than the {max} byte cap")]
    BufferOverflow { size: usize, max: usize },
}
