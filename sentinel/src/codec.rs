//! Incremental marker scanner and command encoder.
//!
//! This module provides [`SentinelCodec`], a [`Decoder`]/[`Encoder`] pair
//! for the simulator's stdio protocol. The decode side maintains the
//! accumulating buffer for the session: chunks are appended verbatim by the
//! framing layer and may split a marker token anywhere, so no call assumes
//! one marker per chunk.

use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::command::Command;
use crate::error::ScanError;
use crate::marker::{Marker, SINGLETONS, STDOUT_END, STDOUT_START};

/// Default cap on unconsumed buffer growth (16 MiB).
///
/// The buffer only grows without bound when a stdout block's end token
/// never arrives or when the stream carries no recognizable markers at
/// all; both indicate a misbehaving simulator rather than a large payload.
pub const DEFAULT_MAX_BUFFERED: usize = 16 * 1024 * 1024;

/// Codec for the sentinel-tagged text protocol.
///
/// Decoding consumes exactly one recognized event per call, always the
/// *earliest* token in the buffer, so events are produced in stream order:
/// a singleton that arrives after an unterminated stdout block is held back
/// until the block completes rather than being emitted early and
/// misattributed. Text preceding a recognized token is inter-marker noise
/// and is discarded when the token is consumed.
///
/// Encoding renders a [`Command`] as its wire text plus a trailing newline.
#[derive(Debug, Clone)]
pub struct SentinelCodec {
    max_buffered: usize,
}

impl SentinelCodec {
    pub fn new() -> Self {
        Self {
            max_buffered: DEFAULT_MAX_BUFFERED,
        }
    }

    /// Create a codec with a custom cap on unconsumed buffer growth.
    pub fn with_max_buffered(max_buffered: usize) -> Self {
        Self { max_buffered }
    }
}

impl Default for SentinelCodec {
    fn default() -> Self {
        Self::new()
    }
}

/// Earliest scan hit in the buffer.
struct Hit {
    pos: usize,
    token: &'static str,
    found: Found,
}

enum Found {
    /// A token that is a complete event on its own.
    Event(Marker),
    /// The opening token of a stdout block; the payload runs to the
    /// matching end token.
    StdoutStart,
}

fn find(haystack: &[u8], needle: &str) -> Option<usize> {
    let needle = needle.as_bytes();
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Locate the earliest occurrence of any marker token.
fn earliest(src: &[u8]) -> Option<Hit> {
    let mut best: Option<Hit> = None;

    let mut consider = |pos: usize, token: &'static str, found: Found| {
        if best.as_ref().is_none_or(|b| pos < b.pos) {
            best = Some(Hit { pos, token, found });
        }
    };

    if let Some(pos) = find(src, STDOUT_START) {
        consider(pos, STDOUT_START, Found::StdoutStart);
    }
    for (token, marker) in &SINGLETONS {
        if let Some(pos) = find(src, token) {
            consider(pos, token, Found::Event(marker.clone()));
        }
    }

    best
}

impl Decoder for SentinelCodec {
    type Item = Marker;
    type Error = ScanError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some(hit) = earliest(src) else {
            // Nothing recognizable yet; wait for more data.
            return self.check_cap(src);
        };

        match hit.found {
            Found::Event(marker) => {
                src.advance(hit.pos + hit.token.len());
                Ok(Some(marker))
            }
            Found::StdoutStart => {
                let payload_from = hit.pos + STDOUT_START.len();
                let Some(end) = find(&src[payload_from..], STDOUT_END) else {
                    // Block still open; hold everything back to preserve
                    // stream order.
                    return self.check_cap(src);
                };
                let payload = std::str::from_utf8(&src[payload_from..payload_from + end])?
                    .to_owned();
                src.advance(payload_from + end + STDOUT_END.len());
                Ok(Some(Marker::Stdout(payload)))
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(src)? {
            Some(marker) => Ok(Some(marker)),
            None => {
                if !src.is_empty() {
                    tracing::debug!(
                        dropped = src.len(),
                        "discarding unrecognized bytes at end of stream"
                    );
                    src.clear();
                }
                Ok(None)
            }
        }
    }
}

impl SentinelCodec {
    fn check_cap(&self, src: &BytesMut) -> Result<Option<Marker>, ScanError> {
        if src.len() > self.max_buffered {
            return Err(ScanError::BufferOverflow {
                size: src.len(),
                max: self.max_buffered,
            });
        }
        Ok(None)
    }
}

impl Encoder<Command> for SentinelCodec {
    type Error = ScanError;

    fn encode(&mut self, item: Command, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let line = item.to_string();
        dst.reserve(line.len() + 1);
        dst.extend_from_slice(line.as_bytes());
        dst.extend_from_slice(b"\n");
        Ok(())
    }
}
