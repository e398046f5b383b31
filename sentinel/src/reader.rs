//! Marker stream reader.
//!
//! This module provides [`MarkerReader`], a typed wrapper around a framed
//! async reader that produces a stream of recognized markers.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use pin_project_lite::pin_project;
use tokio::io::AsyncRead;
use tokio_util::codec::FramedRead;

use crate::codec::SentinelCodec;
use crate::error::ScanError;
use crate::marker::Marker;

pin_project! {
    /// An async stream of markers recognized on the simulator's output.
    ///
    /// `MarkerReader` wraps an [`AsyncRead`] source (normally the child
    /// process's stdout) and scans the byte stream incrementally. It
    /// implements [`Stream`], so it composes with async iteration patterns.
    ///
    /// # Example
    ///
    /// ```ignore
    /// use futures::StreamExt;
    /// use sentinel::{Marker, MarkerReader};
    ///
    /// let mut reader = MarkerReader::new(child_stdout);
    ///
    /// while let Some(result) = reader.next().await {
    ///     match result? {
    ///         Marker::Stdout(text) => { /* forward to the console */ }
    ///         marker => { /* lifecycle event */ }
    ///     }
    /// }
    /// ```
    pub struct MarkerReader<R> {
        #[pin]
        inner: FramedRead<R, SentinelCodec>,
    }
}

impl<R> MarkerReader<R>
where
    R: AsyncRead + Unpin,
{
    /// Create a new marker reader from an async read source.
    pub fn new(reader: R) -> Self {
        Self {
            inner: FramedRead::new(reader, SentinelCodec::new()),
        }
    }

    /// Create a new marker reader with a custom codec.
    ///
    /// This allows configuring options like the buffered-bytes cap.
    pub fn with_codec(reader: R, codec: SentinelCodec) -> Self {
        Self {
            inner: FramedRead::new(reader, codec),
        }
    }

    /// Consume the reader and return the underlying source.
    pub fn into_inner(self) -> R {
        self.inner.into_inner()
    }
}

impl<R> Stream for MarkerReader<R>
where
    R: AsyncRead + Unpin,
{
    type Item = Result<Marker, ScanError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.project().inner.poll_next(cx)
    }
}
