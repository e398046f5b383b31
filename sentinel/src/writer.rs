//! Command writer.
//!
//! This module provides [`CommandWriter`], a typed wrapper around a framed
//! async writer that renders commands onto the simulator's input stream.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Sink;
use pin_project_lite::pin_project;
use tokio::io::AsyncWrite;
use tokio_util::codec::FramedWrite;

use crate::codec::SentinelCodec;
use crate::command::Command;
use crate::error::ScanError;

pin_project! {
    /// An async sink for simulator commands.
    ///
    /// `CommandWriter` wraps an [`AsyncWrite`] destination (normally the
    /// child process's stdin) and writes each command as its wire text plus
    /// a trailing newline.
    pub struct CommandWriter<W> {
        #[pin]
        inner: FramedWrite<W, SentinelCodec>,
    }
}

impl<W> CommandWriter<W>
where
    W: AsyncWrite + Unpin,
{
    /// Create a new command writer from an async write destination.
    pub fn new(writer: W) -> Self {
        Self {
            inner: FramedWrite::new(writer, SentinelCodec::new()),
        }
    }

    /// Send one command: feed, flush, and await completion.
    pub async fn send(&mut self, command: Command) -> Result<(), ScanError> {
        use futures::SinkExt;
        SinkExt::send(&mut self.inner, command).await
    }

    /// Consume the writer and return the underlying destination.
    pub fn into_inner(self) -> W {
        self.inner.into_inner()
    }
}

impl<W> Sink<Command> for CommandWriter<W>
where
    W: AsyncWrite + Unpin,
{
    type Error = ScanError;

    fn poll_ready(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.project().inner.poll_ready(cx)
    }

    fn start_send(self: Pin<&mut Self>, item: Command) -> Result<(), Self::Error> {
        self.project().inner.start_send(item)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.project().inner.poll_flush(cx)
    }

    fn poll_close(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.project().inner.poll_close(cx)
    }
}
