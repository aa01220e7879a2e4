//! Session I/O adapter: output backpressure and idle timeout

use bytes::{Buf, BytesMut};
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::time::{sleep, Instant, Sleep};

/// Result of offering outbound bytes to the [`OutputBuffer`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// All offered bytes were buffered
    Accepted(usize),
    /// The buffer is over its threshold; offer the same bytes again later
    WouldBlock,
}

/// Buffered-but-unsent outbound bytes with an upper threshold
#[derive(Debug)]
pub struct OutputBuffer {
    buf: BytesMut,
    threshold: usize,
}

impl OutputBuffer {
    pub fn new(threshold: usize) -> Self {
        Self {
            buf: BytesMut::new(),
            threshold,
        }
    }

    /// Buffers `data` unless more than the threshold is already pending
    pub fn offer(&mut self, data: &[u8]) -> SendOutcome {
        if self.buf.len() > self.threshold {
            return SendOutcome::WouldBlock;
        }
        self.buf.extend_from_slice(data);
        SendOutcome::Accepted(data.len())
    }

    /// Number of bytes waiting for the transport
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    fn pending(&self) -> &[u8] {
        &self.buf
    }

    fn consume(&mut self, n: usize) {
        self.buf.advance(n);
    }
}

/// Transport wrapper used by the protocol engine
///
/// Writes go through an [`OutputBuffer`]; once more than the threshold is
/// buffered, `poll_write` reports `Pending` until the transport drains it.
/// With an idle timeout configured, any read or write that stays blocked
/// past the window fails with [`io::ErrorKind::TimedOut`].
#[derive(Debug)]
pub struct SessionIo<S> {
    inner: S,
    output: OutputBuffer,
    idle_timeout: Option<Duration>,
    deadline: Option<Pin<Box<Sleep>>>,
}

impl<S> SessionIo<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// # Arguments
    ///
    /// * `inner` - Connected transport
    /// * `threshold` - Backpressure threshold in bytes
    /// * `idle_timeout` - Idle read/write window, if any
    pub fn new(inner: S, threshold: usize, idle_timeout: Option<Duration>) -> Self {
        Self {
            inner,
            output: OutputBuffer::new(threshold),
            idle_timeout,
            deadline: idle_timeout.map(|t| Box::pin(sleep(t))),
        }
    }

    /// Number of bytes accepted from the engine but not yet written
    pub fn buffered(&self) -> usize {
        self.output.buffered()
    }

    /// Pushes the idle deadline forward after progress
    fn touch(&mut self) {
        if let (Some(timeout), Some(deadline)) = (self.idle_timeout, self.deadline.as_mut()) {
            deadline.as_mut().reset(Instant::now() + timeout);
        }
    }

    fn poll_idle(&mut self, cx: &mut Context<'_>) -> io::Result<()> {
        if let Some(deadline) = self.deadline.as_mut() {
            if deadline.as_mut().poll(cx).is_ready() {
                return Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    "connection idle timeout",
                ));
            }
        }
        Ok(())
    }

    /// Writes buffered bytes until the buffer is empty or the transport blocks
    fn poll_drain(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        while !self.output.is_empty() {
            match Pin::new(&mut self.inner).poll_write(cx, self.output.pending()) {
                Poll::Ready(Ok(0)) => {
                    return Poll::Ready(Err(io::ErrorKind::WriteZero.into()));
                }
                Poll::Ready(Ok(n)) => {
                    self.output.consume(n);
                    self.touch();
                }
                Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                Poll::Pending => {
                    self.poll_idle(cx)?;
                    return Poll::Pending;
                }
            }
        }
        Poll::Ready(Ok(()))
    }
}

impl<S> AsyncRead for SessionIo<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        match Pin::new(&mut this.inner).poll_read(cx, buf) {
            Poll::Ready(result) => {
                this.touch();
                Poll::Ready(result)
            }
            Poll::Pending => {
                this.poll_idle(cx)?;
                Poll::Pending
            }
        }
    }
}

impl<S> AsyncWrite for SessionIo<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        if let Poll::Ready(Err(e)) = this.poll_drain(cx) {
            return Poll::Ready(Err(e));
        }

        match this.output.offer(buf) {
            SendOutcome::Accepted(n) => {
                if let Poll::Ready(Err(e)) = this.poll_drain(cx) {
                    return Poll::Ready(Err(e));
                }
                Poll::Ready(Ok(n))
            }
            // the failed drain above registered for writability
            SendOutcome::WouldBlock => Poll::Pending,
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        match this.poll_drain(cx) {
            Poll::Ready(Ok(())) => Pin::new(&mut this.inner).poll_flush(cx),
            other => other,
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        match this.poll_drain(cx) {
            Poll::Ready(Ok(())) => Pin::new(&mut this.inner).poll_shutdown(cx),
            other => other,
        }
    }
}
