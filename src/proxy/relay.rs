//! Line-framed streaming relay.
//!
//! Provides [`LineFramer`] for reassembling complete lines across TCP chunk
//! boundaries, and [`LineRelay`], the stream adapter that turns an upstream
//! byte stream into the line-framed body sent to the client. Every non-empty
//! upstream line is forwarded with exactly one trailing newline, in order,
//! as soon as its terminator is seen.

use std::pin::Pin;
use std::task::{Context, Poll};

use axum::body::Body;
use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};

/// Buffers raw bytes across chunk boundaries and re-emits them as
/// newline-terminated non-empty lines.
///
/// Only the trailing partial line is retained between pushes; completed
/// lines leave the buffer immediately.
#[derive(Default)]
pub struct LineFramer {
    buffer: Vec<u8>,
}

/// Strip a single trailing `\r` so CRLF upstream framing normalizes to `\n`.
fn trim_cr(line: &[u8]) -> &[u8] {
    line.strip_suffix(b"\r").unwrap_or(line)
}

impl LineFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return the re-framed bytes for every line it
    /// completed. Blank lines produce no output. Returns `None` when the
    /// chunk completed no non-empty line.
    pub fn push(&mut self, bytes: &[u8]) -> Option<Bytes> {
        self.buffer.extend_from_slice(bytes);

        let mut out = BytesMut::new();
        let mut consumed = 0;
        while let Some(pos) = self.buffer[consumed..].iter().position(|&b| b == b'\n') {
            let line = trim_cr(&self.buffer[consumed..consumed + pos]);
            if !line.is_empty() {
                out.extend_from_slice(line);
                out.extend_from_slice(b"\n");
            }
            consumed += pos + 1;
        }
        self.buffer.drain(..consumed);

        if out.is_empty() {
            None
        } else {
            Some(out.freeze())
        }
    }

    /// Flush the trailing partial line at end-of-stream, newline-terminated.
    pub fn flush(&mut self) -> Option<Bytes> {
        let line = trim_cr(&self.buffer);
        let out = if line.is_empty() {
            None
        } else {
            let mut bytes = BytesMut::with_capacity(line.len() + 1);
            bytes.extend_from_slice(line);
            bytes.extend_from_slice(b"\n");
            Some(bytes.freeze())
        };
        self.buffer.clear();
        out
    }
}

/// Stream adapter relaying an upstream byte stream as framed lines.
///
/// Yields at most the lines completed by one upstream chunk per item, so a
/// slow client propagates backpressure to the upstream read. Dropping the
/// adapter (client disconnect) drops the upstream stream with it, releasing
/// the upstream connection.
pub struct LineRelay<S> {
    upstream: S,
    framer: LineFramer,
    done: bool,
}

impl<S> LineRelay<S> {
    pub fn new(upstream: S) -> Self {
        Self {
            upstream,
            framer: LineFramer::new(),
            done: false,
        }
    }
}

impl<S, E> Stream for LineRelay<S>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: std::fmt::Display,
{
    type Item = Result<Bytes, std::convert::Infallible>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            if this.done {
                return Poll::Ready(None);
            }
            match this.upstream.poll_next_unpin(cx) {
                Poll::Ready(Some(Ok(chunk))) => {
                    if let Some(lines) = this.framer.push(&chunk) {
                        return Poll::Ready(Some(Ok(lines)));
                    }
                    // Chunk completed no line, keep reading.
                }
                Poll::Ready(Some(Err(e))) => {
                    // The line protocol has no mid-stream error envelope:
                    // the client just sees the stream end.
                    tracing::warn!(error = %e, "Upstream stream interrupted");
                    this.done = true;
                    return Poll::Ready(None);
                }
                Poll::Ready(None) => {
                    this.done = true;
                    if let Some(tail) = this.framer.flush() {
                        return Poll::Ready(Some(Ok(tail)));
                    }
                    return Poll::Ready(None);
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

/// Wrap an upstream byte stream into a line-framed axum response body.
pub fn relay_body<S, E>(upstream: S) -> Body
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    Body::from_stream(LineRelay::new(Box::pin(upstream)))
}
