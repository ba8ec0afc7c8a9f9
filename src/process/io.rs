//! I/O primitives for the line-delimited JSON channel.
//!
//! [`FrameWriter`] serializes whole lines onto the server's stdin,
//! [`FrameReader`] splits the server's stdout into [`Frame`]s, and
//! [`forward_stderr`] drains the diagnostic stream into `tracing`.

use std::io;

use futures::stream::{self, BoxStream};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use super::MAX_FRAME_LEN;
use crate::{Error, Result};

/// One unit read from the server's stdout.
#[derive(Debug)]
pub enum Frame {
    /// A line that parsed as a JSON value.
    Message(Value),
    /// A line that could not be decoded. The stream continues after it.
    Malformed(Error),
}

/// Reads newline-delimited JSON values from the server's stdout.
///
/// Empty lines are skipped. Lines longer than [`MAX_FRAME_LEN`] are
/// discarded and reported as [`Frame::Malformed`] instead of being buffered.
pub struct FrameReader<R> {
    reader: BufReader<R>,
    buffer: Vec<u8>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    /// Create a new reader over a byte stream.
    pub fn new(inner: R) -> Self {
        Self {
            reader: BufReader::new(inner),
            buffer: Vec::with_capacity(4096),
        }
    }

    /// Read the next frame.
    ///
    /// Returns `Ok(Some(frame))` for each non-empty line, `Ok(None)` at EOF,
    /// or `Err` if the underlying read fails.
    pub async fn read_frame(&mut self) -> Result<Option<Frame>> {
        loop {
            let oversized = match self.read_line().await.map_err(Error::io)? {
                None => return Ok(None),
                Some(oversized) => oversized,
            };

            if oversized {
                return Ok(Some(Frame::Malformed(Error::io(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("frame exceeds {MAX_FRAME_LEN} bytes"),
                )))));
            }

            let line = match std::str::from_utf8(&self.buffer) {
                Ok(line) => line.trim(),
                Err(e) => {
                    return Ok(Some(Frame::Malformed(Error::io(io::Error::new(
                        io::ErrorKind::InvalidData,
                        e,
                    )))))
                }
            };

            if line.is_empty() {
                continue;
            }

            let frame = match serde_json::from_str::<Value>(line) {
                Ok(value) => Frame::Message(value),
                Err(e) => Frame::Malformed(Error::json_parse(e, line)),
            };
            return Ok(Some(frame));
        }
    }

    /// Fill `self.buffer` with the next line, without its terminator.
    ///
    /// Returns `Ok(Some(true))` when the line was too long and dropped, and
    /// `Ok(None)` at EOF with nothing buffered. A final line without a
    /// trailing newline is still returned.
    async fn read_line(&mut self) -> io::Result<Option<bool>> {
        self.buffer.clear();
        let mut oversized = false;
        let mut saw_bytes = false;

        loop {
            let available = self.reader.fill_buf().await?;
            if available.is_empty() {
                return Ok(saw_bytes.then_some(oversized));
            }
            saw_bytes = true;

            let (chunk, consumed, done) = match available.iter().position(|b| *b == b'\n') {
                Some(pos) => (&available[..pos], pos + 1, true),
                None => (available, available.len(), false),
            };

            if !oversized {
                if self.buffer.len() + chunk.len() > MAX_FRAME_LEN {
                    oversized = true;
                    self.buffer.clear();
                } else {
                    self.buffer.extend_from_slice(chunk);
                }
            }

            self.reader.consume(consumed);
            if done {
                return Ok(Some(oversized));
            }
        }
    }

    /// Read frames as an async stream.
    ///
    /// The stream ends at EOF, or after yielding the first read error.
    pub fn into_stream(self) -> FrameStream
    where
        R: Send + 'static,
    {
        Box::pin(stream::unfold(Some(self), |state| async move {
            let mut reader = state?;
            match reader.read_frame().await {
                Ok(Some(frame)) => Some((Ok(frame), Some(reader))),
                Ok(None) => None,
                Err(e) => Some((Err(e), None)),
            }
        }))
    }
}

/// An async stream of frames, created by [`FrameReader::into_stream`].
pub type FrameStream = BoxStream<'static, Result<Frame>>;

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Writes frames to the server's stdin.
///
/// Each [`send_line`](Self::send_line) writes the line and its newline while
/// holding an async mutex, so lines from concurrent callers never
/// interleave and reach the server in the order the lock was acquired.
pub struct FrameWriter {
    inner: Mutex<Option<BoxedWriter>>,
}

impl FrameWriter {
    /// Create a new writer over any byte sink.
    pub fn new<W>(writer: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            inner: Mutex::new(Some(Box::new(writer))),
        }
    }

    /// Write `line` followed by a single `\n`, then flush.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the line contains a newline, if the writer
    /// was closed, or if the write fails.
    pub async fn send_line(&self, line: &str) -> Result<()> {
        if line.contains('\n') {
            return Err(Error::io(io::Error::new(
                io::ErrorKind::InvalidInput,
                "frame contains a newline",
            )));
        }

        let mut frame = Vec::with_capacity(line.len() + 1);
        frame.extend_from_slice(line.as_bytes());
        frame.push(b'\n');

        let mut guard = self.inner.lock().await;
        let writer = guard.as_mut().ok_or_else(|| {
            Error::io(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "server stdin is closed",
            ))
        })?;
        writer.write_all(&frame).await.map_err(Error::io)?;
        writer.flush().await.map_err(Error::io)?;
        Ok(())
    }

    /// Shut down and drop the underlying writer.
    ///
    /// Later sends fail with a broken-pipe error. Closing twice is a no-op.
    pub async fn close(&self) {
        if let Some(mut writer) = self.inner.lock().await.take() {
            if let Err(e) = writer.shutdown().await {
                tracing::debug!("error shutting down server stdin: {}", e);
            }
        }
    }
}

/// Forward each line of the server's stderr to `tracing`.
///
/// Lines are logged at `debug` under the `libbinja::server` target and are
/// never interpreted as protocol data. The task ends at EOF.
pub fn forward_stderr<R>(stderr: R) -> JoinHandle<()>
where
    R: AsyncRead + Send + Unpin + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    tracing::debug!(target: "libbinja::server", "{}", line.trim_end());
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::debug!("stopped reading server stderr: {}", e);
                    break;
                }
            }
        }
    })
}
