//! Newline-delimited JSON framing.
//!
//! Layout on the wire after the magic bytes:
//! - one JSON document per line, terminated by `\n`
//! - no length prefix; standard JSON encoding never emits a raw newline
//! - blank lines are keep-alives and are skipped
//!
//! The reader enforces a hard ceiling per line so a peer that never sends a
//! newline cannot grow our buffer without bound. Bytes after the last newline
//! at EOF are discarded.

use std::io;

use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("message exceeds {limit} bytes")]
    TooLarge { limit: usize },
    #[error("stream i/o failed: {0}")]
    Io(#[from] io::Error),
    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Buffered line reader with a per-line size ceiling.
#[derive(Debug)]
pub struct LineReader<R> {
    inner: BufReader<R>,
    max_len: usize,
    line: Vec<u8>,
}

impl<R> LineReader<R>
where
    R: AsyncRead + Unpin,
{
    pub fn new(reader: R, max_len: usize) -> Self {
        Self {
            inner: BufReader::new(reader),
            max_len,
            line: Vec::new(),
        }
    }

    pub fn max_len(&self) -> usize {
        self.max_len
    }

    pub fn get_mut(&mut self) -> &mut R {
        self.inner.get_mut()
    }

    pub fn into_inner(self) -> R {
        self.inner.into_inner()
    }

    /// Returns the next non-empty line without its terminator, or `None` at EOF.
    pub async fn next_line(&mut self) -> Result<Option<Vec<u8>>, FrameError> {
        loop {
            self.line.clear();
            if !self.fill_line().await? {
                return Ok(None);
            }
            if self.line.is_empty() {
                continue;
            }
            return Ok(Some(std::mem::take(&mut self.line)));
        }
    }

    /// Reads up to and including the next `\n` into `self.line` (terminator stripped).
    /// Returns false on EOF.
    async fn fill_line(&mut self) -> Result<bool, FrameError> {
        loop {
            let available = self.inner.fill_buf().await?;
            if available.is_empty() {
                if !self.line.is_empty() {
                    tracing::trace!(
                        target: "network::codec",
                        discarded = self.line.len(),
                        "eof inside unterminated line"
                    );
                }
                return Ok(false);
            }

            match available.iter().position(|b| *b == b'\n') {
                Some(pos) => {
                    if self.line.len() + pos > self.max_len {
                        return Err(FrameError::TooLarge {
                            limit: self.max_len,
                        });
                    }
                    self.line.extend_from_slice(&available[..pos]);
                    self.inner.consume(pos + 1);
                    return Ok(true);
                }
                None => {
                    let n = available.len();
                    if self.line.len() + n > self.max_len {
                        return Err(FrameError::TooLarge {
                            limit: self.max_len,
                        });
                    }
                    self.line.extend_from_slice(available);
                    self.inner.consume(n);
                }
            }
        }
    }
}

/// Serializes `value` to one newline-terminated line.
pub fn encode_line<T>(value: &T, max_len: usize) -> Result<Vec<u8>, FrameError>
where
    T: Serialize + ?Sized,
{
    let mut buf = serde_json::to_vec(value)?;
    if buf.len() > max_len {
        return Err(FrameError::TooLarge { limit: max_len });
    }
    buf.push(b'\n');
    Ok(buf)
}

/// Writes `value` as one line and flushes.
pub async fn write_line<W, T>(writer: &mut W, value: &T, max_len: usize) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
    T: Serialize + ?Sized,
{
    let buf = encode_line(value, max_len)?;
    writer.write_all(&buf).await?;
    writer.flush().await?;
    Ok(())
}
