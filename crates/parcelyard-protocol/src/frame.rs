// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Wire format for stream framing.
//!
//! A connection carries one JSON object per line:
//! - N bytes: UTF-8 JSON payload
//! - 1 byte: `\n` terminator
//!
//! Surrounding whitespace (including a `\r` before the terminator) is trimmed
//! and blank lines are skipped.

use bytes::{Bytes, BytesMut};
use serde::Serialize;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Maximum accepted line length (1 MB), terminator excluded.
pub const MAX_LINE_LENGTH: usize = 1024 * 1024;

/// Line terminator
pub const TERMINATOR: u8 = b'\n';

const READ_CHUNK: usize = 8 * 1024;

/// Errors that can occur during frame encoding/decoding
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("line too large: {0} bytes (max: {MAX_LINE_LENGTH})")]
    LineTooLong(usize),

    #[error("line is not valid UTF-8")]
    InvalidUtf8,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON encode error: {0}")]
    Encode(#[from] serde_json::Error),
}

impl FrameError {
    /// Whether the stream is still usable after this error.
    ///
    /// Line-level problems only spoil the offending line; I/O failures end the stream.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, FrameError::LineTooLong(_) | FrameError::InvalidUtf8)
    }
}

/// Incremental splitter turning a byte stream into trimmed lines.
#[derive(Debug)]
pub struct LineFramer {
    buf: BytesMut,
    max_line_length: usize,
    /// Set while dropping the remainder of an oversized line.
    discarding: bool,
}

impl Default for LineFramer {
    fn default() -> Self {
        Self::new()
    }
}

impl LineFramer {
    /// Create a framer with the default [`MAX_LINE_LENGTH`].
    pub fn new() -> Self {
        Self::with_max_line_length(MAX_LINE_LENGTH)
    }

    /// Create a framer with a custom line length limit.
    pub fn with_max_line_length(max_line_length: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(READ_CHUNK),
            max_line_length,
            discarding: false,
        }
    }

    /// Append raw bytes received from the peer.
    pub fn extend_from_slice(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Mutable access to the receive buffer, for `read_buf`.
    pub fn buffer_mut(&mut self) -> &mut BytesMut {
        &mut self.buf
    }

    /// Bytes buffered but not yet terminated.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Extract the next complete, non-blank line.
    ///
    /// Returns `None` when no complete line is buffered. An oversized line is
    /// reported once and the rest of it is dropped up to its terminator.
    pub fn next_frame(&mut self) -> Option<Result<String, FrameError>> {
        loop {
            let Some(pos) = self.buf.iter().position(|b| *b == TERMINATOR) else {
                if self.buf.len() > self.max_line_length {
                    let len = self.buf.len();
                    self.buf.clear();
                    if !self.discarding {
                        self.discarding = true;
                        return Some(Err(FrameError::LineTooLong(len)));
                    }
                }
                return None;
            };

            let raw = self.buf.split_to(pos + 1);
            if self.discarding {
                // Tail of a line that was already reported.
                self.discarding = false;
                continue;
            }

            let line = &raw[..pos];
            if line.len() > self.max_line_length {
                return Some(Err(FrameError::LineTooLong(line.len())));
            }

            match std::str::from_utf8(line) {
                Ok(text) => {
                    let trimmed = text.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    return Some(Ok(trimmed.to_string()));
                }
                Err(_) => return Some(Err(FrameError::InvalidUtf8)),
            }
        }
    }
}

/// Serialize a message as one terminated line.
pub fn encode_line<T: Serialize>(msg: &T) -> Result<Bytes, FrameError> {
    let mut payload = serde_json::to_vec(msg)?;
    payload.push(TERMINATOR);
    Ok(Bytes::from(payload))
}

/// Write a message as one terminated line and flush.
pub async fn write_line<W, T>(writer: &mut W, msg: &T) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let bytes = encode_line(msg)?;
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

/// Line reader over any async byte source.
pub struct FramedReader<R> {
    reader: R,
    framer: LineFramer,
}

impl<R: AsyncRead + Unpin> FramedReader<R> {
    /// Wrap a reader with the default framer.
    pub fn new(reader: R) -> Self {
        Self::with_framer(reader, LineFramer::new())
    }

    /// Wrap a reader with a custom framer.
    pub fn with_framer(reader: R, framer: LineFramer) -> Self {
        Self { reader, framer }
    }

    /// Read the next line.
    ///
    /// `Ok(None)` means the peer closed the stream; an unterminated trailing
    /// fragment is dropped. Recoverable errors (see [`FrameError::is_recoverable`])
    /// leave the reader usable.
    pub async fn next_line(&mut self) -> Result<Option<String>, FrameError> {
        loop {
            if let Some(frame) = self.framer.next_frame() {
                return frame.map(Some);
            }

            let buf = self.framer.buffer_mut();
            buf.reserve(READ_CHUNK);
            let n = self.reader.read_buf(buf).await?;
            if n == 0 {
                return Ok(None);
            }
        }
    }

    /// Consume the wrapper, returning the underlying reader.
    pub fn into_inner(self) -> R {
        self.reader
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_multiple_lines_in_one_chunk() {
        let mut framer = LineFramer::new();
        framer.extend_from_slice(b"{\"a\":1}\n  {\"b\":2}  \r\n\n");

        assert_eq!(framer.next_frame().unwrap().unwrap(), "{\"a\":1}");
        assert_eq!(framer.next_frame().unwrap().unwrap(), "{\"b\":2}");
        assert!(framer.next_frame().is_none());
        assert_eq!(framer.pending(), 0);
    }

    #[test]
    fn test_partial_line_waits_for_terminator() {
        let mut framer = LineFramer::new();
        framer.extend_from_slice(b"{\"type\":\"scan");
        assert!(framer.next_frame().is_none());

        framer.extend_from_slice(b"_package\"}\n");
        assert_eq!(
            framer.next_frame().unwrap().unwrap(),
            "{\"type\":\"scan_package\"}"
        );
    }

    #[test]
    fn test_invalid_utf8_spoils_only_its_line() {
        let mut framer = LineFramer::new();
        framer.extend_from_slice(&[0xff, 0xfe, b'\n']);
        framer.extend_from_slice(b"ok\n");

        assert!(matches!(
            framer.next_frame(),
            Some(Err(FrameError::InvalidUtf8))
        ));
        assert_eq!(framer.next_frame().unwrap().unwrap(), "ok");
    }

    #[test]
    fn test_oversized_line_reported_once() {
        let mut framer = LineFramer::with_max_line_length(8);
        framer.extend_from_slice(b"0123456789");
        let err = framer.next_frame().unwrap().unwrap_err();
        assert!(matches!(err, FrameError::LineTooLong(10)));
        assert!(err.is_recoverable());

        // Remainder of the same line is silently dropped.
        framer.extend_from_slice(b"abcdefghijk");
        assert!(framer.next_frame().is_none());
        framer.extend_from_slice(b"xyz\nnext\n");
        assert_eq!(framer.next_frame().unwrap().unwrap(), "next");
    }

    #[test]
    fn test_encode_line_terminates() {
        let bytes = encode_line(&serde_json::json!({"type": "ack"})).unwrap();
        assert_eq!(&bytes[..], b"{\"type\":\"ack\"}\n");
    }

    #[tokio::test]
    async fn test_framed_reader_eof_drops_fragment() {
        let data: &[u8] = b"one\ntwo\nthr";
        let mut reader = FramedReader::new(data);

        assert_eq!(reader.next_line().await.unwrap().as_deref(), Some("one"));
        assert_eq!(reader.next_line().await.unwrap().as_deref(), Some("two"));
        assert_eq!(reader.next_line().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_write_line_roundtrip_through_reader() {
        let (mut client, server) = tokio::io::duplex(64);

        write_line(&mut client, &serde_json::json!({"n": 1}))
            .await
            .unwrap();
        drop(client);

        let mut reader = FramedReader::new(server);
        assert_eq!(reader.next_line().await.unwrap().as_deref(), Some("{\"n\":1}"));
    }
}
