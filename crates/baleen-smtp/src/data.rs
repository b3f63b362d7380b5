//! Mail data encoding for the DATA phase.
//!
//! [`DotEncoder`] turns arbitrary content into RFC 5321 mail data: leading
//! dots are doubled, bare CR and bare LF become CRLF, and the stream is
//! closed with `.` CRLF. It works on chunks, so a message never has to be
//! held in memory as a whole.

#![allow(clippy::missing_errors_doc)]

use std::fmt;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::connection::idle;
use crate::error::Result;

/// Read size when streaming message content.
const CHUNK_SIZE: usize = 8192;

const CR: u8 = b'\r';
const LF: u8 = b'\n';
const DOT: u8 = b'.';

/// Streaming dot-stuffing encoder.
#[derive(Debug, Default, Clone)]
pub struct DotEncoder {
    /// Last octet written to the output; `None` before the first one.
    last: Option<u8>,
}

impl DotEncoder {
    /// Creates an encoder positioned at the start of a line.
    #[must_use]
    pub const fn new() -> Self {
        Self { last: None }
    }

    /// Encodes one chunk of content into `out`.
    pub fn encode(&mut self, chunk: &[u8], out: &mut BytesMut) {
        out.reserve(chunk.len() + chunk.len() / 64 + 2);
        for &byte in chunk {
            if self.last == Some(CR) && byte != LF {
                self.emit(out, LF);
            }
            match byte {
                DOT if self.at_line_start() => {
                    self.emit(out, DOT);
                    self.emit(out, DOT);
                }
                LF if self.last != Some(CR) => {
                    self.emit(out, CR);
                    self.emit(out, LF);
                }
                other => self.emit(out, other),
            }
        }
    }

    /// Terminates the data stream with `CRLF . CRLF` as needed.
    pub fn finish(&mut self, out: &mut BytesMut) {
        match self.last {
            Some(CR) => self.emit(out, LF),
            Some(LF) => {}
            _ => {
                self.emit(out, CR);
                self.emit(out, LF);
            }
        }
        out.extend_from_slice(b".\r\n");
        self.last = Some(LF);
    }

    /// Encodes a complete in-memory message.
    #[must_use]
    pub fn encode_all(content: &[u8]) -> Vec<u8> {
        let mut encoder = Self::new();
        let mut out = BytesMut::new();
        encoder.encode(content, &mut out);
        encoder.finish(&mut out);
        out.to_vec()
    }

    const fn at_line_start(&self) -> bool {
        matches!(self.last, None | Some(LF))
    }

    fn emit(&mut self, out: &mut BytesMut, byte: u8) {
        out.extend_from_slice(&[byte]);
        self.last = Some(byte);
    }
}

/// Message content handed to the DATA phase.
pub enum MessageSource {
    /// Content already in memory.
    Bytes(Bytes),
    /// Content read from a live stream.
    Reader {
        /// The stream to read from.
        reader: Box<dyn AsyncRead + Send + Unpin>,
        /// Content length, if known (enables the SIZE check).
        len: Option<u64>,
    },
}

impl MessageSource {
    /// Wraps a reader of unknown length.
    pub fn reader(reader: impl AsyncRead + Send + Unpin + 'static) -> Self {
        Self::Reader {
            reader: Box::new(reader),
            len: None,
        }
    }

    /// Wraps a reader whose length is known up front.
    pub fn reader_with_len(reader: impl AsyncRead + Send + Unpin + 'static, len: u64) -> Self {
        Self::Reader {
            reader: Box::new(reader),
            len: Some(len),
        }
    }

    /// Returns the content length, if known.
    #[must_use]
    pub fn len_hint(&self) -> Option<u64> {
        match self {
            Self::Bytes(bytes) => u64::try_from(bytes.len()).ok(),
            Self::Reader { len, .. } => *len,
        }
    }

    /// Streams the dot-stuffed content, including the terminating `.` line,
    /// into `writer`. Returns the number of octets written.
    ///
    /// Every write must make progress within `idle`, otherwise the transfer
    /// fails with [`Error::Timeout`](crate::Error::Timeout).
    pub async fn transmit<W>(self, writer: &mut W, idle_timeout: Duration) -> Result<u64>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let mut encoder = DotEncoder::new();
        let mut out = BytesMut::with_capacity(CHUNK_SIZE + CHUNK_SIZE / 8);
        let mut written = 0u64;

        match self {
            Self::Bytes(bytes) => {
                for chunk in bytes.chunks(CHUNK_SIZE) {
                    encoder.encode(chunk, &mut out);
                    written += flush(writer, &mut out, idle_timeout).await?;
                }
            }
            Self::Reader { mut reader, .. } => {
                let mut buf = vec![0u8; CHUNK_SIZE];
                loop {
                    let n = reader.read(&mut buf).await?;
                    if n == 0 {
                        break;
                    }
                    encoder.encode(&buf[..n], &mut out);
                    written += flush(writer, &mut out, idle_timeout).await?;
                }
            }
        }

        encoder.finish(&mut out);
        written += flush(writer, &mut out, idle_timeout).await?;
        idle(idle_timeout, writer.flush()).await?;
        Ok(written)
    }
}

async fn flush<W>(writer: &mut W, out: &mut BytesMut, idle_timeout: Duration) -> Result<u64>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    idle(idle_timeout, writer.write_all(out)).await?;
    let n = out.len() as u64;
    out.clear();
    Ok(n)
}

impl fmt::Debug for MessageSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bytes(bytes) => f.debug_tuple("Bytes").field(&bytes.len()).finish(),
            Self::Reader { len, .. } => f.debug_struct("Reader").field("len", len).finish(),
        }
    }
}

impl From<Bytes> for MessageSource {
    fn from(bytes: Bytes) -> Self {
        Self::Bytes(bytes)
    }
}

impl From<Vec<u8>> for MessageSource {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Bytes(Bytes::from(bytes))
    }
}

impl From<String> for MessageSource {
    fn from(text: String) -> Self {
        Self::Bytes(Bytes::from(text))
    }
}

impl From<&str> for MessageSource {
    fn from(text: &str) -> Self {
        Self::Bytes(Bytes::copy_from_slice(text.as_bytes()))
    }
}
