//! Framed, half-duplex transport for one SMTP conversation.

use std::future::Future;
use std::io;
use std::time::Duration;

use rustls::pki_types::ServerName;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_rustls::TlsConnector;

use super::SecureableStream;
use crate::codec::{LineFramer, ReplyAssembler};
use crate::data::MessageSource;
use crate::error::{Error, Result};
use crate::types::{Reply, SecurityInfo, SecurityType};

/// Default buffer size for reading.
const DEFAULT_BUFFER_SIZE: usize = 4096;

const OUT_OF_BAND: &str = "Out of band data from server received.";

/// Couples a [`SecureableStream`] with the line framer and reply assembler.
#[derive(Debug)]
pub struct Transport {
    stream: SecureableStream,
    framer: LineFramer,
    assembler: ReplyAssembler,
    read_buf: Vec<u8>,
    idle_timeout: Duration,
}

impl Transport {
    /// Creates a transport over an established stream.
    #[must_use]
    pub fn new(stream: SecureableStream, idle_timeout: Duration) -> Self {
        Self {
            stream,
            framer: LineFramer::new(),
            assembler: ReplyAssembler::new(),
            read_buf: vec![0; DEFAULT_BUFFER_SIZE],
            idle_timeout,
        }
    }

    /// Writes one CRLF terminated command line.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] if unread server data is buffered,
    /// [`Error::Timeout`] if the server stops reading, or an I/O error if the
    /// write fails.
    pub async fn write_line(&mut self, line: &str) -> Result<()> {
        self.ensure_quiet()?;
        idle(self.idle_timeout, self.stream.write_all(line.as_bytes())).await?;
        idle(self.idle_timeout, self.stream.flush()).await
    }

    /// Streams dot-stuffed message content. Returns the octets written.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Timeout`] if the server stops accepting data, or an
    /// I/O error if reading the source or writing fails.
    pub async fn write_data(&mut self, source: MessageSource) -> Result<u64> {
        self.ensure_quiet()?;
        source.transmit(&mut self.stream, self.idle_timeout).await
    }

    /// Reads until one complete reply has been assembled.
    ///
    /// # Errors
    ///
    /// - [`Error::Timeout`] if the socket stays idle for the configured time
    /// - [`Error::ConnectionClosed`] on EOF
    /// - [`Error::Framing`] / [`Error::Protocol`] for malformed input, or
    ///   when the server sent more than the reply
    pub async fn read_reply(&mut self) -> Result<Reply> {
        loop {
            while let Some(line) = self.framer.next_line() {
                let line = line?;
                tracing::debug!("S: {line}");
                if let Some(reply) = self.assembler.push_line(&line)? {
                    if self.framer.has_pending() {
                        return Err(Error::Protocol(OUT_OF_BAND.into()));
                    }
                    return Ok(reply);
                }
            }

            let n = idle(self.idle_timeout, self.stream.read(&mut self.read_buf)).await?;
            if n == 0 {
                return Err(Error::ConnectionClosed);
            }
            self.framer.push(&self.read_buf[..n]);
        }
    }

    /// Negotiates TLS over the current stream.
    ///
    /// # Errors
    ///
    /// Refuses with [`Error::Protocol`] if the server already sent data that
    /// has not been read; otherwise see [`SecureableStream::upgrade`].
    pub async fn upgrade(
        &mut self,
        connector: &TlsConnector,
        server_name: ServerName<'static>,
        kind: SecurityType,
    ) -> Result<SecurityInfo> {
        self.ensure_quiet()?;
        let info = self.stream.upgrade(connector, server_name, kind).await?;
        self.framer.reset();
        self.assembler.reset();
        Ok(info)
    }

    /// Returns true if TLS is active.
    #[must_use]
    pub const fn is_secure(&self) -> bool {
        self.stream.is_secure()
    }

    /// Shuts the stream down. Safe to call more than once.
    pub async fn shutdown(&mut self) {
        if self.stream.is_closed() {
            return;
        }
        if let Err(e) = self.stream.shutdown().await {
            tracing::debug!(?e, "Shutdown failed");
        }
        self.stream = SecureableStream::Closed;
    }

    fn ensure_quiet(&self) -> Result<()> {
        if self.framer.has_pending() || self.assembler.is_pending() {
            return Err(Error::Protocol(OUT_OF_BAND.into()));
        }
        Ok(())
    }
}

/// Runs one socket operation, failing with [`Error::Timeout`] if it makes
/// no progress within `limit`.
pub(crate) async fn idle<T>(limit: Duration, op: impl Future<Output = io::Result<T>>) -> Result<T> {
    match tokio::time::timeout(limit, op).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(Error::Timeout(limit)),
    }
}
