//! Error types for SMTP conversations.

use std::io;
use std::time::Duration;

use crate::codec::FramingError;
use crate::types::{Phase, Reply};

/// Result type alias for SMTP operations.
pub type Result<T> = std::result::Result<T, Error>;

/// SMTP conversation error types.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// TCP connect (or implicit TLS handshake) did not finish in time.
    #[error("Connection timeout after {0:?}")]
    ConnectTimeout(Duration),

    /// The socket stayed idle while waiting for a reply.
    #[error("Socket idle timeout after {0:?}")]
    Timeout(Duration),

    /// Peer closed the connection mid-conversation.
    #[error("Connection closed by server")]
    ConnectionClosed,

    /// TLS error.
    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    /// TLS handshake failure while upgrading the transport.
    #[error("TLS handshake failed: {0}")]
    TlsHandshake(String),

    /// Invalid server name for TLS.
    #[error("Invalid DNS name: {0}")]
    InvalidDnsName(#[from] rustls::pki_types::InvalidDnsNameError),

    /// Octet stream could not be split into lines.
    #[error(transparent)]
    Framing(#[from] FramingError),

    /// Protocol violation (malformed reply, out of band data, ...).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Command line could not be parsed or serialized.
    #[error("Invalid command: {0}")]
    Command(String),

    /// Server answered with a reply the current phase does not accept.
    #[error("SMTP error in {phase} phase: {code} {message}")]
    Smtp {
        /// Phase the reply arrived in.
        phase: String,
        /// Reply code (e.g., 550).
        code: u16,
        /// First line of the reply.
        message: String,
    },

    /// Server rejected the credentials.
    #[error("Unable to authenticate to server: {code} {message}")]
    Auth {
        /// Reply code (e.g., 535).
        code: u16,
        /// First line of the reply.
        message: String,
    },

    /// STARTTLS is required by configuration but not advertised.
    #[error("STARTTLS is mandatory but server does not support STARTTLS.")]
    StartTlsUnavailable,

    /// Message exceeds the size the server advertised.
    #[error("Message of {size} bytes exceeds server limit of {limit} bytes")]
    MessageTooLarge {
        /// Message size.
        size: u64,
        /// Limit announced via SIZE.
        limit: u64,
    },

    /// Connection URI could not be used.
    #[error("Invalid SMTP URI: {0}")]
    InvalidUri(String),

    /// Configuration value could not be used.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Operation not valid in the current client state.
    #[error("{0}")]
    InvalidState(String),

    /// A phase observer aborted the conversation.
    #[error("Conversation aborted: {0}")]
    Aborted(String),
}

impl Error {
    /// Creates a phase-qualified SMTP error from a reply.
    #[must_use]
    pub fn smtp(phase: &Phase, reply: &Reply) -> Self {
        Self::Smtp {
            phase: phase.to_string(),
            code: reply.code.as_u16(),
            message: reply.message().to_string(),
        }
    }

    /// Creates an authentication error from a negative reply.
    #[must_use]
    pub fn auth(reply: &Reply) -> Self {
        Self::Auth {
            code: reply.code.as_u16(),
            message: reply.message().to_string(),
        }
    }

    /// Returns the SMTP reply code and message carried by this error.
    ///
    /// Only errors that originate from a server reply carry a status.
    #[must_use]
    pub fn status(&self) -> Option<(u16, &str)> {
        match self {
            Self::Smtp { code, message, .. } | Self::Auth { code, message } => {
                Some((*code, message.as_str()))
            }
            _ => None,
        }
    }

    /// Returns true if this is a permanent error (5xx).
    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        matches!(
            self,
            Self::Smtp { code, .. } | Self::Auth { code, .. } if *code >= 500 && *code < 600
        )
    }

    /// Returns true if this is a transient error (4xx).
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Smtp { code, .. } | Self::Auth { code, .. } if *code >= 400 && *code < 500
        )
    }

    /// Returns true if the socket stayed idle too long.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::ConnectTimeout(_))
    }
}
