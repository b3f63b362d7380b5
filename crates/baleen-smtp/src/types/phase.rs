//! Conversation phase, half-duplex direction and transport security.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Stage of the SMTP conversation.
///
/// Exactly one phase is active at a time; it decides how the next reply is
/// interpreted and which commands may be issued.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Phase {
    /// Client created, nothing happened yet.
    #[default]
    Idle,
    /// TCP connect (and implicit TLS handshake) in progress.
    Connecting,
    /// Waiting for the 220 greeting.
    Greeting,
    /// EHLO issued.
    Ehlo,
    /// An extension is negotiating; carries its keyword.
    Extension(String),
    /// MAIL FROM issued.
    MailFrom,
    /// RCPT TO issued for one recipient.
    RcptTo,
    /// DATA issued or message content in flight.
    Data,
    /// QUIT issued.
    Quit,
    /// Conversation ended.
    Closed,
    /// Conversation failed.
    Error,
    /// A caller supplied command is in flight; carries its verb.
    Custom(String),
}

impl Phase {
    /// Returns true once the conversation has ended, successfully or not.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed | Self::Error)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("IDLE"),
            Self::Connecting => f.write_str("CONNECTING"),
            Self::Greeting => f.write_str("GREETING"),
            Self::Ehlo => f.write_str("EHLO"),
            Self::Extension(keyword) | Self::Custom(keyword) => f.write_str(keyword),
            Self::MailFrom => f.write_str("MAIL"),
            Self::RcptTo => f.write_str("RCPT"),
            Self::Data => f.write_str("DATA"),
            Self::Quit => f.write_str("QUIT"),
            Self::Closed => f.write_str("CLOSED"),
            Self::Error => f.write_str("ERROR"),
        }
    }
}

/// Half-duplex state of the conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Direction {
    /// The client may issue the next command.
    #[default]
    Send,
    /// A command was written; a reply is outstanding.
    Receiving,
    /// Octets are being written to the server.
    Sending,
}

/// How the transport is protected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SecurityType {
    /// Cleartext TCP.
    #[default]
    Plain,
    /// TLS from the first octet (`smtps`).
    ImplicitTls,
    /// Upgraded in place via STARTTLS.
    StartTls,
}

/// Security metadata recorded in the session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityInfo {
    /// Protection type.
    #[serde(rename = "type")]
    pub kind: SecurityType,
    /// Negotiated cipher suite, if TLS.
    pub cipher: Option<String>,
    /// Negotiated protocol version, if TLS.
    pub protocol: Option<String>,
}

impl SecurityInfo {
    /// Security record of a cleartext connection.
    #[must_use]
    pub const fn plain() -> Self {
        Self {
            kind: SecurityType::Plain,
            cipher: None,
            protocol: None,
        }
    }

    /// Returns true if the transport is encrypted.
    #[must_use]
    pub const fn is_secure(&self) -> bool {
        !matches!(self.kind, SecurityType::Plain)
    }
}
