//! Per-connection session record and the transaction envelope.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::command::Param;
use crate::types::{AuthMechanism, Capabilities, Reply, SecurityInfo};

/// Accumulating record of what happened on one connection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Transport details.
    pub connect: Option<ConnectInfo>,
    /// Server greeting.
    pub greeting: Option<GreetingInfo>,
    /// Latest EHLO exchange.
    pub ehlo: Option<EhloInfo>,
    /// STARTTLS upgrade.
    pub starttls: Option<StartTlsInfo>,
    /// Successful authentication.
    pub auth: Option<AuthInfo>,
    /// Size limit learned from SIZE.
    pub size: Option<SizeInfo>,
    /// Accepted MAIL FROM.
    pub mail_from: Option<MailFromInfo>,
    /// Final reply to the message content.
    pub data: Option<DataInfo>,
    /// QUIT exchange.
    pub quit: Option<QuitInfo>,
    /// Message of the error that ended the conversation.
    pub last_error: Option<String>,
}

impl Session {
    /// Forgets everything learned before a STARTTLS upgrade.
    ///
    /// Only `connect`, `greeting` and `starttls` survive.
    pub fn reset_after_starttls(&mut self) {
        *self = Self {
            connect: self.connect.take(),
            greeting: self.greeting.take(),
            starttls: self.starttls.take(),
            ..Self::default()
        };
    }

    /// Returns the security state of the transport.
    #[must_use]
    pub fn security(&self) -> SecurityInfo {
        self.starttls
            .as_ref()
            .map(|s| s.security.clone())
            .or_else(|| self.connect.as_ref().map(|c| c.security.clone()))
            .unwrap_or_default()
    }

    /// Returns true once the transport is encrypted.
    #[must_use]
    pub fn is_secure(&self) -> bool {
        self.security().is_secure()
    }

    /// Returns the capabilities of the latest EHLO, if any.
    #[must_use]
    pub fn capabilities(&self) -> Option<&Capabilities> {
        self.ehlo.as_ref().map(|e| &e.capabilities)
    }

    /// Returns the SIZE limit, or 0 if none was announced.
    #[must_use]
    pub fn size_limit(&self) -> u64 {
        self.size.as_ref().map_or(0, |s| s.limit)
    }

    /// Returns true once an AUTH exchange succeeded.
    #[must_use]
    pub const fn is_authenticated(&self) -> bool {
        self.auth.is_some()
    }
}

/// Transport details recorded on connect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectInfo {
    /// Host from the URI.
    pub host: String,
    /// Port from the URI.
    pub port: u16,
    /// Peer socket address, when known.
    pub remote_address: Option<String>,
    /// Local socket address, when known.
    pub local_address: Option<String>,
    /// Time the connection was established.
    pub timestamp: DateTime<Utc>,
    /// Plain or implicit TLS.
    pub security: SecurityInfo,
}

/// Greeting details.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GreetingInfo {
    /// First word of the greeting text.
    pub domain: String,
    /// The 220 reply.
    pub reply: Reply,
}

/// EHLO details.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EhloInfo {
    /// Domain the server identified itself with.
    pub domain: String,
    /// Optional greet text after the domain.
    pub greet: Option<String>,
    /// Advertised capabilities.
    pub capabilities: Capabilities,
    /// The 250 reply.
    pub reply: Reply,
}

/// STARTTLS details.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartTlsInfo {
    /// The 220 reply to STARTTLS.
    pub reply: Reply,
    /// Negotiated TLS parameters.
    pub security: SecurityInfo,
}

/// Authentication details.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthInfo {
    /// Mechanism that succeeded.
    pub mechanism: AuthMechanism,
    /// The 235 reply.
    pub reply: Reply,
}

/// SIZE details.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizeInfo {
    /// Maximum message size in octets; 0 means unlimited.
    pub limit: u64,
}

/// MAIL FROM details.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailFromInfo {
    /// Return path sent.
    pub return_path: String,
    /// The 250 reply.
    pub reply: Reply,
}

/// DATA details.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataInfo {
    /// Reply to the end of data.
    pub reply: Reply,
    /// Octets written, terminator included.
    pub octets: u64,
}

/// QUIT details.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuitInfo {
    /// The server farewell, if it answered 221.
    pub last_words: Option<String>,
}

/// Outcome of RCPT for one recipient.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RecipientOutcome {
    /// RCPT not sent yet.
    #[default]
    Pending,
    /// Server accepted the recipient (250/251).
    Accepted(Reply),
    /// Server refused the recipient.
    Rejected(Reply),
}

/// One envelope recipient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    /// Forward path.
    pub forward_path: String,
    /// RCPT parameters.
    pub params: Vec<Param>,
    /// Outcome so far.
    pub outcome: RecipientOutcome,
}

impl Recipient {
    /// Returns true if the server accepted this recipient.
    #[must_use]
    pub const fn is_accepted(&self) -> bool {
        matches!(self.outcome, RecipientOutcome::Accepted(_))
    }
}

/// Sender and ordered recipient set of one transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Return path; empty for the null sender.
    pub mail_from: String,
    /// MAIL FROM parameters.
    pub mail_params: Vec<Param>,
    rcpt_to: Vec<Recipient>,
}

impl Envelope {
    /// Creates an envelope for a sender.
    #[must_use]
    pub fn new(mail_from: impl Into<String>) -> Self {
        Self {
            mail_from: mail_from.into(),
            ..Self::default()
        }
    }

    /// Adds a recipient; duplicates are ignored.
    ///
    /// Returns false if the recipient was already present.
    pub fn add_recipient(&mut self, forward_path: impl Into<String>) -> bool {
        self.add_recipient_with_params(forward_path, Vec::new())
    }

    /// Adds a recipient with RCPT parameters; duplicates are ignored.
    pub fn add_recipient_with_params(
        &mut self,
        forward_path: impl Into<String>,
        params: Vec<Param>,
    ) -> bool {
        let forward_path = forward_path.into();
        if self.rcpt_to.iter().any(|r| r.forward_path == forward_path) {
            return false;
        }
        self.rcpt_to.push(Recipient {
            forward_path,
            params,
            outcome: RecipientOutcome::Pending,
        });
        true
    }

    /// Returns all recipients in insertion order.
    #[must_use]
    pub fn recipients(&self) -> &[Recipient] {
        &self.rcpt_to
    }

    /// Returns the index of the first recipient without an outcome.
    #[must_use]
    pub fn next_pending(&self) -> Option<usize> {
        self.rcpt_to
            .iter()
            .position(|r| r.outcome == RecipientOutcome::Pending)
    }

    /// Records the outcome for the recipient at `index`.
    pub fn record(&mut self, index: usize, outcome: RecipientOutcome) {
        if let Some(recipient) = self.rcpt_to.get_mut(index) {
            recipient.outcome = outcome;
        }
    }

    /// Returns true if there is at least one recipient and all were accepted.
    #[must_use]
    pub fn all_accepted(&self) -> bool {
        !self.rcpt_to.is_empty() && self.rcpt_to.iter().all(Recipient::is_accepted)
    }

    /// Recipients the server accepted.
    pub fn accepted(&self) -> impl Iterator<Item = &Recipient> {
        self.rcpt_to.iter().filter(|r| r.is_accepted())
    }

    /// Recipients the server rejected.
    pub fn rejected(&self) -> impl Iterator<Item = &Recipient> {
        self.rcpt_to
            .iter()
            .filter(|r| matches!(r.outcome, RecipientOutcome::Rejected(_)))
    }

    /// Clears all recorded outcomes.
    pub fn reset_outcomes(&mut self) {
        for recipient in &mut self.rcpt_to {
            recipient.outcome = RecipientOutcome::Pending;
        }
    }
}
