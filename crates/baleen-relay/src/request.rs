//! Relay request and receipt.

use baleen_smtp::{Envelope, MessageSource, Param, Reply, Session};
use serde::{Deserialize, Serialize};

/// One message to relay downstream.
///
/// # Example
///
/// ```
/// use baleen_relay::RelayRequest;
///
/// let request = RelayRequest::new("sender@example.com", "Subject: Hi\r\n\r\nHello\r\n")
///     .id("a1b2c3")
///     .to("alice@example.net")
///     .to("bob@example.net");
/// assert_eq!(request.envelope().recipients().len(), 2);
/// ```
#[derive(Debug)]
pub struct RelayRequest {
    pub(crate) id: Option<String>,
    pub(crate) envelope: Envelope,
    pub(crate) content: MessageSource,
}

impl RelayRequest {
    /// Creates a request for a sender and message content.
    #[must_use]
    pub fn new(mail_from: impl Into<String>, content: impl Into<MessageSource>) -> Self {
        Self {
            id: None,
            envelope: Envelope::new(mail_from),
            content: content.into(),
        }
    }

    /// Sets the message id used in log records.
    #[must_use]
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Adds a recipient.
    #[must_use]
    pub fn to(mut self, forward_path: impl Into<String>) -> Self {
        self.envelope.add_recipient(forward_path);
        self
    }

    /// Adds a recipient with RCPT parameters.
    #[must_use]
    pub fn to_with_params(mut self, forward_path: impl Into<String>, params: Vec<Param>) -> Self {
        self.envelope.add_recipient_with_params(forward_path, params);
        self
    }

    /// Adds a MAIL FROM parameter.
    #[must_use]
    pub fn mail_param(mut self, param: Param) -> Self {
        self.envelope.mail_params.push(param);
        self
    }

    /// Returns the envelope.
    #[must_use]
    pub const fn envelope(&self) -> &Envelope {
        &self.envelope
    }
}

/// Proof of delivery returned by a successful relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayReceipt {
    /// Reply to the end of data.
    pub reply: Reply,
    /// Recipients the downstream server accepted.
    pub accepted: Vec<String>,
    /// Everything recorded during the conversation.
    pub session: Session,
}
