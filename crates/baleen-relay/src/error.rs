//! Relay errors.

use baleen_smtp::Reply;

use crate::status::SmtpStatus;

/// Why a message was not relayed.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// The conversation failed.
    #[error(transparent)]
    Smtp(#[from] baleen_smtp::Error),

    /// The downstream server refused at least one recipient.
    #[error("{} recipient(s) rejected by downstream server", .rejected.len())]
    Rejected {
        /// Forward path and reply of each refused recipient, in envelope order.
        rejected: Vec<(String, Reply)>,
    },

    /// The conversation ended early without an error.
    #[error("Message not delivered: {reason}")]
    NotDelivered {
        /// Reason recorded by the client.
        reason: String,
    },

    /// The request named no recipients.
    #[error("No recipients to relay to")]
    NoRecipients,
}

impl RelayError {
    /// Returns the status to answer the original sender with.
    #[must_use]
    pub fn status(&self) -> SmtpStatus {
        match self {
            Self::Smtp(e) => SmtpStatus::from_error(e),
            Self::Rejected { rejected } => rejected
                .first()
                .map_or_else(SmtpStatus::transient, |(_, reply)| {
                    SmtpStatus::from_reply(reply)
                }),
            Self::NotDelivered { .. } => SmtpStatus::transient(),
            Self::NoRecipients => SmtpStatus::new(554, "5.5.1 No valid recipients"),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone, clippy::manual_string_new, clippy::needless_collect, clippy::unreadable_literal, clippy::used_underscore_items, clippy::similar_names)]
mod tests {
    use baleen_smtp::ReplyCode;

    use super::*;

    #[test]
    fn test_rejected_uses_first_reply() {
        let err = RelayError::Rejected {
            rejected: vec![
                (
                    "a@example.net".into(),
                    Reply::new(ReplyCode::MAILBOX_BUSY, vec!["4.2.1 Try later".into()]),
                ),
                (
                    "b@example.net".into(),
                    Reply::new(ReplyCode::MAILBOX_UNAVAILABLE, vec!["5.1.1 Unknown".into()]),
                ),
            ],
        };
        assert_eq!(err.status(), SmtpStatus::new(450, "4.2.1 Try later"));
        assert_eq!(err.to_string(), "2 recipient(s) rejected by downstream server");
    }

    #[test]
    fn test_smtp_error_is_transparent() {
        let err = RelayError::from(baleen_smtp::Error::ConnectionClosed);
        assert_eq!(err.to_string(), "Connection closed by server");
        assert_eq!(err.status().code, 451);
    }

    #[test]
    fn test_not_delivered_is_transient() {
        let err = RelayError::NotDelivered {
            reason: "Conversation ended before delivery.".into(),
        };
        assert!(err.status().is_transient());
        assert_eq!(RelayError::NoRecipients.status().code, 554);
    }
}
