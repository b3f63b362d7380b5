//! Phase observers, their decisions and the events raised to subscribers.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::command::Command;
use crate::error::{Error, Result};
use crate::session::Session;
use crate::types::{AuthMechanism, Reply, SecurityInfo};

/// What the state machine does after a phase completes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NextAction {
    /// Send EHLO.
    Ehlo,
    /// Run the extension negotiator.
    Negotiate,
    /// Send MAIL FROM.
    MailFrom,
    /// Send RCPT TO for the next pending recipient.
    RcptTo,
    /// Send DATA and the message content.
    Data,
    /// Send QUIT.
    Quit,
    /// Drop the connection without QUIT.
    Close,
    /// Send a literal command; its reply must be handled by an observer of
    /// [`PhaseEvent::Custom`].
    Command(Command),
}

impl FromStr for NextAction {
    type Err = Error;

    /// Parses a string directive: `QUIT`, `CLOSE`, or a literal command line.
    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "QUIT" => Ok(Self::Quit),
            "CLOSE" => Ok(Self::Close),
            _ => Command::parse(s).map(Self::Command),
        }
    }
}

/// An observer's vote on how to continue.
#[derive(Debug)]
pub enum Decision {
    /// Accept the default continuation.
    Proceed,
    /// Override the continuation.
    Continue(NextAction),
    /// Abort the conversation.
    Abort(Error),
}

/// Folds observer decisions into the next action.
///
/// The first `Abort` wins. Otherwise the last `Continue` wins. With no
/// override the default is returned.
///
/// # Errors
///
/// Returns the error of the first `Abort`.
pub fn resolve(
    default: NextAction,
    decisions: impl IntoIterator<Item = Decision>,
) -> Result<NextAction> {
    let mut chosen = None;
    for decision in decisions {
        match decision {
            Decision::Proceed => {}
            Decision::Continue(action) => chosen = Some(action),
            Decision::Abort(error) => return Err(error),
        }
    }
    Ok(chosen.unwrap_or(default))
}

/// Phase events observers can register for.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PhaseEvent {
    /// The 220 greeting arrived.
    Greeting,
    /// EHLO succeeded.
    Ehlo,
    /// Every extension finished negotiating.
    Esmtp,
    /// MAIL FROM succeeded.
    Mail,
    /// One RCPT TO was answered, accepted or not.
    Rcpt,
    /// The message content was accepted.
    Data,
    /// QUIT was answered or the server hung up.
    Quit,
    /// Reply to a literal command with the given verb.
    Custom(String),
}

/// Observer callback. Receives the reply that completed the phase (none for
/// [`PhaseEvent::Esmtp`] and for a QUIT the server did not answer).
pub type Observer = Box<dyn FnMut(Option<&Reply>, &Session) -> Decision + Send>;

/// Notifications delivered through [`Client::subscribe`](super::Client::subscribe).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClientEvent {
    /// Transport established.
    Connected {
        /// Host from the URI.
        host: String,
        /// Port from the URI.
        port: u16,
        /// Security of the fresh transport.
        security: SecurityInfo,
    },
    /// An AUTH exchange succeeded.
    Authenticated {
        /// Mechanism used.
        mechanism: AuthMechanism,
    },
    /// The server refused one recipient.
    RecipientRejected {
        /// Forward path of the recipient.
        forward_path: String,
        /// The refusal.
        reply: Reply,
    },
    /// The conversation failed.
    Error {
        /// Error message.
        message: String,
    },
    /// The connection was closed.
    Closed {
        /// Why, when not a normal end of conversation.
        reason: Option<String>,
    },
}

/// Result of a conversation that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The server accepted the message for every recipient.
    Delivered {
        /// Reply to the end of data.
        reply: Reply,
    },
    /// The conversation ended without delivery.
    Closed {
        /// Why it ended.
        reason: Option<String>,
    },
}

impl Outcome {
    /// Returns true if the message was delivered.
    #[must_use]
    pub const fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered { .. })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone, clippy::manual_string_new, clippy::needless_collect, clippy::unreadable_literal, clippy::used_underscore_items, clippy::similar_names)]
mod tests {
    use super::*;

    #[test]
    fn test_no_decisions_yields_default() {
        let next = resolve(NextAction::MailFrom, Vec::new()).unwrap();
        assert_eq!(next, NextAction::MailFrom);
    }

    #[test]
    fn test_proceed_yields_default() {
        let next = resolve(NextAction::Quit, vec![Decision::Proceed, Decision::Proceed]).unwrap();
        assert_eq!(next, NextAction::Quit);
    }

    #[test]
    fn test_last_continue_wins() {
        let decisions = vec![
            Decision::Continue(NextAction::Quit),
            Decision::Proceed,
            Decision::Continue(NextAction::Close),
        ];
        assert_eq!(resolve(NextAction::Data, decisions).unwrap(), NextAction::Close);
    }

    #[test]
    fn test_first_abort_wins() {
        let decisions = vec![
            Decision::Continue(NextAction::Quit),
            Decision::Abort(Error::Aborted("first".into())),
            Decision::Abort(Error::Aborted("second".into())),
            Decision::Continue(NextAction::Close),
        ];
        let err = resolve(NextAction::Data, decisions).unwrap_err();
        assert_eq!(err.to_string(), "Conversation aborted: first");
    }

    #[test]
    fn test_directives() {
        assert_eq!("QUIT".parse::<NextAction>().unwrap(), NextAction::Quit);
        assert_eq!("close".parse::<NextAction>().unwrap(), NextAction::Close);
        assert_eq!(
            "RSET".parse::<NextAction>().unwrap(),
            NextAction::Command(Command::Rset)
        );
        assert!(matches!(
            "XCLIENT NAME=relay".parse::<NextAction>().unwrap(),
            NextAction::Command(Command::Other { ref verb, .. }) if verb == "XCLIENT"
        ));
        assert!("".parse::<NextAction>().is_err());
    }

    #[test]
    fn test_event_serializes() {
        let event = ClientEvent::Closed { reason: None };
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(json, r#"{"Closed":{"reason":null}}"#);
    }
}
