//! SMTP status pairs handed back to the inbound side.

use std::fmt;

use baleen_smtp::config::local_hostname;
use baleen_smtp::{Error, Reply};
use serde::{Deserialize, Serialize};

/// A reply code and text to answer the original sender with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmtpStatus {
    /// Reply code (e.g., 421).
    pub code: u16,
    /// Reply text, including the enhanced status code when there is one.
    pub message: String,
}

impl SmtpStatus {
    /// Creates a status.
    #[must_use]
    pub fn new(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// `421 <hostname> Service not available, closing transmission channel`.
    ///
    /// Uses the local host name when `hostname` is `None`.
    #[must_use]
    pub fn service_unavailable(hostname: Option<&str>) -> Self {
        let hostname = hostname.map_or_else(local_hostname, str::to_string);
        Self::new(
            421,
            format!("<{hostname}> Service not available, closing transmission channel"),
        )
    }

    /// Generic transient failure for errors that carry no reply of their own.
    #[must_use]
    pub fn transient() -> Self {
        Self::new(421, "Transient internal server error. Please try again later.")
    }

    /// Copies code and first line of a server reply.
    #[must_use]
    pub fn from_reply(reply: &Reply) -> Self {
        Self::new(reply.code.as_u16(), reply.message())
    }

    /// Maps a conversation error to the status relayed upstream.
    ///
    /// Errors caused by a server reply keep that reply. Local failures get
    /// a synthesized status: transport and TLS problems are transient,
    /// configuration problems are permanent.
    #[must_use]
    pub fn from_error(error: &Error) -> Self {
        if let Some((code, message)) = error.status() {
            return Self::new(code, message);
        }
        match error {
            Error::Io(_)
            | Error::ConnectTimeout(_)
            | Error::Timeout(_)
            | Error::ConnectionClosed
            | Error::Framing(_)
            | Error::Protocol(_) => Self::new(451, format!("4.4.0 {error}")),
            Error::Tls(_) | Error::TlsHandshake(_) | Error::StartTlsUnavailable => {
                Self::new(451, format!("4.7.5 {error}"))
            }
            Error::MessageTooLarge { .. } => Self::new(552, format!("5.3.4 {error}")),
            Error::InvalidUri(_) | Error::InvalidDnsName(_) | Error::Config(_) => {
                Self::new(554, format!("5.3.5 {error}"))
            }
            _ => Self::transient(),
        }
    }

    /// Returns true for 4xx codes.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        self.code >= 400 && self.code < 500
    }

    /// Returns true for 5xx codes.
    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        self.code >= 500 && self.code < 600
    }
}

impl fmt::Display for SmtpStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code, self.message)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone, clippy::manual_string_new, clippy::needless_collect, clippy::unreadable_literal, clippy::used_underscore_items, clippy::similar_names)]
mod tests {
    use std::time::Duration;

    use baleen_smtp::{Phase, ReplyCode};

    use super::*;

    #[test]
    fn test_service_unavailable() {
        let status = SmtpStatus::service_unavailable(Some("mx.example.net"));
        assert_eq!(
            status.to_string(),
            "421 <mx.example.net> Service not available, closing transmission channel"
        );
        assert!(status.is_transient());
    }

    #[test]
    fn test_service_unavailable_defaults_to_local_name() {
        let status = SmtpStatus::service_unavailable(None);
        assert!(status.message.starts_with(&format!("<{}>", local_hostname())));
    }

    #[test]
    fn test_transient_default() {
        assert_eq!(
            SmtpStatus::transient().to_string(),
            "421 Transient internal server error. Please try again later."
        );
    }

    #[test]
    fn test_server_reply_is_kept() {
        let reply = Reply::new(
            ReplyCode::MAILBOX_UNAVAILABLE,
            vec!["5.1.1 No such user".into(), "ignored".into()],
        );
        let status = SmtpStatus::from_error(&Error::smtp(&Phase::MailFrom, &reply));
        assert_eq!(status, SmtpStatus::new(550, "5.1.1 No such user"));
        assert!(status.is_permanent());
        assert_eq!(SmtpStatus::from_reply(&reply), status);
    }

    #[test]
    fn test_local_failures() {
        let status = SmtpStatus::from_error(&Error::Timeout(Duration::from_secs(30)));
        assert_eq!(status.code, 451);
        assert!(status.message.starts_with("4.4.0 "));

        let status = SmtpStatus::from_error(&Error::StartTlsUnavailable);
        assert_eq!(status.code, 451);
        assert!(status.message.starts_with("4.7.5 "));

        let status = SmtpStatus::from_error(&Error::InvalidUri("ftp://x".into()));
        assert_eq!(status.code, 554);

        let status = SmtpStatus::from_error(&Error::MessageTooLarge { size: 20, limit: 10 });
        assert_eq!(status.code, 552);

        let status = SmtpStatus::from_error(&Error::Aborted("policy".into()));
        assert_eq!(status, SmtpStatus::transient());
    }

    #[test]
    fn test_serialize() {
        let json = serde_json::to_string(&SmtpStatus::new(250, "2.0.0 Ok")).unwrap();
        assert_eq!(json, r#"{"code":250,"message":"2.0.0 Ok"}"#);
    }
}
