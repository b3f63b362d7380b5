//! SMTP command model.
//!
//! [`Command`] is both produced by the client state machine and parsed from
//! raw command lines (the inbound side of the gateway reuses the parser).

mod parse;
mod stream;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::codec::MAX_LINE_LENGTH;
use crate::error::{Error, Result};
use crate::types::AuthMechanism;

pub use stream::CommandStream;

/// A command parameter: `KEY=VALUE` or a bare `KEY` flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Param {
    /// Parameter keyword as sent.
    pub keyword: String,
    /// Value; `None` for flags.
    pub value: Option<String>,
}

impl Param {
    /// Creates a `KEY=VALUE` parameter.
    #[must_use]
    pub fn new(keyword: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            keyword: keyword.into(),
            value: Some(value.into()),
        }
    }

    /// Creates a bare `KEY` flag.
    #[must_use]
    pub fn flag(keyword: impl Into<String>) -> Self {
        Self {
            keyword: keyword.into(),
            value: None,
        }
    }
}

impl fmt::Display for Param {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            Some(value) => write!(f, "{}={value}", self.keyword),
            None => f.write_str(&self.keyword),
        }
    }
}

/// SMTP command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    /// HELO - Simple greeting
    Helo {
        /// Client domain or address literal
        domain: String,
    },
    /// EHLO - Extended greeting
    Ehlo {
        /// Client domain or address literal
        domain: String,
    },
    /// STARTTLS - Upgrade to TLS
    StartTls,
    /// AUTH - Begin authentication
    Auth {
        /// Authentication mechanism
        mechanism: AuthMechanism,
        /// Initial response (optional, for SASL-IR)
        initial_response: Option<String>,
    },
    /// Bare SASL continuation line sent after a 334 challenge.
    AuthResponse(String),
    /// MAIL FROM - Start mail transaction
    Mail {
        /// Return path; empty for the null sender `<>`
        return_path: String,
        /// Parameters in wire order
        params: Vec<Param>,
    },
    /// RCPT TO - Add recipient
    Rcpt {
        /// Forward path, never empty on the wire
        forward_path: String,
        /// Parameters in wire order
        params: Vec<Param>,
    },
    /// DATA - Begin message data
    Data,
    /// RSET - Reset transaction
    Rset,
    /// NOOP - No operation
    Noop,
    /// QUIT - Close connection
    Quit,
    /// Any other verb with its arguments.
    Other {
        /// Upper-cased verb
        verb: String,
        /// Arguments in wire order
        params: Vec<Param>,
    },
}

impl Command {
    /// Parses a single command line (with or without trailing CRLF).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Command`] for empty or overlong lines, EHLO without a
    /// domain, and MAIL/RCPT without a well-formed path argument.
    pub fn parse(line: &str) -> Result<Self> {
        parse::parse_command_line(line)
    }

    /// Returns the command verb.
    #[must_use]
    pub fn verb(&self) -> &str {
        match self {
            Self::Helo { .. } => "HELO",
            Self::Ehlo { .. } => "EHLO",
            Self::StartTls => "STARTTLS",
            Self::Auth { .. } | Self::AuthResponse(_) => "AUTH",
            Self::Mail { .. } => "MAIL",
            Self::Rcpt { .. } => "RCPT",
            Self::Data => "DATA",
            Self::Rset => "RSET",
            Self::Noop => "NOOP",
            Self::Quit => "QUIT",
            Self::Other { verb, .. } => verb,
        }
    }

    /// Serializes the command to a CRLF terminated line.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Command`] for EHLO/HELO without a domain, RCPT
    /// without a forward path, lines containing characters outside
    /// printable US-ASCII, and lines longer than 512 octets.
    pub fn encode(&self) -> Result<String> {
        let mut line = match self {
            Self::Helo { domain } | Self::Ehlo { domain } => {
                if domain.trim().is_empty() {
                    return Err(Error::Command(format!(
                        "{} command needs the domain or an address literal of the client.",
                        self.verb()
                    )));
                }
                format!("{} {domain}", self.verb())
            }
            Self::Auth {
                mechanism,
                initial_response,
            } => match initial_response {
                Some(response) => format!("AUTH {mechanism} {response}"),
                None => format!("AUTH {mechanism}"),
            },
            Self::AuthResponse(response) => response.clone(),
            Self::Mail {
                return_path,
                params,
            } => with_params(format!("MAIL FROM:<{return_path}>"), params),
            Self::Rcpt {
                forward_path,
                params,
            } => {
                if forward_path.is_empty() {
                    return Err(Error::Command(
                        "RCPT command needs a forward path with the address of the recipient."
                            .into(),
                    ));
                }
                with_params(format!("RCPT TO:<{forward_path}>"), params)
            }
            Self::Other { verb, params } => {
                if verb.is_empty() {
                    return Err(Error::Command("Command needs a verb.".into()));
                }
                with_params(verb.clone(), params)
            }
            Self::StartTls | Self::Data | Self::Rset | Self::Noop | Self::Quit => {
                self.verb().to_string()
            }
        };

        if let Some(byte) = line.bytes().find(|b| !matches!(b, 0x09 | 0x20..=0x7e)) {
            return Err(Error::Command(format!(
                "Command line contains an invalid character: 0x{byte:02x}"
            )));
        }

        let trimmed = line.trim_end().len();
        line.truncate(trimmed);
        line.push_str("\r\n");
        if line.len() > MAX_LINE_LENGTH {
            return Err(Error::Command(format!(
                "Command line length exceeds maximum of {MAX_LINE_LENGTH} octets violating RFC 5321 section 4.5.3.1.4."
            )));
        }
        Ok(line)
    }
}

/// Serializes an optional command; no command means `NOOP`.
///
/// # Errors
///
/// Same as [`Command::encode`].
pub fn encode_line(command: Option<&Command>) -> Result<String> {
    command.map_or_else(|| Ok("NOOP\r\n".to_string()), Command::encode)
}

fn with_params(mut line: String, params: &[Param]) -> String {
    for param in params {
        line.push(' ');
        line.push_str(&param.to_string());
    }
    line
}

/// Log-safe rendering: SASL payloads are masked.
impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auth {
                mechanism,
                initial_response: Some(_),
            } => write!(f, "AUTH {mechanism} ***"),
            Self::AuthResponse(_) => f.write_str("***"),
            other => match other.encode() {
                Ok(line) => f.write_str(line.trim_end()),
                Err(_) => f.write_str(other.verb()),
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone, clippy::manual_string_new, clippy::needless_collect, clippy::unreadable_literal, clippy::used_underscore_items, clippy::similar_names)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_helo_command() {
        let cmd = Command::Helo {
            domain: "client.example.com".to_string(),
        };
        assert_eq!(cmd.encode().unwrap(), "HELO client.example.com\r\n");
    }

    #[test]
    fn test_ehlo_command() {
        let cmd = Command::Ehlo {
            domain: "client.example.com".to_string(),
        };
        assert_eq!(cmd.encode().unwrap(), "EHLO client.example.com\r\n");
    }

    #[test]
    fn test_ehlo_without_domain() {
        let cmd = Command::Ehlo {
            domain: String::new(),
        };
        assert!(matches!(cmd.encode(), Err(Error::Command(_))));
    }

    #[test]
    fn test_starttls_command() {
        assert_eq!(Command::StartTls.encode().unwrap(), "STARTTLS\r\n");
    }

    #[test]
    fn test_auth_plain() {
        let cmd = Command::Auth {
            mechanism: AuthMechanism::Plain,
            initial_response: Some("AHVzZXIAcGFzcw==".to_string()),
        };
        assert_eq!(cmd.encode().unwrap(), "AUTH PLAIN AHVzZXIAcGFzcw==\r\n");
        assert_eq!(cmd.to_string(), "AUTH PLAIN ***");
    }

    #[test]
    fn test_auth_response_is_masked() {
        let cmd = Command::AuthResponse("dXNlcg==".to_string());
        assert_eq!(cmd.encode().unwrap(), "dXNlcg==\r\n");
        assert_eq!(cmd.to_string(), "***");
    }

    #[test]
    fn test_mail_from_simple() {
        let cmd = Command::Mail {
            return_path: "sender@example.com".to_string(),
            params: vec![],
        };
        assert_eq!(cmd.encode().unwrap(), "MAIL FROM:<sender@example.com>\r\n");
    }

    #[test]
    fn test_mail_from_null_sender() {
        let cmd = Command::Mail {
            return_path: String::new(),
            params: vec![],
        };
        assert_eq!(cmd.encode().unwrap(), "MAIL FROM:<>\r\n");
    }

    #[test]
    fn test_mail_from_with_params() {
        let cmd = Command::Mail {
            return_path: "sender@example.com".to_string(),
            params: vec![Param::new("SIZE", "12345"), Param::new("BODY", "8BITMIME")],
        };
        assert_eq!(
            cmd.encode().unwrap(),
            "MAIL FROM:<sender@example.com> SIZE=12345 BODY=8BITMIME\r\n"
        );
    }

    #[test]
    fn test_rcpt_to_command() {
        let cmd = Command::Rcpt {
            forward_path: "recipient@example.com".to_string(),
            params: vec![],
        };
        assert_eq!(cmd.encode().unwrap(), "RCPT TO:<recipient@example.com>\r\n");
    }

    #[test]
    fn test_rcpt_without_forward_path() {
        let cmd = Command::Rcpt {
            forward_path: String::new(),
            params: vec![Param::flag("X")],
        };
        assert!(matches!(cmd.encode(), Err(Error::Command(_))));
    }

    #[test]
    fn test_param_order_is_preserved() {
        let cmd = Command::parse("RCPT TO:<a@b> A=1 B=2 C=3").unwrap();
        match &cmd {
            Command::Rcpt { params, .. } => {
                assert_eq!(
                    params,
                    &vec![Param::new("A", "1"), Param::new("B", "2"), Param::new("C", "3")]
                );
            }
            other => panic!("unexpected command {other:?}"),
        }
        assert_eq!(cmd.encode().unwrap(), "RCPT TO:<a@b> A=1 B=2 C=3\r\n");
    }

    #[test]
    fn test_simple_verbs() {
        assert_eq!(Command::Data.encode().unwrap(), "DATA\r\n");
        assert_eq!(Command::Rset.encode().unwrap(), "RSET\r\n");
        assert_eq!(Command::Quit.encode().unwrap(), "QUIT\r\n");
        assert_eq!(Command::Noop.encode().unwrap(), "NOOP\r\n");
    }

    #[test]
    fn test_missing_command_is_noop() {
        assert_eq!(encode_line(None).unwrap(), "NOOP\r\n");
        assert_eq!(encode_line(Some(&Command::Quit)).unwrap(), "QUIT\r\n");
    }

    #[test]
    fn test_line_injection_is_rejected() {
        let cmd = Command::Mail {
            return_path: "a@b>\r\nRCPT TO:<victim@example.com".to_string(),
            params: vec![],
        };
        assert!(matches!(cmd.encode(), Err(Error::Command(_))));
    }

    #[test]
    fn test_overlong_line_is_rejected() {
        let cmd = Command::Other {
            verb: "VRFY".to_string(),
            params: vec![Param::flag("x".repeat(600))],
        };
        assert!(matches!(cmd.encode(), Err(Error::Command(_))));
    }

    #[test]
    fn test_other_with_params() {
        let cmd = Command::Other {
            verb: "VRFY".to_string(),
            params: vec![Param::flag("postmaster")],
        };
        assert_eq!(cmd.encode().unwrap(), "VRFY postmaster\r\n");
        assert_eq!(cmd.verb(), "VRFY");
    }

    fn path() -> impl Strategy<Value = String> {
        "[a-z0-9.]{1,12}@[a-z0-9]{1,10}\\.[a-z]{2,4}"
    }

    fn params() -> impl Strategy<Value = Vec<Param>> {
        proptest::collection::vec(
            ("[A-Z][A-Z0-9]{0,7}", proptest::option::of("[A-Za-z0-9+.]{0,10}"))
                .prop_map(|(keyword, value)| Param { keyword, value }),
            0..4,
        )
    }

    fn command() -> impl Strategy<Value = Command> {
        prop_oneof![
            Just(Command::Noop),
            Just(Command::Quit),
            Just(Command::Rset),
            "[a-z0-9.-]{1,20}".prop_map(|domain| Command::Ehlo { domain }),
            (proptest::option::of(path()), params()).prop_map(|(return_path, params)| {
                Command::Mail {
                    return_path: return_path.unwrap_or_default(),
                    params,
                }
            }),
            (path(), params()).prop_map(|(forward_path, params)| Command::Rcpt {
                forward_path,
                params
            }),
        ]
    }

    proptest! {
        #[test]
        fn parse_inverts_encode(cmd in command()) {
            let line = cmd.encode().unwrap();
            prop_assert_eq!(Command::parse(&line).unwrap(), cmd);
        }

        #[test]
        fn encode_inverts_parse(cmd in command()) {
            let line = cmd.encode().unwrap();
            let reparsed = Command::parse(&line).unwrap().encode().unwrap();
            prop_assert_eq!(reparsed.trim(), line.trim());
        }
    }
}
