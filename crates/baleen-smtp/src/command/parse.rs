//! Command line parser.

use super::{Command, Param};
use crate::codec::MAX_LINE_LENGTH;
use crate::error::{Error, Result};
use crate::types::AuthMechanism;

pub(super) fn parse_command_line(line: &str) -> Result<Command> {
    let line = line.trim_end();
    if line.trim_start().is_empty() {
        return Err(Error::Command("Unable to parse empty command line.".into()));
    }
    if line.len() > MAX_LINE_LENGTH - 2 {
        return Err(Error::Command(format!(
            "Command line length exceeds maximum of {MAX_LINE_LENGTH} octets violating RFC 5321 section 4.5.3.1.4."
        )));
    }

    let mut parts = line.split_whitespace();
    let verb = parts.next().unwrap_or_default().to_ascii_uppercase();
    let mut rest: Vec<&str> = parts.collect();

    let command = match verb.as_str() {
        "EHLO" | "HELO" => {
            if rest.is_empty() {
                return Err(Error::Command(format!(
                    "{verb} command without domain or address literal."
                )));
            }
            let domain = rest.remove(0).to_string();
            if !rest.is_empty() {
                return Ok(Command::Other {
                    verb,
                    params: std::iter::once(domain.as_str())
                        .chain(rest)
                        .map(parse_param)
                        .collect(),
                });
            }
            if verb == "EHLO" {
                Command::Ehlo { domain }
            } else {
                Command::Helo { domain }
            }
        }
        "MAIL" => {
            if rest.is_empty() {
                return Err(Error::Command(
                    "MAIL command without return path (FROM:<...>).".into(),
                ));
            }
            let return_path = take_path(&mut rest, "FROM:").ok_or_else(|| {
                Error::Command("MAIL missing valid return path argument (FROM:<...>).".into())
            })?;
            Command::Mail {
                return_path,
                params: rest.into_iter().map(parse_param).collect(),
            }
        }
        "RCPT" => {
            if rest.is_empty() {
                return Err(Error::Command(
                    "RCPT command without forward path (TO:<...>).".into(),
                ));
            }
            let forward_path = take_path(&mut rest, "TO:").ok_or_else(|| {
                Error::Command("RCPT missing valid forward path argument (TO:<...>).".into())
            })?;
            if forward_path.is_empty() {
                return Err(Error::Command(
                    "RCPT with empty forward path argument (TO:<...>).".into(),
                ));
            }
            Command::Rcpt {
                forward_path,
                params: rest.into_iter().map(parse_param).collect(),
            }
        }
        "AUTH" => match rest.first().and_then(|m| AuthMechanism::parse(m)) {
            Some(mechanism) if rest.len() <= 2 => Command::Auth {
                mechanism,
                initial_response: rest.get(1).map(ToString::to_string),
            },
            _ => other(verb, rest),
        },
        "STARTTLS" if rest.is_empty() => Command::StartTls,
        "DATA" if rest.is_empty() => Command::Data,
        "RSET" if rest.is_empty() => Command::Rset,
        "NOOP" if rest.is_empty() => Command::Noop,
        "QUIT" if rest.is_empty() => Command::Quit,
        _ => other(verb, rest),
    };
    Ok(command)
}

fn other(verb: String, rest: Vec<&str>) -> Command {
    Command::Other {
        verb,
        params: rest.into_iter().map(parse_param).collect(),
    }
}

/// Removes the `FROM:<path>` / `TO:<path>` argument from the front of `rest`.
///
/// Accepts the path with or without angle brackets and tolerates a space
/// after the colon. Returns `None` if brackets are opened but not closed.
fn take_path(rest: &mut Vec<&str>, prefix: &str) -> Option<String> {
    let first = rest.first()?;
    let head = first.get(..prefix.len())?;
    if !head.eq_ignore_ascii_case(prefix) {
        return None;
    }
    let mut raw = first.get(prefix.len()..)?.to_string();
    rest.remove(0);
    if raw.is_empty() {
        if rest.is_empty() {
            return None;
        }
        raw = rest.remove(0).to_string();
    }

    if let Some(inner) = raw.strip_prefix('<') {
        return inner.strip_suffix('>').map(ToString::to_string);
    }
    Some(raw)
}

fn parse_param(part: &str) -> Param {
    match part.split_once('=') {
        Some((keyword, value)) => Param::new(keyword, value),
        None => Param::flag(part),
    }
}
