//! Multi-line reply assembly.
//!
//! SMTP replies can be single-line or multi-line:
//! - Single: `250 OK\r\n`
//! - Multi: `250-First line\r\n250-Second line\r\n250 Last line\r\n`

use crate::error::{Error, Result};
use crate::types::{Reply, ReplyCode};

/// Groups continuation lines into complete replies.
#[derive(Debug, Default)]
pub struct ReplyAssembler {
    lines: Vec<String>,
}

impl ReplyAssembler {
    /// Creates an empty assembler.
    #[must_use]
    pub const fn new() -> Self {
        Self { lines: Vec::new() }
    }

    /// Adds one framed line.
    ///
    /// Returns the assembled reply once the final line (`nnn text`) arrives.
    /// The reply code is taken from the final line.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] if the line is shorter than three
    /// characters or does not match `^[2345]\d{2}([ -])(.*)$`.
    pub fn push_line(&mut self, line: &str) -> Result<Option<Reply>> {
        if line.len() < 3 {
            return Err(Error::Protocol(format!(
                "Server has sent a reply line shorter than the minimum of 3 characters: {line}"
            )));
        }

        let code = line
            .get(..3)
            .and_then(ReplyCode::parse)
            .ok_or_else(|| invalid_line(line))?;

        let is_last = match line.as_bytes().get(3) {
            None | Some(b' ') => true,
            Some(b'-') => false,
            Some(_) => return Err(invalid_line(line)),
        };

        self.lines.push(line.get(4..).unwrap_or_default().to_string());

        if !is_last {
            return Ok(None);
        }
        Ok(Some(Reply::new(code, std::mem::take(&mut self.lines))))
    }

    /// Returns true while a multi-line reply is incomplete.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        !self.lines.is_empty()
    }

    /// Discards a partially assembled reply.
    pub fn reset(&mut self) {
        self.lines.clear();
    }
}

fn invalid_line(line: &str) -> Error {
    Error::Protocol(format!("Server has sent an invalid reply line: {line}"))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone, clippy::manual_string_new, clippy::needless_collect, clippy::unreadable_literal, clippy::used_underscore_items, clippy::similar_names)]
mod tests {
    use super::*;

    fn assemble(lines: &[&str]) -> Result<Vec<Reply>> {
        let mut assembler = ReplyAssembler::new();
        let mut replies = Vec::new();
        for line in lines {
            if let Some(reply) = assembler.push_line(line)? {
                replies.push(reply);
            }
        }
        Ok(replies)
    }

    #[test]
    fn single_line_reply() {
        let replies = assemble(&["250 OK"]).unwrap();
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].code, ReplyCode::OK);
        assert_eq!(replies[0].lines, vec!["OK"]);
        assert_eq!(replies[0].message(), "OK");
    }

    #[test]
    fn multi_line_reply() {
        let replies = assemble(&[
            "250-mx.example.com Hello",
            "250-SIZE 1000000",
            "250 STARTTLS",
        ])
        .unwrap();
        assert_eq!(replies.len(), 1);
        assert_eq!(
            replies[0].lines,
            vec!["mx.example.com Hello", "SIZE 1000000", "STARTTLS"]
        );
        assert_eq!(replies[0].message(), "mx.example.com Hello");
    }

    #[test]
    fn consecutive_replies_do_not_mix() {
        let replies = assemble(&["250-a", "250 b", "354 go ahead"]).unwrap();
        assert_eq!(replies.len(), 2);
        assert_eq!(replies[1].code, ReplyCode::START_DATA);
        assert_eq!(replies[1].lines, vec!["go ahead"]);
    }

    #[test]
    fn pending_while_incomplete() {
        let mut assembler = ReplyAssembler::new();
        assert!(assembler.push_line("250-first").unwrap().is_none());
        assert!(assembler.is_pending());
        assembler.push_line("250 last").unwrap().unwrap();
        assert!(!assembler.is_pending());
    }

    #[test]
    fn code_only_line_is_final() {
        let replies = assemble(&["250"]).unwrap();
        assert_eq!(replies[0].lines, vec![""]);
    }

    #[test]
    fn empty_text_after_separator() {
        let replies = assemble(&["221 "]).unwrap();
        assert_eq!(replies[0].code, ReplyCode::CLOSING);
        assert_eq!(replies[0].message(), "");
    }

    #[test]
    fn too_short_line() {
        let err = assemble(&["25"]).unwrap_err();
        assert!(err.to_string().contains("shorter than the minimum of 3"));
    }

    #[test]
    fn invalid_code_class() {
        assert!(assemble(&["199 nope"]).is_err());
        assert!(assemble(&["600 nope"]).is_err());
        assert!(assemble(&["abc def"]).is_err());
    }

    #[test]
    fn invalid_separator() {
        let err = assemble(&["250_OK"]).unwrap_err();
        assert!(err.to_string().contains("invalid reply line: 250_OK"));
    }

    #[test]
    fn assembler_resets_between_replies() {
        let mut assembler = ReplyAssembler::new();
        assert!(assembler.push_line("250-first").unwrap().is_none());
        assert!(assembler.is_pending());
        assembler.reset();
        assert!(!assembler.is_pending());
        let reply = assembler.push_line("220 ready").unwrap().unwrap();
        assert_eq!(reply.lines, vec!["ready".to_string()]);
    }
}
