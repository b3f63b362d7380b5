//! CRLF line framing for SMTP octet streams.
//!
//! The framer is sans-IO: chunks of bytes go in through [`LineFramer::push`]
//! and complete lines come out of [`LineFramer::next_line`]. Terminators may
//! be split across chunk boundaries.

use std::collections::VecDeque;

use bytes::BytesMut;

/// Maximum length of a command or reply line, CRLF included.
pub const MAX_LINE_LENGTH: usize = 512;

const CR: u8 = 0x0d;
const LF: u8 = 0x0a;

/// Fatal framing violations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FramingError {
    /// Octet outside of TAB, CR, LF and printable US-ASCII.
    #[error("Line contains an invalid character: 0x{0:02x}")]
    InvalidOctet(u8),

    /// CR not immediately followed by LF.
    #[error("Line contains a CR without LF violating RFC 5321 section 2.3.8.")]
    BareCarriageReturn,

    /// LF not immediately preceded by CR.
    #[error("Line contains a LF without preceding CR violating RFC 5321 section 2.3.8.")]
    BareLineFeed,

    /// Unterminated data grew beyond the line limit.
    #[error("Line length exceeds maximum of {limit} octets violating RFC 5321 section 4.5.3.1.4.")]
    LineTooLong {
        /// The limit that was exceeded.
        limit: usize,
    },
}

/// Splits an octet stream into CRLF terminated lines.
#[derive(Debug)]
pub struct LineFramer {
    buffer: BytesMut,
    pending_cr: bool,
    ready: VecDeque<String>,
    error: Option<FramingError>,
    failed: bool,
    max_line_length: usize,
}

impl Default for LineFramer {
    fn default() -> Self {
        Self::new()
    }
}

impl LineFramer {
    /// Creates a framer with the RFC 5321 limit of 512 octets.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_line_length(MAX_LINE_LENGTH)
    }

    /// Creates a framer with a custom line limit.
    #[must_use]
    pub fn with_max_line_length(max_line_length: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(max_line_length),
            pending_cr: false,
            ready: VecDeque::new(),
            error: None,
            failed: false,
            max_line_length,
        }
    }

    /// Consumes a chunk of bytes.
    ///
    /// Once a violation has been detected the framer ignores all further
    /// input.
    pub fn push(&mut self, chunk: &[u8]) {
        if self.failed {
            return;
        }
        for &byte in chunk {
            if let Err(err) = self.push_byte(byte) {
                self.failed = true;
                self.error = Some(err);
                self.buffer.clear();
                self.pending_cr = false;
                return;
            }
        }
    }

    fn push_byte(&mut self, byte: u8) -> Result<(), FramingError> {
        if self.pending_cr {
            if byte != LF {
                return Err(FramingError::BareCarriageReturn);
            }
            self.pending_cr = false;
            let line = self.buffer.split();
            self.ready.push_back(String::from_utf8_lossy(&line).into_owned());
            return Ok(());
        }

        match byte {
            CR => self.pending_cr = true,
            LF => return Err(FramingError::BareLineFeed),
            0x09 | 0x20..=0x7e => self.buffer.extend_from_slice(&[byte]),
            other => return Err(FramingError::InvalidOctet(other)),
        }

        if self.buffer.len() + usize::from(self.pending_cr) > self.max_line_length {
            return Err(FramingError::LineTooLong {
                limit: self.max_line_length,
            });
        }
        Ok(())
    }

    /// Returns the next complete line, without its CRLF.
    ///
    /// Lines completed before a violation are returned first; the violation
    /// itself is returned exactly once, after which this always yields `None`.
    pub fn next_line(&mut self) -> Option<Result<String, FramingError>> {
        if let Some(line) = self.ready.pop_front() {
            return Some(Ok(line));
        }
        self.error.take().map(Err)
    }

    /// Returns true once a violation has been detected.
    #[must_use]
    pub const fn is_failed(&self) -> bool {
        self.failed
    }

    /// Returns true if unconsumed input is buffered.
    #[must_use]
    pub fn has_pending(&self) -> bool {
        !self.ready.is_empty() || !self.buffer.is_empty() || self.pending_cr
    }

    /// Drops all buffered state, including a recorded violation.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.pending_cr = false;
        self.ready.clear();
        self.error = None;
        self.failed = false;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone, clippy::manual_string_new, clippy::needless_collect, clippy::unreadable_literal, clippy::used_underscore_items, clippy::similar_names)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn collect(framer: &mut LineFramer) -> (Vec<String>, Vec<FramingError>) {
        let mut lines = Vec::new();
        let mut errors = Vec::new();
        while let Some(item) = framer.next_line() {
            match item {
                Ok(line) => lines.push(line),
                Err(err) => errors.push(err),
            }
        }
        (lines, errors)
    }

    fn frame_chunks(chunks: &[&[u8]]) -> (Vec<String>, Vec<FramingError>) {
        let mut framer = LineFramer::new();
        let mut lines = Vec::new();
        let mut errors = Vec::new();
        for chunk in chunks {
            framer.push(chunk);
            let (l, e) = collect(&mut framer);
            lines.extend(l);
            errors.extend(e);
        }
        (lines, errors)
    }

    #[test]
    fn splits_lines() {
        let (lines, errors) = frame_chunks(&[b"250-first\r\n250 last\r\n"]);
        assert_eq!(lines, vec!["250-first", "250 last"]);
        assert!(errors.is_empty());
    }

    #[test]
    fn terminator_split_across_chunks() {
        let (lines, errors) = frame_chunks(&[b"220 ready\r", b"\n250 ok", b"\r", b"\n"]);
        assert_eq!(lines, vec!["220 ready", "250 ok"]);
        assert!(errors.is_empty());
    }

    #[test]
    fn keeps_partial_line() {
        let mut framer = LineFramer::new();
        framer.push(b"250 partial");
        assert!(framer.next_line().is_none());
        assert!(framer.has_pending());
        framer.push(b"\r\n");
        assert_eq!(framer.next_line(), Some(Ok("250 partial".to_string())));
        assert!(!framer.has_pending());
    }

    #[test]
    fn overlong_input_fails_exactly_once() {
        let chunks: Vec<&[u8]> = std::iter::repeat_n(b"XXXX ".as_slice(), 105).collect();
        let (lines, errors) = frame_chunks(&chunks);
        assert!(lines.is_empty());
        assert_eq!(errors, vec![FramingError::LineTooLong { limit: 512 }]);
        assert!(errors[0].to_string().contains("512 octets"));
    }

    #[test]
    fn line_at_limit_is_accepted() {
        let mut input = vec![b'a'; MAX_LINE_LENGTH - 2];
        input.extend_from_slice(b"\r\n");
        let (lines, errors) = frame_chunks(&[&input]);
        assert_eq!(lines.len(), 1);
        assert!(errors.is_empty());
    }

    #[test]
    fn lf_before_cr_is_rejected() {
        let (lines, errors) = frame_chunks(&[b"QUIT\n\r"]);
        assert!(lines.is_empty());
        assert_eq!(errors, vec![FramingError::BareLineFeed]);
    }

    #[test]
    fn bare_lf_is_rejected() {
        let (lines, errors) = frame_chunks(&[b"QUIT\n"]);
        assert!(lines.is_empty());
        assert_eq!(errors, vec![FramingError::BareLineFeed]);
    }

    #[test]
    fn bare_cr_split_across_chunks_is_rejected() {
        let (lines, errors) = frame_chunks(&[b"REST\r", b"RSET"]);
        assert!(lines.is_empty());
        assert_eq!(errors, vec![FramingError::BareCarriageReturn]);
    }

    #[test]
    fn invalid_octet_is_rejected() {
        let (lines, errors) = frame_chunks(&[b"250 caf\xc3\xa9\r\n"]);
        assert!(lines.is_empty());
        assert_eq!(errors, vec![FramingError::InvalidOctet(0xc3)]);
    }

    #[test]
    fn tab_is_allowed() {
        let (lines, errors) = frame_chunks(&[b"250\tok\r\n"]);
        assert_eq!(lines, vec!["250\tok"]);
        assert!(errors.is_empty());
    }

    #[test]
    fn lines_before_violation_survive_and_nothing_after() {
        let mut framer = LineFramer::new();
        framer.push(b"250 one\r\n\x00250 two\r\n");
        framer.push(b"250 three\r\n");
        let (lines, errors) = collect(&mut framer);
        assert_eq!(lines, vec!["250 one"]);
        assert_eq!(errors, vec![FramingError::InvalidOctet(0)]);
        assert!(framer.is_failed());
        assert!(framer.next_line().is_none());
    }

    #[test]
    fn reset_clears_failure() {
        let mut framer = LineFramer::new();
        framer.push(b"\n");
        framer.reset();
        framer.push(b"250 ok\r\n");
        assert_eq!(framer.next_line(), Some(Ok("250 ok".to_string())));
    }

    proptest! {
        #[test]
        fn chunking_does_not_change_lines(
            lines in proptest::collection::vec("[ -~]{0,60}", 1..8),
            split in 1usize..17,
        ) {
            let wire: Vec<u8> = lines
                .iter()
                .flat_map(|l| l.bytes().chain(*b"\r\n"))
                .collect();
            let chunks: Vec<&[u8]> = wire.chunks(split).collect();
            let (framed, errors) = frame_chunks(&chunks);
            prop_assert!(errors.is_empty());
            prop_assert_eq!(framed, lines);
        }
    }
}
