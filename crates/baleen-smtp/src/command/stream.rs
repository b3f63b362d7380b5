//! Incremental command parsing over raw octets.

use super::Command;
use crate::codec::LineFramer;
use crate::error::Result;

/// Frames an inbound octet stream and parses each line as a [`Command`].
///
/// The first framing or parse error is reported once; afterwards no more
/// commands are produced.
#[derive(Debug, Default)]
pub struct CommandStream {
    framer: LineFramer,
    failed: bool,
}

impl CommandStream {
    /// Creates an empty command stream.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds a chunk and returns the commands (or the error) it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Result<Command>> {
        if self.failed {
            return Vec::new();
        }
        self.framer.push(chunk);

        let mut out = Vec::new();
        while let Some(line) = self.framer.next_line() {
            let parsed = line.map_err(Into::into).and_then(|l| Command::parse(&l));
            let is_err = parsed.is_err();
            out.push(parsed);
            if is_err {
                self.failed = true;
                break;
            }
        }
        out
    }

    /// Returns true once an error was reported.
    #[must_use]
    pub const fn is_failed(&self) -> bool {
        self.failed
    }
}
