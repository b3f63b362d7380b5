//! Sans-IO codecs: line framing and reply assembly.

mod framer;
mod reply;

pub use framer::{FramingError, LineFramer, MAX_LINE_LENGTH};
pub use reply::ReplyAssembler;
