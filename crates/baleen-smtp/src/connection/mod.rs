//! Byte transport for one conversation: plaintext or TLS socket plus framing.

mod stream;
mod transport;

pub use stream::{AsyncStream, SecureableStream, server_name, tls_connector};
pub use transport::Transport;
pub(crate) use transport::idle;
