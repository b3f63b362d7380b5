//! # baleen-smtp
//!
//! The outbound SMTP conversation engine of the baleen mail filtering
//! gateway. It relays one message to a downstream server per [`Client`]
//! (RFC 5321).
//!
//! ## Features
//!
//! - **Strict framing**: CRLF-only lines, printable US-ASCII, 512-octet limit
//! - **Streaming DATA**: dot-stuffing over byte buffers or async readers
//! - **TLS**: implicit TLS (`smtps://`) and opportunistic or mandatory STARTTLS
//! - **Authentication**: PLAIN, LOGIN, CRAM-MD5
//! - **Extensions**: pluggable negotiation ordered by priority; SIZE built in
//! - **Observers**: redirect or abort the conversation after any phase
//!
//! ## Quick Start
//!
//! ```ignore
//! use baleen_smtp::{Client, ClientConfig};
//!
//! #[tokio::main]
//! async fn main() -> baleen_smtp::Result<()> {
//!     let config = ClientConfig::builder().name("filter.example.com").build();
//!     let mut client = Client::new("smtp://mx.example.net:25", config)?;
//!
//!     let outcome = client
//!         .send(
//!             "sender@example.com",
//!             ["alice@example.net"],
//!             "Subject: Test\r\n\r\nHello, World!\r\n",
//!         )
//!         .await?;
//!     assert!(outcome.is_delivered());
//!     Ok(())
//! }
//! ```
//!
//! ## Conversation
//!
//! ```text
//! Connecting → Greeting → Ehlo → [STARTTLS → Ehlo] → [SIZE, AUTH]
//!            → MailFrom → RcptTo (per recipient) → Data → Quit → Closed
//! ```
//!
//! DATA is only sent when every recipient was accepted.
//!
//! ## Modules
//!
//! - [`client`]: Conversation state machine and observers
//! - [`codec`]: Line framer and reply assembler
//! - [`command`]: Command model, parser and serializer
//! - [`connection`]: TLS-upgradable transport
//! - [`data`]: Dot-stuffing encoder and message sources
//! - [`extension`]: Extension negotiation (STARTTLS, SIZE, AUTH)
//! - [`session`]: Session record and envelope
//! - [`types`]: Replies, capabilities, phases

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod client;
pub mod codec;
pub mod command;
pub mod config;
pub mod connection;
pub mod data;
mod error;
pub mod extension;
pub mod session;
pub mod types;
pub mod uri;

pub use client::{Client, ClientEvent, Decision, NextAction, Outcome, PhaseEvent};
pub use command::{Command, Param};
pub use config::{ClientConfig, ClientConfigBuilder, RejectionPolicy, StartTlsPolicy, TlsOptions};
pub use data::MessageSource;
pub use error::{Error, Result};
pub use session::{Envelope, Recipient, RecipientOutcome, Session};
pub use types::{AuthMechanism, Capabilities, Phase, Reply, ReplyCode, SecurityInfo, SecurityType};
pub use uri::SmtpUri;
