//! Outbound SMTP client state machine.
//!
//! A [`Client`] owns one connection and drives one conversation:
//!
//! ```text
//! Connecting → Greeting → Ehlo → [extensions] → MailFrom → RcptTo* → Data → Quit → Closed
//! ```
//!
//! Any phase may end in `Error`. Replies 421, 500 and 501 end the
//! conversation whatever the phase. Observers registered with [`Client::on`]
//! may redirect or abort the conversation after each phase; see
//! [`resolve`] for how their votes combine.

mod observer;

use std::collections::HashMap;
use std::net::SocketAddr;

use chrono::Utc;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::Instrument;

pub use observer::{ClientEvent, Decision, NextAction, Observer, Outcome, PhaseEvent, resolve};

use crate::command::{Command, Param};
use crate::config::{ClientConfig, RejectionPolicy};
use crate::connection::{AsyncStream, SecureableStream, Transport, server_name, tls_connector};
use crate::data::MessageSource;
use crate::error::{Error, Result};
use crate::extension::{Extension, Registry};
use crate::session::{
    ConnectInfo, DataInfo, EhloInfo, Envelope, GreetingInfo, MailFromInfo, QuitInfo,
    RecipientOutcome, Session,
};
use crate::types::{
    Capabilities, Direction, Phase, Reply, ReplyCode, SecurityInfo, SecurityType,
};
use crate::uri::SmtpUri;

const NOT_READY: &str = "Cannot send commands while not connected or waiting for server reply.";

/// SMTP client for a single conversation.
///
/// A client connects once. Create a new client for every delivery attempt.
pub struct Client {
    uri: SmtpUri,
    config: ClientConfig,
    span: tracing::Span,
    transport: Option<Transport>,
    phase: Phase,
    direction: Direction,
    session: Session,
    envelope: Option<Envelope>,
    content: Option<MessageSource>,
    registry: Registry,
    observers: HashMap<PhaseEvent, Vec<Observer>>,
    subscribers: Vec<mpsc::UnboundedSender<ClientEvent>>,
    connect_attempted: bool,
    closed: bool,
    close_reason: Option<String>,
}

impl Client {
    /// Creates a client for a `smtp://` or `smtps://` URI.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidUri`] if the URI does not parse.
    pub fn new(uri: &str, config: ClientConfig) -> Result<Self> {
        Ok(Self::from_uri(SmtpUri::parse(uri)?, config))
    }

    /// Creates a client for a parsed URI with the default extensions.
    #[must_use]
    pub fn from_uri(uri: SmtpUri, config: ClientConfig) -> Self {
        let span = tracing::info_span!("smtp", uri = %uri);
        let registry = Registry::with_defaults(&config);
        Self {
            uri,
            config,
            span,
            transport: None,
            phase: Phase::Idle,
            direction: Direction::Send,
            session: Session::default(),
            envelope: None,
            content: None,
            registry,
            observers: HashMap::new(),
            subscribers: Vec::new(),
            connect_attempted: false,
            closed: false,
            close_reason: None,
        }
    }

    /// Replaces the tracing span the conversation runs in.
    #[must_use]
    pub fn with_span(mut self, span: tracing::Span) -> Self {
        self.span = span;
        self
    }

    /// Registers an extension, replacing any with the same keyword.
    pub fn enable(&mut self, extension: Box<dyn Extension>) {
        self.registry.enable(extension);
    }

    /// Removes every extension driving `verb`.
    pub fn disable(&mut self, verb: &str) {
        self.registry.disable(verb);
    }

    /// Registers an observer for a phase event.
    pub fn on<F>(&mut self, event: PhaseEvent, observer: F)
    where
        F: FnMut(Option<&Reply>, &Session) -> Decision + Send + 'static,
    {
        self.observers
            .entry(event)
            .or_default()
            .push(Box::new(observer));
    }

    /// Subscribes to lifecycle notifications.
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<ClientEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.push(tx);
        rx
    }

    /// Sets the envelope of the transaction.
    pub fn set_envelope(&mut self, envelope: Envelope) {
        self.envelope = Some(envelope);
    }

    /// Returns the envelope, if set.
    #[must_use]
    pub const fn envelope(&self) -> Option<&Envelope> {
        self.envelope.as_ref()
    }

    /// Returns the envelope for modification, if set.
    pub const fn envelope_mut(&mut self) -> Option<&mut Envelope> {
        self.envelope.as_mut()
    }

    /// Sets the message content.
    pub fn set_content(&mut self, content: impl Into<MessageSource>) {
        self.content = Some(content.into());
    }

    /// Returns the connection URI.
    #[must_use]
    pub const fn uri(&self) -> &SmtpUri {
        &self.uri
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Returns the current phase.
    #[must_use]
    pub const fn phase(&self) -> &Phase {
        &self.phase
    }

    /// Returns the half-duplex direction.
    #[must_use]
    pub const fn direction(&self) -> Direction {
        self.direction
    }

    /// Returns the session record.
    #[must_use]
    pub const fn session(&self) -> &Session {
        &self.session
    }

    /// Returns the session record for modification by extensions.
    pub const fn session_mut(&mut self) -> &mut Session {
        &mut self.session
    }

    /// Returns true if the transport is encrypted.
    #[must_use]
    pub fn is_secure(&self) -> bool {
        self.transport.as_ref().is_some_and(Transport::is_secure)
    }

    /// Connects, delivers one message and closes.
    ///
    /// # Errors
    ///
    /// See [`Client::run`].
    pub async fn send(
        &mut self,
        mail_from: impl Into<String>,
        rcpt_to: impl IntoIterator<Item = impl Into<String>>,
        content: impl Into<MessageSource>,
    ) -> Result<Outcome> {
        let mut envelope = Envelope::new(mail_from);
        for recipient in rcpt_to {
            envelope.add_recipient(recipient);
        }
        self.set_envelope(envelope);
        self.set_content(content);
        self.run().await
    }

    /// Opens the TCP connection, plus the TLS handshake for `smtps`.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidState`] if this client already tried to connect
    /// - [`Error::ConnectTimeout`] if the connection is not up in time
    /// - I/O and TLS errors otherwise
    pub async fn connect(&mut self) -> Result<()> {
        self.begin_connect()?;
        let timeout = self.config.connect_timeout;
        let connecting = TcpStream::connect((self.uri.host(), self.uri.port()));
        let tcp = match tokio::time::timeout(timeout, connecting).await {
            Ok(Ok(tcp)) => tcp,
            Ok(Err(e)) => return Err(self.fail(e.into()).await),
            Err(_) => return Err(self.fail(Error::ConnectTimeout(timeout)).await),
        };
        let remote = tcp.peer_addr().ok();
        let local = tcp.local_addr().ok();
        self.attach(SecureableStream::plain(tcp), remote, local).await
    }

    /// Runs the conversation over an already connected stream.
    ///
    /// # Errors
    ///
    /// Same as [`Client::connect`], minus the TCP part.
    pub async fn connect_with(&mut self, stream: impl AsyncStream + 'static) -> Result<()> {
        self.begin_connect()?;
        self.attach(SecureableStream::plain(stream), None, None).await
    }

    fn begin_connect(&mut self) -> Result<()> {
        if self.connect_attempted {
            return Err(Error::InvalidState(
                "Client has already tried to connect. Use a new client instead.".into(),
            ));
        }
        self.connect_attempted = true;
        self.phase = Phase::Connecting;
        Ok(())
    }

    async fn attach(
        &mut self,
        stream: SecureableStream,
        remote: Option<SocketAddr>,
        local: Option<SocketAddr>,
    ) -> Result<()> {
        self.transport = Some(Transport::new(stream, self.config.socket_timeout));

        let security = if self.uri.is_implicit_tls() {
            let timeout = self.config.connect_timeout;
            match tokio::time::timeout(timeout, self.upgrade_to_tls(SecurityType::ImplicitTls)).await
            {
                Ok(Ok(security)) => security,
                Ok(Err(e)) => return Err(self.fail(e).await),
                Err(_) => return Err(self.fail(Error::ConnectTimeout(timeout)).await),
            }
        } else {
            SecurityInfo::plain()
        };

        tracing::info!(
            host = self.uri.host(),
            port = self.uri.port(),
            secure = security.is_secure(),
            "Connected"
        );
        self.session.connect = Some(ConnectInfo {
            host: self.uri.host().to_string(),
            port: self.uri.port(),
            remote_address: remote.map(|a| a.to_string()),
            local_address: local.map(|a| a.to_string()),
            timestamp: Utc::now(),
            security: security.clone(),
        });
        self.emit(ClientEvent::Connected {
            host: self.uri.host().to_string(),
            port: self.uri.port(),
            security,
        });
        self.phase = Phase::Greeting;
        self.direction = Direction::Receiving;
        Ok(())
    }

    /// Runs the conversation to its end, connecting first if needed.
    ///
    /// Returns [`Outcome::Delivered`] once the server accepted the message
    /// for every recipient and the conversation was closed, and
    /// [`Outcome::Closed`] when it ended early without an error (for
    /// example after a recipient was refused).
    ///
    /// # Errors
    ///
    /// Returns the error that ended the conversation. The connection is
    /// closed by then, except after [`Error::Timeout`], which leaves the
    /// decision to the caller.
    pub async fn run(&mut self) -> Result<Outcome> {
        let span = self.span.clone();
        self.drive().instrument(span).await
    }

    async fn drive(&mut self) -> Result<Outcome> {
        if self.transport.is_none() {
            if self.connect_attempted {
                return Err(Error::InvalidState(NOT_READY.into()));
            }
            self.connect().await?;
        }

        let mut step = self.greeting().await;
        loop {
            let action = match step {
                Ok(action) => action,
                Err(e) => return Err(self.fail(e).await),
            };
            // Each reply is handled on a fresh scheduling turn.
            tokio::task::yield_now().await;
            step = match action {
                NextAction::Ehlo => self.ehlo().await,
                NextAction::Negotiate => self.negotiate().await,
                NextAction::MailFrom => self.mail_from().await,
                NextAction::RcptTo => self.rcpt_to().await,
                NextAction::Data => self.data().await,
                NextAction::Quit => self.quit().await,
                NextAction::Command(command) => self.custom(command).await,
                NextAction::Close => {
                    let reason = self.close_reason.take();
                    self.close(reason.clone()).await;
                    return Ok(self.outcome(reason));
                }
            };
        }
    }

    fn outcome(&self, reason: Option<String>) -> Outcome {
        let delivered = self.envelope.as_ref().is_some_and(Envelope::all_accepted);
        match &self.session.data {
            Some(data) if delivered => Outcome::Delivered {
                reply: data.reply.clone(),
            },
            _ => Outcome::Closed {
                reason: reason.or_else(|| Some("Conversation ended before delivery.".into())),
            },
        }
    }

    async fn greeting(&mut self) -> Result<NextAction> {
        self.phase = Phase::Greeting;
        let reply = self.read_reply(true).await?;
        if reply.code != ReplyCode::SERVICE_READY {
            return Err(Error::smtp(&self.phase, &reply));
        }
        let domain = reply
            .message()
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .to_string();
        self.session.greeting = Some(GreetingInfo {
            domain,
            reply: reply.clone(),
        });
        self.dispatch(&PhaseEvent::Greeting, Some(&reply), NextAction::Ehlo)
    }

    async fn ehlo(&mut self) -> Result<NextAction> {
        let reply = self.ehlo_exchange().await?;
        self.dispatch(&PhaseEvent::Ehlo, Some(&reply), NextAction::Negotiate)
    }

    /// Sends EHLO again and replaces the recorded capabilities.
    ///
    /// # Errors
    ///
    /// Fails if EHLO is not answered with 250.
    pub async fn refresh_capabilities(&mut self) -> Result<()> {
        let phase = std::mem::replace(&mut self.phase, Phase::Ehlo);
        self.ehlo_exchange().await?;
        self.phase = phase;
        Ok(())
    }

    async fn ehlo_exchange(&mut self) -> Result<Reply> {
        self.phase = Phase::Ehlo;
        let command = Command::Ehlo {
            domain: self.config.name.clone(),
        };
        let reply = self.exchange(&command).await?;
        if reply.code != ReplyCode::OK {
            return Err(Error::smtp(&self.phase, &reply));
        }

        let (domain, greet) = match reply.message().split_once(' ') {
            Some((domain, greet)) => (domain.to_string(), Some(greet.trim().to_string())),
            None => (reply.message().to_string(), None),
        };
        let capabilities = Capabilities::from_ehlo_lines(&reply.lines);
        tracing::debug!(
            keywords = ?capabilities.keywords().collect::<Vec<_>>(),
            "EHLO capabilities"
        );
        self.session.ehlo = Some(EhloInfo {
            domain,
            greet: greet.filter(|g| !g.is_empty()),
            capabilities,
            reply: reply.clone(),
        });
        Ok(reply)
    }

    async fn negotiate(&mut self) -> Result<NextAction> {
        for mut extension in self.registry.instantiate() {
            self.phase = Phase::Extension(extension.keyword().to_string());
            tracing::debug!(extension = extension.keyword(), "Negotiating");
            let result = extension.enable(self).await;
            extension.cleanup();
            result?;
        }
        self.dispatch(&PhaseEvent::Esmtp, None, NextAction::MailFrom)
    }

    async fn mail_from(&mut self) -> Result<NextAction> {
        self.phase = Phase::MailFrom;
        let envelope = self
            .envelope
            .as_mut()
            .ok_or_else(|| Error::InvalidState("No envelope to send.".into()))?;
        if envelope.recipients().is_empty() {
            return Err(Error::InvalidState("Envelope has no recipients.".into()));
        }
        envelope.reset_outcomes();

        let mut params = Vec::with_capacity(envelope.mail_params.len() + 1);
        if let Some(size) = &self.session.size {
            let len = self.content.as_ref().and_then(MessageSource::len_hint);
            if let Some(len) = len {
                if size.limit > 0 && len > size.limit {
                    return Err(Error::MessageTooLarge {
                        size: len,
                        limit: size.limit,
                    });
                }
                params.push(Param::new("SIZE", len.to_string()));
            }
        }
        params.extend(envelope.mail_params.iter().cloned());
        let return_path = envelope.mail_from.clone();

        let command = Command::Mail {
            return_path: return_path.clone(),
            params,
        };
        let reply = self.exchange(&command).await?;
        if reply.code != ReplyCode::OK {
            return Err(Error::smtp(&self.phase, &reply));
        }
        self.session.mail_from = Some(MailFromInfo {
            return_path,
            reply: reply.clone(),
        });
        self.dispatch(&PhaseEvent::Mail, Some(&reply), NextAction::RcptTo)
    }

    async fn rcpt_to(&mut self) -> Result<NextAction> {
        self.phase = Phase::RcptTo;
        let envelope = self
            .envelope
            .as_ref()
            .ok_or_else(|| Error::InvalidState("No envelope to send.".into()))?;
        let index = envelope
            .next_pending()
            .ok_or_else(|| Error::InvalidState("No pending recipient.".into()))?;
        let recipient = &envelope.recipients()[index];
        let forward_path = recipient.forward_path.clone();
        let command = Command::Rcpt {
            forward_path: forward_path.clone(),
            params: recipient.params.clone(),
        };

        let reply = self.exchange(&command).await?;
        let outcome = match reply.code {
            ReplyCode::OK | ReplyCode::FORWARD => RecipientOutcome::Accepted(reply.clone()),
            code if code.is_transient() || code.is_permanent() => {
                tracing::warn!(
                    recipient = %forward_path,
                    code = code.as_u16(),
                    message = reply.message(),
                    "Recipient rejected"
                );
                self.emit(ClientEvent::RecipientRejected {
                    forward_path,
                    reply: reply.clone(),
                });
                RecipientOutcome::Rejected(reply.clone())
            }
            _ => return Err(Error::smtp(&self.phase, &reply)),
        };

        let envelope = self
            .envelope
            .as_mut()
            .ok_or_else(|| Error::InvalidState("No envelope to send.".into()))?;
        envelope.record(index, outcome);

        let default = if envelope.next_pending().is_some() {
            NextAction::RcptTo
        } else if envelope.all_accepted() {
            NextAction::Data
        } else {
            self.close_reason = Some("Not every recipient was accepted.".into());
            match self.config.on_recipient_rejection {
                RejectionPolicy::Close => NextAction::Close,
                RejectionPolicy::Quit => NextAction::Quit,
            }
        };
        self.dispatch(&PhaseEvent::Rcpt, Some(&reply), default)
    }

    async fn data(&mut self) -> Result<NextAction> {
        self.phase = Phase::Data;
        let Some(content) = self.content.take() else {
            return Err(Error::InvalidState("No message content to send.".into()));
        };
        if !self.envelope.as_ref().is_some_and(Envelope::all_accepted) {
            return Err(Error::InvalidState(
                "Refusing to send DATA: not every recipient was accepted.".into(),
            ));
        }

        let reply = self.exchange(&Command::Data).await?;
        if reply.code != ReplyCode::START_DATA {
            return Err(Error::smtp(&self.phase, &reply));
        }

        self.direction = Direction::Sending;
        let transport = self
            .transport
            .as_mut()
            .ok_or_else(|| Error::InvalidState(NOT_READY.into()))?;
        let octets = transport.write_data(content).await?;
        tracing::debug!(octets, "C: <message content>");
        self.direction = Direction::Receiving;

        let reply = self.read_reply(true).await?;
        if reply.code != ReplyCode::OK {
            return Err(Error::smtp(&self.phase, &reply));
        }
        self.session.data = Some(DataInfo {
            reply: reply.clone(),
            octets,
        });
        self.dispatch(&PhaseEvent::Data, Some(&reply), NextAction::Quit)
    }

    async fn quit(&mut self) -> Result<NextAction> {
        self.phase = Phase::Quit;
        self.write_command(&Command::Quit).await?;
        let reply = match self.read_reply(false).await {
            Ok(reply) => Some(reply),
            Err(Error::ConnectionClosed) => None,
            Err(e) => return Err(e),
        };
        let last_words = reply
            .as_ref()
            .filter(|r| r.code == ReplyCode::CLOSING)
            .map(|r| r.message().to_string());
        self.session.quit = Some(QuitInfo { last_words });
        self.dispatch(&PhaseEvent::Quit, reply.as_ref(), NextAction::Close)
    }

    async fn custom(&mut self, command: Command) -> Result<NextAction> {
        let verb = command.verb().to_string();
        self.phase = Phase::Custom(verb.clone());
        let reply = self.exchange(&command).await?;

        let event = PhaseEvent::Custom(verb.clone());
        if !self.observers.get(&event).is_some_and(|o| !o.is_empty()) {
            return Err(Error::InvalidState(format!(
                "Unexpected SMTP conversation phase: {verb}"
            )));
        }
        let decisions = self.collect_decisions(&event, Some(&reply));
        if decisions.iter().all(|d| matches!(d, Decision::Proceed)) {
            return Err(Error::InvalidState(format!(
                "SMTP phase {verb} has not been finished properly. Closing connection."
            )));
        }
        resolve(NextAction::Close, decisions)
    }

    /// Sends one command and reads its reply.
    ///
    /// Replies 421, 500 and 501 are turned into errors here, before the
    /// caller sees them.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidState`] when a reply is still outstanding
    /// - [`Error::Smtp`] for the replies above
    /// - transport, framing and timeout errors
    pub async fn exchange(&mut self, command: &Command) -> Result<Reply> {
        self.write_command(command).await?;
        self.read_reply(!matches!(command, Command::Quit)).await
    }

    async fn write_command(&mut self, command: &Command) -> Result<()> {
        if self.direction != Direction::Send {
            return Err(Error::InvalidState(NOT_READY.into()));
        }
        let line = command.encode()?;
        let transport = self
            .transport
            .as_mut()
            .ok_or_else(|| Error::InvalidState(NOT_READY.into()))?;
        tracing::debug!("C: {command}");
        transport.write_line(&line).await?;
        self.direction = Direction::Receiving;
        Ok(())
    }

    async fn read_reply(&mut self, short_circuit: bool) -> Result<Reply> {
        let transport = self
            .transport
            .as_mut()
            .ok_or_else(|| Error::InvalidState(NOT_READY.into()))?;
        let reply = transport.read_reply().await?;
        self.direction = Direction::Send;
        if short_circuit && reply.code.is_fatal() {
            return Err(Error::smtp(&self.phase, &reply));
        }
        Ok(reply)
    }

    /// Negotiates TLS on the open connection.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] while a reply is outstanding, and
    /// [`Error::TlsHandshake`] if negotiation fails.
    pub async fn upgrade_to_tls(&mut self, kind: SecurityType) -> Result<SecurityInfo> {
        if self.direction != Direction::Send {
            return Err(Error::InvalidState(NOT_READY.into()));
        }
        let connector = tls_connector(&self.config.tls);
        let name = server_name(&self.config.tls, self.uri.host())?;
        let transport = self
            .transport
            .as_mut()
            .ok_or_else(|| Error::InvalidState(NOT_READY.into()))?;
        transport.upgrade(&connector, name, kind).await
    }

    fn collect_decisions(&mut self, event: &PhaseEvent, reply: Option<&Reply>) -> Vec<Decision> {
        let session = &self.session;
        self.observers
            .get_mut(event)
            .map(|observers| observers.iter_mut().map(|o| o(reply, session)).collect())
            .unwrap_or_default()
    }

    fn dispatch(
        &mut self,
        event: &PhaseEvent,
        reply: Option<&Reply>,
        default: NextAction,
    ) -> Result<NextAction> {
        let decisions = self.collect_decisions(event, reply);
        resolve(default, decisions)
    }

    pub(crate) fn emit(&mut self, event: ClientEvent) {
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    async fn fail(&mut self, error: Error) -> Error {
        let message = error.to_string();
        self.session.last_error = Some(message.clone());
        self.emit(ClientEvent::Error {
            message: message.clone(),
        });

        if matches!(error, Error::Timeout(_)) {
            tracing::warn!(phase = %self.phase, ?error, "Socket idle timeout");
            self.phase = Phase::Error;
            return error;
        }

        tracing::error!(phase = %self.phase, ?error, "Conversation failed");
        self.phase = Phase::Error;
        self.close(Some(message)).await;
        error
    }

    /// Closes the connection. Safe to call at any time and more than once.
    ///
    /// Subscribers get exactly one [`ClientEvent::Closed`] per client that
    /// tried to connect, also when the connection was never established.
    pub async fn close(&mut self, reason: Option<String>) {
        if let Some(mut transport) = self.transport.take() {
            transport.shutdown().await;
        } else if !self.connect_attempted || self.closed {
            return;
        }
        if self.phase != Phase::Error {
            self.phase = Phase::Closed;
        }
        self.direction = Direction::Send;
        self.closed = true;
        tracing::info!(reason = reason.as_deref().unwrap_or("done"), "Connection closed");
        self.emit(ClientEvent::Closed { reason });
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("uri", &self.uri)
            .field("phase", &self.phase)
            .field("direction", &self.direction)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}
