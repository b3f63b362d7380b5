//! # baleen-relay
//!
//! Hands filtered messages to a downstream SMTP server and turns the result
//! into a status the inbound side can answer its own client with.
//!
//! ```ignore
//! use baleen_relay::{RelayRequest, relay};
//! use baleen_smtp::ClientConfig;
//!
//! let request = RelayRequest::new("sender@example.com", content).to("alice@example.net");
//! match relay("smtp://mx.example.net:25", ClientConfig::default(), request).await {
//!     Ok(receipt) => println!("queued: {}", receipt.reply),
//!     Err(e) => reply_upstream(e.status()),
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

mod error;
mod request;
mod status;

use baleen_smtp::{Client, ClientConfig, Outcome, RecipientOutcome};
use tracing::Instrument;

pub use error::RelayError;
pub use request::{RelayReceipt, RelayRequest};
pub use status::SmtpStatus;

/// Relays one message to `target` (an `smtp://` or `smtps://` URI).
///
/// # Errors
///
/// Returns a [`RelayError`] whose [`status`](RelayError::status) should be
/// relayed to the original sender.
pub async fn relay(
    target: &str,
    config: ClientConfig,
    request: RelayRequest,
) -> Result<RelayReceipt, RelayError> {
    let client = Client::new(target, config)?;
    relay_with(client, request).await
}

/// Relays one message with a prepared client.
///
/// Use this to register extensions or observers before the conversation
/// starts. The client may already be connected.
///
/// # Errors
///
/// Same as [`relay`].
pub async fn relay_with(
    mut client: Client,
    request: RelayRequest,
) -> Result<RelayReceipt, RelayError> {
    let RelayRequest {
        id,
        envelope,
        content,
    } = request;
    let id = id.unwrap_or_else(|| "-".to_string());
    let span = tracing::info_span!("relay", %id);

    async move {
        if envelope.recipients().is_empty() {
            return Err(disconnect(RelayError::NoRecipients));
        }
        client.set_envelope(envelope);
        client.set_content(content);

        match client.run().await {
            Ok(Outcome::Delivered { reply }) => {
                tracing::info!(%reply, "Message relayed");
                let accepted: Vec<String> = client
                    .envelope()
                    .map(|envelope| {
                        envelope
                            .accepted()
                            .map(|r| r.forward_path.clone())
                            .collect()
                    })
                    .unwrap_or_default();
                Ok(RelayReceipt {
                    reply,
                    accepted,
                    session: client.session().clone(),
                })
            }
            Ok(Outcome::Closed { reason }) => {
                let rejected: Vec<_> = client
                    .envelope()
                    .map(|envelope| {
                        envelope
                            .rejected()
                            .filter_map(|r| match &r.outcome {
                                RecipientOutcome::Rejected(reply) => {
                                    Some((r.forward_path.clone(), reply.clone()))
                                }
                                _ => None,
                            })
                            .collect()
                    })
                    .unwrap_or_default();
                let error = if rejected.is_empty() {
                    RelayError::NotDelivered {
                        reason: reason
                            .unwrap_or_else(|| "Conversation ended before delivery.".into()),
                    }
                } else {
                    RelayError::Rejected { rejected }
                };
                Err(disconnect(error))
            }
            Err(e) => {
                // An idle timeout leaves the socket open; this side gives up on it.
                if e.is_timeout() {
                    client.close(Some(e.to_string())).await;
                }
                Err(disconnect(e.into()))
            }
        }
    }
    .instrument(span)
    .await
}

fn disconnect(error: RelayError) -> RelayError {
    let status = error.status();
    tracing::warn!(code = status.code, message = %status.message, %error, "Disconnecting");
    error
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone, clippy::manual_string_new, clippy::needless_collect, clippy::unreadable_literal, clippy::used_underscore_items, clippy::similar_names)]
mod tests {
    use std::time::Duration;

    use baleen_smtp::{Phase, StartTlsPolicy};
    use tokio_test::io::Builder;

    use super::*;

    fn config() -> ClientConfig {
        ClientConfig::builder()
            .name("filter.example.com")
            .starttls(StartTlsPolicy::Disabled)
            .build()
    }

    const CONTENT: &str = "Subject: hi\r\n\r\nHello\r\n";

    #[tokio::test]
    async fn test_relay_delivers() {
        let mock = Builder::new()
            .read(b"220 mx.example.net ESMTP\r\n")
            .write(b"EHLO filter.example.com\r\n")
            .read(b"250 mx.example.net\r\n")
            .write(b"MAIL FROM:<sender@example.com>\r\n")
            .read(b"250 2.1.0 Ok\r\n")
            .write(b"RCPT TO:<alice@example.net>\r\n")
            .read(b"250 2.1.5 Ok\r\n")
            .write(b"DATA\r\n")
            .read(b"354 Go ahead\r\n")
            .write(b"Subject: hi\r\n\r\nHello\r\n.\r\n")
            .read(b"250 2.0.0 Ok: queued as 42\r\n")
            .write(b"QUIT\r\n")
            .read(b"221 2.0.0 Bye\r\n")
            .build();

        let mut client = Client::new("smtp://mx.example.net", config()).unwrap();
        client.connect_with(mock).await.unwrap();
        let request = RelayRequest::new("sender@example.com", CONTENT)
            .id("m1")
            .to("alice@example.net");

        let receipt = relay_with(client, request).await.unwrap();
        assert_eq!(receipt.reply.message(), "2.0.0 Ok: queued as 42");
        assert_eq!(receipt.accepted, vec!["alice@example.net".to_string()]);
        assert_eq!(receipt.session.data.as_ref().unwrap().octets, 25);
    }

    #[tokio::test]
    async fn test_relay_maps_rejection() {
        let mock = Builder::new()
            .read(b"220 mx.example.net ESMTP\r\n")
            .write(b"EHLO filter.example.com\r\n")
            .read(b"250 mx.example.net\r\n")
            .write(b"MAIL FROM:<sender@example.com>\r\n")
            .read(b"250 2.1.0 Ok\r\n")
            .write(b"RCPT TO:<alice@example.net>\r\n")
            .read(b"550 5.1.1 No such user\r\n")
            .build();

        let mut client = Client::new("smtp://mx.example.net", config()).unwrap();
        client.connect_with(mock).await.unwrap();
        let request = RelayRequest::new("sender@example.com", CONTENT).to("alice@example.net");

        let err = relay_with(client, request).await.unwrap_err();
        assert!(matches!(err, RelayError::Rejected { ref rejected } if rejected.len() == 1));
        assert_eq!(err.status(), SmtpStatus::new(550, "5.1.1 No such user"));
    }

    #[tokio::test]
    async fn test_relay_keeps_server_error() {
        let mock = Builder::new()
            .read(b"220 mx.example.net ESMTP\r\n")
            .write(b"EHLO filter.example.com\r\n")
            .read(b"250 mx.example.net\r\n")
            .write(b"MAIL FROM:<sender@example.com>\r\n")
            .read(b"553 5.1.8 Sender address rejected\r\n")
            .build();

        let mut client = Client::new("smtp://mx.example.net", config()).unwrap();
        client.connect_with(mock).await.unwrap();
        let request = RelayRequest::new("sender@example.com", CONTENT).to("alice@example.net");

        let err = relay_with(client, request).await.unwrap_err();
        let RelayError::Smtp(baleen_smtp::Error::Smtp { ref phase, .. }) = err else {
            panic!("unexpected error: {err:?}");
        };
        assert_eq!(phase, &Phase::MailFrom.to_string());
        assert_eq!(err.status().to_string(), "553 5.1.8 Sender address rejected");
    }

    #[tokio::test(start_paused = true)]
    async fn test_relay_closes_after_timeout() {
        let mock = Builder::new()
            .read(b"220 mx.example.net ESMTP\r\n")
            .write(b"EHLO filter.example.com\r\n")
            .wait(Duration::from_secs(120))
            .build();

        let config = ClientConfig::builder()
            .name("filter.example.com")
            .starttls(StartTlsPolicy::Disabled)
            .socket_timeout(Duration::from_secs(30))
            .build();
        let mut client = Client::new("smtp://mx.example.net", config).unwrap();
        client.connect_with(mock).await.unwrap();
        let request = RelayRequest::new("sender@example.com", CONTENT).to("alice@example.net");

        let err = relay_with(client, request).await.unwrap_err();
        assert!(matches!(err, RelayError::Smtp(baleen_smtp::Error::Timeout(_))));
        assert_eq!(err.status().code, 451);
    }

    #[tokio::test]
    async fn test_relay_without_recipients() {
        let client = Client::new("smtp://mx.example.net", config()).unwrap();
        let request = RelayRequest::new("sender@example.com", CONTENT);
        let err = relay_with(client, request).await.unwrap_err();
        assert!(matches!(err, RelayError::NoRecipients));
    }

    #[tokio::test]
    async fn test_relay_rejects_bad_target() {
        let request = RelayRequest::new("sender@example.com", CONTENT).to("alice@example.net");
        let err = relay("ftp://mx.example.net", config(), request).await.unwrap_err();
        assert_eq!(err.status().code, 554);
    }
}
