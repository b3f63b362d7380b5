//! Transport that can be upgraded to TLS in place.

use std::fmt;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, RootCertStore, SignatureScheme};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;

use crate::config::TlsOptions;
use crate::error::{Error, Result};
use crate::types::{SecurityInfo, SecurityType};

/// Byte stream the client can run over (TCP socket, test double, ...).
pub trait AsyncStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> AsyncStream for T {}

/// A plaintext stream that may be wrapped in TLS without changing its type.
#[derive(Default)]
pub enum SecureableStream {
    /// Cleartext.
    Plain(Box<dyn AsyncStream>),
    /// TLS over the original stream.
    Tls(Box<TlsStream<Box<dyn AsyncStream>>>),
    /// Shut down, or lost during a failed handshake.
    #[default]
    Closed,
}

impl SecureableStream {
    /// Wraps a cleartext stream.
    pub fn plain(stream: impl AsyncStream + 'static) -> Self {
        Self::Plain(Box::new(stream))
    }

    /// Returns true if TLS is active.
    #[must_use]
    pub const fn is_secure(&self) -> bool {
        matches!(self, Self::Tls(_))
    }

    /// Returns true after shutdown or a failed upgrade.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }

    /// Performs the TLS handshake over the current stream and replaces it
    /// with the encrypted one.
    ///
    /// On handshake failure the stream is gone and the transport is closed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] if TLS is already active or the
    /// stream is closed, and [`Error::TlsHandshake`] if negotiation fails.
    pub async fn upgrade(
        &mut self,
        connector: &TlsConnector,
        server_name: ServerName<'static>,
        kind: SecurityType,
    ) -> Result<SecurityInfo> {
        let plain = match std::mem::take(self) {
            Self::Plain(stream) => stream,
            tls @ Self::Tls(_) => {
                *self = tls;
                return Err(Error::InvalidState("Connection is already using TLS".into()));
            }
            Self::Closed => {
                return Err(Error::InvalidState("Connection is closed".into()));
            }
        };

        let tls = connector
            .connect(server_name, plain)
            .await
            .map_err(|e| Error::TlsHandshake(e.to_string()))?;

        let (_, conn) = tls.get_ref();
        let info = SecurityInfo {
            kind,
            cipher: conn
                .negotiated_cipher_suite()
                .map(|s| s.suite().as_str().unwrap_or("UNKNOWN").to_string()),
            protocol: conn
                .protocol_version()
                .map(|v| v.as_str().unwrap_or("UNKNOWN").to_string()),
        };
        *self = Self::Tls(Box::new(tls));
        Ok(info)
    }
}

impl fmt::Debug for SecureableStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Plain(_) => f.write_str("SecureableStream::Plain"),
            Self::Tls(_) => f.write_str("SecureableStream::Tls"),
            Self::Closed => f.write_str("SecureableStream::Closed"),
        }
    }
}

fn not_connected() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "stream is closed")
}

impl AsyncRead for SecureableStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_read(cx, buf),
            Self::Tls(stream) => Pin::new(stream).poll_read(cx, buf),
            Self::Closed => Poll::Ready(Ok(())),
        }
    }
}

impl AsyncWrite for SecureableStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_write(cx, buf),
            Self::Tls(stream) => Pin::new(stream).poll_write(cx, buf),
            Self::Closed => Poll::Ready(Err(not_connected())),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_flush(cx),
            Self::Tls(stream) => Pin::new(stream).poll_flush(cx),
            Self::Closed => Poll::Ready(Ok(())),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_shutdown(cx),
            Self::Tls(stream) => Pin::new(stream).poll_shutdown(cx),
            Self::Closed => Poll::Ready(Ok(())),
        }
    }
}

/// Creates a TLS connector honoring the certificate validation toggle.
#[must_use]
pub fn tls_connector(options: &TlsOptions) -> TlsConnector {
    let config = if options.verify_certificates {
        let root_store = RootCertStore {
            roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
        };
        rustls::ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth()
    } else {
        rustls::ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(NoVerifier))
            .with_no_client_auth()
    };

    TlsConnector::from(Arc::new(config))
}

/// Resolves the name the server certificate is checked against.
///
/// # Errors
///
/// Returns [`Error::InvalidDnsName`] if the name is neither a DNS name nor
/// an IP address.
pub fn server_name(options: &TlsOptions, host: &str) -> Result<ServerName<'static>> {
    let name = options.server_name.as_deref().unwrap_or(host);
    Ok(ServerName::try_from(name.to_string())?)
}

/// Accepts any server certificate. Used when validation is switched off.
#[derive(Debug)]
struct NoVerifier;

impl ServerCertVerifier for NoVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PSS_SHA384,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::ED25519,
        ]
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone, clippy::manual_string_new, clippy::needless_collect, clippy::unreadable_literal, clippy::used_underscore_items, clippy::similar_names)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[test]
    fn test_tls_connectors() {
        let _verified = tls_connector(&TlsOptions::default());
        let _unverified = tls_connector(&TlsOptions {
            verify_certificates: false,
            server_name: None,
        });
    }

    #[test]
    fn test_server_name_override() {
        let options = TlsOptions {
            verify_certificates: true,
            server_name: Some("mx.example.com".into()),
        };
        let name = server_name(&options, "10.0.0.1").unwrap();
        assert!(matches!(name, ServerName::DnsName(ref d) if d.as_ref() == "mx.example.com"));
        assert!(server_name(&TlsOptions::default(), "not a name!").is_err());
    }

    #[tokio::test]
    async fn test_plain_stream_passthrough() {
        let mock = tokio_test::io::Builder::new()
            .write(b"NOOP\r\n")
            .read(b"250 OK\r\n")
            .build();
        let mut stream = SecureableStream::plain(mock);
        stream.write_all(b"NOOP\r\n").await.unwrap();
        let mut buf = [0u8; 8];
        stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"250 OK\r\n");
        assert!(!stream.is_secure());
    }

    #[tokio::test]
    async fn test_closed_stream() {
        let mut stream = SecureableStream::Closed;
        assert!(stream.write_all(b"x").await.is_err());
        let mut buf = Vec::new();
        assert_eq!(stream.read_to_end(&mut buf).await.unwrap(), 0);
        let connector = tls_connector(&TlsOptions::default());
        let name = ServerName::try_from("localhost").unwrap();
        assert!(stream.upgrade(&connector, name, SecurityType::StartTls).await.is_err());
    }
}
