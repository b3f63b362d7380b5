//! Client configuration types.

use std::str::FromStr;
use std::time::Duration;

use crate::error::Error;

/// Default TCP connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(15_000);

/// Default socket idle timeout while waiting for a reply.
pub const DEFAULT_SOCKET_TIMEOUT: Duration = Duration::from_millis(5_000);

/// Whether STARTTLS is attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StartTlsPolicy {
    /// Never upgrade.
    Disabled,
    /// Upgrade when the server advertises STARTTLS.
    #[default]
    Opportunistic,
    /// Abort before MAIL FROM unless the upgrade succeeds.
    Required,
}

impl FromStr for StartTlsPolicy {
    type Err = Error;

    /// Accepts `true`, `false` and `required`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "false" | "no" | "off" => Ok(Self::Disabled),
            "true" | "yes" | "on" => Ok(Self::Opportunistic),
            "required" | "mandatory" => Ok(Self::Required),
            other => Err(Error::Config(format!("unknown STARTTLS setting {other:?}"))),
        }
    }
}

/// TLS options for implicit TLS and STARTTLS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsOptions {
    /// Validate the server certificate chain against the webpki roots.
    pub verify_certificates: bool,
    /// Name to validate the certificate against; defaults to the URI host.
    pub server_name: Option<String>,
}

impl Default for TlsOptions {
    fn default() -> Self {
        Self {
            verify_certificates: true,
            server_name: None,
        }
    }
}

/// What to do after RCPT when not every recipient was accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RejectionPolicy {
    /// Drop the connection without QUIT.
    #[default]
    Close,
    /// Say QUIT politely, then close.
    Quit,
}

/// SMTP client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Name announced in EHLO.
    pub name: String,
    /// TCP connect timeout.
    pub connect_timeout: Duration,
    /// Socket idle timeout.
    pub socket_timeout: Duration,
    /// STARTTLS policy.
    pub starttls: StartTlsPolicy,
    /// TLS options.
    pub tls: TlsOptions,
    /// Fallback when a recipient is rejected.
    pub on_recipient_rejection: RejectionPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            name: local_hostname(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            socket_timeout: DEFAULT_SOCKET_TIMEOUT,
            starttls: StartTlsPolicy::default(),
            tls: TlsOptions::default(),
            on_recipient_rejection: RejectionPolicy::default(),
        }
    }
}

impl ClientConfig {
    /// Creates a configuration builder.
    #[must_use]
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::new()
    }
}

/// Builder for client configuration.
#[derive(Debug, Clone, Default)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    /// Creates a new builder with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the EHLO name.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    /// Sets the connection timeout.
    #[must_use]
    pub const fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Sets the socket idle timeout.
    #[must_use]
    pub const fn socket_timeout(mut self, timeout: Duration) -> Self {
        self.config.socket_timeout = timeout;
        self
    }

    /// Sets the STARTTLS policy.
    #[must_use]
    pub const fn starttls(mut self, policy: StartTlsPolicy) -> Self {
        self.config.starttls = policy;
        self
    }

    /// Enables or disables certificate validation.
    #[must_use]
    pub const fn verify_certificates(mut self, verify: bool) -> Self {
        self.config.tls.verify_certificates = verify;
        self
    }

    /// Overrides the TLS server name.
    #[must_use]
    pub fn tls_server_name(mut self, name: impl Into<String>) -> Self {
        self.config.tls.server_name = Some(name.into());
        self
    }

    /// Sets the recipient rejection fallback.
    #[must_use]
    pub const fn on_recipient_rejection(mut self, policy: RejectionPolicy) -> Self {
        self.config.on_recipient_rejection = policy;
        self
    }

    /// Builds the configuration.
    #[must_use]
    pub fn build(self) -> ClientConfig {
        self.config
    }
}

/// Returns the local host name, or `localhost` if it is not valid UTF-8.
#[must_use]
pub fn local_hostname() -> String {
    gethostname::gethostname()
        .into_string()
        .ok()
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.connect_timeout, Duration::from_millis(15000));
        assert_eq!(config.socket_timeout, Duration::from_millis(5000));
        assert_eq!(config.starttls, StartTlsPolicy::Opportunistic);
        assert!(config.tls.verify_certificates);
        assert_eq!(config.on_recipient_rejection, RejectionPolicy::Close);
        assert!(!config.name.is_empty());
    }

    #[test]
    fn test_builder() {
        let config = ClientConfig::builder()
            .name("relay.example.com")
            .connect_timeout(Duration::from_secs(3))
            .socket_timeout(Duration::from_secs(1))
            .starttls(StartTlsPolicy::Required)
            .verify_certificates(false)
            .tls_server_name("mx.example.com")
            .on_recipient_rejection(RejectionPolicy::Quit)
            .build();

        assert_eq!(config.name, "relay.example.com");
        assert_eq!(config.connect_timeout, Duration::from_secs(3));
        assert_eq!(config.socket_timeout, Duration::from_secs(1));
        assert_eq!(config.starttls, StartTlsPolicy::Required);
        assert!(!config.tls.verify_certificates);
        assert_eq!(config.tls.server_name.as_deref(), Some("mx.example.com"));
        assert_eq!(config.on_recipient_rejection, RejectionPolicy::Quit);
    }

    #[test]
    fn test_starttls_from_str() {
        assert_eq!("true".parse::<StartTlsPolicy>().unwrap(), StartTlsPolicy::Opportunistic);
        assert_eq!("false".parse::<StartTlsPolicy>().unwrap(), StartTlsPolicy::Disabled);
        assert_eq!("Required".parse::<StartTlsPolicy>().unwrap(), StartTlsPolicy::Required);
        assert!("maybe".parse::<StartTlsPolicy>().is_err());
    }
}
