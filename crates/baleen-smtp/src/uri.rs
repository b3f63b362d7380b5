//! `smtp://` and `smtps://` connection URIs.

use std::fmt;
use std::str::FromStr;

use percent_encoding::percent_decode_str;
use url::{Host, Url};

use crate::error::{Error, Result};

/// Transport selected by the URI scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    /// Plain SMTP, optionally upgraded via STARTTLS.
    Smtp,
    /// SMTP over implicit TLS.
    Smtps,
}

impl Scheme {
    /// Returns the default port for this scheme.
    #[must_use]
    pub const fn default_port(self) -> u16 {
        match self {
            Self::Smtp => 25,
            Self::Smtps => 465,
        }
    }

    const fn as_str(self) -> &'static str {
        match self {
            Self::Smtp => "smtp",
            Self::Smtps => "smtps",
        }
    }
}

/// Parsed connection URI: `smtp[s]://[user[:pass]@]host[:port]`.
///
/// The password never appears in the `Display` or `Debug` output.
#[derive(Clone, PartialEq, Eq)]
pub struct SmtpUri {
    scheme: Scheme,
    host: String,
    ipv6: bool,
    port: u16,
    username: Option<String>,
    password: Option<String>,
}

impl SmtpUri {
    /// Parses a connection URI.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidUri`] if the URI is malformed, uses another
    /// scheme, or has no host.
    pub fn parse(input: &str) -> Result<Self> {
        let url = Url::parse(input).map_err(|e| Error::InvalidUri(e.to_string()))?;

        let scheme = match url.scheme() {
            "smtp" => Scheme::Smtp,
            "smtps" => Scheme::Smtps,
            _ => {
                return Err(Error::InvalidUri(
                    "Must start with smtp: or smtps:".to_string(),
                ));
            }
        };

        let (host, ipv6) = match url.host() {
            Some(Host::Domain(domain)) if !domain.is_empty() => (domain.to_string(), false),
            Some(Host::Ipv4(addr)) => (addr.to_string(), false),
            Some(Host::Ipv6(addr)) => (addr.to_string(), true),
            _ => return Err(Error::InvalidUri("Missing host".to_string())),
        };

        let username = Some(decode(url.username())?).filter(|u| !u.is_empty());
        let password = url.password().map(decode).transpose()?;

        Ok(Self {
            scheme,
            host,
            ipv6,
            port: url.port().unwrap_or_else(|| scheme.default_port()),
            username,
            password,
        })
    }

    /// Returns the scheme.
    #[must_use]
    pub const fn scheme(&self) -> Scheme {
        self.scheme
    }

    /// Returns the host (IPv6 literals without brackets).
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Returns the port, defaulted from the scheme.
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Returns the decoded user name.
    #[must_use]
    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    /// Returns the decoded password.
    #[must_use]
    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }

    /// Returns true for `smtps`.
    #[must_use]
    pub const fn is_implicit_tls(&self) -> bool {
        matches!(self.scheme, Scheme::Smtps)
    }
}

fn decode(raw: &str) -> Result<String> {
    percent_decode_str(raw)
        .decode_utf8()
        .map(|s| s.into_owned())
        .map_err(|e| Error::InvalidUri(format!("credentials are not UTF-8: {e}")))
}

impl FromStr for SmtpUri {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for SmtpUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://", self.scheme.as_str())?;
        if let Some(user) = &self.username {
            f.write_str(user)?;
            if self.password.is_some() {
                f.write_str(":xxx")?;
            }
            f.write_str("@")?;
        }
        if self.ipv6 {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl fmt::Debug for SmtpUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SmtpUri").field(&self.to_string()).finish()
    }
}
