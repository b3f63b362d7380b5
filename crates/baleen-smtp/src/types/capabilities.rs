//! Server capabilities advertised in the EHLO reply.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Value of a single EHLO capability line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CapabilityValue {
    /// Keyword advertised without arguments (e.g. `STARTTLS`).
    Flag(bool),
    /// Everything after the keyword (e.g. `PLAIN LOGIN` for `AUTH`).
    Argument(String),
}

/// Capability map learned from EHLO: `keyword -> argument | true`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Capabilities(BTreeMap<String, CapabilityValue>);

impl Capabilities {
    /// Builds the capability map from the lines of an EHLO reply.
    ///
    /// The first line carries the server domain and greeting, so it is skipped.
    #[must_use]
    pub fn from_ehlo_lines(lines: &[String]) -> Self {
        let mut map = BTreeMap::new();
        for line in lines.iter().skip(1) {
            let line = line.trim();
            let (keyword, argument) = match line.split_once(' ') {
                Some((k, rest)) => (k, Some(rest.trim())),
                None => (line, None),
            };
            if keyword.is_empty()
                || !keyword
                    .bytes()
                    .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
            {
                continue;
            }
            let value = match argument {
                Some(arg) if !arg.is_empty() => CapabilityValue::Argument(arg.to_string()),
                _ => CapabilityValue::Flag(true),
            };
            map.insert(keyword.to_ascii_uppercase(), value);
        }
        Self(map)
    }

    /// Checks whether the server advertised a keyword.
    #[must_use]
    pub fn supports(&self, keyword: &str) -> bool {
        self.0.contains_key(&keyword.to_ascii_uppercase())
    }

    /// Returns the argument text of a keyword, if any.
    #[must_use]
    pub fn argument(&self, keyword: &str) -> Option<&str> {
        match self.0.get(&keyword.to_ascii_uppercase()) {
            Some(CapabilityValue::Argument(arg)) => Some(arg),
            _ => None,
        }
    }

    /// Returns the mechanisms listed in the `AUTH` capability.
    #[must_use]
    pub fn auth_mechanisms(&self) -> Vec<AuthMechanism> {
        self.argument("AUTH")
            .map(|arg| arg.split_whitespace().filter_map(AuthMechanism::parse).collect())
            .unwrap_or_default()
    }

    /// Returns the maximum message size announced via `SIZE`.
    ///
    /// Missing, malformed, or negative values yield 0 (no limit).
    #[must_use]
    pub fn size(&self) -> u64 {
        self.argument("SIZE")
            .and_then(|arg| arg.split_whitespace().next())
            .and_then(|n| n.parse::<u64>().ok())
            .filter(|n| *n <= MAX_SAFE_SIZE)
            .unwrap_or(0)
    }

    /// Returns true when nothing was advertised.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates keywords in sorted order.
    pub fn keywords(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }
}

/// Largest SIZE value accepted as a limit (2^53 - 1).
const MAX_SAFE_SIZE: u64 = (1 << 53) - 1;

/// SASL authentication mechanism.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AuthMechanism {
    /// PLAIN - plaintext authentication
    #[serde(rename = "PLAIN")]
    Plain,
    /// LOGIN - legacy plaintext
    #[serde(rename = "LOGIN")]
    Login,
    /// CRAM-MD5 - challenge-response
    #[serde(rename = "CRAM-MD5")]
    CramMd5,
}

impl AuthMechanism {
    /// Parses an authentication mechanism name.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "PLAIN" => Some(Self::Plain),
            "LOGIN" => Some(Self::Login),
            "CRAM-MD5" => Some(Self::CramMd5),
            _ => None,
        }
    }

    /// Returns the mechanism name as a string.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Plain => "PLAIN",
            Self::Login => "LOGIN",
            Self::CramMd5 => "CRAM-MD5",
        }
    }
}

impl std::fmt::Display for AuthMechanism {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
