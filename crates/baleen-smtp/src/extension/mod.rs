//! ESMTP extension negotiation.
//!
//! After EHLO the client instantiates every registered [`Extension`] in
//! ascending priority and awaits its [`enable`](Extension::enable). An
//! extension either returns `Ok(())` to let negotiation advance, or an error
//! that ends the conversation. MAIL FROM is only issued once every extension
//! has finished.

mod auth;
mod size;
mod starttls;

use std::fmt;

use async_trait::async_trait;

pub use auth::{AuthCramMd5, AuthLogin, AuthPlain};
pub use size::Size;
pub use starttls::StartTls;

use crate::client::Client;
use crate::config::{ClientConfig, StartTlsPolicy};
use crate::error::Result;

/// An ESMTP extension the client can negotiate.
///
/// Registry entries are prototypes: negotiation runs on a fresh value from
/// [`new_instance`](Extension::new_instance) for every connection.
#[async_trait]
pub trait Extension: Send + Sync {
    /// Unique registry key, e.g. `AUTH-PLAIN`.
    fn keyword(&self) -> &str;

    /// SMTP verb the extension drives, e.g. `AUTH`.
    fn verb(&self) -> &str;

    /// Lower runs first.
    fn priority(&self) -> u8;

    /// Creates the per-connection instance.
    fn new_instance(&self) -> Box<dyn Extension>;

    /// Negotiates the extension.
    ///
    /// Extensions that do not apply to the server return `Ok(())` without
    /// touching the connection.
    async fn enable(&mut self, client: &mut Client) -> Result<()>;

    /// Releases anything acquired during [`enable`](Extension::enable).
    /// Called exactly once per instance, whatever the outcome.
    fn cleanup(&mut self) {}
}

/// Registered extensions, keyed by keyword.
#[derive(Default)]
pub struct Registry {
    extensions: Vec<Box<dyn Extension>>,
}

impl Registry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates the default registry: STARTTLS (unless disabled), SIZE and
    /// the three AUTH mechanisms.
    #[must_use]
    pub fn with_defaults(config: &ClientConfig) -> Self {
        let mut registry = Self::new();
        if config.starttls != StartTlsPolicy::Disabled {
            registry.enable(Box::new(StartTls::new(
                config.starttls == StartTlsPolicy::Required,
            )));
        }
        registry.enable(Box::new(Size));
        registry.enable(Box::new(AuthCramMd5));
        registry.enable(Box::new(AuthPlain));
        registry.enable(Box::new(AuthLogin));
        registry
    }

    /// Registers an extension, replacing any with the same keyword.
    pub fn enable(&mut self, extension: Box<dyn Extension>) {
        self.extensions
            .retain(|e| !e.keyword().eq_ignore_ascii_case(extension.keyword()));
        self.extensions.push(extension);
    }

    /// Removes every extension driving `verb`.
    pub fn disable(&mut self, verb: &str) {
        self.extensions.retain(|e| !e.verb().eq_ignore_ascii_case(verb));
    }

    /// Returns the extensions in negotiation order. Equal priorities keep
    /// registration order.
    #[must_use]
    pub fn ordered(&self) -> Vec<&dyn Extension> {
        let mut ordered: Vec<&dyn Extension> = self.extensions.iter().map(|e| e.as_ref()).collect();
        ordered.sort_by_key(|e| e.priority());
        ordered
    }

    /// Returns the per-connection instances in negotiation order.
    #[must_use]
    pub fn instantiate(&self) -> Vec<Box<dyn Extension>> {
        self.ordered().into_iter().map(|e| e.new_instance()).collect()
    }

    /// Returns true if an extension with this keyword is registered.
    #[must_use]
    pub fn contains(&self, keyword: &str) -> bool {
        self.extensions
            .iter()
            .any(|e| e.keyword().eq_ignore_ascii_case(keyword))
    }

    /// Returns the number of registered extensions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.extensions.len()
    }

    /// Returns true if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.extensions.is_empty()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.extensions.iter().map(|e| e.keyword()))
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone, clippy::manual_string_new, clippy::needless_collect, clippy::unreadable_literal, clippy::used_underscore_items, clippy::similar_names)]
mod tests {
    use super::*;

    struct Sample {
        keyword: &'static str,
        priority: u8,
    }

    #[async_trait]
    impl Extension for Sample {
        fn keyword(&self) -> &str {
            self.keyword
        }

        fn verb(&self) -> &str {
            "XSAMPLE"
        }

        fn priority(&self) -> u8 {
            self.priority
        }

        fn new_instance(&self) -> Box<dyn Extension> {
            Box::new(Self {
                keyword: self.keyword,
                priority: self.priority,
            })
        }

        async fn enable(&mut self, _client: &mut Client) -> Result<()> {
            Ok(())
        }
    }

    fn keywords(registry: &Registry) -> Vec<&str> {
        registry.ordered().into_iter().map(|e| e.keyword()).collect()
    }

    #[test]
    fn test_default_order() {
        let registry = Registry::with_defaults(&ClientConfig::default());
        assert_eq!(
            keywords(&registry),
            vec!["STARTTLS", "SIZE", "AUTH-CRAM-MD5", "AUTH-PLAIN", "AUTH-LOGIN"]
        );
    }

    #[test]
    fn test_starttls_disabled_by_config() {
        let config = ClientConfig::builder()
            .starttls(StartTlsPolicy::Disabled)
            .build();
        let registry = Registry::with_defaults(&config);
        assert!(!registry.contains("STARTTLS"));
        assert_eq!(registry.len(), 4);
    }

    #[test]
    fn test_enable_replaces_by_keyword() {
        let mut registry = Registry::new();
        registry.enable(Box::new(Sample { keyword: "XSAMPLE", priority: 3 }));
        registry.enable(Box::new(Sample { keyword: "xsample", priority: 1 }));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.ordered()[0].priority(), 1);
    }

    #[test]
    fn test_disable_by_verb() {
        let mut registry = Registry::with_defaults(&ClientConfig::default());
        registry.disable("auth");
        assert_eq!(keywords(&registry), vec!["STARTTLS", "SIZE"]);
    }

    #[test]
    fn test_custom_priority_interleaves() {
        let mut registry = Registry::with_defaults(&ClientConfig::default());
        registry.enable(Box::new(Sample { keyword: "XSAMPLE", priority: 7 }));
        let instances = registry.instantiate();
        let order: Vec<&str> = instances.iter().map(|e| e.keyword()).collect();
        assert_eq!(
            order,
            vec!["STARTTLS", "SIZE", "XSAMPLE", "AUTH-CRAM-MD5", "AUTH-PLAIN", "AUTH-LOGIN"]
        );
        assert!(!registry.is_empty());
        assert_eq!(format!("{registry:?}").matches("AUTH").count(), 3);
    }
}
