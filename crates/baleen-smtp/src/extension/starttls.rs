//! STARTTLS (RFC 3207).

use async_trait::async_trait;

use super::Extension;
use crate::client::Client;
use crate::command::Command;
use crate::error::{Error, Result};
use crate::session::StartTlsInfo;
use crate::types::{ReplyCode, SecurityType};

/// Upgrades a plaintext connection to TLS and redoes EHLO over it.
#[derive(Debug, Clone, Copy, Default)]
pub struct StartTls {
    mandatory: bool,
}

impl StartTls {
    /// Creates the extension. A mandatory upgrade fails the conversation
    /// when the server does not offer STARTTLS or refuses it.
    #[must_use]
    pub const fn new(mandatory: bool) -> Self {
        Self { mandatory }
    }

    /// Returns true if the upgrade is required.
    #[must_use]
    pub const fn is_mandatory(&self) -> bool {
        self.mandatory
    }
}

#[async_trait]
impl Extension for StartTls {
    fn keyword(&self) -> &str {
        "STARTTLS"
    }

    fn verb(&self) -> &str {
        "STARTTLS"
    }

    fn priority(&self) -> u8 {
        0
    }

    fn new_instance(&self) -> Box<dyn Extension> {
        Box::new(*self)
    }

    async fn enable(&mut self, client: &mut Client) -> Result<()> {
        if client.is_secure() {
            return Ok(());
        }

        let offered = client
            .session()
            .capabilities()
            .is_some_and(|caps| caps.supports("STARTTLS"));
        if !offered {
            if self.mandatory {
                return Err(Error::StartTlsUnavailable);
            }
            tracing::debug!("Server does not offer STARTTLS, continuing in plaintext");
            return Ok(());
        }

        let reply = client.exchange(&Command::StartTls).await?;
        if reply.code != ReplyCode::SERVICE_READY {
            if self.mandatory {
                return Err(Error::smtp(client.phase(), &reply));
            }
            tracing::warn!(code = reply.code.as_u16(), "Server refused STARTTLS");
            return Ok(());
        }

        let security = client.upgrade_to_tls(SecurityType::StartTls).await?;
        tracing::info!(
            protocol = security.protocol.as_deref().unwrap_or("unknown"),
            cipher = security.cipher.as_deref().unwrap_or("unknown"),
            "Connection upgraded to TLS"
        );

        let session = client.session_mut();
        session.starttls = Some(StartTlsInfo { reply, security });
        session.reset_after_starttls();

        client.refresh_capabilities().await
    }
}
