//! SIZE (RFC 1870).

use async_trait::async_trait;

use super::Extension;
use crate::client::Client;
use crate::error::Result;
use crate::session::SizeInfo;
use crate::types::Capabilities;

/// Records the server's message size limit. MAIL FROM then carries
/// `SIZE=<octets>` and oversized messages are refused locally.
#[derive(Debug, Clone, Copy, Default)]
pub struct Size;

#[async_trait]
impl Extension for Size {
    fn keyword(&self) -> &str {
        "SIZE"
    }

    fn verb(&self) -> &str {
        "SIZE"
    }

    fn priority(&self) -> u8 {
        5
    }

    fn new_instance(&self) -> Box<dyn Extension> {
        Box::new(Self)
    }

    async fn enable(&mut self, client: &mut Client) -> Result<()> {
        let Some(limit) = client
            .session()
            .capabilities()
            .filter(|caps| caps.supports("SIZE"))
            .map(Capabilities::size)
        else {
            return Ok(());
        };
        tracing::debug!(limit, "Server announced SIZE");
        client.session_mut().size = Some(SizeInfo { limit });
        Ok(())
    }
}
