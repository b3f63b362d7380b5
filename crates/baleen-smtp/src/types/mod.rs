//! Core SMTP types.

mod capabilities;
mod phase;
mod reply;

pub use capabilities::{AuthMechanism, Capabilities, CapabilityValue};
pub use phase::{Direction, Phase, SecurityInfo, SecurityType};
pub use reply::{Reply, ReplyCode};
