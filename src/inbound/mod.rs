//! Inbound side of the relay.
//!
//! Adapters turn source-platform updates into [`InboundPost`](crate::relay::InboundPost)s
//! and hand them to a [`RelayHandle`](crate::relay::RelayHandle).

pub mod telegram;

pub use telegram::{build_bot, AdminCommand, TelegramInbound};
