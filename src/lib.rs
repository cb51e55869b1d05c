//! tgwa-relay - Relay Telegram channel posts into a WhatsApp group
//!
//! Posts arriving from Telegram are queued in memory and delivered to a
//! WhatsApp destination once the outbound connection is authenticated and the
//! destination chat has been resolved. See [`relay`] for the delivery core.

pub mod config;
pub mod error;
pub mod health;
pub mod inbound;
pub mod media;
pub mod qr;
pub mod relay;
pub mod session;
pub mod transport;
pub mod utils;

pub use config::Config;
pub use error::{MediaError, RelayError, Result};
pub use relay::{InboundPost, RelayHandle, RelayService, RelayStatus};
pub use transport::{ChatInfo, OutboundTransport};
