//! Outbound transport abstraction.
//!
//! The relay only talks to WhatsApp through [`OutboundTransport`]. The
//! production implementation is [`WhatsAppBridge`], a JSON-over-WebSocket
//! client for an external bridge process; tests plug in in-memory fakes.
//!
//! Lifecycle events flow the other way, through the `mpsc::Sender` handed to
//! [`OutboundTransport::start`].

pub mod whatsapp;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::Result;
use crate::relay::{LifecycleEvent, MediaKind, PollContent, ResolvedMedia};

pub use whatsapp::WhatsAppBridge;

/// A chat visible to the outbound account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatInfo {
    /// Transport chat id (a WhatsApp JID such as `1203...@g.us`)
    pub id: String,
    /// Display name
    pub name: String,
    #[serde(default)]
    pub is_group: bool,
}

impl ChatInfo {
    pub fn group(id: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            is_group: true,
        }
    }

    pub fn direct(id: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            is_group: false,
        }
    }
}

/// What to send, borrowed from the job being delivered.
#[derive(Debug, Clone, Copy)]
pub enum OutboundContent<'a> {
    Text(&'a str),
    Media(&'a ResolvedMedia),
    Poll(&'a PollContent),
}

/// Per-send presentation options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendOptions {
    pub caption: Option<String>,
    pub as_sticker: bool,
    pub as_voice: bool,
    pub as_document: bool,
}

impl SendOptions {
    /// Options matching how a media attachment was posted on the source side.
    pub fn for_media(media: &ResolvedMedia) -> Self {
        Self {
            caption: media.caption.clone(),
            as_sticker: media.kind == MediaKind::Sticker,
            as_voice: media.kind == MediaKind::Voice,
            as_document: media.kind == MediaKind::Document,
        }
    }
}

/// Outbound messaging client (WhatsApp).
///
/// Implementations must be safe to share between the dispatch loop and the
/// lifecycle driver; every method takes `&self`.
#[async_trait]
pub trait OutboundTransport: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Begin connecting. Lifecycle events are delivered on `events` for as
    /// long as the transport runs.
    async fn start(&self, events: mpsc::Sender<LifecycleEvent>) -> Result<()>;

    /// Re-establish the connection after a disconnect.
    async fn reconnect(&self) -> Result<()>;

    /// Send one message and wait for the transport's acknowledgement.
    async fn send_message(
        &self,
        chat_id: &str,
        content: &OutboundContent<'_>,
        options: &SendOptions,
    ) -> Result<()>;

    /// Chats the account can post to.
    async fn list_chats(&self) -> Result<Vec<ChatInfo>>;

    /// Close the connection. No events are emitted afterwards.
    async fn shutdown(&self) -> Result<()>;
}
