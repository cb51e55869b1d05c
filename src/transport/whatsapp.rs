//! WhatsApp transport over an external bridge process.
//!
//! The bridge owns the WhatsApp protocol (E2E encryption, QR pairing, the
//! auth directory). The relay talks to it with JSON frames over a WebSocket.
//!
//! # Bridge Protocol (JSON over WebSocket)
//!
//! Bridge → relay:
//! ```json
//! {"type":"qr_code","data":"2@base64data"}
//! {"type":"authenticated"}
//! {"type":"ready"}
//! {"type":"disconnected","reason":"session expired"}
//! {"type":"auth_failure","reason":"logged out"}
//! {"type":"ack","request_id":"…","ok":true}
//! {"type":"chats","request_id":"…","chats":[{"id":"1203@g.us","name":"News","is_group":true}]}
//! ```
//!
//! Relay → bridge:
//! ```json
//! {"type":"send","request_id":"…","to":"1203@g.us","content":"Hello"}
//! {"type":"send","request_id":"…","to":"1203@g.us","media":{"kind":"photo","mime":"image/jpeg","data":"<base64>"},"caption":"Look"}
//! {"type":"send","request_id":"…","to":"1203@g.us","poll":{"question":"Lunch?","options":["Yes","No"],"allows_multiple_answers":false}}
//! {"type":"list_chats","request_id":"…"}
//! {"type":"reconnect"}
//! ```
//!
//! Every request carrying a `request_id` is answered by an `ack` or `chats`
//! frame with the same id. Reconnection is not automatic: when the socket
//! drops, a `Disconnected` lifecycle event is emitted and the relay's
//! lifecycle machine decides when to call [`OutboundTransport::reconnect`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot, watch};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::WhatsAppConfig;
use crate::error::{RelayError, Result};
use crate::relay::{LifecycleEvent, MediaKind, PollContent};

use super::{ChatInfo, OutboundContent, OutboundTransport, SendOptions};

/// Capacity of the command channel into the bridge loop.
const COMMAND_CHANNEL_CAPACITY: usize = 64;

// ---------------------------------------------------------------------------
// Bridge protocol types
// ---------------------------------------------------------------------------

/// Frame received from the bridge.
#[derive(Debug, Deserialize)]
struct BridgeMessage {
    /// Frame type: "qr_code", "ready", "ack", "chats", etc.
    #[serde(rename = "type")]
    msg_type: String,
    /// QR payload (qr_code only).
    #[serde(default)]
    data: Option<String>,
    /// Disconnect or auth failure reason.
    #[serde(default)]
    reason: Option<String>,
    /// Correlation id (ack and chats only).
    #[serde(default)]
    request_id: Option<String>,
    /// Whether the request succeeded (ack only).
    #[serde(default)]
    ok: Option<bool>,
    /// Failure description (ack only).
    #[serde(default)]
    error: Option<String>,
    /// Chat listing (chats only).
    #[serde(default)]
    chats: Option<Vec<ChatInfo>>,
}

/// Media attachment in a send request.
#[derive(Debug, Serialize)]
struct BridgeMedia<'a> {
    kind: MediaKind,
    mime: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    filename: Option<&'a str>,
    /// Base64-encoded payload.
    data: String,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    as_sticker: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    as_voice: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    as_document: bool,
}

/// Frame sent to the bridge.
#[derive(Debug, Serialize)]
struct BridgeRequest<'a> {
    /// "send", "list_chats" or "reconnect".
    #[serde(rename = "type")]
    msg_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    request_id: Option<&'a str>,
    /// Recipient chat JID (send only).
    #[serde(skip_serializing_if = "Option::is_none")]
    to: Option<&'a str>,
    /// Text body.
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    media: Option<BridgeMedia<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    poll: Option<&'a PollContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    caption: Option<&'a str>,
}

impl<'a> BridgeRequest<'a> {
    fn bare(msg_type: &'static str, request_id: Option<&'a str>) -> Self {
        Self {
            msg_type,
            request_id,
            to: None,
            content: None,
            media: None,
            poll: None,
            caption: None,
        }
    }

    fn send(
        request_id: &'a str,
        to: &'a str,
        content: &OutboundContent<'a>,
        options: &'a SendOptions,
    ) -> Self {
        let mut req = Self::bare("send", Some(request_id));
        req.to = Some(to);
        req.caption = options.caption.as_deref();
        match *content {
            OutboundContent::Text(text) => req.content = Some(text),
            OutboundContent::Media(media) => {
                req.media = Some(BridgeMedia {
                    kind: media.kind,
                    mime: &media.mime,
                    filename: media.filename.as_deref(),
                    data: base64::engine::general_purpose::STANDARD.encode(&media.bytes),
                    as_sticker: options.as_sticker,
                    as_voice: options.as_voice,
                    as_document: options.as_document,
                })
            }
            OutboundContent::Poll(poll) => req.poll = Some(poll),
        }
        req
    }
}

/// Reply correlated to a request.
#[derive(Debug)]
enum BridgeReply {
    Ack { ok: bool, error: Option<String> },
    Chats(Vec<ChatInfo>),
}

/// Map a bridge frame to a lifecycle event, if it is one.
fn lifecycle_event(msg: &BridgeMessage) -> Option<LifecycleEvent> {
    let reason = || {
        msg.reason
            .clone()
            .unwrap_or_else(|| "unknown".to_string())
    };
    match msg.msg_type.as_str() {
        "qr_code" => msg
            .data
            .as_deref()
            .filter(|d| !d.is_empty())
            .map(|d| LifecycleEvent::QrNeeded(d.to_string())),
        "authenticated" => Some(LifecycleEvent::Authenticated),
        "ready" | "connected" => Some(LifecycleEvent::Ready),
        "disconnected" => Some(LifecycleEvent::Disconnected(reason())),
        "auth_failure" => Some(LifecycleEvent::AuthFailure(reason())),
        _ => None,
    }
}

/// Map a bridge frame to a request reply, if it is one.
fn reply(msg: BridgeMessage) -> Option<(String, BridgeReply)> {
    let request_id = msg.request_id?;
    match msg.msg_type.as_str() {
        "ack" => Some((
            request_id,
            BridgeReply::Ack {
                ok: msg.ok.unwrap_or(false),
                error: msg.error,
            },
        )),
        "chats" => Some((request_id, BridgeReply::Chats(msg.chats.unwrap_or_default()))),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Pending request table
// ---------------------------------------------------------------------------

type ReplySender = oneshot::Sender<Result<BridgeReply>>;

#[derive(Default, Clone)]
struct Pending {
    inner: Arc<Mutex<HashMap<String, ReplySender>>>,
}

impl Pending {
    fn insert(&self, id: &str, tx: ReplySender) {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.to_string(), tx);
    }

    fn remove(&self, id: &str) -> Option<ReplySender> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
    }

    fn complete(&self, id: &str, result: Result<BridgeReply>) {
        match self.remove(id) {
            Some(tx) => {
                let _ = tx.send(result);
            }
            None => debug!(request_id = id, "Reply for unknown or expired request"),
        }
    }

    fn fail_all(&self, reason: &str) {
        let drained: Vec<ReplySender> = self
            .inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, tx)| tx)
            .collect();
        if !drained.is_empty() {
            warn!(count = drained.len(), "Failing pending bridge requests: {}", reason);
        }
        for tx in drained {
            let _ = tx.send(Err(RelayError::Transport(reason.to_string())));
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

// ---------------------------------------------------------------------------
// Bridge loop
// ---------------------------------------------------------------------------

enum Command {
    /// Open the socket, or ask a connected bridge to reconnect to WhatsApp
    Connect,
    /// Write a serialized request frame
    Request { request_id: String, frame: String },
}

struct BridgeLoop {
    url: String,
    events: mpsc::Sender<LifecycleEvent>,
    pending: Pending,
    commands: mpsc::Receiver<Command>,
    shutdown: watch::Receiver<bool>,
}

impl BridgeLoop {
    async fn emit(&self, event: LifecycleEvent) {
        if self.events.send(event).await.is_err() {
            debug!("Lifecycle receiver gone, dropping bridge event");
        }
    }

    /// Connect, serve the socket until it drops, then wait for the next
    /// `Connect` command. Returns on shutdown.
    async fn run(mut self) {
        loop {
            if *self.shutdown.borrow() {
                break;
            }

            let connected = tokio::select! {
                _ = self.shutdown.changed() => break,
                result = connect_async(self.url.as_str()) => result,
            };

            match connected {
                Ok((stream, _)) => {
                    info!("WhatsApp bridge WebSocket connected to {}", self.url);
                    let reason = self.serve(stream).await;
                    self.pending.fail_all(&reason);
                    if *self.shutdown.borrow() {
                        break;
                    }
                    self.emit(LifecycleEvent::Disconnected(reason)).await;
                }
                Err(e) => {
                    warn!("WhatsApp bridge connect failed: {}", e);
                    self.emit(LifecycleEvent::Disconnected(format!(
                        "bridge connect failed: {}",
                        e
                    )))
                    .await;
                }
            }

            if !self.wait_for_connect().await {
                break;
            }
        }
        self.pending.fail_all("bridge stopped");
        info!("WhatsApp bridge loop stopped");
    }

    /// Idle until asked to connect. Requests issued meanwhile fail fast.
    async fn wait_for_connect(&mut self) -> bool {
        loop {
            tokio::select! {
                _ = self.shutdown.changed() => return false,
                cmd = self.commands.recv() => match cmd {
                    Some(Command::Connect) => return true,
                    Some(Command::Request { request_id, .. }) => {
                        self.pending.complete(
                            &request_id,
                            Err(RelayError::Transport("bridge not connected".into())),
                        );
                    }
                    None => return false,
                },
            }
        }
    }

    /// Serve one socket. Returns why it ended.
    async fn serve<S>(&mut self, stream: tokio_tungstenite::WebSocketStream<S>) -> String
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
    {
        let (mut ws_writer, mut ws_reader) = stream.split();

        loop {
            tokio::select! {
                _ = self.shutdown.changed() => {
                    let _ = ws_writer.send(WsMessage::Close(None)).await;
                    return "shutdown".to_string();
                }

                cmd = self.commands.recv() => {
                    let frame = match cmd {
                        Some(Command::Request { frame, .. }) => frame,
                        Some(Command::Connect) => {
                            match serde_json::to_string(&BridgeRequest::bare("reconnect", None)) {
                                Ok(json) => json,
                                Err(e) => {
                                    error!("Failed to serialize reconnect request: {}", e);
                                    continue;
                                }
                            }
                        }
                        None => return "command channel closed".to_string(),
                    };
                    if let Err(e) = ws_writer.send(WsMessage::Text(frame.into())).await {
                        return format!("bridge write failed: {}", e);
                    }
                }

                msg = ws_reader.next() => {
                    match msg {
                        Some(Ok(WsMessage::Text(raw))) => self.dispatch_frame(&raw).await,
                        Some(Ok(WsMessage::Ping(payload))) => {
                            if let Err(e) = ws_writer.send(WsMessage::Pong(payload)).await {
                                return format!("bridge pong failed: {}", e);
                            }
                        }
                        Some(Ok(WsMessage::Close(frame))) => {
                            info!("WhatsApp bridge WebSocket closed: {:?}", frame);
                            return "bridge socket closed".to_string();
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => return format!("bridge socket error: {}", e),
                        None => return "bridge socket ended".to_string(),
                    }
                }
            }
        }
    }

    async fn dispatch_frame(&self, raw: &str) {
        let msg = match serde_json::from_str::<BridgeMessage>(raw) {
            Ok(msg) => msg,
            Err(e) => {
                debug!("Failed to parse bridge frame: {}", e);
                return;
            }
        };

        if let Some(event) = lifecycle_event(&msg) {
            self.emit(event).await;
            return;
        }

        let msg_type = msg.msg_type.clone();
        match reply(msg) {
            Some((request_id, reply)) => self.pending.complete(&request_id, Ok(reply)),
            None => debug!("Ignoring bridge frame of type '{}'", msg_type),
        }
    }
}

// ---------------------------------------------------------------------------
// WhatsAppBridge
// ---------------------------------------------------------------------------

struct Running {
    commands: mpsc::Sender<Command>,
    shutdown: watch::Sender<bool>,
}

/// [`OutboundTransport`] backed by the WhatsApp bridge.
pub struct WhatsAppBridge {
    config: WhatsAppConfig,
    running: AtomicBool,
    link: Mutex<Option<Running>>,
    pending: Pending,
}

impl WhatsAppBridge {
    pub fn new(config: WhatsAppConfig) -> Self {
        Self {
            config,
            running: AtomicBool::new(false),
            link: Mutex::new(None),
            pending: Pending::default(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn commands(&self) -> Result<mpsc::Sender<Command>> {
        self.link
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|r| r.commands.clone())
            .ok_or_else(|| RelayError::Transport("WhatsApp bridge not running".into()))
    }

    fn request_timeout(&self) -> Duration {
        self.config.request_timeout()
    }

    /// Write a serialized request and wait for the reply with the same id.
    async fn request(&self, request_id: String, frame: String) -> Result<BridgeReply> {
        let commands = self.commands()?;
        let (tx, rx) = oneshot::channel();
        self.pending.insert(&request_id, tx);

        if commands
            .send(Command::Request {
                request_id: request_id.clone(),
                frame,
            })
            .await
            .is_err()
        {
            self.pending.remove(&request_id);
            return Err(RelayError::Transport("WhatsApp bridge loop stopped".into()));
        }

        match tokio::time::timeout(self.request_timeout(), rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(RelayError::Transport("bridge dropped the request".into())),
            Err(_) => {
                self.pending.remove(&request_id);
                Err(RelayError::Transport(format!(
                    "bridge request timed out after {:?}",
                    self.request_timeout()
                )))
            }
        }
    }
}

#[async_trait]
impl OutboundTransport for WhatsAppBridge {
    fn name(&self) -> &str {
        "whatsapp"
    }

    async fn start(&self, events: mpsc::Sender<LifecycleEvent>) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            info!("WhatsApp bridge already running");
            return Ok(());
        }

        let url = self.config.bridge_url.trim().to_string();
        if url.is_empty() {
            self.running.store(false, Ordering::SeqCst);
            return Err(RelayError::Config("WhatsApp bridge URL is empty".into()));
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        *self.link.lock().unwrap_or_else(PoisonError::into_inner) = Some(Running {
            commands: command_tx,
            shutdown: shutdown_tx,
        });

        info!("Starting WhatsApp bridge client for {}", url);
        tokio::spawn(
            BridgeLoop {
                url,
                events,
                pending: self.pending.clone(),
                commands: command_rx,
                shutdown: shutdown_rx,
            }
            .run(),
        );
        Ok(())
    }

    async fn reconnect(&self) -> Result<()> {
        self.commands()?
            .send(Command::Connect)
            .await
            .map_err(|_| RelayError::Transport("WhatsApp bridge loop stopped".into()))
    }

    async fn send_message(
        &self,
        chat_id: &str,
        content: &OutboundContent<'_>,
        options: &SendOptions,
    ) -> Result<()> {
        let to = chat_id.trim();
        if to.is_empty() {
            return Err(RelayError::Transport(
                "WhatsApp recipient chat ID cannot be empty".into(),
            ));
        }

        let request_id = Uuid::new_v4().to_string();
        let frame = serde_json::to_string(&BridgeRequest::send(&request_id, to, content, options))?;
        match self.request(request_id, frame).await? {
            BridgeReply::Ack { ok: true, .. } => Ok(()),
            BridgeReply::Ack { error, .. } => Err(RelayError::Transport(format!(
                "bridge rejected send: {}",
                error.as_deref().unwrap_or("no reason given")
            ))),
            BridgeReply::Chats(_) => Err(RelayError::Transport(
                "unexpected chats reply to send".into(),
            )),
        }
    }

    async fn list_chats(&self) -> Result<Vec<ChatInfo>> {
        let request_id = Uuid::new_v4().to_string();
        let frame = serde_json::to_string(&BridgeRequest::bare("list_chats", Some(&request_id)))?;
        match self.request(request_id, frame).await? {
            BridgeReply::Chats(chats) => Ok(chats),
            BridgeReply::Ack { error, .. } => Err(RelayError::Transport(format!(
                "bridge could not list chats: {}",
                error.as_deref().unwrap_or("no reason given")
            ))),
        }
    }

    async fn shutdown(&self) -> Result<()> {
        if !self.running.swap(false, Ordering::SeqCst) {
            info!("WhatsApp bridge already stopped");
            return Ok(());
        }
        if let Some(running) = self
            .link
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            let _ = running.shutdown.send(true);
        }
        info!("WhatsApp bridge stopped");
        Ok(())
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::ResolvedMedia;
    use tokio::net::TcpListener;

    fn parse(json: &str) -> BridgeMessage {
        serde_json::from_str(json).expect("should parse")
    }

    fn test_config(url: &str) -> WhatsAppConfig {
        WhatsAppConfig {
            bridge_url: url.to_string(),
            request_timeout_secs: 2,
            ..Default::default()
        }
    }

    // -----------------------------------------------------------------------
    // Frame parsing
    // -----------------------------------------------------------------------

    #[test]
    fn test_lifecycle_frames() {
        assert_eq!(
            lifecycle_event(&parse(r#"{"type":"qr_code","data":"2@abc"}"#)),
            Some(LifecycleEvent::QrNeeded("2@abc".into()))
        );
        assert_eq!(
            lifecycle_event(&parse(r#"{"type":"authenticated"}"#)),
            Some(LifecycleEvent::Authenticated)
        );
        assert_eq!(
            lifecycle_event(&parse(r#"{"type":"ready"}"#)),
            Some(LifecycleEvent::Ready)
        );
        assert_eq!(
            lifecycle_event(&parse(r#"{"type":"connected"}"#)),
            Some(LifecycleEvent::Ready)
        );
        assert_eq!(
            lifecycle_event(&parse(r#"{"type":"disconnected","reason":"session expired"}"#)),
            Some(LifecycleEvent::Disconnected("session expired".into()))
        );
        assert_eq!(
            lifecycle_event(&parse(r#"{"type":"auth_failure"}"#)),
            Some(LifecycleEvent::AuthFailure("unknown".into()))
        );
    }

    #[test]
    fn test_qr_without_data_ignored() {
        assert!(lifecycle_event(&parse(r#"{"type":"qr_code"}"#)).is_none());
        assert!(lifecycle_event(&parse(r#"{"type":"qr_code","data":""}"#)).is_none());
    }

    #[test]
    fn test_unknown_frame_is_neither_event_nor_reply() {
        let msg = parse(r#"{"type":"future_event","extra":true}"#);
        assert!(lifecycle_event(&msg).is_none());
        assert!(reply(msg).is_none());
    }

    #[test]
    fn test_ack_and_chats_replies() {
        let (id, r) = reply(parse(
            r#"{"type":"ack","request_id":"r1","ok":false,"error":"not admin"}"#,
        ))
        .unwrap();
        assert_eq!(id, "r1");
        assert!(matches!(r, BridgeReply::Ack { ok: false, error: Some(ref e) } if e == "not admin"));

        let (_, r) = reply(parse(
            r#"{"type":"chats","request_id":"r2","chats":[{"id":"1@g.us","name":"News","is_group":true}]}"#,
        ))
        .unwrap();
        match r {
            BridgeReply::Chats(chats) => assert_eq!(chats, vec![ChatInfo::group("1@g.us", "News")]),
            other => panic!("unexpected reply {:?}", other),
        }

        assert!(reply(parse(r#"{"type":"ack","ok":true}"#)).is_none());
    }

    // -----------------------------------------------------------------------
    // Request serialization
    // -----------------------------------------------------------------------

    #[test]
    fn test_send_text_request() {
        let options = SendOptions::default();
        let req = BridgeRequest::send("r1", "1@g.us", &OutboundContent::Text("Hello"), &options);
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["type"], "send");
        assert_eq!(json["request_id"], "r1");
        assert_eq!(json["to"], "1@g.us");
        assert_eq!(json["content"], "Hello");
        assert!(json.get("media").is_none());
        assert!(json.get("caption").is_none());
    }

    #[test]
    fn test_send_media_request_is_base64() {
        let media = ResolvedMedia {
            kind: MediaKind::Sticker,
            bytes: b"RIFF".to_vec(),
            mime: "image/webp".into(),
            filename: None,
            caption: None,
        };
        let options = SendOptions::for_media(&media);
        let req = BridgeRequest::send("r1", "1@g.us", &OutboundContent::Media(&media), &options);
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["media"]["kind"], "sticker");
        assert_eq!(json["media"]["data"], "UklGRg==");
        assert_eq!(json["media"]["as_sticker"], true);
        assert!(json["media"].get("as_voice").is_none());
        assert!(json.get("content").is_none());
    }

    #[test]
    fn test_send_poll_request() {
        let poll = PollContent {
            question: "Lunch?".into(),
            options: vec!["Yes".into(), "No".into()],
            allows_multiple_answers: true,
        };
        let options = SendOptions::default();
        let req = BridgeRequest::send("r1", "1@g.us", &OutboundContent::Poll(&poll), &options);
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["poll"]["question"], "Lunch?");
        assert_eq!(json["poll"]["options"][1], "No");
        assert_eq!(json["poll"]["allows_multiple_answers"], true);
    }

    #[test]
    fn test_reconnect_request_is_bare() {
        let json = serde_json::to_string(&BridgeRequest::bare("reconnect", None)).unwrap();
        assert_eq!(json, r#"{"type":"reconnect"}"#);
    }

    // -----------------------------------------------------------------------
    // Pending table
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_fail_all_pending() {
        let pending = Pending::default();
        let (tx1, rx1) = oneshot::channel();
        let (tx2, rx2) = oneshot::channel();
        pending.insert("a", tx1);
        pending.insert("b", tx2);

        pending.fail_all("socket closed");
        assert_eq!(pending.len(), 0);
        assert!(rx1.await.unwrap().is_err());
        assert!(rx2.await.unwrap().is_err());
    }

    // -----------------------------------------------------------------------
    // Running state
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_start_empty_bridge_url() {
        let bridge = WhatsAppBridge::new(test_config("  "));
        let (tx, _rx) = mpsc::channel(4);
        assert!(bridge.start(tx).await.is_err());
        assert!(!bridge.is_running());
    }

    #[tokio::test]
    async fn test_send_not_running() {
        let bridge = WhatsAppBridge::new(test_config("ws://127.0.0.1:1"));
        let result = bridge
            .send_message("1@g.us", &OutboundContent::Text("hi"), &SendOptions::default())
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_shutdown_not_running() {
        let bridge = WhatsAppBridge::new(test_config("ws://127.0.0.1:1"));
        assert!(bridge.shutdown().await.is_ok());
    }

    #[tokio::test]
    async fn test_unreachable_bridge_emits_disconnected() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let bridge = WhatsAppBridge::new(test_config(&format!("ws://{}", addr)));
        let (tx, mut rx) = mpsc::channel(4);
        bridge.start(tx).await.unwrap();

        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(event, LifecycleEvent::Disconnected(_)));

        let err = bridge.list_chats().await.unwrap_err();
        assert!(err.to_string().contains("not connected"));
        bridge.shutdown().await.unwrap();
    }

    // -----------------------------------------------------------------------
    // End to end against an in-process bridge
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_roundtrip_with_fake_bridge() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(socket).await.unwrap();
            ws.send(WsMessage::Text(r#"{"type":"ready"}"#.into()))
                .await
                .unwrap();

            let mut seen = Vec::new();
            while let Some(Ok(msg)) = ws.next().await {
                let WsMessage::Text(raw) = msg else { continue };
                let req: serde_json::Value = serde_json::from_str(&raw).unwrap();
                let id = req["request_id"].as_str().unwrap_or_default().to_string();
                let answer = match req["type"].as_str() {
                    Some("list_chats") => serde_json::json!({
                        "type": "chats",
                        "request_id": id,
                        "chats": [{"id": "9@g.us", "name": "News", "is_group": true}]
                    }),
                    Some("send") if req["content"] == "bad" => serde_json::json!({
                        "type": "ack", "request_id": id, "ok": false, "error": "nope"
                    }),
                    _ => serde_json::json!({"type": "ack", "request_id": id, "ok": true}),
                };
                seen.push(req);
                ws.send(WsMessage::Text(answer.to_string().into()))
                    .await
                    .unwrap();
                if seen.len() == 3 {
                    break;
                }
            }
            seen
        });

        let bridge = WhatsAppBridge::new(test_config(&format!("ws://{}", addr)));
        let (tx, mut rx) = mpsc::channel(4);
        bridge.start(tx).await.unwrap();

        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event, LifecycleEvent::Ready);

        let chats = bridge.list_chats().await.unwrap();
        assert_eq!(chats, vec![ChatInfo::group("9@g.us", "News")]);

        let opts = SendOptions::default();
        bridge
            .send_message("9@g.us", &OutboundContent::Text("hello"), &opts)
            .await
            .unwrap();
        let err = bridge
            .send_message("9@g.us", &OutboundContent::Text("bad"), &opts)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("nope"));

        let seen = server.await.unwrap();
        assert_eq!(seen[0]["type"], "list_chats");
        assert_eq!(seen[1]["to"], "9@g.us");

        // the fake bridge closed the socket
        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(event, LifecycleEvent::Disconnected(_)));
        bridge.shutdown().await.unwrap();
    }
}
