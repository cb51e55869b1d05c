//! Relay job types
//!
//! A [`RelayJob`] is one unit of inbound content waiting to be forwarded to
//! the destination chat. Jobs are built from [`InboundPost`]s, the
//! transport-neutral shape of a channel post.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Label describing what a job carries.
///
/// `Retry` marks a copy re-queued after a failed send; the payload still
/// determines what is delivered.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Text,
    Photo,
    Video,
    Document,
    Sticker,
    Voice,
    Poll,
    Retry,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Text => "text",
            JobKind::Photo => "photo",
            JobKind::Video => "video",
            JobKind::Document => "document",
            JobKind::Sticker => "sticker",
            JobKind::Voice => "voice",
            JobKind::Poll => "poll",
            JobKind::Retry => "retry",
        }
    }
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Media categories the outbound transport distinguishes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Photo,
    Video,
    Document,
    Sticker,
    Voice,
}

impl MediaKind {
    /// Job kind for a fresh job carrying this media.
    pub fn job_kind(self) -> JobKind {
        match self {
            MediaKind::Photo => JobKind::Photo,
            MediaKind::Video => JobKind::Video,
            MediaKind::Document => JobKind::Document,
            MediaKind::Sticker => JobKind::Sticker,
            MediaKind::Voice => JobKind::Voice,
        }
    }

    /// MIME type to assume when the inbound transport does not report one.
    pub fn default_mime(self) -> &'static str {
        match self {
            MediaKind::Photo => "image/jpeg",
            MediaKind::Video => "video/mp4",
            MediaKind::Document => "application/octet-stream",
            MediaKind::Sticker => "image/webp",
            MediaKind::Voice => "audio/ogg",
        }
    }
}

/// Reference to media not yet downloaded.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MediaRef {
    pub kind: MediaKind,
    /// Inbound transport's file identifier
    pub source_id: String,
    pub mime_hint: Option<String>,
    pub filename: Option<String>,
    pub caption: Option<String>,
    /// Size reported by the inbound transport, checked before download
    pub size_hint: Option<u64>,
}

impl MediaRef {
    pub fn new(kind: MediaKind, source_id: &str) -> Self {
        Self {
            kind,
            source_id: source_id.to_string(),
            mime_hint: None,
            filename: None,
            caption: None,
            size_hint: None,
        }
    }

    pub fn with_caption(mut self, caption: &str) -> Self {
        self.caption = Some(caption.to_string());
        self
    }

    pub fn with_mime(mut self, mime: &str) -> Self {
        self.mime_hint = Some(mime.to_string());
        self
    }

    pub fn with_filename(mut self, filename: &str) -> Self {
        self.filename = Some(filename.to_string());
        self
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size_hint = Some(size);
        self
    }
}

/// Downloaded media ready for sending.
#[derive(Clone, PartialEq, Eq)]
pub struct ResolvedMedia {
    pub kind: MediaKind,
    pub bytes: Vec<u8>,
    pub mime: String,
    pub filename: Option<String>,
    pub caption: Option<String>,
}

impl std::fmt::Debug for ResolvedMedia {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedMedia")
            .field("kind", &self.kind)
            .field("bytes", &self.bytes.len())
            .field("mime", &self.mime)
            .field("filename", &self.filename)
            .field("caption", &self.caption)
            .finish()
    }
}

/// A poll forwarded as a native WhatsApp poll.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PollContent {
    pub question: String,
    pub options: Vec<String>,
    pub allows_multiple_answers: bool,
}

/// What a job delivers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobPayload {
    Text(String),
    /// Media still to be fetched by the media resolver
    Media(MediaRef),
    /// Media already fetched (kept across retries to avoid re-downloading)
    Resolved(ResolvedMedia),
    Poll(PollContent),
}

/// One unit of work for the dispatch loop.
#[derive(Debug, Clone)]
pub struct RelayJob {
    pub id: Uuid,
    pub kind: JobKind,
    pub payload: JobPayload,
    pub enqueued_at: DateTime<Utc>,
    pub attempts: u32,
}

impl RelayJob {
    fn new(kind: JobKind, payload: JobPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            payload,
            enqueued_at: Utc::now(),
            attempts: 0,
        }
    }

    /// Creates a text job.
    ///
    /// # Example
    /// ```
    /// use tgwa_relay::relay::{JobKind, RelayJob};
    ///
    /// let job = RelayJob::text("Hello channel");
    /// assert_eq!(job.kind, JobKind::Text);
    /// assert_eq!(job.attempts, 0);
    /// ```
    pub fn text(text: &str) -> Self {
        Self::new(JobKind::Text, JobPayload::Text(text.to_string()))
    }

    /// Creates a media job pending resolution.
    pub fn media(media: MediaRef) -> Self {
        Self::new(media.kind.job_kind(), JobPayload::Media(media))
    }

    /// Creates a poll job.
    pub fn poll(poll: PollContent) -> Self {
        Self::new(JobKind::Poll, JobPayload::Poll(poll))
    }

    /// The re-queued copy after a failed attempt.
    ///
    /// Keeps id, payload and enqueue time so latency logs stay meaningful.
    pub fn retried(mut self) -> Self {
        self.kind = JobKind::Retry;
        self.attempts = self.attempts.saturating_add(1);
        self
    }

    /// Whether the payload still needs the media resolver.
    pub fn needs_resolution(&self) -> bool {
        matches!(self.payload, JobPayload::Media(_))
    }

    /// Time since the job was first enqueued.
    pub fn age(&self) -> chrono::Duration {
        Utc::now() - self.enqueued_at
    }
}

// ============================================================================
// Inbound posts
// ============================================================================

/// A media attachment as reported by the inbound transport.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InboundFile {
    pub file_id: String,
    pub mime_type: Option<String>,
    pub file_name: Option<String>,
    pub size: Option<u64>,
}

impl InboundFile {
    pub fn new(file_id: &str) -> Self {
        Self {
            file_id: file_id.to_string(),
            ..Default::default()
        }
    }

    fn into_ref(self, kind: MediaKind, caption: Option<&str>) -> MediaRef {
        MediaRef {
            kind,
            source_id: self.file_id,
            mime_hint: self.mime_type,
            filename: self.file_name,
            caption: caption.map(str::to_string),
            size_hint: self.size,
        }
    }
}

/// Transport-neutral view of one channel post.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InboundPost {
    pub text: Option<String>,
    pub caption: Option<String>,
    pub photo: Option<InboundFile>,
    pub video: Option<InboundFile>,
    pub document: Option<InboundFile>,
    pub sticker: Option<InboundFile>,
    pub voice: Option<InboundFile>,
    pub poll: Option<PollContent>,
}

impl InboundPost {
    pub fn text(text: &str) -> Self {
        Self {
            text: Some(text.to_string()),
            ..Default::default()
        }
    }

    /// Build the relay job for this post.
    ///
    /// A post carries at most one attachment; polls win over media, media over
    /// text. Returns `None` for posts with nothing relayable (service
    /// messages, blank text).
    pub fn into_job(self) -> Option<RelayJob> {
        let caption = self
            .caption
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty());

        if let Some(poll) = self.poll {
            if poll.options.is_empty() {
                return None;
            }
            return Some(RelayJob::poll(poll));
        }

        let media = [
            (self.photo, MediaKind::Photo),
            (self.video, MediaKind::Video),
            (self.document, MediaKind::Document),
            (self.sticker, MediaKind::Sticker),
            (self.voice, MediaKind::Voice),
        ]
        .into_iter()
        .find_map(|(file, kind)| file.map(|f| (f, kind)));

        if let Some((file, kind)) = media {
            if file.file_id.is_empty() {
                return None;
            }
            // Stickers cannot carry a caption on WhatsApp.
            let caption = if kind == MediaKind::Sticker {
                None
            } else {
                caption
            };
            return Some(RelayJob::media(file.into_ref(kind, caption)));
        }

        self.text
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(RelayJob::text)
    }
}
