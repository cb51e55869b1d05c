//! Session blob stores.
//!
//! A blob is the zipped auth directory of the WhatsApp bridge. Stores only
//! move opaque bytes; packing lives in [`super::archive`].

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use reqwest::StatusCode;
use tracing::debug;

use crate::config::{Config, SessionBackend};
use crate::error::{RelayError, Result};

/// Persistent storage for one session blob.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Backend name for logs.
    fn name(&self) -> &str;

    /// Whether `save` is supported.
    fn writable(&self) -> bool {
        true
    }

    async fn save(&self, blob: &[u8]) -> Result<()>;

    /// The stored blob, or `None` when nothing has been saved yet.
    async fn load(&self) -> Result<Option<Vec<u8>>>;
}

/// Build the store selected by `session.backend` (`None` for no persistence).
pub fn from_config(config: &Config) -> Result<Option<Arc<dyn SessionStore>>> {
    let store: Arc<dyn SessionStore> = match config.session.backend {
        SessionBackend::None => return Ok(None),
        SessionBackend::File => Arc::new(FileSessionStore::new(config.session_file_path())),
        SessionBackend::Http => {
            let url = config.session.url.clone().ok_or_else(|| {
                RelayError::Config("session.url is required for the http backend".into())
            })?;
            Arc::new(HttpSessionStore::new(url, config.session.auth_token.clone()))
        }
        SessionBackend::Env => Arc::new(EnvSessionStore::new(&config.session.env_var)),
    };
    Ok(Some(store))
}

// ============================================================================
// File
// ============================================================================

/// Blob in a local file, written atomically via a temp file and rename.
///
/// # Example
/// ```
/// # tokio_test::block_on(async {
/// use tgwa_relay::session::{FileSessionStore, SessionStore};
///
/// let dir = std::env::temp_dir().join(format!("tgwa-relay-doc-{}", std::process::id()));
/// let store = FileSessionStore::new(dir.join("session.zip"));
/// store.save(b"blob").await.unwrap();
/// assert_eq!(store.load().await.unwrap().as_deref(), Some(&b"blob"[..]));
/// # std::fs::remove_dir_all(&dir).ok();
/// # });
/// ```
#[derive(Debug, Clone)]
pub struct FileSessionStore {
    path: PathBuf,
}

impl FileSessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    fn name(&self) -> &str {
        "file"
    }

    async fn save(&self, blob: &[u8]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, blob).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        debug!(path = %self.path.display(), bytes = blob.len(), "Session saved");
        Ok(())
    }

    async fn load(&self) -> Result<Option<Vec<u8>>> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

// ============================================================================
// HTTP
// ============================================================================

/// Blob at a URL: `GET` to load, `PUT` to save, optional bearer token.
#[derive(Debug, Clone)]
pub struct HttpSessionStore {
    client: reqwest::Client,
    url: String,
    auth_token: Option<String>,
}

impl HttpSessionStore {
    pub fn new(url: String, auth_token: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
            auth_token,
        }
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.auth_token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }
}

#[async_trait]
impl SessionStore for HttpSessionStore {
    fn name(&self) -> &str {
        "http"
    }

    async fn save(&self, blob: &[u8]) -> Result<()> {
        let resp = self
            .authorize(self.client.put(&self.url))
            .header(reqwest::header::CONTENT_TYPE, "application/zip")
            .body(blob.to_vec())
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(RelayError::Session(format!(
                "session upload failed: HTTP {}",
                resp.status()
            )));
        }
        debug!(bytes = blob.len(), "Session uploaded");
        Ok(())
    }

    async fn load(&self) -> Result<Option<Vec<u8>>> {
        let resp = self.authorize(self.client.get(&self.url)).send().await?;
        match resp.status() {
            StatusCode::NOT_FOUND => Ok(None),
            s if s.is_success() => {
                let bytes = resp.bytes().await?;
                if bytes.is_empty() {
                    Ok(None)
                } else {
                    Ok(Some(bytes.to_vec()))
                }
            }
            s => Err(RelayError::Session(format!(
                "session download failed: HTTP {}",
                s
            ))),
        }
    }
}

// ============================================================================
// Environment
// ============================================================================

/// Base64 blob in an environment variable. Read-only.
#[derive(Debug, Clone)]
pub struct EnvSessionStore {
    var: String,
}

impl EnvSessionStore {
    pub fn new(var: &str) -> Self {
        Self {
            var: var.to_string(),
        }
    }

    fn decode(value: &str) -> Result<Option<Vec<u8>>> {
        let value: String = value.split_whitespace().collect();
        if value.is_empty() {
            return Ok(None);
        }
        base64::engine::general_purpose::STANDARD
            .decode(value.as_bytes())
            .map(Some)
            .map_err(|e| RelayError::Session(format!("invalid base64 session blob: {}", e)))
    }
}

#[async_trait]
impl SessionStore for EnvSessionStore {
    fn name(&self) -> &str {
        "env"
    }

    fn writable(&self) -> bool {
        false
    }

    async fn save(&self, _blob: &[u8]) -> Result<()> {
        Err(RelayError::Session(format!(
            "env session store is read-only (export the blob into {} yourself)",
            self.var
        )))
    }

    async fn load(&self) -> Result<Option<Vec<u8>>> {
        match std::env::var(&self.var) {
            Ok(value) => Self::decode(&value),
            Err(_) => Ok(None),
        }
    }
}
