//! HTTP health server for tgwa-relay.
//!
//! Exposes the relay status to orchestrators and operators:
//!
//! - `GET /health` (or `/healthz`) → 200 with the JSON status snapshot
//! - `GET /ready` (or `/readyz`) → 200 when the readiness gate is open, 503 otherwise
//! - `GET /qr` → 200 with the pending pairing QR rendered as text, 404 when none
//! - Anything else → 404
//!
//! Uses raw TCP + manual HTTP; the relay has no other HTTP surface.

use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::qr;
use crate::relay::RelayHandle;

const READ_TIMEOUT: Duration = Duration::from_secs(5);

const JSON: &str = "application/json";
const TEXT: &str = "text/plain; charset=utf-8";

struct Response {
    status: &'static str,
    content_type: &'static str,
    body: String,
}

impl Response {
    fn json(status: &'static str, body: String) -> Self {
        Self {
            status,
            content_type: JSON,
            body,
        }
    }

    fn not_found() -> Self {
        Self::json("404 Not Found", "{\"error\":\"not_found\"}".to_string())
    }

    fn to_http(&self) -> String {
        format!(
            "HTTP/1.1 {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            self.status,
            self.content_type,
            self.body.len(),
            self.body
        )
    }
}

fn route(method: &str, path: &str, relay: &RelayHandle) -> Response {
    match (method, path) {
        ("GET", "/health") | ("GET", "/healthz") => match serde_json::to_string(&relay.status()) {
            Ok(body) => Response::json("200 OK", body),
            Err(e) => Response::json(
                "500 Internal Server Error",
                serde_json::json!({ "error": e.to_string() }).to_string(),
            ),
        },
        ("GET", "/ready") | ("GET", "/readyz") => {
            if relay.is_ready() {
                Response::json("200 OK", "{\"status\":\"ready\"}".to_string())
            } else {
                Response::json(
                    "503 Service Unavailable",
                    "{\"status\":\"not_ready\"}".to_string(),
                )
            }
        }
        ("GET", "/qr") => match relay.pending_qr().map(|payload| qr::render(&payload)) {
            Some(Ok(art)) => Response {
                status: "200 OK",
                content_type: TEXT,
                body: art,
            },
            Some(Err(e)) => Response::json(
                "500 Internal Server Error",
                serde_json::json!({ "error": e.to_string() }).to_string(),
            ),
            None => Response::not_found(),
        },
        _ => Response::not_found(),
    }
}

/// Bind `host:port` and serve until the returned task is aborted.
pub async fn start_health_server(
    host: &str,
    port: u16,
    relay: RelayHandle,
) -> Result<JoinHandle<()>> {
    let addr = format!("{}:{}", host, port);
    let listener = TcpListener::bind(&addr).await?;
    info!(addr = %addr, "Health server listening on http://{}", addr);

    let handle = tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut stream, _addr)) => {
                    let relay = relay.clone();
                    tokio::spawn(async move {
                        let mut buf = [0u8; 1024];
                        let n = match tokio::time::timeout(
                            READ_TIMEOUT,
                            tokio::io::AsyncReadExt::read(&mut stream, &mut buf),
                        )
                        .await
                        {
                            Ok(Ok(n)) => n,
                            _ => return,
                        };

                        let request = String::from_utf8_lossy(&buf[..n]);
                        let request_line = request.lines().next().unwrap_or_default();
                        let mut parts = request_line.split_whitespace();
                        let method = parts.next().unwrap_or_default();
                        let raw_path = parts.next().unwrap_or_default();
                        let path = raw_path.split('?').next().unwrap_or(raw_path);

                        let response = route(method, path, &relay);
                        debug!(method, path, status = response.status, "Health request");

                        let _ = stream.write_all(response.to_http().as_bytes()).await;
                        let _ = stream.shutdown().await;
                    });
                }
                Err(e) => {
                    warn!(error = %e, "Health server accept error");
                }
            }
        }
    });

    Ok(handle)
}
