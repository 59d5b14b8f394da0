//! Static-file dev server with a WebSocket reload channel.
//!
//! Served HTML passes through a body-rewriting layer that injects the
//! reload client script, so any page joins the channel without markup
//! changes.

use std::{net::SocketAddr, path::Path, path::PathBuf};

use axum::{
    Router,
    body::Body,
    extract::{
        Request, State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    http::{StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
};
use futures::{SinkExt, StreamExt};
use tokio::{net::TcpListener, sync::broadcast, task::JoinHandle};
use tower_http::{services::ServeDir, trace::TraceLayer};
use tracing::{debug, info, warn};

use crate::error::{CascadeError, Result};

const WS_PATH: &str = "/__cascade/ws";
const CLIENT_JS_PATH: &str = "/__cascade/client.js";
const SNIPPET: &str = "<script src=\"/__cascade/client.js\"></script>";

/// Largest HTML body the injection layer will buffer (8 MB).
const MAX_INJECT_BYTES: usize = 8 * 1024 * 1024;

const CLIENT_JS: &str = r#"(function () {
  var proto = location.protocol === "https:" ? "wss://" : "ws://";
  var socket = new WebSocket(proto + location.host + "/__cascade/ws");
  socket.onmessage = function (event) {
    var msg = JSON.parse(event.data);
    if (msg.command === "reload") {
      location.reload();
    }
  };
})();
"#;

#[derive(Clone)]
struct ServerState {
    reload_tx: broadcast::Sender<()>,
}

/// A running dev server. Dropping the handle shuts the server down.
pub struct ServerHandle {
    addr: SocketAddr,
    reload_tx: broadcast::Sender<()>,
    task: JoinHandle<()>,
}

impl ServerHandle {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn reloader(&self) -> Reloader {
        Reloader {
            tx: self.reload_tx.clone(),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.reload_tx.subscribe()
    }
}

impl std::fmt::Debug for ServerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerHandle")
            .field("addr", &self.addr)
            .finish_non_exhaustive()
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Cheap cloneable handle for signaling a reload to all connected clients.
#[derive(Clone)]
pub struct Reloader {
    tx: broadcast::Sender<()>,
}

impl Reloader {
    /// Broadcasts a reload signal. Sending with no connected clients is a
    /// no-op.
    pub fn reload(&self) {
        let clients = self.tx.send(()).unwrap_or(0);
        debug!(clients, "reload signal sent");
    }
}

/// Binds the listener eagerly so a busy port surfaces as a fatal error,
/// then serves `base_dir` in a background task.
pub async fn start(base_dir: PathBuf, host: &str, port: u16) -> Result<ServerHandle> {
    let bind_addr = format!("{}:{}", host, port);
    let listener = TcpListener::bind(&bind_addr)
        .await
        .map_err(|e| CascadeError::Server(format!("failed to bind {}: {}", bind_addr, e)))?;
    let addr = listener
        .local_addr()
        .map_err(|e| CascadeError::Server(format!("failed to read local address: {}", e)))?;

    let (reload_tx, _) = broadcast::channel(16);
    let app = router(&base_dir, reload_tx.clone());

    let task = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            warn!("dev server exited: {}", e);
        }
    });

    info!("serving {} at http://{}", base_dir.display(), addr);

    Ok(ServerHandle {
        addr,
        reload_tx,
        task,
    })
}

fn router(base_dir: &Path, reload_tx: broadcast::Sender<()>) -> Router {
    let state = ServerState { reload_tx };

    Router::new()
        .route(WS_PATH, get(reload_ws))
        .route(CLIENT_JS_PATH, get(client_script))
        .fallback_service(ServeDir::new(base_dir).append_index_html_on_directories(true))
        .layer(middleware::from_fn(inject_client_script))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn client_script() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "application/javascript")],
        CLIENT_JS,
    )
}

async fn reload_ws(ws: WebSocketUpgrade, State(state): State<ServerState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_reload_socket(socket, state))
}

async fn handle_reload_socket(socket: WebSocket, state: ServerState) {
    let mut reload_rx = state.reload_tx.subscribe();
    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            signal = reload_rx.recv() => match signal {
                Ok(()) => {
                    let payload = serde_json::json!({ "command": "reload" }).to_string();
                    if sender.send(Message::Text(payload)).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "reload receiver lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            incoming = receiver.next() => match incoming {
                // Clients only listen; drain anything they send.
                Some(Ok(_)) => {}
                _ => break,
            },
        }
    }

    debug!("reload client disconnected");
}

/// Buffers HTML responses and splices the reload snippet in before
/// `</body>` (or appends it when the page has no closing tag). Non-HTML
/// responses pass through untouched.
async fn inject_client_script(req: Request, next: Next) -> Response {
    let response = next.run(req).await;

    let is_html = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.starts_with("text/html"))
        .unwrap_or(false);

    if !is_html {
        return response;
    }

    let (mut parts, body) = response.into_parts();
    let bytes = match axum::body::to_bytes(body, MAX_INJECT_BYTES).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!("failed to buffer html response: {}", e);
            return (StatusCode::INTERNAL_SERVER_ERROR, "failed to buffer response")
                .into_response();
        }
    };

    let html = String::from_utf8_lossy(&bytes);
    let injected = match html.rfind("</body>") {
        Some(idx) => {
            let mut out = String::with_capacity(html.len() + SNIPPET.len());
            out.push_str(&html[..idx]);
            out.push_str(SNIPPET);
            out.push_str(&html[idx..]);
            out
        }
        None => {
            let mut out = html.into_owned();
            out.push_str(SNIPPET);
            out
        }
    };

    parts.headers.remove(header::CONTENT_LENGTH);
    Response::from_parts(parts, Body::from(injected))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tower::util::ServiceExt;

    async fn body_string(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn test_router(base_dir: &Path) -> Router {
        let (reload_tx, _) = broadcast::channel(16);
        router(base_dir, reload_tx)
    }

    #[tokio::test]
    async fn serves_html_with_injected_snippet() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("index.html"),
            "<html><body><h1>hi</h1></body></html>",
        )
        .unwrap();

        let response = test_router(dir.path())
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_string(response).await;
        assert!(body.contains(SNIPPET), "body was: {}", body);
        assert!(
            body.find(SNIPPET).unwrap() < body.find("</body>").unwrap(),
            "snippet goes before the closing body tag"
        );
    }

    #[tokio::test]
    async fn non_html_responses_pass_through() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("style.css"), "body { color: red; }").unwrap();

        let response = test_router(dir.path())
            .oneshot(
                Request::builder()
                    .uri("/style.css")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_string(response).await;
        assert_eq!(body, "body { color: red; }");
    }

    #[tokio::test]
    async fn client_script_is_served() {
        let dir = tempfile::tempdir().unwrap();

        let response = test_router(dir.path())
            .oneshot(
                Request::builder()
                    .uri(CLIENT_JS_PATH)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_string(response).await;
        assert!(body.contains("location.reload()"));
    }

    #[tokio::test]
    async fn reload_reaches_subscribers_and_tolerates_none() {
        let (tx, _) = broadcast::channel(16);
        let reloader = Reloader { tx: tx.clone() };

        // No subscribers yet: must not error.
        reloader.reload();

        let mut rx = tx.subscribe();
        reloader.reload();
        assert!(rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn bind_failure_is_a_server_error() {
        let dir = tempfile::tempdir().unwrap();
        let first = start(dir.path().to_path_buf(), "127.0.0.1", 0)
            .await
            .unwrap();

        let err = start(
            dir.path().to_path_buf(),
            "127.0.0.1",
            first.addr().port(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, CascadeError::Server(_)));
    }
}
