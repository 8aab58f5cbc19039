//! Development server implementation.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::{header, StatusCode, Uri},
    response::{Html, IntoResponse, Response},
    routing::get,
    Json, Router,
};
use tokio::sync::{broadcast::error::RecvError, RwLock};
use tower_http::cors::CorsLayer;

use kiln_bundle::{BuildConfig, BuildError, Bundler, OutputArtifact, OutputSet};

use crate::controller::{DevController, ServerState, SharedState};
use crate::watcher::FileWatcher;
use crate::websocket::{hmr_client_script, HmrHub, HmrMessage, CLIENT_PATH, WS_PATH};

/// Configuration for the development server.
#[derive(Debug, Clone)]
pub struct DevServerConfig {
    /// Build settings; the mode is normally development
    pub build: BuildConfig,

    /// Port to listen on
    pub port: u16,

    /// Host to bind to
    pub host: String,

    /// Open browser on start
    pub open: bool,

    /// Quiet period that ends a burst of file changes
    pub debounce: Duration,
}

impl DevServerConfig {
    pub fn new(build: BuildConfig) -> Self {
        Self {
            build,
            port: 7777,
            host: "127.0.0.1".to_string(),
            open: true,
            debounce: Duration::from_millis(100),
        }
    }
}

/// Errors that can occur with the server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Invalid address {0}")]
    InvalidAddress(String),

    #[error("Failed to bind to {0}: {1}")]
    BindError(SocketAddr, String),

    #[error("File watch error: {0}")]
    WatchError(String),

    #[error(transparent)]
    Build(#[from] BuildError),
}

/// Development server.
pub struct DevServer {
    config: DevServerConfig,
}

impl DevServer {
    pub fn new(config: DevServerConfig) -> Self {
        Self { config }
    }

    /// Build, serve and rebuild on change until Ctrl-C.
    pub async fn start(self) -> Result<(), ServerError> {
        let addr: SocketAddr = format!("{}:{}", self.config.host, self.config.port)
            .parse()
            .map_err(|_| {
                ServerError::InvalidAddress(format!("{}:{}", self.config.host, self.config.port))
            })?;

        let mut build = self.config.build.clone();
        build.dev_client = Some(CLIENT_PATH.to_string());

        let watch_paths = vec![build.src_dir.clone()];
        let ignore = vec![build.out_dir.clone(), build.cache_dir.clone()];
        let bundler = Arc::new(Bundler::new(build)?);

        let state: SharedState = Arc::new(RwLock::new(ServerState::new(HmrHub::new())));

        let (watcher, rx) = FileWatcher::new(&watch_paths, ignore)
            .map_err(|e| ServerError::WatchError(e.to_string()))?;

        let controller = DevController::new(bundler, Arc::clone(&state), self.config.debounce);
        let loop_handle = tokio::spawn(async move {
            controller.run(rx).await;
        });

        let app = router(state);

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::BindError(addr, e.to_string()))?;

        tracing::info!("Dev server running at http://{}", addr);

        if self.config.open {
            let url = format!("http://{}", addr);
            if let Err(e) = open::that(&url) {
                tracing::debug!("Could not open browser: {}", e);
            }
        }

        let served = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| ServerError::BindError(addr, e.to_string()));

        loop_handle.abort();
        drop(watcher);
        tracing::info!("Dev server stopped");

        served
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}

/// Routes for the dev server over shared state.
pub fn router(state: SharedState) -> Router {
    Router::new()
        .route(WS_PATH, get(ws_handler))
        .route(CLIENT_PATH, get(client_handler))
        .route("/__kiln/status", get(status_handler))
        .fallback(output_handler)
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Find the artifact for a request path.
///
/// `/` maps to `index.html`; extension-less paths that match nothing fall
/// back to the HTML shell so client-side routes load the app.
pub fn lookup<'a>(output: &'a OutputSet, path: &str) -> Option<&'a OutputArtifact> {
    let path = path.trim_start_matches('/');
    let path = if path.is_empty() { "index.html" } else { path };

    if let Some(artifact) = output.get(path) {
        return Some(artifact);
    }

    let last = path.rsplit('/').next().unwrap_or(path);
    if !last.contains('.') {
        return output.get("index.html");
    }

    None
}

async fn output_handler(State(state): State<SharedState>, uri: Uri) -> Response {
    let (output, error) = {
        let state = state.read().await;
        (Arc::clone(&state.output), state.error.clone())
    };

    if let Some(artifact) = lookup(&output, uri.path()) {
        return (
            [
                (header::CONTENT_TYPE, artifact.kind.content_type(&artifact.file_name)),
                (header::CACHE_CONTROL, "no-cache"),
            ],
            artifact.content.clone(),
        )
            .into_response();
    }

    match error {
        Some(message) if output.is_empty() => {
            (StatusCode::INTERNAL_SERVER_ERROR, Html(error_page(&message))).into_response()
        }
        _ => (StatusCode::NOT_FOUND, "Not found").into_response(),
    }
}

fn error_page(message: &str) -> String {
    let escaped = message
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;");

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="utf-8">
  <title>Build failed</title>
  <style>
    body {{ font-family: system-ui, sans-serif; margin: 2rem; }}
    pre {{ background: #1e1e1e; color: #ff6b6b; padding: 1rem; border-radius: 0.5rem; white-space: pre-wrap; }}
  </style>
</head>
<body>
  <h1>Build failed</h1>
  <pre>{escaped}</pre>
  <script src="{CLIENT_PATH}"></script>
</body>
</html>"#
    )
}

async fn status_handler(State(state): State<SharedState>) -> impl IntoResponse {
    let state = state.read().await;
    Json(serde_json::json!({
        "status": state.status,
        "artifacts": state.output.file_names(),
        "error": state.error,
        "builds": state.builds,
    }))
}

/// Handler for the live-update WebSocket endpoint.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<SharedState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws(socket, state))
}

/// Forward hub messages to one connected page.
async fn handle_ws(mut socket: WebSocket, state: SharedState) {
    let mut rx = {
        let state = state.read().await;
        state.hmr.subscribe()
    };

    if send(&mut socket, &HmrMessage::Connected).await.is_err() {
        return;
    }

    loop {
        match rx.recv().await {
            Ok(msg) => {
                if send(&mut socket, &msg).await.is_err() {
                    break;
                }
            }
            // Missed messages; a reload brings the page up to date.
            Err(RecvError::Lagged(_)) => {
                if send(&mut socket, &HmrMessage::Reload).await.is_err() {
                    break;
                }
            }
            Err(RecvError::Closed) => break,
        }
    }
}

async fn send(socket: &mut WebSocket, msg: &HmrMessage) -> Result<(), ()> {
    let json = serde_json::to_string(msg).map_err(|_| ())?;
    socket.send(Message::Text(json.into())).await.map_err(|_| ())
}

/// Handler for the live-update client script.
async fn client_handler() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "application/javascript; charset=utf-8")],
        hmr_client_script(WS_PATH),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_bundle::ArtifactKind;
    use pretty_assertions::assert_eq;

    fn output() -> OutputSet {
        let mut set = OutputSet::new();
        for (name, kind) in [
            ("index.html", ArtifactKind::Html),
            ("main.bundle.js", ArtifactKind::Script),
            ("icons/favicon.ico", ArtifactKind::Icon),
        ] {
            set.push(OutputArtifact {
                name: name.to_string(),
                kind,
                file_name: name.to_string(),
                content: name.as_bytes().to_vec(),
            });
        }
        set
    }

    #[test]
    fn default_config() {
        let config = DevServerConfig::new(BuildConfig::development("/proj"));
        assert_eq!(config.port, 7777);
        assert_eq!(config.host, "127.0.0.1");
    }

    #[test]
    fn looks_up_artifacts() {
        let output = output();

        assert_eq!(lookup(&output, "/").unwrap().file_name, "index.html");
        assert_eq!(lookup(&output, "/main.bundle.js").unwrap().file_name, "main.bundle.js");
        assert_eq!(
            lookup(&output, "/icons/favicon.ico").unwrap().file_name,
            "icons/favicon.ico"
        );
    }

    #[test]
    fn falls_back_to_shell_for_routes() {
        let output = output();

        assert_eq!(lookup(&output, "/settings/profile").unwrap().file_name, "index.html");
        assert!(lookup(&output, "/missing.js").is_none());
    }

    #[test]
    fn error_page_escapes_message() {
        let page = error_page("<script>x</script>");
        assert!(page.contains("&lt;script&gt;x&lt;/script&gt;"));
        assert!(page.contains("/__kiln/client.js"));
    }
}
