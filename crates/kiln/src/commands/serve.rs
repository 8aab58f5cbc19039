//! Preview server command.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use axum::Router;
use tower_http::services::ServeDir;

/// Run the serve command.
pub async fn run(config_path: &Path, port: u16, dir: Option<PathBuf>) -> Result<()> {
    let dir = match dir {
        Some(dir) => dir,
        None => super::build::resolve_config(config_path, None, None, None)?.out_dir,
    };

    if !dir.exists() {
        anyhow::bail!(
            "Directory not found: {}. Run 'kiln build' first.",
            dir.display()
        );
    }

    let addr: SocketAddr = format!("127.0.0.1:{}", port)
        .parse()
        .context("Invalid address")?;

    tracing::info!("Serving {} at http://{}", dir.display(), addr);

    let app = Router::new().fallback_service(ServeDir::new(&dir));

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    let url = format!("http://{}", addr);
    if let Err(e) = open::that(&url) {
        tracing::debug!("Could not open browser: {}", e);
    }

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    Ok(())
}
