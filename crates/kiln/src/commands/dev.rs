//! Development server command.

use std::path::Path;

use anyhow::Result;
use kiln_bundle::Mode;
use kiln_server::{DevServer, DevServerConfig};

use crate::config::load_config;

/// Run the dev server.
pub async fn run(config_path: &Path, port: Option<u16>, open: bool) -> Result<()> {
    let file = load_config(config_path)?;
    let root = super::build::project_root(config_path)?;
    let build = file.build_config(Mode::Development, &root)?;

    let mut config = DevServerConfig::new(build);
    config.port = port.unwrap_or(file.dev.port);
    config.host = file.dev.host.clone();
    config.open = open && file.dev.open;
    config.debounce = file.debounce();

    tracing::info!("Starting development server on port {}", config.port);

    DevServer::new(config).start().await?;

    Ok(())
}
