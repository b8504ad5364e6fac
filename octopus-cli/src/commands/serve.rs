use anyhow::{Context, Result};
use colored::Colorize;
use std::path::PathBuf;

use octopus_realtime::prelude::*;

use crate::utils;

/// Service name used for the configuration search path
pub const SERVICE_NAME: &str = "octopus";

/// Load configuration from `path`, or the standard search path
pub fn load_config(path: Option<PathBuf>) -> Result<Config> {
    match path {
        Some(path) => Config::load_from(&path)
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None => Config::load_for_service(SERVICE_NAME).context("Failed to load configuration"),
    }
}

pub async fn execute(config_path: Option<PathBuf>, port: Option<u16>) -> Result<()> {
    let mut config = load_config(config_path)?;
    if let Some(port) = port {
        config.service.port = port;
    }

    init_tracing(&config).context("Failed to initialize tracing")?;

    println!(
        "{} {} on port {}",
        "Starting".bold(),
        config.service.name.cyan(),
        config.service.port
    );
    println!(
        "  WebSocket endpoint: {}",
        format!("ws://localhost:{}{}?user=<id>", config.service.port, config.websocket.path)
            .dimmed()
    );
    if !config.registry.reaper_enabled {
        utils::warning("Stale connection reaper is disabled");
    }

    let state = AppState::builder()
        .config(config.clone())
        .without_tracing()
        .build()
        .await
        .context("Failed to build application state")?;

    Server::new(config)
        .run(state)
        .await
        .context("Server exited with an error")?;

    utils::success("Server stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[service]\nname = \"chat\"\nport = 9100").unwrap();

        let config = load_config(Some(file.path().to_path_buf())).unwrap();
        assert_eq!(config.service.name, "chat");
        assert_eq!(config.service.port, 9100);
    }
}
