//! tunebox server entry point
//!
//! Loads configuration, sets up logging, prepares the cache directory and
//! starts the HTTP API.

use std::env;
use std::sync::Arc;
use tracing::info;
use tunebox::{ApiServer, AppConfig, AppState};

/// # Usage
/// ```bash
/// # Start with default config (tunebox.yaml)
/// cargo run
///
/// # Start with custom config
/// cargo run -- /path/to/config.yaml
/// ```
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_target(false)
        .init();

    let config_path = env::args()
        .nth(1)
        .unwrap_or_else(|| "tunebox.yaml".to_string());

    info!("Loading configuration from: {}", config_path);
    let config = AppConfig::from_file(&config_path)?;
    config.validate()?;

    info!("  - Media root: {}", config.media_root.display());
    info!("  - Cache root: {}", config.cache_root.display());
    info!("  - VBR quality: {}", config.audio_quality);
    info!("  - Allowed extensions: {:?}", config.allowed_extensions);

    let state = Arc::new(AppState::new(config));
    state.cache.ensure_dir().await?;

    ApiServer::new(state).start().await?;
    Ok(())
}
