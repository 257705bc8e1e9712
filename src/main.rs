//! ==============================================================================
//! main.rs - sensor hub entry point
//! ==============================================================================
//!
//! responsibilities:
//!     - install the tracing subscriber
//!     - load hub.toml (or defaults)
//!     - open the record store, user directory and uploads directory
//!     - serve the api, websocket feed and pages until shutdown
//!
//! ==============================================================================

use anyhow::Result;
use sensor_hub::HubConfig;
use tracing_subscriber::{fmt, prelude::*, reload, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // step 1: logging. RUST_LOG wins; otherwise the level from hub.toml is
    // swapped in once the config is known.
    let env_filter = EnvFilter::try_from_default_env().ok();
    let explicit = env_filter.is_some();
    let (filter, filter_handle) =
        reload::Layer::new(env_filter.unwrap_or_else(|| EnvFilter::new("info")));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .init();

    // step 2: configuration
    let config = HubConfig::load_or_default()?;
    if !explicit {
        let level = EnvFilter::try_new(&config.logging.level).unwrap_or_else(|e| {
            tracing::warn!("[CONFIG] Invalid log level {:?}: {e}", config.logging.level);
            EnvFilter::new("info")
        });
        filter_handle.reload(level)?;
    }
    config.log_summary();

    // step 3: serve
    sensor_hub::run(config).await
}
