use anyhow::{Context, Result};
use safeout::api::AppState;
use safeout::{DataProcessor, ResponseCache, SafeOutConfig, telemetry, web};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args_os().nth(1).map(PathBuf::from);
    let config = SafeOutConfig::load_from_path(config_path)?;

    let _telemetry = telemetry::init(&config.logging, &config.telemetry)?;
    info!("Starting SafeOut {}", safeout::VERSION);

    let cache = if config.cache.enabled {
        let ttl = Duration::from_secs(u64::from(config.cache.expiry_hours) * 3600);
        match ResponseCache::open(config.response_cache_dir(), ttl) {
            Ok(cache) => Some(Arc::new(cache)),
            Err(e) => {
                warn!("Response cache disabled: {}", e);
                None
            }
        }
    } else {
        None
    };

    let processor = Arc::new(
        DataProcessor::from_config(&config, cache).context("Failed to build data processor")?,
    );
    let state = AppState::new(Arc::clone(&processor), config.limits.clone());

    let served = web::serve(&config.server, state)
        .await
        .with_context(|| format!("Server on {}:{} failed", config.server.host, config.server.port));

    processor.close().await;
    served
}
