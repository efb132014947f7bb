//! Operator check for archive access: credentials, login, one search

use anyhow::{Context, Result, bail};
use chrono::Utc;
use safeout::auth::CredentialSource;
use safeout::http::build_client;
use safeout::sources::ArchiveClient;
use safeout::{LocationQuery, SafeOutConfig, telemetry};
use std::path::PathBuf;

const SAMPLE_LATITUDE: f64 = -27.5954;
const SAMPLE_LONGITUDE: f64 = -48.5480;
const SAMPLE_RADIUS_METERS: u32 = 25_000;

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args_os().nth(1).map(PathBuf::from);
    let config = SafeOutConfig::load_from_path(config_path)?;
    let _telemetry = telemetry::init(&config.logging, &config.telemetry)?;

    let credentials = CredentialSource::from_config(&config.earthdata);
    let methods = credentials.available_methods().await;
    if methods.is_empty() {
        println!("Credential methods: none configured");
    } else {
        let names: Vec<&str> = methods.iter().map(|method| method.as_str()).collect();
        println!("Credential methods: {}", names.join(", "));
    }

    let client = build_client(&config.http).context("Failed to build HTTP client")?;
    let archive = ArchiveClient::from_config(client, &config)
        .context("Failed to build archive client")?;
    let authenticated = archive.authenticator().ensure_authenticated().await;
    let status = archive.authenticator().status().await;
    println!(
        "Authentication: {}",
        serde_json::to_string_pretty(&status).context("Failed to render status")?
    );
    if !authenticated {
        bail!("Archive authentication failed");
    }

    let query = LocationQuery::new(SAMPLE_LATITUDE, SAMPLE_LONGITUDE, SAMPLE_RADIUS_METERS)?;
    let collection = &config.earthdata.precipitation_collection;
    let granules = archive
        .search(
            collection,
            &query,
            Utc::now(),
            config.earthdata.precipitation_days,
        )
        .await
        .with_context(|| format!("Granule search for {collection} failed"))?;

    println!("Found {} {} granules", granules.len(), collection);
    if let Some(latest) = granules.first() {
        println!(
            "Latest: {} ({})",
            latest.title,
            latest.time_start.as_deref().unwrap_or("no start time")
        );
    }
    Ok(())
}
