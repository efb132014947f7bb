//! Concurrent fan-out over every source and assembly of the final record

use crate::cache::ResponseCache;
use crate::config::SafeOutConfig;
use crate::grid::{ScalarFieldExtractor, default_opener};
use crate::http::build_client;
use crate::models::{
    AggregatedRecord, EnvironmentalData, LocationQuery, ResponseMetadata, SourceKind,
    SourceReport, SourceResult, SourceStatus,
};
use crate::sources::{
    AirQualityAdapter, ArchiveClient, FireHistoryAdapter, ImageryAdapter, PrecipitationAdapter,
    SourceAdapter, SourcePayload, SourceRequest, UvIndexAdapter, WeatherAdapter, invoke,
};
use crate::Result;
use chrono::{SecondsFormat, Utc};
use futures::future::join_all;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

const DEFAULT_SOURCE_TIMEOUT: Duration = Duration::from_secs(120);

/// Orchestrates all source adapters for a query
pub struct DataProcessor {
    adapters: Vec<Arc<dyn SourceAdapter>>,
    source_timeout: Duration,
    min_radius_meters: u32,
    max_radius_meters: u32,
    closed: AtomicBool,
}

impl std::fmt::Debug for DataProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataProcessor")
            .field("sources", &self.source_kinds())
            .field("source_timeout", &self.source_timeout)
            .finish_non_exhaustive()
    }
}

/// Put a payload into its slot of the record
fn place(data: &mut EnvironmentalData, payload: SourcePayload) {
    match payload {
        SourcePayload::Precipitation(value) => data.precipitation = Some(value),
        SourcePayload::AirQuality(value) => data.air_quality = Some(value),
        SourcePayload::Weather(value) => data.weather = Some(value),
        SourcePayload::UvIndex(value) => data.uv_index = Some(value),
        SourcePayload::FireHistory(value) => data.fire_history = Some(value),
        SourcePayload::Imagery(value) => data.satellite_imagery = Some(value),
    }
}

fn elapsed_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl DataProcessor {
    /// Processor over explicit adapters, queried in the given order
    #[must_use]
    pub fn new(adapters: Vec<Arc<dyn SourceAdapter>>) -> Self {
        Self {
            adapters,
            source_timeout: DEFAULT_SOURCE_TIMEOUT,
            min_radius_meters: crate::models::location::MIN_RADIUS_METERS,
            max_radius_meters: crate::models::location::MAX_RADIUS_METERS,
            closed: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn with_source_timeout(mut self, timeout: Duration) -> Self {
        self.source_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_radius_limits(mut self, min_radius_meters: u32, max_radius_meters: u32) -> Self {
        self.min_radius_meters = min_radius_meters;
        self.max_radius_meters = max_radius_meters;
        self
    }

    /// Build every production adapter from configuration.
    ///
    /// Fails only when shared plumbing (the HTTP clients) cannot be built.
    pub fn from_config(config: &SafeOutConfig, cache: Option<Arc<ResponseCache>>) -> Result<Self> {
        let client = build_client(&config.http)?;
        let archive = Arc::new(ArchiveClient::from_config(client.clone(), config)?);
        let extractor = ScalarFieldExtractor::new(default_opener());
        if !extractor.is_available() {
            warn!("No grid decoding backend compiled in; gridded sources will be unavailable");
        }

        let earthdata = &config.earthdata;
        let adapters: Vec<Arc<dyn SourceAdapter>> = vec![
            Arc::new(PrecipitationAdapter::new(
                Arc::clone(&archive),
                extractor.clone(),
                earthdata.precipitation_collection.clone(),
                earthdata.precipitation_days,
            )),
            Arc::new(AirQualityAdapter::new(
                client.clone(),
                config.openaq.clone(),
                cache.clone(),
            )),
            Arc::new(WeatherAdapter::new(
                archive,
                extractor,
                earthdata.weather_collection.clone(),
                earthdata.weather_days,
            )),
            Arc::new(UvIndexAdapter),
            Arc::new(FireHistoryAdapter::new(client, config.firms.clone(), cache)),
            Arc::new(ImageryAdapter::new(config.gibs.clone())),
        ];

        Ok(Self::new(adapters)
            .with_source_timeout(Duration::from_secs(config.http.source_timeout_seconds))
            .with_radius_limits(
                config.limits.min_radius_meters,
                config.limits.max_radius_meters,
            ))
    }

    #[must_use]
    pub fn source_kinds(&self) -> Vec<SourceKind> {
        self.adapters.iter().map(|adapter| adapter.kind()).collect()
    }

    /// Validate raw coordinates against the configured bounds, then aggregate
    pub async fn aggregate_coordinates(
        &self,
        latitude: f64,
        longitude: f64,
        radius_meters: u32,
    ) -> Result<AggregatedRecord> {
        let query = LocationQuery::with_limits(
            latitude,
            longitude,
            radius_meters,
            self.min_radius_meters,
            self.max_radius_meters,
        )?;
        Ok(self.aggregate(&query).await)
    }

    /// Query every source concurrently and merge whatever came back.
    ///
    /// Never fails: each unavailable source leaves its field `None` and adds
    /// one warning.
    #[instrument(skip(self, query), fields(lat = query.latitude, lon = query.longitude, radius = query.radius_meters))]
    pub async fn aggregate(&self, query: &LocationQuery) -> AggregatedRecord {
        if self.closed.load(Ordering::Acquire) {
            warn!("Aggregating on a closed processor");
        }
        let started = Instant::now();
        let request = SourceRequest::new(*query);

        let outcomes = join_all(self.adapters.iter().map(|adapter| {
            let request = &request;
            async move {
                let began = Instant::now();
                let result = invoke(adapter.as_ref(), request, self.source_timeout).await;
                (adapter.kind(), result, began.elapsed())
            }
        }))
        .await;

        let mut data = EnvironmentalData::default();
        let mut warnings = Vec::new();
        let mut sources = Vec::with_capacity(outcomes.len());
        let mut successful = 0;

        for (kind, result, elapsed) in outcomes {
            let report = match result {
                SourceResult::Success(payload) => {
                    successful += 1;
                    place(&mut data, payload);
                    SourceReport {
                        source: kind,
                        status: SourceStatus::Success,
                        reason: None,
                        elapsed_ms: elapsed_ms(elapsed),
                    }
                }
                SourceResult::Unavailable(reason) => {
                    warnings.push(format!("{} data unavailable: {}", kind.label(), reason));
                    SourceReport {
                        source: kind,
                        status: SourceStatus::Unavailable,
                        reason: Some(reason),
                        elapsed_ms: elapsed_ms(elapsed),
                    }
                }
            };
            debug!("{} finished in {} ms", kind, report.elapsed_ms);
            sources.push(report);
        }

        let metadata = ResponseMetadata {
            processing_time_ms: elapsed_ms(started.elapsed()),
            data_sources_queried: sources.len(),
            data_sources_successful: successful,
            warnings,
            sources,
        };
        info!(
            "Aggregated {}/{} sources for ({}) in {} ms",
            metadata.data_sources_successful,
            metadata.data_sources_queried,
            query.format_coordinates(),
            metadata.processing_time_ms
        );

        AggregatedRecord {
            location: *query,
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            data,
            metadata,
        }
    }

    /// Release adapter resources. Later calls do nothing.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        join_all(self.adapters.iter().map(|adapter| adapter.close())).await;
        info!("Closed {} sources", self.adapters.len());
    }
}
