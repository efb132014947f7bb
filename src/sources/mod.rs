//! Source adapters
//!
//! One adapter per provider. Each turns a [`SourceRequest`] into a normalized
//! [`SourcePayload`] or a [`SourceError`]; the aggregator never sees anything
//! else. [`invoke`] is the single place where errors, panics and timeouts are
//! converted into [`SourceResult::Unavailable`].

pub mod air_quality;
pub mod archive;
pub mod fires;
pub mod imagery;
pub mod precipitation;
pub mod uv_index;
pub mod weather;

pub use air_quality::AirQualityAdapter;
pub use archive::{ArchiveClient, Granule};
pub use fires::FireHistoryAdapter;
pub use imagery::ImageryAdapter;
pub use precipitation::PrecipitationAdapter;
pub use uv_index::UvIndexAdapter;
pub use weather::WeatherAdapter;

use crate::models::{
    AirQualityData, FireHistoryData, LocationQuery, PrecipitationData, SatelliteImagery,
    SourceKind, SourceResult, UvIndexData, WeatherData,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// What a single adapter call is asked for
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SourceRequest {
    pub query: LocationQuery,
    /// Reference instant for trailing time windows
    pub requested_at: DateTime<Utc>,
}

impl SourceRequest {
    #[must_use]
    pub fn new(query: LocationQuery) -> Self {
        Self {
            query,
            requested_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn at(query: LocationQuery, requested_at: DateTime<Utc>) -> Self {
        Self {
            query,
            requested_at,
        }
    }
}

/// Normalized payload of one source
#[derive(Debug, Clone, PartialEq)]
pub enum SourcePayload {
    Precipitation(PrecipitationData),
    AirQuality(AirQualityData),
    Weather(WeatherData),
    UvIndex(UvIndexData),
    FireHistory(FireHistoryData),
    Imagery(SatelliteImagery),
}

impl SourcePayload {
    #[must_use]
    pub fn kind(&self) -> SourceKind {
        match self {
            SourcePayload::Precipitation(_) => SourceKind::Precipitation,
            SourcePayload::AirQuality(_) => SourceKind::AirQuality,
            SourcePayload::Weather(_) => SourceKind::Weather,
            SourcePayload::UvIndex(_) => SourceKind::UvIndex,
            SourcePayload::FireHistory(_) => SourceKind::FireHistory,
            SourcePayload::Imagery(_) => SourceKind::Imagery,
        }
    }
}

/// Why an adapter produced nothing
#[derive(Error, Debug)]
pub enum SourceError {
    /// Provider answered but had nothing usable, or the source is disabled
    #[error("{0}")]
    Unavailable(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("malformed response: {0}")]
    MalformedPayload(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cache error: {0}")]
    Cache(String),
}

impl SourceError {
    pub fn unavailable<S: Into<String>>(reason: S) -> Self {
        Self::Unavailable(reason.into())
    }

    pub fn malformed<S: Into<String>>(reason: S) -> Self {
        Self::MalformedPayload(reason.into())
    }
}

impl From<reqwest::Error> for SourceError {
    fn from(e: reqwest::Error) -> Self {
        SourceError::Network(e.without_url().to_string())
    }
}

impl From<reqwest_middleware::Error> for SourceError {
    fn from(e: reqwest_middleware::Error) -> Self {
        match e {
            reqwest_middleware::Error::Reqwest(e) => e.into(),
            other => SourceError::Network(other.to_string()),
        }
    }
}

/// A provider the aggregator can fan out to
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn kind(&self) -> SourceKind;

    async fn fetch(&self, request: &SourceRequest) -> Result<SourcePayload, SourceError>;

    /// Release held handles; called once at shutdown, possibly never used before
    async fn close(&self) {}
}

/// Run one adapter under a timeout, converting every failure mode into
/// `Unavailable` with a reason suitable for the warnings list.
pub async fn invoke(
    adapter: &dyn SourceAdapter,
    request: &SourceRequest,
    timeout: Duration,
) -> SourceResult<SourcePayload> {
    let kind = adapter.kind();
    let call = AssertUnwindSafe(adapter.fetch(request)).catch_unwind();

    match tokio::time::timeout(timeout, call).await {
        Err(_) => {
            warn!("{} source timed out after {:?}", kind, timeout);
            SourceResult::Unavailable("timeout".to_string())
        }
        Ok(Err(panic)) => {
            let detail = panic
                .downcast_ref::<&str>()
                .map(|s| (*s).to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            warn!("{} source panicked: {}", kind, detail);
            SourceResult::Unavailable(format!("internal error: {detail}"))
        }
        Ok(Ok(Err(e))) => {
            debug!("{} source unavailable: {}", kind, e);
            SourceResult::Unavailable(e.to_string())
        }
        Ok(Ok(Ok(payload))) if payload.kind() != kind => {
            warn!("{} source returned a {} payload", kind, payload.kind());
            SourceResult::Unavailable(format!("unexpected {} payload", payload.kind()))
        }
        Ok(Ok(Ok(payload))) => SourceResult::Success(payload),
    }
}
