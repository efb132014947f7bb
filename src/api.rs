//! HTTP routes in front of the aggregator
//!
//! Validation, rate limiting and serialization only; everything else is
//! delegated to [`DataProcessor`].

use crate::aggregator::DataProcessor;
use crate::config::{LimitsConfig, ServerConfig};
use crate::grid::default_opener;
use crate::models::{AggregatedRecord, LocationQuery, SourceKind};
use crate::{SafeOutError, VERSION};
use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tracing::{info, warn};

const SERVICE_NAME: &str = "SafeOut";
const SERVICE_DESCRIPTION: &str =
    "Environmental conditions for a point and radius, merged from NASA and community sources";

/// Sliding one-minute window over accepted requests
#[derive(Debug)]
pub struct RateLimiter {
    /// Maximum requests per minute
    max_requests_per_minute: u32,
    /// Accepted request timestamps within the last minute, oldest first
    request_times: Vec<Instant>,
}

impl RateLimiter {
    #[must_use]
    pub fn new(max_requests_per_minute: u32) -> Self {
        Self {
            max_requests_per_minute,
            request_times: Vec::new(),
        }
    }

    /// Check if a request is allowed and record it
    pub fn allow_request(&mut self) -> bool {
        self.cleanup_old_requests();

        if self.request_times.len() >= self.max_requests_per_minute as usize {
            false
        } else {
            self.request_times.push(Instant::now());
            true
        }
    }

    /// Get time until next request is allowed
    pub fn time_until_next_request(&mut self) -> Duration {
        self.cleanup_old_requests();

        if self.request_times.len() < self.max_requests_per_minute as usize {
            return Duration::ZERO;
        }
        self.request_times.first().map_or(Duration::ZERO, |oldest| {
            Duration::from_secs(60).saturating_sub(oldest.elapsed())
        })
    }

    /// Remove requests older than 1 minute
    fn cleanup_old_requests(&mut self) {
        let window = Duration::from_secs(60);
        self.request_times.retain(|time| time.elapsed() < window);
    }
}

/// Shared state of the router
#[derive(Clone)]
pub struct AppState {
    processor: Arc<DataProcessor>,
    limiter: Arc<Mutex<RateLimiter>>,
    limits: LimitsConfig,
}

impl AppState {
    #[must_use]
    pub fn new(processor: Arc<DataProcessor>, limits: LimitsConfig) -> Self {
        Self {
            limiter: Arc::new(Mutex::new(RateLimiter::new(limits.rate_limit_per_minute))),
            processor,
            limits,
        }
    }

    /// `Err(wait)` when the window is full
    fn admit(&self) -> Result<(), Duration> {
        let mut limiter = match self.limiter.lock() {
            Ok(limiter) => limiter,
            Err(poisoned) => poisoned.into_inner(),
        };
        if limiter.allow_request() {
            Ok(())
        } else {
            Err(limiter.time_until_next_request())
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct LocationRequest {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub radius_meters: Option<u32>,
}

#[derive(Debug, Serialize)]
struct DataSourceInfo {
    name: &'static str,
    #[serde(rename = "type")]
    kind: SourceKind,
    provider: &'static str,
    update_frequency: &'static str,
}

fn describe(kind: SourceKind) -> DataSourceInfo {
    let (name, provider, update_frequency) = match kind {
        SourceKind::Precipitation => ("GPM IMERG", "NASA", "30 minutes"),
        SourceKind::AirQuality => ("OpenAQ", "OpenAQ", "hourly"),
        SourceKind::Weather => ("MERRA-2", "NASA", "hourly"),
        SourceKind::UvIndex => ("TROPOMI/Sentinel-5P", "ESA/NASA", "daily"),
        SourceKind::FireHistory => ("NASA FIRMS", "NASA", "near real-time"),
        SourceKind::Imagery => ("NASA GIBS", "NASA", "daily"),
    };
    DataSourceInfo {
        name,
        kind,
        provider,
        update_frequency,
    }
}

/// Failures surfaced to HTTP clients
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    RateLimited(Duration),
}

impl From<SafeOutError> for ApiError {
    fn from(e: SafeOutError) -> Self {
        ApiError::BadRequest(e.user_message())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(detail) => {
                (StatusCode::BAD_REQUEST, Json(json!({ "detail": detail }))).into_response()
            }
            ApiError::RateLimited(wait) => {
                let seconds = wait.as_secs().max(1);
                let mut response = (
                    StatusCode::TOO_MANY_REQUESTS,
                    Json(json!({ "detail": "Rate limit exceeded" })),
                )
                    .into_response();
                if let Ok(value) = HeaderValue::from_str(&seconds.to_string()) {
                    response.headers_mut().insert(header::RETRY_AFTER, value);
                }
                response
            }
        }
    }
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Precipitation and weather need a grid backend compiled in
fn grid_decoding() -> serde_json::Value {
    if default_opener().is_available() {
        json!({ "available": true })
    } else {
        json!({
            "available": false,
            "detail": "precipitation and weather are unavailable; rebuild with `--features netcdf`",
        })
    }
}

async fn root() -> Json<serde_json::Value> {
    Json(json!({
        "name": SERVICE_NAME,
        "version": VERSION,
        "description": SERVICE_DESCRIPTION,
        "health": "/health",
        "info": "/api/v1/info",
    }))
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": now_rfc3339(),
        "version": VERSION,
    }))
}

async fn api_info(State(state): State<AppState>) -> Json<serde_json::Value> {
    let data_sources: Vec<DataSourceInfo> = state
        .processor
        .source_kinds()
        .into_iter()
        .map(describe)
        .collect();
    Json(json!({
        "name": SERVICE_NAME,
        "version": VERSION,
        "description": SERVICE_DESCRIPTION,
        "data_sources": data_sources,
        "grid_decoding": grid_decoding(),
        "limits": {
            "max_radius_meters": state.limits.max_radius_meters,
            "min_radius_meters": state.limits.min_radius_meters,
            "rate_limit": format!("{} requests per minute", state.limits.rate_limit_per_minute),
        },
    }))
}

async fn environmental_data(
    State(state): State<AppState>,
    payload: Result<Json<LocationRequest>, JsonRejection>,
) -> Result<Json<AggregatedRecord>, ApiError> {
    if let Err(wait) = state.admit() {
        warn!("Rate limit reached, retry in {:?}", wait);
        return Err(ApiError::RateLimited(wait));
    }

    let Json(request) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let query = LocationQuery::with_limits(
        request.latitude,
        request.longitude,
        request
            .radius_meters
            .unwrap_or(state.limits.default_radius_meters),
        state.limits.min_radius_meters,
        state.limits.max_radius_meters,
    )?;
    info!(
        "Processing request for ({}), radius {} m",
        query.format_coordinates(),
        query.radius_meters
    );

    Ok(Json(state.processor.aggregate(&query).await))
}

/// All routes with CORS and the whole-request timeout applied
pub fn router(state: AppState, server: &ServerConfig) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/api/v1/info", get(api_info))
        .route("/api/v1/environmental-data", post(environmental_data))
        .layer(TimeoutLayer::new(Duration::from_secs(
            server.request_timeout_seconds,
        )))
        .layer(cors)
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limiter() {
        let mut limiter = RateLimiter::new(2);

        // Should allow first 2 requests
        assert!(limiter.allow_request());
        assert!(limiter.allow_request());

        // Should deny 3rd request
        assert!(!limiter.allow_request());

        let wait_time = limiter.time_until_next_request();
        assert!(wait_time > Duration::from_secs(0));
        assert!(wait_time <= Duration::from_secs(60));
    }

    #[test]
    fn test_rate_limiter_zero_rejects_everything() {
        let mut limiter = RateLimiter::new(0);
        assert!(!limiter.allow_request());
        assert_eq!(limiter.time_until_next_request(), Duration::ZERO);
    }

    #[test]
    fn test_describe_every_kind() {
        for kind in SourceKind::ALL {
            let info = describe(kind);
            assert!(!info.name.is_empty());
            let json = serde_json::to_value(&info).unwrap();
            assert_eq!(json["type"], kind.as_str());
        }
    }

    #[test]
    fn test_validation_error_maps_to_bad_request() {
        let error: ApiError =
            SafeOutError::validation("latitude", "must be between -90 and 90").into();
        let response = error.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_rate_limited_sets_retry_after() {
        let response = ApiError::RateLimited(Duration::from_millis(200)).into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "1");
    }
}
