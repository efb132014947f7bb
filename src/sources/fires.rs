//! Active fire detections from the FIRMS area API

use super::{SourceAdapter, SourceError, SourcePayload, SourceRequest};
use crate::cache::ResponseCache;
use crate::categories::categorize_confidence;
use crate::config::FirmsConfig;
use crate::geo::{KM_PER_DEGREE, bounding_box, haversine_distance_km, round_to};
use crate::models::{FireEvent, FireHistoryData, SourceKind};
use async_trait::async_trait;
use futures::future::join_all;
use reqwest::StatusCode;
use reqwest_middleware::ClientWithMiddleware;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

const SOURCE_NAME: &str = "NASA FIRMS";
const MAX_DAYS: u32 = 10;

/// One parsed CSV row with the satellite source it came from
#[derive(Debug, Clone, PartialEq)]
pub struct Hotspot {
    pub latitude: f64,
    pub longitude: f64,
    pub brightness: f64,
    pub confidence: String,
    pub frp: Option<f64>,
    pub acq_date: String,
    pub source: String,
}

/// Parse a FIRMS CSV body. Rows whose column count differs from the header
/// or whose numeric fields do not parse are skipped.
#[must_use]
pub fn parse_hotspots(csv_text: &str, source: &str) -> Vec<Hotspot> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(csv_text.as_bytes());

    let headers = match reader.headers() {
        Ok(headers) => headers.clone(),
        Err(e) => {
            warn!("Unreadable FIRMS header from {}: {}", source, e);
            return Vec::new();
        }
    };
    let column = |name: &str| headers.iter().position(|h| h == name);
    let latitude = column("latitude");
    let longitude = column("longitude");
    let brightness = column("brightness").or_else(|| column("bright_ti4"));
    let confidence = column("confidence");
    let frp = column("frp");
    let acq_date = column("acq_date");

    let (Some(latitude), Some(longitude), Some(brightness)) = (latitude, longitude, brightness)
    else {
        warn!("FIRMS response from {} lacks coordinate or brightness columns", source);
        return Vec::new();
    };

    let mut hotspots = Vec::new();
    let mut skipped = 0usize;
    for record in reader.records() {
        let Ok(record) = record else {
            skipped += 1;
            continue;
        };
        if record.len() != headers.len() {
            skipped += 1;
            continue;
        }

        let number = |index: usize| record.get(index).and_then(|v| v.parse::<f64>().ok());
        // A blank or garbled frp cell drops the row; only a missing column reads as None
        let frp_value = match frp.and_then(|i| record.get(i)) {
            None => None,
            Some(raw) => match raw.trim().parse::<f64>() {
                Ok(value) => Some(value),
                Err(_) => {
                    skipped += 1;
                    continue;
                }
            },
        };
        let (Some(lat), Some(lon), Some(bright)) =
            (number(latitude), number(longitude), number(brightness))
        else {
            skipped += 1;
            continue;
        };

        hotspots.push(Hotspot {
            latitude: lat,
            longitude: lon,
            brightness: bright,
            confidence: confidence
                .and_then(|i| record.get(i))
                .unwrap_or("unknown")
                .to_string(),
            frp: frp_value,
            acq_date: acq_date
                .and_then(|i| record.get(i))
                .unwrap_or_default()
                .to_string(),
            source: source.to_string(),
        });
    }

    if skipped > 0 {
        debug!("Skipped {} malformed FIRMS rows from {}", skipped, source);
    }
    hotspots
}

/// Flat-earth distance used only for collapsing duplicate detections
fn planar_distance_km(a: &Hotspot, b: &Hotspot) -> f64 {
    let lat_diff = a.latitude - b.latitude;
    let lon_diff = a.longitude - b.longitude;
    (lat_diff * lat_diff + lon_diff * lon_diff).sqrt() * KM_PER_DEGREE
}

/// Collapse detections closer than `threshold_km`, keeping the brighter one
#[must_use]
pub fn deduplicate(hotspots: Vec<Hotspot>, threshold_km: f64) -> Vec<Hotspot> {
    let mut unique: Vec<Hotspot> = Vec::with_capacity(hotspots.len());

    for hotspot in hotspots {
        let duplicate = unique
            .iter()
            .position(|kept| planar_distance_km(kept, &hotspot) < threshold_km);
        match duplicate {
            Some(index) => {
                if hotspot.brightness > unique[index].brightness {
                    unique.remove(index);
                    unique.push(hotspot);
                }
            }
            None => unique.push(hotspot),
        }
    }
    unique
}

/// Deduplicated events sorted nearest first; the count is taken before truncation
#[must_use]
pub fn to_events(
    latitude: f64,
    longitude: f64,
    hotspots: Vec<Hotspot>,
    threshold_km: f64,
    max_events: usize,
) -> (usize, Vec<FireEvent>) {
    let mut events: Vec<FireEvent> = deduplicate(hotspots, threshold_km)
        .into_iter()
        .map(|hotspot| {
            let (confidence, confidence_percent) = categorize_confidence(&hotspot.confidence);
            FireEvent {
                latitude: hotspot.latitude,
                longitude: hotspot.longitude,
                distance_km: round_to(
                    haversine_distance_km(latitude, longitude, hotspot.latitude, hotspot.longitude),
                    2,
                ),
                brightness_kelvin: hotspot.brightness,
                confidence,
                confidence_percent,
                date: hotspot.acq_date,
                satellite: hotspot.source,
                frp: hotspot.frp,
            }
        })
        .collect();

    events.sort_by(|a, b| a.distance_km.total_cmp(&b.distance_km));
    let count = events.len();
    events.truncate(max_events);
    (count, events)
}

/// Hotspots from every configured satellite source, merged
pub struct FireHistoryAdapter {
    client: ClientWithMiddleware,
    config: FirmsConfig,
    cache: Option<Arc<ResponseCache>>,
}

impl FireHistoryAdapter {
    #[must_use]
    pub fn new(
        client: ClientWithMiddleware,
        config: FirmsConfig,
        cache: Option<Arc<ResponseCache>>,
    ) -> Self {
        Self {
            client,
            config,
            cache,
        }
    }

    fn days(&self) -> u32 {
        self.config.days_back.clamp(1, MAX_DAYS)
    }

    async fn fetch_source(
        &self,
        api_key: &str,
        source: &str,
        area: &str,
    ) -> Result<Vec<Hotspot>, SourceError> {
        let base = self.config.base_url.trim_end_matches('/');
        let url = format!(
            "{base}/api/area/csv/{}/{source}/{area}/{}",
            urlencoding::encode(api_key),
            self.days()
        );
        debug!("FIRMS request: {base}/api/area/csv/***/{source}/{area}/{}", self.days());

        let response = self.client.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(match status {
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                    SourceError::Authentication("FIRMS rejected the MAP key".to_string())
                }
                _ => SourceError::Network(format!("FIRMS error {status} for {source}")),
            });
        }

        let body = response.text().await?;
        // the API answers some errors with 200 and a plain message
        if body.starts_with("Invalid") || body.starts_with("Error") {
            return Err(SourceError::malformed(format!(
                "FIRMS {source}: {}",
                body.lines().next().unwrap_or_default()
            )));
        }
        Ok(parse_hotspots(&body, source))
    }

    async fn cached(&self, key: &str) -> Option<FireHistoryData> {
        let cache = self.cache.as_ref()?;
        cache.get(key).await.unwrap_or_else(|e| {
            warn!("FIRMS cache read failed: {}", e);
            None
        })
    }
}

#[async_trait]
impl SourceAdapter for FireHistoryAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::FireHistory
    }

    #[instrument(name = "fire_history", skip(self, request), fields(lat = request.query.latitude, lon = request.query.longitude))]
    async fn fetch(&self, request: &SourceRequest) -> Result<SourcePayload, SourceError> {
        let Some(api_key) = self.config.api_key.as_deref() else {
            warn!("FIRMS API key not configured");
            return Err(SourceError::unavailable("FIRMS API key not configured"));
        };
        if self.config.sources.is_empty() {
            return Err(SourceError::unavailable("no FIRMS satellite sources configured"));
        }

        let query = &request.query;
        let days = self.days();
        let key = query.cache_key("firms", &format!("{days}d"));
        if let Some(hit) = self.cached(&key).await {
            debug!("Using cached fire detections");
            return Ok(SourcePayload::FireHistory(hit));
        }

        let area = bounding_box(
            query.latitude,
            query.longitude,
            f64::from(query.radius_meters),
        )
        .to_query_string();
        let results = join_all(
            self.config
                .sources
                .iter()
                .map(|source| self.fetch_source(api_key, source, &area)),
        )
        .await;

        let mut answered = Vec::new();
        let mut hotspots = Vec::new();
        let mut failures = Vec::new();
        for (source, result) in self.config.sources.iter().zip(results) {
            match result {
                Ok(rows) => {
                    debug!("{} returned {} detections", source, rows.len());
                    answered.push(source.clone());
                    hotspots.extend(rows);
                }
                Err(e) => {
                    warn!("FIRMS source {} failed: {}", source, e);
                    failures.push(format!("{source}: {e}"));
                }
            }
        }
        if answered.is_empty() {
            return Err(SourceError::Network(format!(
                "all fire sources failed ({})",
                failures.join("; ")
            )));
        }

        let (count, fires) = to_events(
            query.latitude,
            query.longitude,
            hotspots,
            self.config.dedup_threshold_km,
            self.config.max_events,
        );
        info!(
            "Found {} fire detections near ({}) in last {} days",
            count,
            query.format_coordinates(),
            days
        );

        let data = FireHistoryData {
            source: SOURCE_NAME.to_string(),
            period_days: days,
            last_update: Some(request.requested_at.to_rfc3339()),
            active_fires_count: count,
            fires,
            sources: answered,
        };
        if let Some(cache) = &self.cache {
            if let Err(e) = cache.put(&key, data.clone()).await {
                warn!("FIRMS cache write failed: {}", e);
            }
        }
        Ok(SourcePayload::FireHistory(data))
    }
}
