//! Ground station air quality from the OpenAQ v3 API

use super::{SourceAdapter, SourceError, SourcePayload, SourceRequest};
use crate::cache::ResponseCache;
use crate::categories::{AqiCategory, calculate_aqi, overall_category_from_pm25};
use crate::config::OpenAqConfig;
use crate::geo::{haversine_distance_km, round_to};
use crate::models::{
    AirQualityData, GroundAirQuality, GroundStation, LocationQuery, Measurement, SourceKind,
};
use async_trait::async_trait;
use futures::future::join_all;
use reqwest::StatusCode;
use reqwest_middleware::ClientWithMiddleware;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Largest radius the locations endpoint accepts
const MAX_PROVIDER_RADIUS_METERS: u32 = 25_000;
const SOURCE_NAME: &str = "OpenAQ";

#[derive(Debug, Deserialize)]
struct Page<T> {
    #[serde(default = "Vec::new")]
    results: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct Coordinates {
    latitude: f64,
    longitude: f64,
}

#[derive(Debug, Deserialize)]
struct Timestamp {
    utc: String,
}

#[derive(Debug, Deserialize)]
struct Parameter {
    name: String,
    #[serde(default)]
    units: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Sensor {
    id: u64,
    parameter: Parameter,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Location {
    id: u64,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    coordinates: Option<Coordinates>,
    #[serde(default)]
    sensors: Vec<Sensor>,
    #[serde(default)]
    datetime_last: Option<Timestamp>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Latest {
    #[serde(default)]
    datetime: Option<Timestamp>,
    #[serde(default)]
    value: Option<f64>,
    sensors_id: u64,
}

/// One raw reading tagged with the station that reported it
#[derive(Debug, Clone, PartialEq)]
pub struct StationReading {
    pub location_id: String,
    pub name: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
    pub parameter: String,
    pub value: f64,
    pub unit: String,
    pub observed_at: Option<String>,
}

/// Group readings by station, keep the `max_stations` nearest and derive
/// per-parameter means and the overall category.
///
/// `None` when no reading survives.
#[must_use]
pub fn summarize_stations(
    latitude: f64,
    longitude: f64,
    readings: Vec<StationReading>,
    max_stations: usize,
) -> Option<GroundAirQuality> {
    let mut grouped: HashMap<String, GroundStation> = HashMap::new();

    for reading in readings {
        if !reading.value.is_finite() {
            continue;
        }
        let station = grouped
            .entry(reading.location_id.clone())
            .or_insert_with(|| GroundStation {
                location_id: reading.location_id.clone(),
                name: reading.name.clone(),
                distance_km: round_to(
                    haversine_distance_km(latitude, longitude, reading.latitude, reading.longitude),
                    2,
                ),
                measurements: BTreeMap::new(),
                last_update: String::new(),
            });

        if let Some(observed_at) = &reading.observed_at {
            if observed_at.as_str() > station.last_update.as_str() {
                station.last_update.clone_from(observed_at);
            }
        }
        let aqi = calculate_aqi(&reading.parameter, reading.value);
        station.measurements.insert(
            reading.parameter,
            Measurement {
                value: reading.value,
                unit: reading.unit,
                aqi,
            },
        );
    }

    let mut stations: Vec<GroundStation> = grouped
        .into_values()
        .filter(|station| !station.measurements.is_empty())
        .collect();
    if stations.is_empty() {
        return None;
    }

    stations.sort_by(|a, b| {
        a.distance_km
            .total_cmp(&b.distance_km)
            .then_with(|| a.location_id.cmp(&b.location_id))
    });
    stations.truncate(max_stations);
    for station in &mut stations {
        if station.last_update.is_empty() {
            station.last_update = "unknown".to_string();
        }
    }

    let mut sums: BTreeMap<String, (f64, usize)> = BTreeMap::new();
    for station in &stations {
        for (parameter, measurement) in &station.measurements {
            let entry = sums.entry(parameter.clone()).or_insert((0.0, 0));
            entry.0 += measurement.value;
            entry.1 += 1;
        }
    }
    let means: BTreeMap<String, f64> = sums
        .into_iter()
        .map(|(parameter, (sum, count))| (parameter, sum / count as f64))
        .collect();

    let overall_category = means
        .get("pm25")
        .map_or(AqiCategory::Unknown, |pm25| overall_category_from_pm25(*pm25));
    let average = means
        .into_iter()
        .map(|(parameter, mean)| (parameter, round_to(mean, 2)))
        .collect();

    let last_update = stations
        .iter()
        .map(|station| station.last_update.as_str())
        .filter(|stamp| *stamp != "unknown")
        .max()
        .map(str::to_string);

    Some(GroundAirQuality {
        source: SOURCE_NAME.to_string(),
        last_update,
        stations_count: stations.len(),
        stations,
        average: Some(average),
        overall_category,
    })
}

/// Nearest ground stations and their latest readings
pub struct AirQualityAdapter {
    client: ClientWithMiddleware,
    config: OpenAqConfig,
    cache: Option<Arc<ResponseCache>>,
}

impl AirQualityAdapter {
    #[must_use]
    pub fn new(
        client: ClientWithMiddleware,
        config: OpenAqConfig,
        cache: Option<Arc<ResponseCache>>,
    ) -> Self {
        if config.api_key.is_none() {
            warn!("OpenAQ API key not configured - requests may be rate limited");
        }
        Self {
            client,
            config,
            cache,
        }
    }

    fn base_url(&self) -> &str {
        self.config.base_url.trim_end_matches('/')
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T, SourceError> {
        let mut request = self.client.get(url);
        if let Some(api_key) = &self.config.api_key {
            request = request.header("X-API-Key", api_key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(match status {
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => SourceError::Authentication(
                    "OpenAQ rejected the API key".to_string(),
                ),
                StatusCode::TOO_MANY_REQUESTS => {
                    SourceError::Network("OpenAQ rate limit exceeded".to_string())
                }
                _ => SourceError::Network(format!("OpenAQ error {status}: {error_text}")),
            });
        }

        response
            .json()
            .await
            .map_err(|e| SourceError::malformed(format!("Failed to parse OpenAQ response: {e}")))
    }

    async fn nearest_locations(&self, query: &LocationQuery) -> Result<Vec<Location>, SourceError> {
        // longitude first
        let url = format!(
            "{}/locations?coordinates={},{}&radius={}&limit={}",
            self.base_url(),
            query.longitude,
            query.latitude,
            query.radius_meters.min(MAX_PROVIDER_RADIUS_METERS),
            self.config.query_limit
        );
        let page: Page<Location> = self.get_json(&url).await?;
        Ok(page.results)
    }

    async fn latest_readings(&self, location: &Location) -> Result<Vec<StationReading>, SourceError> {
        let Some(coordinates) = &location.coordinates else {
            return Ok(Vec::new());
        };
        let url = format!("{}/locations/{}/latest", self.base_url(), location.id);
        let page: Page<Latest> = self.get_json(&url).await?;

        let sensors: HashMap<u64, &Sensor> =
            location.sensors.iter().map(|sensor| (sensor.id, sensor)).collect();
        let fallback_stamp = location.datetime_last.as_ref().map(|t| t.utc.clone());

        Ok(page
            .results
            .into_iter()
            .filter_map(|latest| {
                let sensor = sensors.get(&latest.sensors_id)?;
                Some(StationReading {
                    location_id: location.id.to_string(),
                    name: location.name.clone(),
                    latitude: coordinates.latitude,
                    longitude: coordinates.longitude,
                    parameter: sensor.parameter.name.clone(),
                    value: latest.value?,
                    unit: sensor.parameter.units.clone().unwrap_or_default(),
                    observed_at: latest
                        .datetime
                        .map(|t| t.utc)
                        .or_else(|| fallback_stamp.clone()),
                })
            })
            .collect())
    }

    async fn cached(&self, key: &str) -> Option<GroundAirQuality> {
        let cache = self.cache.as_ref()?;
        match cache.get(key).await {
            Ok(hit) => hit,
            Err(e) => {
                warn!("OpenAQ cache read failed: {}", e);
                None
            }
        }
    }

    async fn store(&self, key: &str, value: &GroundAirQuality) {
        if let Some(cache) = &self.cache {
            if let Err(e) = cache.put(key, value.clone()).await {
                warn!("OpenAQ cache write failed: {}", e);
            }
        }
    }
}

#[async_trait]
impl SourceAdapter for AirQualityAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::AirQuality
    }

    #[instrument(name = "air_quality", skip(self, request), fields(lat = request.query.latitude, lon = request.query.longitude))]
    async fn fetch(&self, request: &SourceRequest) -> Result<SourcePayload, SourceError> {
        let query = &request.query;
        let key = query.cache_key("openaq", "latest");

        if let Some(hit) = self.cached(&key).await {
            debug!("Using cached ground station data");
            return Ok(SourcePayload::AirQuality(AirQualityData {
                ground_stations: hit,
            }));
        }

        let mut locations = self.nearest_locations(query).await?;
        info!(
            "Found {} OpenAQ locations near ({})",
            locations.len(),
            query.format_coordinates()
        );

        locations.retain(|location| location.coordinates.is_some());
        locations.sort_by(|a, b| {
            let distance = |l: &Location| {
                l.coordinates.as_ref().map_or(f64::INFINITY, |c| {
                    haversine_distance_km(query.latitude, query.longitude, c.latitude, c.longitude)
                })
            };
            distance(a).total_cmp(&distance(b))
        });
        locations.truncate(self.config.max_stations);
        if locations.is_empty() {
            return Err(SourceError::unavailable("no ground stations within radius"));
        }

        let fetched = join_all(locations.iter().map(|location| self.latest_readings(location))).await;
        let readings: Vec<StationReading> = fetched
            .into_iter()
            .zip(&locations)
            .filter_map(|(result, location)| match result {
                Ok(readings) => Some(readings),
                Err(e) => {
                    warn!("Skipping OpenAQ location {}: {}", location.id, e);
                    None
                }
            })
            .flatten()
            .collect();

        let summary = summarize_stations(
            query.latitude,
            query.longitude,
            readings,
            self.config.max_stations,
        )
        .ok_or_else(|| SourceError::unavailable("no recent measurements at nearby stations"))?;

        self.store(&key, &summary).await;
        Ok(SourcePayload::AirQuality(AirQualityData {
            ground_stations: summary,
        }))
    }
}
