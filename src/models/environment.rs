//! Normalized per-source payloads

use crate::categories::{AqiCategory, ConfidenceCategory, UvCategory};
use crate::geo::BoundingBox;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Point precipitation rate from the most recent archive granule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrecipitationData {
    pub source: String,
    /// Start time of the granule the value came from
    pub last_update: Option<String>,
    pub rate_mm_h: f64,
    /// Variable the value was read from
    pub variable: String,
    /// File name of the granule
    pub granule: String,
}

/// Single pollutant reading at a station
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub value: f64,
    pub unit: String,
    pub aqi: AqiCategory,
}

/// Ground monitoring station with its latest readings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroundStation {
    pub location_id: String,
    pub name: Option<String>,
    pub distance_km: f64,
    /// Parameter name (`pm25`, `no2`, ...) to reading
    pub measurements: BTreeMap<String, Measurement>,
    pub last_update: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroundAirQuality {
    pub source: String,
    pub last_update: Option<String>,
    pub stations_count: usize,
    /// Nearest first
    pub stations: Vec<GroundStation>,
    /// Arithmetic mean per parameter across the retained stations
    pub average: Option<BTreeMap<String, f64>>,
    pub overall_category: AqiCategory,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AirQualityData {
    pub ground_stations: GroundAirQuality,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindData {
    pub speed_m_s: f64,
    pub speed_km_h: f64,
    /// Where the wind blows from
    pub direction_degrees: u16,
    pub direction_cardinal: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherData {
    pub source: String,
    pub last_update: Option<String>,
    pub temperature_celsius: Option<f64>,
    pub temperature_fahrenheit: Option<f64>,
    /// Approximated from specific humidity, see `sources::weather`
    pub humidity_percent: Option<f64>,
    pub wind: Option<WindData>,
    pub pressure_hpa: Option<f64>,
    pub granule: String,
}

impl WeatherData {
    /// True when the granule did not yield a single usable field
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.temperature_celsius.is_none()
            && self.humidity_percent.is_none()
            && self.wind.is_none()
            && self.pressure_hpa.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UvIndexData {
    pub source: String,
    pub last_update: Option<String>,
    pub value: f64,
    pub category: UvCategory,
    pub recommendation: String,
}

/// Deduplicated fire detection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FireEvent {
    pub latitude: f64,
    pub longitude: f64,
    pub distance_km: f64,
    pub brightness_kelvin: f64,
    pub confidence: ConfidenceCategory,
    pub confidence_percent: u8,
    pub date: String,
    /// Satellite source the detection was reported by
    pub satellite: String,
    /// Fire radiative power in MW
    pub frp: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FireHistoryData {
    pub source: String,
    pub period_days: u32,
    pub last_update: Option<String>,
    pub active_fires_count: usize,
    /// Nearest first, truncated
    pub fires: Vec<FireEvent>,
    /// Satellite sources that answered
    pub sources: Vec<String>,
}

/// Templated image request for one visualization layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageryLayer {
    pub layer: String,
    pub url: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SatelliteImagery {
    pub source: String,
    pub date: String,
    pub bbox: BoundingBox,
    /// Layer key (`true_color`, `fires`, ...) to request
    pub imagery: BTreeMap<String, ImageryLayer>,
}

/// All normalized fields of one aggregation; missing sources stay `None`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentalData {
    pub precipitation: Option<PrecipitationData>,
    pub air_quality: Option<AirQualityData>,
    pub weather: Option<WeatherData>,
    pub uv_index: Option<UvIndexData>,
    pub fire_history: Option<FireHistoryData>,
    pub satellite_imagery: Option<SatelliteImagery>,
}

impl EnvironmentalData {
    /// Number of populated fields
    #[must_use]
    pub fn populated(&self) -> usize {
        [
            self.precipitation.is_some(),
            self.air_quality.is_some(),
            self.weather.is_some(),
            self.uv_index.is_some(),
            self.fire_history.is_some(),
            self.satellite_imagery.is_some(),
        ]
        .into_iter()
        .filter(|present| *present)
        .count()
    }
}
