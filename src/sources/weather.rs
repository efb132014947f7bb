//! Surface weather from MERRA-2 hourly reanalysis granules

use super::{ArchiveClient, Granule, SourceAdapter, SourceError, SourcePayload, SourceRequest};
use crate::geo::{
    cardinal_of, celsius_to_fahrenheit, kelvin_to_celsius, meters_per_second_to_kmh, round_to,
    wind_to_speed_direction,
};
use crate::grid::{Interpolation, ScalarFieldExtractor};
use crate::models::{SourceKind, WeatherData, WindData};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, instrument};

const SOURCE_NAME: &str = "NASA MERRA-2";

const TEMPERATURE: &str = "T2M";
const WIND_U: &str = "U10M";
const WIND_V: &str = "V10M";
const SPECIFIC_HUMIDITY: &str = "QV2M";
const SURFACE_PRESSURE: &str = "PS";

/// Rough relative humidity from specific humidity in kg/kg.
///
/// Not a physical conversion; kept for parity with existing consumers and
/// reported as approximate.
#[must_use]
pub fn approximate_humidity_percent(specific_humidity: f64) -> f64 {
    (specific_humidity * 1000.0).min(100.0)
}

fn wind_from(u: f64, v: f64) -> WindData {
    let (speed, direction) = wind_to_speed_direction(u, v);
    let direction = direction.round();
    WindData {
        speed_m_s: round_to(speed, 1),
        speed_km_h: round_to(meters_per_second_to_kmh(speed), 1),
        direction_degrees: (direction as u16) % 360,
        direction_cardinal: cardinal_of(direction).to_string(),
    }
}

/// Build the weather bundle from already extracted raw values
#[must_use]
pub fn normalize_weather(values: &BTreeMap<String, Option<f64>>, granule: &Granule) -> WeatherData {
    let get = |name: &str| values.get(name).copied().flatten();

    let temperature_celsius = get(TEMPERATURE).map(kelvin_to_celsius);
    let wind = match (get(WIND_U), get(WIND_V)) {
        (Some(u), Some(v)) => Some(wind_from(u, v)),
        _ => None,
    };

    WeatherData {
        source: SOURCE_NAME.to_string(),
        last_update: granule.time_start.clone(),
        temperature_celsius: temperature_celsius.map(|c| round_to(c, 1)),
        temperature_fahrenheit: temperature_celsius.map(|c| round_to(celsius_to_fahrenheit(c), 1)),
        humidity_percent: get(SPECIFIC_HUMIDITY).map(|q| round_to(approximate_humidity_percent(q), 1)),
        wind,
        pressure_hpa: get(SURFACE_PRESSURE).map(|pa| round_to(pa / 100.0, 1)),
        granule: granule.file_name().unwrap_or_else(|| granule.title.clone()),
    }
}

/// Extract and normalize every field of interest from one granule file
#[must_use]
pub fn read_weather(
    extractor: &ScalarFieldExtractor,
    path: &Path,
    granule: &Granule,
    latitude: f64,
    longitude: f64,
) -> WeatherData {
    let values = extractor.extract_points(
        path,
        &[TEMPERATURE, WIND_U, WIND_V, SPECIFIC_HUMIDITY, SURFACE_PRESSURE],
        latitude,
        longitude,
        Interpolation::Nearest,
    );
    normalize_weather(&values, granule)
}

pub struct WeatherAdapter {
    archive: Arc<ArchiveClient>,
    extractor: ScalarFieldExtractor,
    collection: String,
    days: u32,
}

impl WeatherAdapter {
    #[must_use]
    pub fn new(
        archive: Arc<ArchiveClient>,
        extractor: ScalarFieldExtractor,
        collection: String,
        days: u32,
    ) -> Self {
        Self {
            archive,
            extractor,
            collection,
            days,
        }
    }
}

#[async_trait]
impl SourceAdapter for WeatherAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::Weather
    }

    #[instrument(name = "weather", skip(self, request), fields(lat = request.query.latitude, lon = request.query.longitude))]
    async fn fetch(&self, request: &SourceRequest) -> Result<SourcePayload, SourceError> {
        if !self.extractor.is_available() {
            return Err(SourceError::unavailable(
                "no grid decoding backend compiled in",
            ));
        }

        let query = request.query;
        let (granule, path) = self
            .archive
            .latest_granule(&self.collection, &query, request.requested_at, self.days)
            .await?;

        let extractor = self.extractor.clone();
        let granule_for_read = granule.clone();
        let file = path.clone();
        let data = tokio::task::spawn_blocking(move || {
            read_weather(
                &extractor,
                &file,
                &granule_for_read,
                query.latitude,
                query.longitude,
            )
        })
        .await
        .map_err(|e| SourceError::malformed(format!("decode task failed: {e}")))?;

        if data.is_empty() {
            return Err(SourceError::malformed(format!(
                "no usable weather variables in {}",
                path.display()
            )));
        }
        info!(
            "Weather from {}: {:?} °C, {:?} hPa",
            granule.id, data.temperature_celsius, data.pressure_hpa
        );
        Ok(SourcePayload::Weather(data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::{GridVariable, MemoryGrid, MemoryOpener};

    fn granule() -> Granule {
        Granule {
            id: "G7".to_string(),
            title: "merra".to_string(),
            time_start: Some("2026-10-13T00:00:00.000Z".to_string()),
            data_links: vec!["https://data.example/MERRA2_400.inst1_2d_asm_Nx.20261013.nc4".to_string()],
        }
    }

    fn values(entries: &[(&str, Option<f64>)]) -> BTreeMap<String, Option<f64>> {
        entries
            .iter()
            .map(|(name, value)| ((*name).to_string(), *value))
            .collect()
    }

    #[test]
    fn test_normalize_full_bundle() {
        let data = normalize_weather(
            &values(&[
                ("T2M", Some(298.15)),
                ("U10M", Some(0.0)),
                ("V10M", Some(-5.0)),
                ("QV2M", Some(0.0123)),
                ("PS", Some(101_325.0)),
            ]),
            &granule(),
        );

        assert_eq!(data.temperature_celsius, Some(25.0));
        assert_eq!(data.temperature_fahrenheit, Some(77.0));
        assert_eq!(data.humidity_percent, Some(12.3));
        assert_eq!(data.pressure_hpa, Some(1013.3));
        let wind = data.wind.unwrap();
        assert_eq!(wind.speed_m_s, 5.0);
        assert_eq!(wind.speed_km_h, 18.0);
        assert_eq!(wind.direction_degrees, 0);
        assert_eq!(wind.direction_cardinal, "N");
        assert_eq!(data.granule, "MERRA2_400.inst1_2d_asm_Nx.20261013.nc4");
    }

    #[test]
    fn test_humidity_is_capped() {
        assert_eq!(approximate_humidity_percent(0.2), 100.0);
        assert_eq!(approximate_humidity_percent(0.05), 50.0);
    }

    #[test]
    fn test_partial_bundle() {
        let data = normalize_weather(
            &values(&[("T2M", Some(273.15)), ("U10M", Some(3.0)), ("V10M", None)]),
            &granule(),
        );
        assert_eq!(data.temperature_celsius, Some(0.0));
        assert!(data.wind.is_none());
        assert!(!data.is_empty());

        assert!(normalize_weather(&BTreeMap::new(), &granule()).is_empty());
    }

    #[test]
    fn test_read_from_grid() {
        let dims = |names: &[&str]| names.iter().map(|n| (*n).to_string()).collect::<Vec<_>>();
        let field = |name: &str, value: f64| {
            GridVariable::new(name, dims(&["time", "lat", "lon"]), vec![1, 1, 1], vec![value]).unwrap()
        };
        let grid = MemoryGrid::new()
            .with_axis("lat", vec![-27.5])
            .unwrap()
            .with_axis("lon", vec![-48.75])
            .unwrap()
            .with_variable(field("T2M", 295.15))
            .with_variable(field("U10M", 4.0))
            .with_variable(field("V10M", 0.0))
            .with_variable(field("PS", 100_000.0));
        let opener = MemoryOpener::new();
        opener.insert("/merra.nc4", grid);
        let extractor = ScalarFieldExtractor::new(Arc::new(opener));

        let data = read_weather(&extractor, Path::new("/merra.nc4"), &granule(), -27.59, -48.55);
        assert_eq!(data.temperature_celsius, Some(22.0));
        assert_eq!(data.humidity_percent, None);
        assert_eq!(data.pressure_hpa, Some(1000.0));
        assert_eq!(data.wind.unwrap().direction_cardinal, "W");
    }
}
