//! WMS image requests for the GIBS visualization layers

use super::{SourceAdapter, SourceError, SourcePayload, SourceRequest};
use crate::config::GibsConfig;
use crate::geo::{BoundingBox, bounding_box};
use crate::models::{ImageryLayer, LocationQuery, SatelliteImagery, SourceKind};
use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::BTreeMap;

const SOURCE_NAME: &str = "NASA GIBS";

/// `(key, layer, description)`
const LAYERS: [(&str, &str, &str); 9] = [
    (
        "true_color",
        "MODIS_Terra_CorrectedReflectance_TrueColor",
        "True color satellite imagery",
    ),
    (
        "aerosol",
        "MODIS_Combined_Value_Added_AOD",
        "Aerosol Optical Depth (air quality indicator)",
    ),
    (
        "cloud_top_temp",
        "AIRS_L2_Cloud_Top_Temperature_Day",
        "Cloud top temperature",
    ),
    (
        "precipitation",
        "GPM_3IMERGHH_Precipitation_Rate",
        "Precipitation rate",
    ),
    (
        "land_surface_temp_day",
        "MODIS_Terra_Land_Surface_Temp_Day",
        "Land surface temperature (day)",
    ),
    (
        "land_surface_temp_night",
        "MODIS_Terra_Land_Surface_Temp_Night",
        "Land surface temperature (night)",
    ),
    (
        "fires",
        "MODIS_Terra_Thermal_Anomalies_All",
        "Thermal anomalies and fires",
    ),
    ("snow_cover", "MODIS_Terra_Snow_Cover", "Snow cover extent"),
    ("vegetation", "MODIS_Terra_NDVI_8Day", "Vegetation index (NDVI)"),
];

/// WMS 1.1.1 `GetMap` URL for one layer
#[must_use]
pub fn get_map_url(config: &GibsConfig, layer: &str, bbox: &BoundingBox, date: &str) -> String {
    format!(
        "{}?SERVICE=WMS&VERSION=1.1.1&REQUEST=GetMap&LAYERS={}&STYLES=&SRS={}&BBOX={}&WIDTH={}&HEIGHT={}&FORMAT=image/png&TIME={}&TRANSPARENT=TRUE",
        config.wms_url,
        urlencoding::encode(layer),
        config.srs,
        bbox.to_query_string(),
        config.width,
        config.height,
        date
    )
}

/// Every layer for the query box on `date`
#[must_use]
pub fn build_imagery(config: &GibsConfig, query: &LocationQuery, date: NaiveDate) -> SatelliteImagery {
    let bbox = bounding_box(
        query.latitude,
        query.longitude,
        f64::from(query.radius_meters),
    );
    let date = date.format("%Y-%m-%d").to_string();

    let imagery: BTreeMap<String, ImageryLayer> = LAYERS
        .iter()
        .map(|(key, layer, description)| {
            (
                (*key).to_string(),
                ImageryLayer {
                    layer: (*layer).to_string(),
                    url: get_map_url(config, layer, &bbox, &date),
                    description: (*description).to_string(),
                },
            )
        })
        .collect();

    SatelliteImagery {
        source: SOURCE_NAME.to_string(),
        date,
        bbox,
        imagery,
    }
}

/// Pure URL templating; never touches the network
pub struct ImageryAdapter {
    config: GibsConfig,
}

impl ImageryAdapter {
    #[must_use]
    pub fn new(config: GibsConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl SourceAdapter for ImageryAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::Imagery
    }

    async fn fetch(&self, request: &SourceRequest) -> Result<SourcePayload, SourceError> {
        if self.config.wms_url.is_empty() {
            return Err(SourceError::unavailable("imagery endpoint not configured"));
        }
        Ok(SourcePayload::Imagery(build_imagery(
            &self.config,
            &request.query,
            request.requested_at.date_naive(),
        )))
    }
}
