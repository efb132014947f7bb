//! Query location: a point and a search radius

use crate::{Result, SafeOutError};
use serde::{Deserialize, Serialize};

pub const MIN_RADIUS_METERS: u32 = 100;
pub const MAX_RADIUS_METERS: u32 = 50_000;
pub const DEFAULT_RADIUS_METERS: u32 = 5_000;

/// Validated point-and-radius query
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct LocationQuery {
    /// Latitude in decimal degrees
    pub latitude: f64,
    /// Longitude in decimal degrees
    pub longitude: f64,
    /// Search radius in meters
    pub radius_meters: u32,
}

impl LocationQuery {
    /// Create a query with the default radius bounds
    pub fn new(latitude: f64, longitude: f64, radius_meters: u32) -> Result<Self> {
        Self::with_limits(
            latitude,
            longitude,
            radius_meters,
            MIN_RADIUS_METERS,
            MAX_RADIUS_METERS,
        )
    }

    /// Create a query against explicit radius bounds
    pub fn with_limits(
        latitude: f64,
        longitude: f64,
        radius_meters: u32,
        min_radius: u32,
        max_radius: u32,
    ) -> Result<Self> {
        if !latitude.is_finite() || !(-90.0..=90.0).contains(&latitude) {
            return Err(SafeOutError::validation(
                "latitude",
                format!("must be between -90 and 90, got {latitude}"),
            ));
        }
        if !longitude.is_finite() || !(-180.0..=180.0).contains(&longitude) {
            return Err(SafeOutError::validation(
                "longitude",
                format!("must be between -180 and 180, got {longitude}"),
            ));
        }
        if !(min_radius..=max_radius).contains(&radius_meters) {
            return Err(SafeOutError::validation(
                "radius_meters",
                format!("must be between {min_radius} and {max_radius}, got {radius_meters}"),
            ));
        }

        Ok(Self {
            latitude,
            longitude,
            radius_meters,
        })
    }

    #[must_use]
    pub fn radius_km(&self) -> f64 {
        f64::from(self.radius_meters) / 1000.0
    }

    /// Format location as coordinates string
    #[must_use]
    pub fn format_coordinates(&self) -> String {
        format!("{:.4}, {:.4}", self.latitude, self.longitude)
    }

    /// Round coordinates for cache key generation
    #[must_use]
    pub fn rounded_coordinates(&self, precision: u32) -> (f64, f64) {
        let multiplier = 10_f64.powi(i32::try_from(precision).unwrap_or(4));
        let lat = (self.latitude * multiplier).round() / multiplier;
        let lon = (self.longitude * multiplier).round() / multiplier;
        (lat, lon)
    }

    /// Cache key for one provider and time window
    #[must_use]
    pub fn cache_key(&self, provider: &str, window: &str) -> String {
        let (lat, lon) = self.rounded_coordinates(3);
        format!(
            "{provider}:{lat:.3}:{lon:.3}:{}:{window}",
            self.radius_meters
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_valid_query() {
        let query = LocationQuery::new(-27.5954, -48.5480, 5000).unwrap();
        assert_eq!(query.radius_km(), 5.0);
        assert_eq!(query.format_coordinates(), "-27.5954, -48.5480");
    }

    #[rstest]
    #[case(91.0, 0.0, 5000, "latitude")]
    #[case(-90.5, 0.0, 5000, "latitude")]
    #[case(f64::NAN, 0.0, 5000, "latitude")]
    #[case(0.0, 180.1, 5000, "longitude")]
    #[case(0.0, 0.0, 99, "radius_meters")]
    #[case(0.0, 0.0, 50_001, "radius_meters")]
    fn test_invalid_query(
        #[case] lat: f64,
        #[case] lon: f64,
        #[case] radius: u32,
        #[case] field: &str,
    ) {
        let err = LocationQuery::new(lat, lon, radius).unwrap_err();
        assert!(err.is_client_error());
        assert!(err.to_string().contains(field), "{err}");
    }

    #[test]
    fn test_bounds_are_inclusive() {
        assert!(LocationQuery::new(90.0, 180.0, 100).is_ok());
        assert!(LocationQuery::new(-90.0, -180.0, 50_000).is_ok());
    }

    #[test]
    fn test_cache_key() {
        let query = LocationQuery::new(46.818_234, 8.227_456, 2500).unwrap();
        assert_eq!(
            query.cache_key("openaq", "latest"),
            "openaq:46.818:8.227:2500:latest"
        );
    }
}
