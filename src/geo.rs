//! Geospatial helpers: distances, bounding boxes, wind vectors and unit
//! conversions. Everything here is pure; rounding is left to callers.

use serde::{Deserialize, Serialize};

/// Kilometers per degree of latitude used for box approximations
pub const KM_PER_DEGREE: f64 = 111.0;

/// Smallest `cos(lat)` used when converting km to degrees of longitude
const MIN_COS_LATITUDE: f64 = 1e-6;

/// Axis-aligned box in degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lon: f64,
    pub min_lat: f64,
    pub max_lon: f64,
    pub max_lat: f64,
}

impl BoundingBox {
    /// `(min_lon, min_lat, max_lon, max_lat)`
    #[must_use]
    pub fn as_tuple(&self) -> (f64, f64, f64, f64) {
        (self.min_lon, self.min_lat, self.max_lon, self.max_lat)
    }

    #[must_use]
    pub fn contains(&self, latitude: f64, longitude: f64) -> bool {
        (self.min_lat..=self.max_lat).contains(&latitude)
            && (self.min_lon..=self.max_lon).contains(&longitude)
    }

    /// Comma separated `west,south,east,north`
    #[must_use]
    pub fn to_query_string(&self) -> String {
        format!(
            "{},{},{},{}",
            self.min_lon, self.min_lat, self.max_lon, self.max_lat
        )
    }
}

/// Great-circle distance in kilometers (mean Earth radius 6371 km)
#[must_use]
pub fn haversine_distance_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    if lat1 == lat2 && lon1 == lon2 {
        return 0.0;
    }
    haversine::distance(
        haversine::Location {
            latitude: lat1,
            longitude: lon1,
        },
        haversine::Location {
            latitude: lat2,
            longitude: lon2,
        },
        haversine::Units::Kilometers,
    )
}

/// Box enclosing a circle of `radius_meters` around the point, clamped to
/// valid coordinates.
#[must_use]
pub fn bounding_box(latitude: f64, longitude: f64, radius_meters: f64) -> BoundingBox {
    let radius_km = radius_meters / 1000.0;
    let lat_offset = radius_km / KM_PER_DEGREE;
    let cos_lat = latitude.to_radians().cos().abs().max(MIN_COS_LATITUDE);
    let lon_offset = radius_km / (KM_PER_DEGREE * cos_lat);

    BoundingBox {
        min_lon: (longitude - lon_offset).max(-180.0),
        min_lat: (latitude - lat_offset).max(-90.0),
        max_lon: (longitude + lon_offset).min(180.0),
        max_lat: (latitude + lat_offset).min(90.0),
    }
}

/// Convert `u`/`v` wind components to `(speed, direction)` where the
/// direction is meteorological: where the wind blows *from*.
#[must_use]
pub fn wind_to_speed_direction(u: f64, v: f64) -> (f64, f64) {
    let speed = u.hypot(v);
    let direction = (270.0 - v.atan2(u).to_degrees()).rem_euclid(360.0);
    (speed, direction)
}

/// 8-sector compass bucket
#[must_use]
pub fn cardinal_of(degrees: f64) -> &'static str {
    const DIRECTIONS: [&str; 8] = ["N", "NE", "E", "SE", "S", "SW", "W", "NW"];
    let index = (degrees / 45.0).round().rem_euclid(8.0) as usize;
    DIRECTIONS[index % 8]
}

#[must_use]
pub fn celsius_to_fahrenheit(celsius: f64) -> f64 {
    celsius * 9.0 / 5.0 + 32.0
}

#[must_use]
pub fn kelvin_to_celsius(kelvin: f64) -> f64 {
    kelvin - 273.15
}

#[must_use]
pub fn meters_per_second_to_kmh(mps: f64) -> f64 {
    mps * 3.6
}

/// Round to a fixed number of decimals, for presentation
#[must_use]
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}
