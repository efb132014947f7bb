//! Data models for the `SafeOut` service
//!
//! This module contains the core domain models organized by concern:
//! - Location: the validated point-and-radius query
//! - Environment: normalized payloads produced by each source
//! - Response: per-source outcomes and the assembled record

pub mod environment;
pub mod location;
pub mod response;

// Re-export all public types for convenient access
pub use environment::{
    AirQualityData, EnvironmentalData, FireEvent, FireHistoryData, GroundAirQuality,
    GroundStation, ImageryLayer, Measurement, PrecipitationData, SatelliteImagery, UvIndexData,
    WeatherData, WindData,
};
pub use location::LocationQuery;
pub use response::{
    AggregatedRecord, ResponseMetadata, SourceKind, SourceReport, SourceResult, SourceStatus,
};
