//! `SafeOut` - environmental conditions around a point
//!
//! Queries precipitation, air quality, weather, UV, fire and imagery
//! sources concurrently and merges whatever is available into one record.
//! A failing source never fails the request; it is reported as a warning.
//!
//! Precipitation and weather decode NetCDF/HDF5 granules and need the
//! `netcdf` feature (and libnetcdf) at build time. Without it both sources
//! always report `no grid decoding backend compiled in`, and
//! `GET /api/v1/info` shows `grid_decoding.available = false`.

pub mod aggregator;
pub mod api;
pub mod auth;
pub mod cache;
pub mod categories;
pub mod config;
pub mod error;
pub mod geo;
pub mod grid;
pub mod http;
pub mod models;
pub mod sources;
pub mod telemetry;
pub mod web;

// Re-export core types for public API
pub use aggregator::DataProcessor;
pub use cache::ResponseCache;
pub use config::SafeOutConfig;
pub use error::SafeOutError;
pub use models::{AggregatedRecord, EnvironmentalData, LocationQuery};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Core result type used throughout the library
pub type Result<T> = std::result::Result<T, SafeOutError>;
