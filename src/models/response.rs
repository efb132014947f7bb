//! Per-source outcomes and the assembled aggregation record

use super::environment::EnvironmentalData;
use super::location::LocationQuery;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The kinds of source the aggregator fans out to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Precipitation,
    AirQuality,
    Weather,
    UvIndex,
    FireHistory,
    Imagery,
}

impl SourceKind {
    pub const ALL: [SourceKind; 6] = [
        SourceKind::Precipitation,
        SourceKind::AirQuality,
        SourceKind::Weather,
        SourceKind::UvIndex,
        SourceKind::FireHistory,
        SourceKind::Imagery,
    ];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Precipitation => "precipitation",
            SourceKind::AirQuality => "air_quality",
            SourceKind::Weather => "weather",
            SourceKind::UvIndex => "uv_index",
            SourceKind::FireHistory => "fire_history",
            SourceKind::Imagery => "imagery",
        }
    }

    /// Human readable name used in warnings
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            SourceKind::Precipitation => "Precipitation",
            SourceKind::AirQuality => "Air quality",
            SourceKind::Weather => "Weather",
            SourceKind::UvIndex => "UV index",
            SourceKind::FireHistory => "Fire history",
            SourceKind::Imagery => "Satellite imagery",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one source for one query
#[derive(Debug, Clone, PartialEq)]
pub enum SourceResult<T> {
    Success(T),
    Unavailable(String),
}

impl<T> SourceResult<T> {
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, SourceResult::Success(_))
    }

    #[must_use]
    pub fn reason(&self) -> Option<&str> {
        match self {
            SourceResult::Success(_) => None,
            SourceResult::Unavailable(reason) => Some(reason),
        }
    }

    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> SourceResult<U> {
        match self {
            SourceResult::Success(value) => SourceResult::Success(f(value)),
            SourceResult::Unavailable(reason) => SourceResult::Unavailable(reason),
        }
    }

    pub fn into_option(self) -> Option<T> {
        match self {
            SourceResult::Success(value) => Some(value),
            SourceResult::Unavailable(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceStatus {
    Success,
    Unavailable,
}

/// Accounting entry for one queried source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceReport {
    pub source: SourceKind,
    pub status: SourceStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseMetadata {
    /// Wall time of the whole fan-out and merge
    pub processing_time_ms: u64,
    pub data_sources_queried: usize,
    pub data_sources_successful: usize,
    /// One entry per unavailable source, in registration order
    pub warnings: Vec<String>,
    pub sources: Vec<SourceReport>,
}

/// Everything known about one location at one point in time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedRecord {
    pub location: LocationQuery,
    /// RFC 3339, UTC
    pub timestamp: String,
    pub data: EnvironmentalData,
    pub metadata: ResponseMetadata,
}
