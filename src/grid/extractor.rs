//! Point, area and time-series extraction from gridded datasets.
//!
//! Every operation here is blocking; async callers run it on the blocking
//! pool. Failures are logged and come back as `None` or an empty list.

use super::{GridError, GridOpener, GridSource, GridVariable, Interpolation};
use crate::geo;
use chrono::{Duration, NaiveDate, NaiveDateTime, SecondsFormat};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

const LAT_ALIASES: [&str; 4] = ["lat", "latitude", "Latitude", "y"];
const LON_ALIASES: [&str; 4] = ["lon", "longitude", "Longitude", "x"];
const TIME_ALIASES: [&str; 3] = ["time", "Time", "t"];

#[derive(Clone)]
pub struct ScalarFieldExtractor {
    opener: Arc<dyn GridOpener>,
}

impl std::fmt::Debug for ScalarFieldExtractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScalarFieldExtractor")
            .field("available", &self.opener.is_available())
            .finish()
    }
}

/// A variable together with its resolved horizontal and time axes
struct Field {
    variable: GridVariable,
    lat_pos: usize,
    lon_pos: usize,
    lat_axis: Vec<f64>,
    lon_axis: Vec<f64>,
    time_pos: Option<usize>,
    time_axis: Option<GridVariable>,
}

impl Field {
    /// Index with the time dimension at its most recent step and any other
    /// extra dimension at zero. `None` if some dimension is empty.
    fn base_index(&self) -> Option<Vec<usize>> {
        if self.variable.shape.contains(&0) {
            return None;
        }
        let mut index = vec![0; self.variable.shape.len()];
        if let Some(pos) = self.time_pos {
            index[pos] = self.variable.shape[pos] - 1;
        }
        Some(index)
    }

    fn value_at(&self, base: &[usize], lat_index: usize, lon_index: usize) -> Option<f64> {
        let mut index = base.to_vec();
        index[self.lat_pos] = lat_index;
        index[self.lon_pos] = lon_index;
        self.variable
            .get(&index)
            .and_then(|value| self.variable.usable(value))
    }

    fn sample(&self, base: &[usize], lat: f64, lon: f64, method: Interpolation) -> Option<f64> {
        match method {
            Interpolation::Nearest => {
                let i = nearest_index(&self.lat_axis, lat)?;
                let j = nearest_index(&self.lon_axis, lon)?;
                self.value_at(base, i, j)
            }
            Interpolation::Linear => {
                let (i0, i1, ty) = bracket(&self.lat_axis, lat)?;
                let (j0, j1, tx) = bracket(&self.lon_axis, lon)?;
                let v00 = self.value_at(base, i0, j0)?;
                let v01 = self.value_at(base, i0, j1)?;
                let v10 = self.value_at(base, i1, j0)?;
                let v11 = self.value_at(base, i1, j1)?;
                let near = v00 * (1.0 - tx) + v01 * tx;
                let far = v10 * (1.0 - tx) + v11 * tx;
                Some(near * (1.0 - ty) + far * ty)
            }
        }
    }
}

impl ScalarFieldExtractor {
    #[must_use]
    pub fn new(opener: Arc<dyn GridOpener>) -> Self {
        Self { opener }
    }

    /// Whether files can be decoded in this build
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.opener.is_available()
    }

    fn open(&self, path: &Path) -> Result<Box<dyn GridSource>, GridError> {
        self.opener.open(path)
    }

    /// Scalar at a point, `None` on any failure or unusable value
    pub fn extract_point(
        &self,
        path: &Path,
        variable: &str,
        latitude: f64,
        longitude: f64,
        method: Interpolation,
    ) -> Option<f64> {
        let result = self.open(path).and_then(|source| {
            point_value(source.as_ref(), variable, latitude, longitude, method)
        });
        settle(path, variable, result)
    }

    /// First candidate variable that yields a usable value
    pub fn extract_first(
        &self,
        path: &Path,
        candidates: &[&str],
        latitude: f64,
        longitude: f64,
        method: Interpolation,
    ) -> Option<(String, f64)> {
        let source = match self.open(path) {
            Ok(source) => source,
            Err(e) => {
                warn!("Could not open {}: {}", path.display(), e);
                return None;
            }
        };

        candidates.iter().find_map(|name| {
            if !source.has_variable(name) {
                debug!("{} has no variable {}", path.display(), name);
                return None;
            }
            let result = point_value(source.as_ref(), name, latitude, longitude, method);
            settle(path, name, result).map(|value| ((*name).to_string(), value))
        })
    }

    /// Several variables at one point, opening the file once
    pub fn extract_points(
        &self,
        path: &Path,
        variables: &[&str],
        latitude: f64,
        longitude: f64,
        method: Interpolation,
    ) -> BTreeMap<String, Option<f64>> {
        let source = match self.open(path) {
            Ok(source) => Some(source),
            Err(e) => {
                warn!("Could not open {}: {}", path.display(), e);
                None
            }
        };

        variables
            .iter()
            .map(|name| {
                let value = source.as_ref().and_then(|source| {
                    let result = point_value(source.as_ref(), name, latitude, longitude, method);
                    settle(path, name, result)
                });
                ((*name).to_string(), value)
            })
            .collect()
    }

    /// Mean of the usable cells inside the box around the point
    pub fn extract_area_average(
        &self,
        path: &Path,
        variable: &str,
        latitude: f64,
        longitude: f64,
        radius_km: f64,
    ) -> Option<f64> {
        let result = self.open(path).and_then(|source| {
            let field = resolve_field(source.as_ref(), variable)?;
            Ok(area_average(&field, latitude, longitude, radius_km))
        });
        settle(path, variable, result)
    }

    /// Nearest-cell series over the time dimension, `(RFC 3339, value)`
    pub fn extract_time_series(
        &self,
        path: &Path,
        variable: &str,
        latitude: f64,
        longitude: f64,
    ) -> Option<Vec<(String, f64)>> {
        let result = self.open(path).and_then(|source| {
            let field = resolve_field(source.as_ref(), variable)?;
            Ok(time_series(&field, latitude, longitude))
        });
        settle(path, variable, result)
    }

    /// Variable names for diagnostics, empty on failure
    pub fn list_variables(&self, path: &Path) -> Vec<String> {
        match self.open(path) {
            Ok(source) => source.variable_names(),
            Err(e) => {
                warn!("Could not list variables of {}: {}", path.display(), e);
                Vec::new()
            }
        }
    }
}

fn settle<T>(path: &Path, variable: &str, result: Result<Option<T>, GridError>) -> Option<T> {
    match result {
        Ok(value) => value,
        Err(e) => {
            warn!(
                "Extraction of {} from {} failed: {}",
                variable,
                path.display(),
                e
            );
            None
        }
    }
}

fn point_value(
    source: &dyn GridSource,
    variable: &str,
    latitude: f64,
    longitude: f64,
    method: Interpolation,
) -> Result<Option<f64>, GridError> {
    let field = resolve_field(source, variable)?;
    Ok(field
        .base_index()
        .and_then(|base| field.sample(&base, latitude, longitude, method)))
}

fn area_average(field: &Field, latitude: f64, longitude: f64, radius_km: f64) -> Option<f64> {
    let base = field.base_index()?;
    let bbox = geo::bounding_box(latitude, longitude, radius_km * 1000.0);

    let lat_indices: Vec<usize> = field
        .lat_axis
        .iter()
        .enumerate()
        .filter(|(_, lat)| (bbox.min_lat..=bbox.max_lat).contains(*lat))
        .map(|(i, _)| i)
        .collect();
    let lon_indices: Vec<usize> = field
        .lon_axis
        .iter()
        .enumerate()
        .filter(|(_, lon)| (bbox.min_lon..=bbox.max_lon).contains(*lon))
        .map(|(j, _)| j)
        .collect();

    let values: Vec<f64> = lat_indices
        .iter()
        .flat_map(|&i| lon_indices.iter().map(move |&j| (i, j)))
        .filter_map(|(i, j)| field.value_at(&base, i, j))
        .collect();

    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

fn time_series(field: &Field, latitude: f64, longitude: f64) -> Option<Vec<(String, f64)>> {
    let Some(time_pos) = field.time_pos else {
        debug!("{} has no time dimension", field.variable.name);
        return None;
    };
    let mut base = field.base_index()?;
    let i = nearest_index(&field.lat_axis, latitude)?;
    let j = nearest_index(&field.lon_axis, longitude)?;

    let series: Vec<(String, f64)> = (0..field.variable.shape[time_pos])
        .filter_map(|step| {
            base[time_pos] = step;
            let value = field.value_at(&base, i, j)?;
            Some((timestamp_label(field.time_axis.as_ref(), step), value))
        })
        .collect();

    (!series.is_empty()).then_some(series)
}

fn timestamp_label(axis: Option<&GridVariable>, step: usize) -> String {
    let Some(axis) = axis else {
        return step.to_string();
    };
    let Some(raw) = axis.values.get(step).copied() else {
        return step.to_string();
    };
    axis.units
        .as_deref()
        .and_then(|units| decode_cf_time(raw, units))
        .unwrap_or_else(|| raw.to_string())
}

/// Decode a CF `"<unit> since <reference>"` offset to RFC 3339
fn decode_cf_time(value: f64, units: &str) -> Option<String> {
    let (unit, reference) = units.split_once(" since ")?;
    let millis_per_unit = match unit.trim().to_ascii_lowercase().as_str() {
        "seconds" | "second" | "secs" | "sec" | "s" => 1_000.0,
        "minutes" | "minute" | "mins" | "min" => 60_000.0,
        "hours" | "hour" | "hrs" | "hr" | "h" => 3_600_000.0,
        "days" | "day" | "d" => 86_400_000.0,
        _ => return None,
    };

    let reference = reference
        .trim()
        .trim_end_matches("UTC")
        .trim_end_matches('Z')
        .trim();
    let base = [
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M",
    ]
    .iter()
    .find_map(|format| NaiveDateTime::parse_from_str(reference, format).ok())
    .or_else(|| {
        NaiveDate::parse_from_str(reference, "%Y-%m-%d")
            .ok()
            .and_then(|date| date.and_hms_opt(0, 0, 0))
    })?;

    let offset = Duration::milliseconds((value * millis_per_unit).round() as i64);
    let instant = base.checked_add_signed(offset)?;
    Some(instant.and_utc().to_rfc3339_opts(SecondsFormat::Secs, true))
}

fn resolve_field(source: &dyn GridSource, name: &str) -> Result<Field, GridError> {
    if !source.has_variable(name) {
        return Err(GridError::VariableNotFound(name.to_string()));
    }
    let variable = source.read_variable(name)?;

    let lat_pos = variable
        .dimension_position(&LAT_ALIASES)
        .ok_or_else(|| GridError::DimensionUnresolved {
            variable: name.to_string(),
            axis: "latitude",
        })?;
    let lon_pos = variable
        .dimension_position(&LON_ALIASES)
        .ok_or_else(|| GridError::DimensionUnresolved {
            variable: name.to_string(),
            axis: "longitude",
        })?;

    let lat_axis = read_axis(source, &variable, lat_pos)?.values;
    let lon_axis = read_axis(source, &variable, lon_pos)?.values;

    let time_pos = variable.dimension_position(&TIME_ALIASES);
    let time_axis = time_pos.and_then(|pos| read_axis(source, &variable, pos).ok());

    Ok(Field {
        variable,
        lat_pos,
        lon_pos,
        lat_axis,
        lon_axis,
        time_pos,
        time_axis,
    })
}

/// Coordinate variable for one dimension of `variable`, looked up next to
/// the variable first (for grouped paths such as `Grid/precipitationCal`)
fn read_axis(
    source: &dyn GridSource,
    variable: &GridVariable,
    position: usize,
) -> Result<GridVariable, GridError> {
    let dimension = &variable.dimensions[position];
    let length = variable.shape[position];

    let mut candidates = Vec::with_capacity(2);
    if let Some((group, _)) = variable.name.rsplit_once('/') {
        candidates.push(format!("{group}/{dimension}"));
    }
    candidates.push(dimension.clone());

    let Some(candidate) = candidates.iter().find(|name| source.has_variable(name)) else {
        return Err(GridError::Shape {
            variable: variable.name.clone(),
            message: format!("no coordinate variable for dimension {dimension}"),
        });
    };

    let axis = source.read_variable(candidate)?;
    if axis.shape.len() != 1 || axis.values.len() != length {
        return Err(GridError::Shape {
            variable: variable.name.clone(),
            message: format!(
                "coordinate {candidate} has shape {:?}, expected [{length}]",
                axis.shape
            ),
        });
    }
    Ok(axis)
}

fn nearest_index(axis: &[f64], target: f64) -> Option<usize> {
    axis.iter()
        .enumerate()
        .filter(|(_, value)| value.is_finite())
        .min_by(|(_, a), (_, b)| (*a - target).abs().total_cmp(&(*b - target).abs()))
        .map(|(i, _)| i)
}

/// Neighbouring indices around `target` and the fractional position
/// between them. Works for ascending and descending axes.
fn bracket(axis: &[f64], target: f64) -> Option<(usize, usize, f64)> {
    if axis.len() == 1 {
        return (axis[0] == target).then_some((0, 0, 0.0));
    }
    axis.windows(2).enumerate().find_map(|(i, pair)| {
        let (a, b) = (pair[0], pair[1]);
        let (low, high) = if a <= b { (a, b) } else { (b, a) };
        if !(low..=high).contains(&target) {
            return None;
        }
        let t = if a == b { 0.0 } else { (target - a) / (b - a) };
        Some((i, i + 1, t))
    })
}
