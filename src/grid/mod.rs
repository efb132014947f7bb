//! Gridded scientific datasets
//!
//! A backend opens a file and hands out whole variables as flat row-major
//! arrays; [`ScalarFieldExtractor`] turns those into point values, area
//! means and time series without ever surfacing a decoding error.

pub mod extractor;
pub mod memory;
#[cfg(feature = "netcdf")]
pub mod netcdf;

pub use extractor::ScalarFieldExtractor;
pub use memory::{MemoryGrid, MemoryOpener};

use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

/// Errors raised by dataset backends. Never leave the extractor.
#[derive(Error, Debug)]
pub enum GridError {
    #[error("Failed to open {path}: {message}")]
    Open { path: String, message: String },

    #[error("Variable not found: {0}")]
    VariableNotFound(String),

    #[error("Could not resolve {axis} dimension of {variable}")]
    DimensionUnresolved { variable: String, axis: &'static str },

    #[error("Malformed variable {variable}: {message}")]
    Shape { variable: String, message: String },

    #[error("Grid backend error: {0}")]
    Backend(String),
}

/// Point selection method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Interpolation {
    /// Closest grid cell
    #[default]
    Nearest,
    /// Bilinear between the four surrounding cells
    Linear,
}

/// One variable read fully into memory
#[derive(Debug, Clone, PartialEq)]
pub struct GridVariable {
    pub name: String,
    /// Dimension names, outermost first
    pub dimensions: Vec<String>,
    pub shape: Vec<usize>,
    /// Row-major values with packing (`scale_factor`, `add_offset`) applied
    pub values: Vec<f64>,
    pub fill_value: Option<f64>,
    pub units: Option<String>,
}

impl GridVariable {
    /// Build a variable and check that shape and values agree
    pub fn new(
        name: impl Into<String>,
        dimensions: Vec<String>,
        shape: Vec<usize>,
        values: Vec<f64>,
    ) -> Result<Self, GridError> {
        let name = name.into();
        if dimensions.len() != shape.len() {
            return Err(GridError::Shape {
                variable: name,
                message: format!(
                    "{} dimension names for a rank {} shape",
                    dimensions.len(),
                    shape.len()
                ),
            });
        }
        let expected: usize = shape.iter().product();
        if expected != values.len() {
            return Err(GridError::Shape {
                variable: name,
                message: format!("expected {expected} values, found {}", values.len()),
            });
        }
        Ok(Self {
            name,
            dimensions,
            shape,
            values,
            fill_value: None,
            units: None,
        })
    }

    #[must_use]
    pub fn with_fill_value(mut self, fill_value: f64) -> Self {
        self.fill_value = Some(fill_value);
        self
    }

    #[must_use]
    pub fn with_units(mut self, units: impl Into<String>) -> Self {
        self.units = Some(units.into());
        self
    }

    /// Position of the first dimension matching one of `aliases`
    #[must_use]
    pub fn dimension_position(&self, aliases: &[&str]) -> Option<usize> {
        aliases
            .iter()
            .find_map(|alias| self.dimensions.iter().position(|dim| dim == alias))
    }

    /// Value at a full index, `None` when out of bounds
    #[must_use]
    pub fn get(&self, index: &[usize]) -> Option<f64> {
        if index.len() != self.shape.len() {
            return None;
        }
        let mut offset = 0usize;
        for (i, extent) in index.iter().zip(&self.shape) {
            if i >= extent {
                return None;
            }
            offset = offset * extent + i;
        }
        self.values.get(offset).copied()
    }

    /// Value unless it is NaN, infinite or the fill value
    #[must_use]
    pub fn usable(&self, value: f64) -> Option<f64> {
        if !value.is_finite() {
            return None;
        }
        match self.fill_value {
            Some(fill) if value == fill => None,
            _ => Some(value),
        }
    }
}

/// An open dataset
pub trait GridSource: Send {
    /// Every variable or dataset path in the file
    fn variable_names(&self) -> Vec<String>;

    fn read_variable(&self, name: &str) -> Result<GridVariable, GridError>;

    fn has_variable(&self, name: &str) -> bool {
        self.variable_names().iter().any(|candidate| candidate == name)
    }
}

/// Opens dataset files for the extractor
pub trait GridOpener: Send + Sync {
    fn open(&self, path: &Path) -> Result<Box<dyn GridSource>, GridError>;

    /// Whether this opener can decode anything at all
    fn is_available(&self) -> bool {
        true
    }
}

/// Placeholder used when no decoding backend is compiled in
#[derive(Debug, Default, Clone, Copy)]
pub struct UnsupportedOpener;

impl GridOpener for UnsupportedOpener {
    fn open(&self, path: &Path) -> Result<Box<dyn GridSource>, GridError> {
        Err(GridError::Open {
            path: path.display().to_string(),
            message: "no grid decoding backend compiled in (enable the `netcdf` feature)"
                .to_string(),
        })
    }

    fn is_available(&self) -> bool {
        false
    }
}

/// The best opener this build provides
#[must_use]
pub fn default_opener() -> Arc<dyn GridOpener> {
    #[cfg(feature = "netcdf")]
    {
        Arc::new(netcdf::NetcdfOpener)
    }
    #[cfg(not(feature = "netcdf"))]
    {
        Arc::new(UnsupportedOpener)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dims(names: &[&str]) -> Vec<String> {
        names.iter().map(|name| (*name).to_string()).collect()
    }

    #[test]
    fn test_variable_shape_mismatch() {
        let result = GridVariable::new("T2M", dims(&["lat", "lon"]), vec![2, 2], vec![1.0; 3]);
        assert!(matches!(result, Err(GridError::Shape { .. })));

        let result = GridVariable::new("T2M", dims(&["lat"]), vec![2, 2], vec![1.0; 4]);
        assert!(matches!(result, Err(GridError::Shape { .. })));
    }

    #[test]
    fn test_row_major_indexing() {
        let values = (0..6).map(f64::from).collect();
        let var = GridVariable::new("v", dims(&["lat", "lon"]), vec![2, 3], values).unwrap();
        assert_eq!(var.get(&[0, 0]), Some(0.0));
        assert_eq!(var.get(&[0, 2]), Some(2.0));
        assert_eq!(var.get(&[1, 0]), Some(3.0));
        assert_eq!(var.get(&[1, 3]), None);
        assert_eq!(var.get(&[1]), None);
    }

    #[test]
    fn test_usable_rejects_fill_and_nan() {
        let var = GridVariable::new("v", dims(&["x"]), vec![1], vec![0.0])
            .unwrap()
            .with_fill_value(-9999.9);
        assert_eq!(var.usable(-9999.9), None);
        assert_eq!(var.usable(f64::NAN), None);
        assert_eq!(var.usable(f64::INFINITY), None);
        assert_eq!(var.usable(1.5), Some(1.5));
    }

    #[test]
    fn test_dimension_aliases() {
        let var = GridVariable::new(
            "precipitationCal",
            dims(&["time", "lon", "lat"]),
            vec![1, 1, 1],
            vec![0.0],
        )
        .unwrap();
        assert_eq!(var.dimension_position(&["lat", "latitude"]), Some(2));
        assert_eq!(var.dimension_position(&["lon", "longitude"]), Some(1));
        assert_eq!(var.dimension_position(&["depth"]), None);
    }

    #[test]
    fn test_unsupported_opener() {
        let opener = UnsupportedOpener;
        assert!(!opener.is_available());
        assert!(opener.open(Path::new("granule.nc4")).is_err());
    }
}
