//! NetCDF4 / HDF5 backend on top of libnetcdf

use super::{GridError, GridOpener, GridSource, GridVariable};
use netcdf::{AttributeValue, Variable};
use std::path::Path;

#[derive(Debug, Default, Clone, Copy)]
pub struct NetcdfOpener;

impl GridOpener for NetcdfOpener {
    fn open(&self, path: &Path) -> Result<Box<dyn GridSource>, GridError> {
        let file = netcdf::open(path).map_err(|e| GridError::Open {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Ok(Box::new(NetcdfGrid { file }))
    }
}

struct NetcdfGrid {
    file: netcdf::File,
}

fn collect_group_names(prefix: &str, group: &netcdf::Group<'_>, names: &mut Vec<String>) {
    for variable in group.variables() {
        names.push(format!("{prefix}/{}", variable.name()));
    }
    for child in group.groups() {
        collect_group_names(&format!("{prefix}/{}", child.name()), &child, names);
    }
}

fn scalar(value: AttributeValue) -> Option<f64> {
    match value {
        AttributeValue::Double(v) => Some(v),
        AttributeValue::Float(v) => Some(f64::from(v)),
        AttributeValue::Int(v) => Some(f64::from(v)),
        AttributeValue::Short(v) => Some(f64::from(v)),
        AttributeValue::Doubles(v) => v.first().copied(),
        AttributeValue::Floats(v) => v.first().copied().map(f64::from),
        _ => None,
    }
}

fn numeric_attribute(variable: &Variable<'_>, name: &str) -> Option<f64> {
    variable.attribute(name)?.value().ok().and_then(scalar)
}

fn text_attribute(variable: &Variable<'_>, name: &str) -> Option<String> {
    match variable.attribute(name)?.value().ok()? {
        AttributeValue::Str(text) => Some(text),
        _ => None,
    }
}

fn convert(variable: &Variable<'_>, path: &str) -> Result<GridVariable, GridError> {
    let dimensions = variable
        .dimensions()
        .iter()
        .map(netcdf::Dimension::name)
        .collect();
    let shape = variable.dimensions().iter().map(netcdf::Dimension::len).collect();
    let mut values = variable
        .get_values::<f64, _>(..)
        .map_err(|e| GridError::Backend(format!("{path}: {e}")))?;

    let fill_value = numeric_attribute(variable, "_FillValue")
        .or_else(|| numeric_attribute(variable, "missing_value"));
    let scale = numeric_attribute(variable, "scale_factor");
    let offset = numeric_attribute(variable, "add_offset");

    // fill is defined on the packed values
    if scale.is_some() || offset.is_some() {
        let (scale, offset) = (scale.unwrap_or(1.0), offset.unwrap_or(0.0));
        for value in &mut values {
            if fill_value.is_some_and(|fill| *value == fill) {
                *value = f64::NAN;
            } else {
                *value = *value * scale + offset;
            }
        }
    }

    let mut grid = GridVariable::new(path, dimensions, shape, values)?;
    grid.fill_value = fill_value;
    grid.units = text_attribute(variable, "units");
    Ok(grid)
}

impl GridSource for NetcdfGrid {
    fn variable_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.file.variables().map(|v| v.name()).collect();
        if let Ok(groups) = self.file.groups() {
            for group in groups {
                collect_group_names(&group.name(), &group, &mut names);
            }
        }
        names
    }

    fn read_variable(&self, name: &str) -> Result<GridVariable, GridError> {
        let not_found = || GridError::VariableNotFound(name.to_string());

        let Some((group_path, leaf)) = name.rsplit_once('/') else {
            let variable = self.file.variable(name).ok_or_else(not_found)?;
            return convert(&variable, name);
        };

        let mut segments = group_path.split('/').filter(|s| !s.is_empty());
        let first = segments.next().ok_or_else(not_found)?;
        let mut group = self
            .file
            .group(first)
            .map_err(|e| GridError::Backend(e.to_string()))?
            .ok_or_else(not_found)?;
        for segment in segments {
            group = group.group(segment).ok_or_else(not_found)?;
        }
        let variable = group.variable(leaf).ok_or_else(not_found)?;
        convert(&variable, name)
    }
}
