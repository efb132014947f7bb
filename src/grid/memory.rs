//! In-memory datasets, for fixtures and for callers that already hold
//! decoded arrays.

use super::{GridError, GridOpener, GridSource, GridVariable};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

#[derive(Debug, Clone, Default)]
pub struct MemoryGrid {
    variables: BTreeMap<String, GridVariable>,
}

impl MemoryGrid {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a variable, keyed by its name
    #[must_use]
    pub fn with_variable(mut self, variable: GridVariable) -> Self {
        self.variables.insert(variable.name.clone(), variable);
        self
    }

    /// Add a 1-D coordinate variable named after its own dimension
    pub fn with_axis(self, name: &str, values: Vec<f64>) -> Result<Self, GridError> {
        let len = values.len();
        let axis = GridVariable::new(name, vec![name.to_string()], vec![len], values)?;
        Ok(self.with_variable(axis))
    }
}

impl GridSource for MemoryGrid {
    fn variable_names(&self) -> Vec<String> {
        self.variables.keys().cloned().collect()
    }

    fn read_variable(&self, name: &str) -> Result<GridVariable, GridError> {
        self.variables
            .get(name)
            .cloned()
            .ok_or_else(|| GridError::VariableNotFound(name.to_string()))
    }

    fn has_variable(&self, name: &str) -> bool {
        self.variables.contains_key(name)
    }
}

/// Serves registered [`MemoryGrid`]s by path
#[derive(Debug, Clone, Default)]
pub struct MemoryOpener {
    grids: Arc<RwLock<HashMap<PathBuf, MemoryGrid>>>,
}

impl MemoryOpener {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `grid` under `path`, replacing any previous one
    pub fn insert(&self, path: impl Into<PathBuf>, grid: MemoryGrid) {
        if let Ok(mut grids) = self.grids.write() {
            grids.insert(path.into(), grid);
        }
    }
}

impl GridOpener for MemoryOpener {
    fn open(&self, path: &Path) -> Result<Box<dyn GridSource>, GridError> {
        let grids = self
            .grids
            .read()
            .map_err(|e| GridError::Backend(e.to_string()))?;
        grids
            .get(path)
            .cloned()
            .map(|grid| Box::new(grid) as Box<dyn GridSource>)
            .ok_or_else(|| GridError::Open {
                path: path.display().to_string(),
                message: "no such dataset".to_string(),
            })
    }
}
