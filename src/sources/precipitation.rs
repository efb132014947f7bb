//! Point precipitation rate from GPM IMERG half-hourly granules

use super::{ArchiveClient, Granule, SourceAdapter, SourceError, SourcePayload, SourceRequest};
use crate::geo::round_to;
use crate::grid::{Interpolation, ScalarFieldExtractor};
use crate::models::{PrecipitationData, SourceKind};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, instrument};

const SOURCE_NAME: &str = "NASA GPM IMERG";

/// Calibrated rate first, then the names later product versions use
pub const PRECIPITATION_VARIABLES: [&str; 4] = [
    "precipitationCal",
    "precipitation",
    "Grid/precipitationCal",
    "Grid/precipitation",
];

/// Read the rate at the point; `None` when no candidate variable is usable
#[must_use]
pub fn read_precipitation(
    extractor: &ScalarFieldExtractor,
    path: &Path,
    granule: &Granule,
    latitude: f64,
    longitude: f64,
) -> Option<PrecipitationData> {
    let (variable, rate) = extractor.extract_first(
        path,
        &PRECIPITATION_VARIABLES,
        latitude,
        longitude,
        Interpolation::Nearest,
    )?;
    Some(PrecipitationData {
        source: SOURCE_NAME.to_string(),
        last_update: granule.time_start.clone(),
        rate_mm_h: round_to(rate, 2),
        variable,
        granule: granule.file_name().unwrap_or_else(|| granule.title.clone()),
    })
}

pub struct PrecipitationAdapter {
    archive: Arc<ArchiveClient>,
    extractor: ScalarFieldExtractor,
    collection: String,
    days: u32,
}

impl PrecipitationAdapter {
    #[must_use]
    pub fn new(
        archive: Arc<ArchiveClient>,
        extractor: ScalarFieldExtractor,
        collection: String,
        days: u32,
    ) -> Self {
        Self {
            archive,
            extractor,
            collection,
            days,
        }
    }
}

#[async_trait]
impl SourceAdapter for PrecipitationAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::Precipitation
    }

    #[instrument(name = "precipitation", skip(self, request), fields(lat = request.query.latitude, lon = request.query.longitude))]
    async fn fetch(&self, request: &SourceRequest) -> Result<SourcePayload, SourceError> {
        if !self.extractor.is_available() {
            return Err(SourceError::unavailable(
                "no grid decoding backend compiled in",
            ));
        }

        let query = request.query;
        let (granule, path) = self
            .archive
            .latest_granule(&self.collection, &query, request.requested_at, self.days)
            .await?;

        let extractor = self.extractor.clone();
        let file: PathBuf = path.clone();
        let granule_for_read = granule.clone();
        let data = tokio::task::spawn_blocking(move || {
            read_precipitation(
                &extractor,
                &file,
                &granule_for_read,
                query.latitude,
                query.longitude,
            )
        })
        .await
        .map_err(|e| SourceError::malformed(format!("decode task failed: {e}")))?
        .ok_or_else(|| {
            SourceError::malformed(format!(
                "no usable precipitation value in {}",
                path.display()
            ))
        })?;

        info!("Precipitation {} mm/h from {}", data.rate_mm_h, granule.id);
        Ok(SourcePayload::Precipitation(data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::{GridVariable, MemoryGrid, MemoryOpener};

    fn dims(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| (*n).to_string()).collect()
    }

    fn granule() -> Granule {
        Granule {
            id: "G1".to_string(),
            title: "imerg".to_string(),
            time_start: Some("2026-10-13T23:30:00.000Z".to_string()),
            data_links: vec!["https://data.example/3B-HHR-E.MS.MRG.3IMERG.HDF5".to_string()],
        }
    }

    fn extractor_with(path: &str, grid: MemoryGrid) -> ScalarFieldExtractor {
        let opener = MemoryOpener::new();
        opener.insert(path, grid);
        ScalarFieldExtractor::new(Arc::new(opener))
    }

    #[test]
    fn test_reads_grouped_variable() {
        let grid = MemoryGrid::new()
            .with_variable(GridVariable::new("Grid/lat", dims(&["lat"]), vec![2], vec![-28.0, -27.0]).unwrap())
            .with_variable(GridVariable::new("Grid/lon", dims(&["lon"]), vec![2], vec![-49.0, -48.0]).unwrap())
            .with_variable(
                GridVariable::new(
                    "Grid/precipitation",
                    dims(&["time", "lon", "lat"]),
                    vec![1, 2, 2],
                    vec![0.0, 1.234, 0.0, 0.0],
                )
                .unwrap(),
            );
        let extractor = extractor_with("/granules/imerg.HDF5", grid);

        let data = read_precipitation(
            &extractor,
            Path::new("/granules/imerg.HDF5"),
            &granule(),
            -27.1,
            -48.9,
        )
        .unwrap();
        assert_eq!(data.variable, "Grid/precipitation");
        assert_eq!(data.rate_mm_h, 1.23);
        assert_eq!(data.granule, "3B-HHR-E.MS.MRG.3IMERG.HDF5");
        assert_eq!(data.last_update.as_deref(), Some("2026-10-13T23:30:00.000Z"));
    }

    #[test]
    fn test_falls_back_past_fill_values() {
        let grid = MemoryGrid::new()
            .with_axis("lat", vec![0.0, 1.0])
            .unwrap()
            .with_axis("lon", vec![0.0, 1.0])
            .unwrap()
            .with_variable(
                GridVariable::new("precipitationCal", dims(&["lat", "lon"]), vec![2, 2], vec![-9999.9; 4])
                    .unwrap()
                    .with_fill_value(-9999.9),
            )
            .with_variable(
                GridVariable::new("precipitation", dims(&["lat", "lon"]), vec![2, 2], vec![0.5; 4]).unwrap(),
            );
        let extractor = extractor_with("/g.HDF5", grid);

        let data = read_precipitation(&extractor, Path::new("/g.HDF5"), &granule(), 0.2, 0.2).unwrap();
        assert_eq!(data.variable, "precipitation");
        assert_eq!(data.rate_mm_h, 0.5);
    }

    #[test]
    fn test_missing_file_is_none() {
        let extractor = ScalarFieldExtractor::new(Arc::new(MemoryOpener::new()));
        assert!(read_precipitation(&extractor, Path::new("/absent"), &granule(), 0.0, 0.0).is_none());
    }
}
