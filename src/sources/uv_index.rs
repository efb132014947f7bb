//! UV index source.
//!
//! The only UV product reachable through the archive session needs a
//! separate TROPOMI data agreement, so this source always reports itself
//! unavailable. Categorization lives in [`crate::categories::categorize_uv`]
//! for when a feed is wired in.

use super::{SourceAdapter, SourceError, SourcePayload, SourceRequest};
use crate::models::SourceKind;
use async_trait::async_trait;

pub const DISABLED_REASON: &str =
    "UV index requires TROPOMI data access that is not available through the archive session";

#[derive(Debug, Default)]
pub struct UvIndexAdapter;

#[async_trait]
impl SourceAdapter for UvIndexAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::UvIndex
    }

    async fn fetch(&self, _request: &SourceRequest) -> Result<SourcePayload, SourceError> {
        Err(SourceError::unavailable(DISABLED_REASON))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LocationQuery;

    #[tokio::test]
    async fn test_always_unavailable() {
        let query = LocationQuery::new(0.0, 0.0, 5000).unwrap();
        let error = UvIndexAdapter
            .fetch(&SourceRequest::new(query))
            .await
            .unwrap_err();
        assert_eq!(error.to_string(), DISABLED_REASON);
    }
}
