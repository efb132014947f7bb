#![allow(dead_code)]

use async_trait::async_trait;
use safeout::models::SourceKind;
use safeout::sources::{SourceAdapter, SourceError, SourcePayload, SourceRequest};
use std::sync::Arc;
use std::time::Duration;

/// Adapter scripted to succeed, fail, stall or panic
pub enum Stub {
    Unavailable(SourceKind, &'static str),
    Payload(SourcePayload),
    Stall(SourceKind, Duration),
    Panic(SourceKind),
}

#[async_trait]
impl SourceAdapter for Stub {
    fn kind(&self) -> SourceKind {
        match self {
            Stub::Unavailable(kind, _) | Stub::Stall(kind, _) | Stub::Panic(kind) => *kind,
            Stub::Payload(payload) => payload.kind(),
        }
    }

    async fn fetch(&self, _request: &SourceRequest) -> Result<SourcePayload, SourceError> {
        match self {
            Stub::Unavailable(_, reason) => Err(SourceError::unavailable(*reason)),
            Stub::Payload(payload) => Ok(payload.clone()),
            Stub::Stall(kind, duration) => {
                tokio::time::sleep(*duration).await;
                Err(SourceError::unavailable(format!("{kind} stalled")))
            }
            Stub::Panic(kind) => panic!("{kind} adapter exploded"),
        }
    }
}

/// One unavailable stub per source kind, in registration order
pub fn all_unavailable() -> Vec<Arc<dyn SourceAdapter>> {
    SourceKind::ALL
        .iter()
        .map(|kind| Arc::new(Stub::Unavailable(*kind, "offline")) as Arc<dyn SourceAdapter>)
        .collect()
}
