//! Persistent TTL cache for provider responses

use crate::error::SafeOutError;
use fjall::Keyspace;
use rand::RngExt;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::fmt::Debug;
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::task;

type Result<T> = std::result::Result<T, SafeOutError>;

#[derive(Serialize, Deserialize)]
struct StoredEntry<T> {
    value: T,
    expires_at: u64, // Unix timestamp (seconds)
}

fn cache_error(context: &str, e: impl std::fmt::Display) -> SafeOutError {
    SafeOutError::cache(format!("{context}: {e}"))
}

fn get_from_store(store: Keyspace, key: Vec<u8>) -> Result<Option<Vec<u8>>> {
    Ok(store
        .get(key)
        .map_err(|e| cache_error("read failed", e))?
        .map(|v| v.to_vec()))
}

fn unix_now() -> Result<u64> {
    Ok(SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| cache_error("clock before epoch", e))?
        .as_secs())
}

/// Injected into the adapters that opt in
pub struct ResponseCache {
    store: Keyspace,
    ttl: Duration,
}

impl Debug for ResponseCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseCache")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl ResponseCache {
    /// Open or create the store under `path`; `ttl` is the base expiry
    pub fn open(path: impl AsRef<Path>, ttl: Duration) -> Result<Self> {
        std::fs::create_dir_all(path.as_ref())?;
        let db = fjall::Database::builder(path.as_ref())
            .open()
            .map_err(|e| cache_error("open failed", e))?;
        let store = db
            .keyspace("responses", fjall::KeyspaceCreateOptions::default)
            .map_err(|e| cache_error("keyspace open failed", e))?;
        Ok(Self { store, ttl })
    }

    /// Base expiry scaled by a random factor in [0.9, 1.1)
    #[must_use]
    pub fn jittered_ttl(&self) -> Duration {
        let jitter: f64 = rand::rng().random_range(0.9..1.1);
        self.ttl.mul_f64(jitter)
    }

    /// Store a value under the jittered default TTL
    pub async fn put<T: Serialize + Send + Debug + 'static>(&self, key: &str, value: T) -> Result<()> {
        self.put_with_ttl(key, value, self.jittered_ttl()).await
    }

    /// Stores a serializable value with a time-to-live (TTL).
    #[tracing::instrument(name = "put_cache", level = "debug", skip(self, value))]
    pub async fn put_with_ttl<T: Serialize + Send + Debug + 'static>(
        &self,
        key: &str,
        value: T,
        ttl: Duration,
    ) -> Result<()> {
        let store = self.store.clone();
        let key = key.as_bytes().to_vec();
        let expires_at = SystemTime::now()
            .checked_add(ttl)
            .ok_or_else(|| SafeOutError::cache("TTL overflow"))?
            .duration_since(UNIX_EPOCH)
            .map_err(|e| cache_error("clock before epoch", e))?
            .as_secs();
        let entry = StoredEntry { value, expires_at };
        let bytes = postcard::to_stdvec(&entry).map_err(|e| cache_error("encode failed", e))?;

        task::spawn_blocking(move || store.insert(key, bytes))
            .await
            .map_err(|e| cache_error("write task failed", e))?
            .map_err(|e| cache_error("write failed", e))?;
        Ok(())
    }

    /// Retrieves a value if it exists and has not expired.
    /// Returns `None` for cache misses or expired entries.
    #[tracing::instrument(name = "query_cache", level = "debug", skip(self))]
    pub async fn get<T: DeserializeOwned + Send + 'static>(&self, key: &str) -> Result<Option<T>> {
        let store = self.store.clone();
        let key_bytes = key.as_bytes().to_vec();

        let maybe_bytes: Option<Vec<u8>> = task::spawn_blocking(move || get_from_store(store, key_bytes))
            .await
            .map_err(|e| cache_error("read task failed", e))??;

        let Some(bytes) = maybe_bytes else {
            tracing::debug!("Key not found");
            return Ok(None);
        };

        let entry: StoredEntry<T> = match postcard::from_bytes(&bytes) {
            Ok(entry) => entry,
            Err(e) => {
                // layout changed between versions
                tracing::debug!("Dropping undecodable entry: {}", e);
                self.remove(key).await?;
                return Ok(None);
            }
        };

        if unix_now()? < entry.expires_at {
            tracing::debug!("Key found and still fresh");
            Ok(Some(entry.value))
        } else {
            tracing::debug!("Key found but expired");
            self.remove(key).await?;
            Ok(None)
        }
    }

    /// Manually removes a key from the cache.
    pub async fn remove(&self, key: &str) -> Result<()> {
        let key = key.as_bytes().to_vec();
        let store = self.store.clone();
        task::spawn_blocking(move || store.remove(key))
            .await
            .map_err(|e| cache_error("remove task failed", e))?
            .map_err(|e| cache_error("remove failed", e))?;
        Ok(())
    }
}
