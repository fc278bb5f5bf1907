use async_trait::async_trait;
use bytes::Bytes;
use moka::future::Cache;
use std::time::{Duration, SystemTime};

use super::CacheBackend;
use crate::error::CacheError;

/// Default number of entries kept by [`InMemoryBackend::default`].
pub const DEFAULT_CAPACITY: u64 = 10_000;

/// An in-memory [`CacheBackend`] implementation backed by [`moka`].
///
/// Expiry is enforced lazily: each entry remembers its deadline and `fetch`
/// compares it with the wall clock, dropping the entry once it has passed.
/// The backend is cheap to clone and clones share a single underlying cache.
#[derive(Clone)]
pub struct InMemoryBackend {
    cache: Cache<String, StoredValue>,
}

#[derive(Clone)]
struct StoredValue {
    value: Bytes,
    expires_at: SystemTime,
}

impl InMemoryBackend {
    /// Creates a new in-memory cache with the provided `max_capacity`.
    ///
    /// The capacity is expressed in number of cached entries, not bytes.
    pub fn new(max_capacity: u64) -> Self {
        let cache = Cache::builder().max_capacity(max_capacity).build();
        Self { cache }
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[async_trait]
impl CacheBackend for InMemoryBackend {
    async fn fetch(&self, key: &str) -> Result<Option<Bytes>, CacheError> {
        let Some(stored) = self.cache.get(key).await else {
            return Ok(None);
        };

        if SystemTime::now() >= stored.expires_at {
            self.cache.invalidate(key).await;
            return Ok(None);
        }

        Ok(Some(stored.value))
    }

    async fn save(&self, key: String, value: Bytes, ttl: Duration) -> Result<(), CacheError> {
        if ttl.is_zero() {
            return Ok(());
        }

        let stored = StoredValue {
            value,
            expires_at: SystemTime::now() + ttl,
        };
        self.cache.insert(key, stored).await;
        Ok(())
    }

    async fn flush(&self) -> Result<(), CacheError> {
        self.cache.invalidate_all();
        self.cache.run_pending_tasks().await;
        Ok(())
    }
}
