//! Storage backends for the cache layer.
//!
//! The cache layer stores serialized responses through the [`CacheBackend`]
//! capability. This module ships with:
//! - [`memory::InMemoryBackend`]: a process-local cache backed by [`moka`].
//! - `redis::RedisBackend` *(optional)*: a shared cache when the
//!   `redis-backend` crate feature is enabled.
//!
//! Backends are registered by connection name in a
//! [`registry::BackendRegistry`], which the cache layer consults per request.
//! Values are opaque bytes produced by a [`crate::codec::CacheCodec`]; a
//! backend must hand back exactly what it was given.

pub mod memory;
#[cfg(feature = "redis-backend")]
pub mod redis;
pub mod registry;

use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;

use crate::error::CacheError;

pub use registry::BackendRegistry;

#[async_trait]
pub trait CacheBackend: Send + Sync + 'static {
    /// Fetches the stored value for `key`.
    ///
    /// Returns `Ok(None)` when the backend does not have a value or the
    /// entry has expired.
    async fn fetch(&self, key: &str) -> Result<Option<Bytes>, CacheError>;

    /// Stores `value` under `key` for `ttl`, replacing any previous value.
    ///
    /// A zero `ttl` stores nothing.
    async fn save(&self, key: String, value: Bytes, ttl: Duration) -> Result<(), CacheError>;

    /// Removes every entry owned by this backend.
    async fn flush(&self) -> Result<(), CacheError>;
}
