//! Re-exports for consumers who prefer a single import.
//!
//! ```no_run
//! use gateway_http_cache::prelude::*;
//! # async fn run() -> Result<(), CacheError> {
//! let registry = BackendRegistry::new();
//! registry.register("memory", &ConnectionConfig::memory()).await?;
//! let layer = CacheLayer::new(registry, ClientConfig::new(30, "memory", Vec::<String>::new())?)?;
//! # drop(layer);
//! # Ok(())
//! # }
//! ```

pub use crate::backend::memory::InMemoryBackend;
#[cfg(feature = "redis-backend")]
pub use crate::backend::redis::RedisBackend;
pub use crate::backend::{BackendRegistry, CacheBackend};
pub use crate::codec::{BincodeCodec, CacheCodec, CacheEntry, Http1Codec};
pub use crate::config::{ClientConfig, ConnectionConfig, Driver, ServerConfig};
pub use crate::error::CacheError;
pub use crate::key::CacheKeyBuilder;
pub use crate::layer::{CacheLayer, CacheLayerBuilder, CacheService};
pub use crate::logging::{CacheEvent, CacheEventType, CacheLogger, NoopLogger, TracingLogger};
