use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;

use super::memory::{InMemoryBackend, DEFAULT_CAPACITY};
use super::CacheBackend;
use crate::config::{ConnectionConfig, Driver, ServerConfig};
use crate::error::CacheError;

/// Named backend connections shared by every cached route.
///
/// The registry is an explicit value: build it once at startup, then hand
/// clones to each [`crate::CacheLayer`]. Clones share the same map, so a
/// connection registered later (a configuration reload) is visible to
/// layers that already exist.
#[derive(Clone, Default)]
pub struct BackendRegistry {
    backends: Arc<DashMap<String, Arc<dyn CacheBackend>>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a registry holding one backend per configured connection.
    pub async fn from_config(config: &ServerConfig) -> Result<Self, CacheError> {
        let registry = Self::new();
        for (name, connection) in &config.connections {
            registry.register(name.clone(), connection).await?;
        }
        Ok(registry)
    }

    /// Creates the backend described by `config` and registers it under
    /// `name`, replacing any previous backend with that name.
    pub async fn register(
        &self,
        name: impl Into<String>,
        config: &ConnectionConfig,
    ) -> Result<(), CacheError> {
        let name = name.into();
        let backend = build_backend(config).await?;

        tracing::debug!(connection = %name, driver = %config.driver, "cache connection registered");

        self.backends.insert(name, backend);
        Ok(())
    }

    /// Registers an already constructed backend.
    pub fn insert(&self, name: impl Into<String>, backend: Arc<dyn CacheBackend>) {
        self.backends.insert(name.into(), backend);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn CacheBackend>> {
        self.backends.get(name).map(|entry| entry.value().clone())
    }

    /// Removes every entry stored through connection `name`.
    pub async fn flush(&self, name: &str) -> Result<(), CacheError> {
        let backend = self
            .get(name)
            .ok_or_else(|| CacheError::ConnectionNotFound(name.to_owned()))?;
        backend.flush().await
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.backends.iter().map(|entry| entry.key().clone()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }
}

impl fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendRegistry")
            .field("connections", &self.names())
            .finish()
    }
}

async fn build_backend(config: &ConnectionConfig) -> Result<Arc<dyn CacheBackend>, CacheError> {
    match config.driver {
        Driver::Memory => {
            let options = config.memory_options()?;
            Ok(Arc::new(InMemoryBackend::new(
                options.capacity.unwrap_or(DEFAULT_CAPACITY),
            )))
        }
        #[cfg(feature = "redis-backend")]
        Driver::Redis => {
            let options = config.redis_options()?;
            let backend = super::redis::RedisBackend::connect(&options).await?;
            Ok(Arc::new(backend))
        }
        #[cfg(not(feature = "redis-backend"))]
        Driver::Redis => {
            config.redis_options()?;
            Err(CacheError::Config(
                "redis driver requires the `redis-backend` feature".into(),
            ))
        }
    }
}
