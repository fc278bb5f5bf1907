use thiserror::Error;

/// Errors that can occur while configuring or talking to a cache backend.
///
/// None of these ever reach the client: the cache service logs them and
/// degrades to a miss (reads) or a no-op (writes). Only [`CacheError::Config`]
/// is fatal, and only at registration time.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("backend error: {0}")]
    Backend(String),

    #[error("connection {0} not found")]
    ConnectionNotFound(String),

    #[error("codec error: {0}")]
    Codec(String),

    #[cfg(feature = "redis-backend")]
    #[error(transparent)]
    Redis(#[from] redis::RedisError),
}
