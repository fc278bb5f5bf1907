//! Route and process configuration.
//!
//! A [`ClientConfig`] is attached to every cached route; a [`ServerConfig`]
//! is read once at startup and describes the named backend connections
//! (see [`crate::backend::BackendRegistry::from_config`]).
//!
//! Both can be decoded from a gateway's free-form "extra config" object,
//! where they live under the [`NAMESPACE`] key:
//!
//! ```
//! use gateway_http_cache::config::ClientConfig;
//!
//! let extra = serde_json::json!({
//!     "gateway-http-cache": {
//!         "ttl": 30,
//!         "connection": "memory",
//!         "headers": ["x-tenant", "Accept-Language"]
//!     }
//! });
//!
//! let config = ClientConfig::from_extra(&extra).unwrap();
//! assert_eq!(config.headers(), ["Accept-Language", "X-Tenant"]);
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use http::HeaderName;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::error::CacheError;

/// Key under which the cache configuration lives in a gateway extra config.
pub const NAMESPACE: &str = "gateway-http-cache";

/// Per-route cache settings.
///
/// The header allow-list is always held in canonical form (`X-Custom-Header`),
/// deduplicated and sorted, so the cache key does not depend on how the
/// route author spelled or ordered the names.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawClientConfig")]
pub struct ClientConfig {
    ttl: u64,
    connection: String,
    headers: Vec<String>,
}

#[derive(Deserialize)]
struct RawClientConfig {
    #[serde(default, deserialize_with = "weak_number")]
    ttl: u64,
    connection: String,
    #[serde(default)]
    headers: Option<Vec<String>>,
}

impl TryFrom<RawClientConfig> for ClientConfig {
    type Error = CacheError;

    fn try_from(raw: RawClientConfig) -> Result<Self, Self::Error> {
        ClientConfig::new(raw.ttl, raw.connection, raw.headers.unwrap_or_default())
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("ttl", &self.ttl)
            .field("connection", &self.connection)
            .field("headers", &self.headers)
            .finish()
    }
}

impl ClientConfig {
    /// Builds a route configuration, normalizing the header allow-list.
    ///
    /// Fails when a header name is not a valid HTTP field name.
    pub fn new<I, S>(ttl: u64, connection: impl Into<String>, headers: I) -> Result<Self, CacheError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Ok(Self {
            ttl,
            connection: connection.into(),
            headers: normalize_headers(headers)?,
        })
    }

    /// Decodes a route configuration from a bare JSON object.
    pub fn from_value(value: Value) -> Result<Self, CacheError> {
        serde_json::from_value(value).map_err(|err| CacheError::Config(err.to_string()))
    }

    /// Decodes a route configuration from the [`NAMESPACE`] entry of an
    /// extra-config object.
    pub fn from_extra(extra: &Value) -> Result<Self, CacheError> {
        Self::from_value(namespaced(extra)?)
    }

    /// Time-to-live in whole seconds.
    pub fn ttl_secs(&self) -> u64 {
        self.ttl
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl)
    }

    /// Name of the backend connection used by this route.
    pub fn connection(&self) -> &str {
        &self.connection
    }

    /// Canonical, sorted header allow-list.
    pub fn headers(&self) -> &[String] {
        &self.headers
    }
}

/// Process-wide backend connections keyed by name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub connections: BTreeMap<String, ConnectionConfig>,
}

impl ServerConfig {
    pub fn from_value(value: Value) -> Result<Self, CacheError> {
        serde_json::from_value(value).map_err(|err| CacheError::Config(err.to_string()))
    }

    pub fn from_extra(extra: &Value) -> Result<Self, CacheError> {
        Self::from_value(namespaced(extra)?)
    }
}

/// One named backend connection: a driver tag plus driver options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub driver: Driver,
    #[serde(default)]
    pub options: Map<String, Value>,
}

impl ConnectionConfig {
    pub fn memory() -> Self {
        Self {
            driver: Driver::Memory,
            options: Map::new(),
        }
    }

    pub fn memory_options(&self) -> Result<MemoryOptions, CacheError> {
        decode_options(&self.options)
    }

    pub fn redis_options(&self) -> Result<RedisOptions, CacheError> {
        let options: RedisOptions = decode_options(&self.options)?;
        if options.addr.trim().is_empty() {
            return Err(CacheError::Config("missing or empty address".into()));
        }
        Ok(options)
    }
}

/// Backend implementation selected for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Driver {
    /// Process-local store; `"memory"` or `"inmemory"`.
    #[serde(alias = "inmemory")]
    Memory,
    /// Shared Redis store.
    Redis,
}

impl fmt::Display for Driver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Driver::Memory => f.write_str("memory"),
            Driver::Redis => f.write_str("redis"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct MemoryOptions {
    /// Maximum number of entries; defaults to
    /// [`crate::backend::memory::DEFAULT_CAPACITY`].
    #[serde(default, deserialize_with = "weak_optional_number")]
    pub capacity: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RedisOptions {
    /// `host:port` of the Redis server.
    #[serde(default)]
    pub addr: String,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub pass: Option<String>,
    #[serde(default, deserialize_with = "weak_number")]
    pub db: i64,
    /// Accepted for compatibility; the managed connection multiplexes.
    #[serde(default, deserialize_with = "weak_optional_number")]
    pub pool_size: Option<u64>,
    /// Key prefix, so several gateways can share one database.
    #[serde(default)]
    pub namespace: Option<String>,
}

/// Canonicalizes, deduplicates and sorts header names.
pub fn normalize_headers<I, S>(headers: I) -> Result<Vec<String>, CacheError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut unique = BTreeSet::new();
    for header in headers {
        let name = header.as_ref().trim();
        HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| CacheError::Config(format!("invalid header name {name:?}")))?;
        unique.insert(canonical_header_name(name));
    }
    Ok(unique.into_iter().collect())
}

/// Returns the MIME canonical form of a header name: the first letter and
/// every letter after a hyphen upper-cased, the rest lower-cased.
pub fn canonical_header_name(name: &str) -> String {
    let mut upper = true;
    name.chars()
        .map(|c| {
            let out = if upper {
                c.to_ascii_uppercase()
            } else {
                c.to_ascii_lowercase()
            };
            upper = c == '-';
            out
        })
        .collect()
}

fn namespaced(extra: &Value) -> Result<Value, CacheError> {
    match extra.get(NAMESPACE) {
        Some(value @ Value::Object(_)) => Ok(value.clone()),
        _ => Err(CacheError::Config("configuration not found".into())),
    }
}

fn decode_options<T>(options: &Map<String, Value>) -> Result<T, CacheError>
where
    T: for<'de> Deserialize<'de>,
{
    serde_json::from_value(Value::Object(options.clone()))
        .map_err(|err| CacheError::Config(err.to_string()))
}

/// Accepts numbers written either as JSON numbers or as numeric strings.
#[derive(Deserialize)]
#[serde(untagged)]
enum Weak<T> {
    Value(T),
    Text(String),
}

fn weak_number<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + FromStr,
    T::Err: fmt::Display,
{
    match Weak::<T>::deserialize(deserializer)? {
        Weak::Value(value) => Ok(value),
        Weak::Text(text) => text.trim().parse().map_err(serde::de::Error::custom),
    }
}

fn weak_optional_number<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + FromStr,
    T::Err: fmt::Display,
{
    weak_number(deserializer).map(Some)
}
