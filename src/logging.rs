//! Structured logging for cache operations.
//!
//! The cache service reports what it does as [`CacheEvent`]s handed to an
//! injected [`CacheLogger`]. The default is [`NoopLogger`]; gateways that
//! run a `tracing` subscriber install [`TracingLogger`], and anything else
//! (an audit sink, a test recorder) can implement the trait.

use std::fmt;
use std::time::SystemTime;

use http::{HeaderMap, Method, StatusCode, Uri};
use serde::{Deserialize, Serialize};
use serde_json::json;

/// `tracing` target used by [`TracingLogger`].
pub const LOG_TARGET: &str = "gateway_http_cache";

/// Types of cache events that can be logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheEventType {
    /// Response served from the backend.
    Hit,
    /// No usable entry; the request goes to the origin.
    Miss,
    /// Origin response written to the backend.
    Store,
    /// Backend rejected a write.
    StoreError,
    /// Backend failed a read; treated as a miss.
    FetchError,
    /// The route names a connection nobody registered; treated as a miss.
    ConnectionNotFound,
    /// A stored value could not be decoded; treated as a miss.
    DecodeError,
    /// The origin could not be reached or its body could not be read.
    UpstreamError,
    /// The request method cannot be cached.
    Rejected,
    /// Client validators matched; the body was dropped for a 304.
    NotModified,
    /// A connection was flushed.
    Flush,
}

impl CacheEventType {
    /// Whether the event reports a failure.
    pub fn is_error(self) -> bool {
        matches!(
            self,
            CacheEventType::StoreError
                | CacheEventType::FetchError
                | CacheEventType::ConnectionNotFound
                | CacheEventType::DecodeError
                | CacheEventType::UpstreamError
                | CacheEventType::Rejected
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CacheEventType::Hit => "hit",
            CacheEventType::Miss => "miss",
            CacheEventType::Store => "store",
            CacheEventType::StoreError => "store_error",
            CacheEventType::FetchError => "fetch_error",
            CacheEventType::ConnectionNotFound => "connection_not_found",
            CacheEventType::DecodeError => "decode_error",
            CacheEventType::UpstreamError => "upstream_error",
            CacheEventType::Rejected => "rejected",
            CacheEventType::NotModified => "not_modified",
            CacheEventType::Flush => "flush",
        }
    }
}

impl fmt::Display for CacheEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured cache event.
#[derive(Debug, Clone)]
pub struct CacheEvent {
    pub timestamp: SystemTime,
    pub event_type: CacheEventType,
    /// Value of the client's `x-request-id` header, when present.
    pub request_id: Option<String>,
    pub connection: Option<String>,
    pub key: Option<String>,
    pub method: Option<Method>,
    pub uri: Option<Uri>,
    pub status: Option<StatusCode>,
    pub ttl_seconds: Option<u64>,
    pub size_bytes: Option<usize>,
    pub error: Option<String>,
}

impl CacheEvent {
    pub fn new(event_type: CacheEventType) -> Self {
        Self {
            timestamp: SystemTime::now(),
            event_type,
            request_id: None,
            connection: None,
            key: None,
            method: None,
            uri: None,
            status: None,
            ttl_seconds: None,
            size_bytes: None,
            error: None,
        }
    }

    /// Picks the correlation id out of request headers.
    pub fn with_request_headers(mut self, headers: &HeaderMap) -> Self {
        self.request_id = headers
            .get("x-request-id")
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);
        self
    }

    pub fn with_connection(mut self, connection: impl Into<String>) -> Self {
        self.connection = Some(connection.into());
        self
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_method(mut self, method: Method) -> Self {
        self.method = Some(method);
        self
    }

    pub fn with_uri(mut self, uri: Uri) -> Self {
        self.uri = Some(uri);
        self
    }

    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_ttl(mut self, ttl_seconds: u64) -> Self {
        self.ttl_seconds = Some(ttl_seconds);
        self
    }

    pub fn with_size(mut self, size: usize) -> Self {
        self.size_bytes = Some(size);
        self
    }

    pub fn with_error(mut self, error: impl fmt::Display) -> Self {
        self.error = Some(error.to_string());
        self
    }

    /// Renders the event as a JSON object.
    pub fn to_json(&self) -> serde_json::Value {
        let timestamp_ms = self
            .timestamp
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;

        json!({
            "timestamp_ms": timestamp_ms,
            "event": self.event_type,
            "request_id": self.request_id,
            "connection": self.connection,
            "key": self.key,
            "method": self.method.as_ref().map(Method::as_str),
            "uri": self.uri.as_ref().map(ToString::to_string),
            "status": self.status.map(|status| status.as_u16()),
            "ttl_seconds": self.ttl_seconds,
            "size_bytes": self.size_bytes,
            "error": self.error,
        })
    }
}

/// Destination for cache events.
pub trait CacheLogger: Send + Sync + 'static {
    fn log(&self, event: &CacheEvent);
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopLogger;

impl CacheLogger for NoopLogger {
    fn log(&self, _event: &CacheEvent) {}
}

/// Forwards events to `tracing`: failures at `ERROR`, the rest at `DEBUG`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger;

impl CacheLogger for TracingLogger {
    fn log(&self, event: &CacheEvent) {
        let uri = event.uri.as_ref().map(ToString::to_string);
        let method = event.method.as_ref().map(Method::as_str);
        let status = event.status.map(|status| status.as_u16());

        if event.event_type.is_error() {
            tracing::error!(
                target: LOG_TARGET,
                event = %event.event_type,
                request_id = event.request_id.as_deref(),
                connection = event.connection.as_deref(),
                key = event.key.as_deref(),
                method,
                uri = uri.as_deref(),
                status,
                error = event.error.as_deref(),
                "cache operation failed"
            );
        } else {
            tracing::debug!(
                target: LOG_TARGET,
                event = %event.event_type,
                request_id = event.request_id.as_deref(),
                connection = event.connection.as_deref(),
                key = event.key.as_deref(),
                method,
                uri = uri.as_deref(),
                status,
                ttl_seconds = event.ttl_seconds,
                size_bytes = event.size_bytes,
                "cache operation"
            );
        }
    }
}
