//! Gateway HTTP Cache
//! ==================
//!
//! `gateway-http-cache` is a response cache for API gateways built on Tower.
//! A [`CacheLayer`] sits in front of the service that calls an origin and:
//!
//! - answers repeated GET requests from a named backend connection until
//!   the route's TTL runs out;
//! - keys entries by request URI plus an allow-list of request headers;
//! - strips conditional and encoding headers before forwarding, so the
//!   origin always returns a full, storable response;
//! - turns full responses into empty `304 Not Modified` answers when the
//!   client's `If-None-Match` / `If-Modified-Since` already match.
//!
//! Backends (in-memory, Redis) are registered once per process in a
//! [`BackendRegistry`] and shared by every route:
//!
//! ```no_run
//! use tower::{Service, ServiceBuilder, ServiceExt};
//! use gateway_http_cache::prelude::*;
//!
//! # async fn run() -> Result<(), gateway_http_cache::layer::BoxError> {
//! let server = ServerConfig::from_value(serde_json::json!({
//!     "connections": { "memory": { "driver": "memory" } }
//! }))?;
//! let registry = BackendRegistry::from_config(&server).await?;
//!
//! let route = ClientConfig::new(30, "memory", ["X-Tenant"])?;
//! let layer = CacheLayer::builder(registry, route)
//!     .logger(TracingLogger)
//!     .build()?;
//!
//! let mut svc = ServiceBuilder::new()
//!     .layer(layer)
//!     .service(tower::service_fn(|_req: http::Request<()>| async {
//!         Ok::<_, std::convert::Infallible>(http::Response::new(http_body_util::Full::from("ok")))
//!     }));
//!
//! let response = svc
//!     .ready()
//!     .await?
//!     .call(http::Request::new(()))
//!     .await?;
//! # drop(response);
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod codec;
pub mod config;
pub mod error;
pub mod freshness;
pub mod key;
pub mod layer;
pub mod logging;
pub mod prelude;
pub mod sanitize;

pub use backend::{BackendRegistry, CacheBackend};
pub use config::{ClientConfig, ServerConfig};
pub use error::CacheError;
pub use layer::{CacheLayer, CacheLayerBuilder, CacheService};
pub use logging::{CacheEvent, CacheEventType, CacheLogger, NoopLogger, TracingLogger};
