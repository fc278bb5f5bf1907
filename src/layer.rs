use std::error::Error as StdError;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_util::future::BoxFuture;
use http::response::Parts;
use http::{HeaderMap, Method, Request, Response, StatusCode, Uri};
use http_body::Body;
use http_body_util::{BodyExt, Full};
use tower::{Layer, Service, ServiceExt};

#[cfg(feature = "metrics")]
use metrics::counter;

use crate::backend::{BackendRegistry, CacheBackend};
use crate::codec::{BincodeCodec, CacheCodec, CacheEntry};
use crate::config::ClientConfig;
use crate::error::CacheError;
use crate::freshness;
use crate::key::CacheKeyBuilder;
use crate::logging::{CacheEvent, CacheEventType, CacheLogger, NoopLogger};
use crate::sanitize::sanitize;

pub type BoxError = Box<dyn StdError + Send + Sync>;

/// Response caching layer for one gateway route.
///
/// The layer wraps the service that talks to the origin. GET responses with
/// a 2xx status are stored in the backend named by the route's
/// [`ClientConfig`] and replayed until their TTL runs out; conditional
/// requests whose validators match get an empty `304`. Any other method is
/// answered with `501 Not Implemented` without touching the origin.
///
/// Cloning a `CacheLayer` is cheap and shares the backend registry.
#[derive(Clone)]
pub struct CacheLayer<C = BincodeCodec> {
    registry: BackendRegistry,
    config: Arc<ClientConfig>,
    key_builder: CacheKeyBuilder,
    logger: Arc<dyn CacheLogger>,
    codec: C,
}

/// Builder for configuring [`CacheLayer`] instances.
pub struct CacheLayerBuilder<C = BincodeCodec> {
    registry: BackendRegistry,
    config: ClientConfig,
    logger: Arc<dyn CacheLogger>,
    codec: C,
}

impl CacheLayerBuilder<BincodeCodec> {
    pub fn new(registry: BackendRegistry, config: ClientConfig) -> Self {
        Self {
            registry,
            config,
            logger: Arc::new(NoopLogger),
            codec: BincodeCodec,
        }
    }
}

impl<C> CacheLayerBuilder<C>
where
    C: CacheCodec,
{
    /// Installs the logger that receives cache events.
    pub fn logger(mut self, logger: impl CacheLogger) -> Self {
        self.logger = Arc::new(logger);
        self
    }

    /// Shares an existing logger between several layers.
    pub fn shared_logger(mut self, logger: Arc<dyn CacheLogger>) -> Self {
        self.logger = logger;
        self
    }

    /// Replaces the serialization used for stored responses.
    ///
    /// Every layer writing to the same connection must use the same codec.
    pub fn codec<NC>(self, codec: NC) -> CacheLayerBuilder<NC>
    where
        NC: CacheCodec,
    {
        CacheLayerBuilder {
            registry: self.registry,
            config: self.config,
            logger: self.logger,
            codec,
        }
    }

    pub fn build(self) -> Result<CacheLayer<C>, CacheError> {
        let key_builder = CacheKeyBuilder::new(self.config.headers())?;
        Ok(CacheLayer {
            registry: self.registry,
            config: Arc::new(self.config),
            key_builder,
            logger: self.logger,
            codec: self.codec,
        })
    }
}

impl CacheLayer<BincodeCodec> {
    /// Builds a layer with the default codec and no logging.
    pub fn new(registry: BackendRegistry, config: ClientConfig) -> Result<Self, CacheError> {
        CacheLayerBuilder::new(registry, config).build()
    }

    /// Returns a builder for choosing the logger and codec.
    pub fn builder(registry: BackendRegistry, config: ClientConfig) -> CacheLayerBuilder {
        CacheLayerBuilder::new(registry, config)
    }
}

impl<C> CacheLayer<C> {
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn registry(&self) -> &BackendRegistry {
        &self.registry
    }

    /// Drops every entry stored through this route's connection.
    pub async fn flush(&self) -> Result<(), CacheError> {
        let connection = self.config.connection();
        let result = self.registry.flush(connection).await;

        let mut event = CacheEvent::new(CacheEventType::Flush).with_connection(connection);
        if let Err(err) = &result {
            event = event.with_error(err);
        }
        self.logger.log(&event);

        result
    }
}

impl<S, C> Layer<S> for CacheLayer<C>
where
    C: CacheCodec,
{
    type Service = CacheService<S, C>;

    fn layer(&self, inner: S) -> Self::Service {
        CacheService {
            inner,
            registry: self.registry.clone(),
            config: self.config.clone(),
            key_builder: self.key_builder.clone(),
            logger: self.logger.clone(),
            codec: self.codec.clone(),
        }
    }
}

#[derive(Clone)]
pub struct CacheService<S, C = BincodeCodec> {
    inner: S,
    registry: BackendRegistry,
    config: Arc<ClientConfig>,
    key_builder: CacheKeyBuilder,
    logger: Arc<dyn CacheLogger>,
    codec: C,
}

impl<S, C, ReqBody, ResBody> Service<Request<ReqBody>> for CacheService<S, C>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Into<BoxError> + Send,
    ReqBody: Send + 'static,
    ResBody: Body<Data = Bytes> + Send + 'static,
    ResBody::Error: Into<BoxError> + Send,
    C: CacheCodec,
{
    type Response = Response<Full<Bytes>>;
    type Error = BoxError;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(Into::into)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        let method = req.method().clone();
        let uri = req.uri().clone();

        if method != Method::GET {
            let event = CacheEvent::new(CacheEventType::Rejected)
                .with_request_headers(req.headers())
                .with_method(method)
                .with_uri(uri)
                .with_error("response caching is only supported for GET");
            self.logger.log(&event);

            #[cfg(feature = "metrics")]
            counter!("gateway_http_cache.rejected").increment(1);

            return Box::pin(async { Ok(empty_response(StatusCode::NOT_IMPLEMENTED)) });
        }

        let (forward, original_headers) = sanitize(req);
        let key = self.key_builder.build(&method, &uri, forward.headers());

        let exchange = Exchange {
            backend: self.registry.get(self.config.connection()),
            config: self.config.clone(),
            logger: self.logger.clone(),
            codec: self.codec.clone(),
            request_id: request_id(&original_headers),
            key,
            method,
            uri,
        };
        let inner = self.inner.clone();

        Box::pin(async move {
            tracing::trace!(method = %exchange.method, uri = %exchange.uri, "cache_call");

            if exchange.backend.is_none() {
                exchange.log(
                    exchange
                        .event(CacheEventType::ConnectionNotFound)
                        .with_error(CacheError::ConnectionNotFound(
                            exchange.config.connection().to_owned(),
                        )),
                );
            }

            let mut response = match exchange.load().await {
                Some(entry) => {
                    #[cfg(feature = "metrics")]
                    counter!("gateway_http_cache.hit").increment(1);

                    exchange.log(exchange.event(CacheEventType::Hit).with_status(entry.status));
                    entry.into_response()
                }
                None => {
                    #[cfg(feature = "metrics")]
                    counter!("gateway_http_cache.miss").increment(1);

                    exchange.log(exchange.event(CacheEventType::Miss));
                    exchange.forward(inner, forward).await
                }
            };

            if freshness::is_fresh(&original_headers, response.headers()) {
                #[cfg(feature = "metrics")]
                counter!("gateway_http_cache.not_modified").increment(1);

                exchange.log(exchange.event(CacheEventType::NotModified));
                *response.status_mut() = StatusCode::NOT_MODIFIED;
                *response.body_mut() = Full::new(Bytes::new());
            }

            Ok(response)
        })
    }
}

/// Everything one cached GET needs once it leaves `call`.
struct Exchange<C> {
    backend: Option<Arc<dyn CacheBackend>>,
    config: Arc<ClientConfig>,
    logger: Arc<dyn CacheLogger>,
    codec: C,
    request_id: Option<String>,
    key: Option<String>,
    method: Method,
    uri: Uri,
}

impl<C> Exchange<C>
where
    C: CacheCodec,
{
    fn event(&self, event_type: CacheEventType) -> CacheEvent {
        let mut event = CacheEvent::new(event_type)
            .with_connection(self.config.connection())
            .with_method(self.method.clone())
            .with_uri(self.uri.clone());
        event.request_id = self.request_id.clone();
        event.key = self.key.clone();
        event
    }

    fn log(&self, event: CacheEvent) {
        self.logger.log(&event);
    }

    /// Looks the request up in the backend. Every failure reads as a miss.
    async fn load(&self) -> Option<CacheEntry> {
        let (backend, key) = (self.backend.as_ref()?, self.key.as_ref()?);

        let bytes = match backend.fetch(key).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(err) => {
                self.log(self.event(CacheEventType::FetchError).with_error(err));
                return None;
            }
        };

        match self.codec.decode(&bytes) {
            Ok(entry) => Some(entry),
            Err(err) => {
                self.log(self.event(CacheEventType::DecodeError).with_error(err));
                None
            }
        }
    }

    /// Sends the sanitized request to the origin and stores a 2xx answer.
    ///
    /// The origin failing, or its body failing mid-read, yields an empty 500
    /// that is never cached.
    async fn forward<S, ReqBody, ResBody>(
        &self,
        inner: S,
        request: Request<ReqBody>,
    ) -> Response<Full<Bytes>>
    where
        S: Service<Request<ReqBody>, Response = Response<ResBody>>,
        S::Error: Into<BoxError>,
        ResBody: Body<Data = Bytes>,
        ResBody::Error: Into<BoxError>,
    {
        let response = match inner.oneshot(request).await {
            Ok(response) => response,
            Err(err) => return self.upstream_failure(err.into()),
        };

        let (parts, body) = response.into_parts();
        let body = match BodyExt::collect(body).await {
            Ok(collected) => collected.to_bytes(),
            Err(err) => return self.upstream_failure(err.into()),
        };

        if parts.status.is_success() {
            self.store(&parts, body.clone()).await;
        }

        Response::from_parts(parts, Full::from(body))
    }

    fn upstream_failure(&self, err: BoxError) -> Response<Full<Bytes>> {
        #[cfg(feature = "metrics")]
        counter!("gateway_http_cache.upstream_error").increment(1);

        self.log(self.event(CacheEventType::UpstreamError).with_error(err));
        empty_response(StatusCode::INTERNAL_SERVER_ERROR)
    }

    /// Persists a response. Failures are logged and otherwise ignored.
    async fn store(&self, parts: &Parts, body: Bytes) {
        let (Some(backend), Some(key)) = (self.backend.as_ref(), self.key.as_ref()) else {
            return;
        };
        if self.config.ttl_secs() == 0 {
            return;
        }

        let size = body.len();
        let entry = CacheEntry::from_parts(parts, body);
        let encoded = match self.codec.encode(&entry) {
            Ok(encoded) => Bytes::from(encoded),
            Err(err) => {
                self.log(self.event(CacheEventType::StoreError).with_error(err));
                return;
            }
        };

        match backend.save(key.clone(), encoded, self.config.ttl()).await {
            Ok(()) => {
                #[cfg(feature = "metrics")]
                counter!("gateway_http_cache.store").increment(1);

                self.log(
                    self.event(CacheEventType::Store)
                        .with_status(parts.status)
                        .with_ttl(self.config.ttl_secs())
                        .with_size(size),
                );
            }
            Err(err) => {
                #[cfg(feature = "metrics")]
                counter!("gateway_http_cache.store_error").increment(1);

                self.log(self.event(CacheEventType::StoreError).with_error(err));
            }
        }
    }
}

fn empty_response(status: StatusCode) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::new()));
    *response.status_mut() = status;
    response
}

fn request_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned)
}
