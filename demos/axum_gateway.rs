//! Run with:
//! RUST_LOG=gateway_http_cache=debug cargo run --example axum_gateway
//!
//! With `--features redis-backend` and `REDIS_ADDR=127.0.0.1:6379` the
//! `/tenants` route stores its responses in Redis instead of memory.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::error_handling::HandleErrorLayer;
use axum::http::{HeaderMap, StatusCode};
use axum::{routing::get, Router};
use gateway_http_cache::layer::BoxError;
use gateway_http_cache::prelude::*;
use serde_json::json;
use tower::ServiceBuilder;
use tracing_subscriber::EnvFilter;

async fn handle_cache_error(err: BoxError) -> (StatusCode, String) {
    (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
}

fn server_config() -> Result<ServerConfig, CacheError> {
    let mut connections = json!({
        "memory": { "driver": "memory", "options": { "capacity": 1024 } }
    });

    if cfg!(feature = "redis-backend") {
        if let Ok(addr) = std::env::var("REDIS_ADDR") {
            connections["shared"] = json!({
                "driver": "redis",
                "options": { "addr": addr, "namespace": "axum_gateway" }
            });
        }
    }

    ServerConfig::from_extra(&json!({
        "gateway-http-cache": { "connections": connections }
    }))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let registry = BackendRegistry::from_config(&server_config()?).await?;
    let tenant_connection = if registry.get("shared").is_some() {
        "shared"
    } else {
        "memory"
    };

    let catalog_cache = CacheLayer::builder(
        registry.clone(),
        ClientConfig::from_value(json!({ "ttl": "5", "connection": "memory" }))?,
    )
    .logger(TracingLogger)
    .build()?;

    let tenant_cache = CacheLayer::builder(
        registry.clone(),
        ClientConfig::new(10, tenant_connection, ["X-Tenant"])?,
    )
    .logger(TracingLogger)
    .build()?;

    let counter = Arc::new(AtomicUsize::new(0));

    let catalog = Router::new()
        .route(
            "/catalog",
            get({
                let counter = counter.clone();
                move || {
                    let counter = counter.clone();
                    async move {
                        let value = counter.fetch_add(1, Ordering::SeqCst) + 1;
                        (
                            [("etag", format!("W/\"catalog-{value}\""))],
                            format!("Hello from origin call #{value}"),
                        )
                    }
                }
            }),
        )
        .layer(
            ServiceBuilder::new()
                .layer(HandleErrorLayer::new(handle_cache_error))
                .layer(catalog_cache),
        );

    let tenants = Router::new()
        .route(
            "/tenants",
            get({
                let counter = counter.clone();
                move |headers: HeaderMap| {
                    let counter = counter.clone();
                    async move {
                        let value = counter.fetch_add(1, Ordering::SeqCst) + 1;
                        let tenant = headers
                            .get("x-tenant")
                            .and_then(|value| value.to_str().ok())
                            .unwrap_or("anonymous")
                            .to_owned();
                        format!("Tenant {tenant}, origin call #{value}")
                    }
                }
            }),
        )
        .layer(
            ServiceBuilder::new()
                .layer(HandleErrorLayer::new(handle_cache_error))
                .layer(tenant_cache),
        );

    let app = catalog.merge(tenants);

    let addr: SocketAddr = "127.0.0.1:3000".parse()?;
    println!("Listening on http://{addr}");
    println!("Try: curl -i http://{addr}/catalog (twice), then with If-None-Match set to the returned ETag.");
    println!("Try: curl -H 'X-Tenant: acme' http://{addr}/tenants");

    axum::serve(tokio::net::TcpListener::bind(addr).await?, app).await?;
    Ok(())
}
