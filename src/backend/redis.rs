use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, ConnectionAddr, ConnectionInfo, RedisConnectionInfo};

use super::CacheBackend;
use crate::config::RedisOptions;
use crate::error::CacheError;

const DEFAULT_PORT: u16 = 6379;
const SCAN_BATCH: usize = 256;

/// A shared [`CacheBackend`] stored in Redis.
///
/// Expiry is delegated to Redis through `SET ... EX`. Every key is prefixed
/// with a namespace so that [`CacheBackend::flush`] only removes entries
/// written by this backend.
///
/// The [`ConnectionManager`] multiplexes one connection and reconnects on
/// failure; each call works on its own clone of it.
#[derive(Clone)]
pub struct RedisBackend {
    connection: ConnectionManager,
    namespace: String,
}

impl RedisBackend {
    pub fn new(connection: ConnectionManager) -> Self {
        Self {
            connection,
            namespace: "gateway_http_cache".to_owned(),
        }
    }

    /// Opens a managed connection described by driver options.
    pub async fn connect(options: &RedisOptions) -> Result<Self, CacheError> {
        let client = Client::open(connection_info(options)?)?;
        let manager = client.get_connection_manager().await?;
        let backend = Self::new(manager);
        Ok(match &options.namespace {
            Some(namespace) => backend.with_namespace(namespace.clone()),
            None => backend,
        })
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    fn make_key(&self, key: &str) -> String {
        format!("{}:{}", self.namespace, key)
    }
}

#[async_trait]
impl CacheBackend for RedisBackend {
    async fn fetch(&self, key: &str) -> Result<Option<Bytes>, CacheError> {
        let mut conn = self.connection.clone();
        let data: Option<Vec<u8>> = conn.get(self.make_key(key)).await?;
        Ok(data.map(Bytes::from))
    }

    async fn save(&self, key: String, value: Bytes, ttl: Duration) -> Result<(), CacheError> {
        let ttl_secs = ttl.as_secs();
        if ttl_secs == 0 {
            return Ok(());
        }

        let mut conn = self.connection.clone();
        let _: () = conn
            .set_ex(self.make_key(&key), value.as_ref(), ttl_secs)
            .await?;
        Ok(())
    }

    async fn flush(&self) -> Result<(), CacheError> {
        let pattern = format!("{}:*", self.namespace);
        let mut conn = self.connection.clone();
        let mut cursor: u64 = 0;

        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await?;

            if !keys.is_empty() {
                let _: () = conn.del(keys).await?;
            }

            if next == 0 {
                break;
            }
            cursor = next;
        }

        Ok(())
    }
}

fn connection_info(options: &RedisOptions) -> Result<ConnectionInfo, CacheError> {
    let (host, port) = split_host_port(&options.addr)?;

    Ok(ConnectionInfo {
        addr: ConnectionAddr::Tcp(host, port),
        redis: RedisConnectionInfo {
            db: options.db,
            username: options.user.clone(),
            password: options.pass.clone(),
            ..Default::default()
        },
    })
}

/// Splits `host[:port]`, accepting bracketed IPv6 literals (`[::1]:6379`).
fn split_host_port(addr: &str) -> Result<(String, u16), CacheError> {
    let invalid_port = || CacheError::Config(format!("invalid redis port in {addr}"));

    if let Some(rest) = addr.strip_prefix('[') {
        let (host, tail) = rest
            .split_once(']')
            .ok_or_else(|| CacheError::Config(format!("unterminated IPv6 address in {addr}")))?;
        let port = match tail {
            "" => DEFAULT_PORT,
            tail => tail
                .strip_prefix(':')
                .and_then(|port| port.parse::<u16>().ok())
                .ok_or_else(invalid_port)?,
        };
        return Ok((host.to_owned(), port));
    }

    match addr.rsplit_once(':') {
        // A bare IPv6 literal has several colons and no port.
        Some((host, _)) if host.contains(':') => Ok((addr.to_owned(), DEFAULT_PORT)),
        Some((host, port)) => Ok((host.to_owned(), port.parse().map_err(|_| invalid_port())?)),
        None => Ok((addr.to_owned(), DEFAULT_PORT)),
    }
}
