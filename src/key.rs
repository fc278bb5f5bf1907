//! Cache key derivation.

use std::sync::Arc;

use http::{HeaderMap, HeaderName, Method, Uri};
use uuid::Uuid;

use crate::error::CacheError;

/// Prefix shared by every key produced by [`CacheKeyBuilder`].
pub const KEY_PREFIX: &str = "http-cache:";

/// Turns GET requests into cache keys.
///
/// The key covers the request URI (path and query, verbatim) and the values
/// of the allow-listed headers, visited in allow-list order. Any header not
/// on the list is invisible to the key. The raw material is hashed into a
/// name-based UUID, so equal inputs always give equal keys across processes.
///
/// Cloning is cheap; the allow-list is shared.
#[derive(Clone, Debug, Default)]
pub struct CacheKeyBuilder {
    headers: Arc<[HeaderName]>,
}

impl CacheKeyBuilder {
    /// Builds a key builder from an already normalized allow-list
    /// (see [`crate::config::normalize_headers`]).
    pub fn new<I, S>(allow_list: I) -> Result<Self, CacheError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let headers = allow_list
            .into_iter()
            .map(|name| {
                HeaderName::from_bytes(name.as_ref().as_bytes()).map_err(|_| {
                    CacheError::Config(format!("invalid header name {:?}", name.as_ref()))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            headers: headers.into(),
        })
    }

    /// Returns the cache key for a request, or `None` when the method is not
    /// GET.
    pub fn build(&self, method: &Method, uri: &Uri, headers: &HeaderMap) -> Option<String> {
        if method != Method::GET {
            return None;
        }

        let raw = self.raw_key(uri, headers);
        Some(format!(
            "{}{}",
            KEY_PREFIX,
            Uuid::new_v5(&Uuid::NAMESPACE_URL, raw.as_bytes())
        ))
    }

    fn raw_key(&self, uri: &Uri, headers: &HeaderMap) -> String {
        let mut raw = uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/")
            .to_owned();

        let segments: Vec<String> = self
            .headers
            .iter()
            .filter_map(|name| {
                let values: Vec<_> = headers
                    .get_all(name)
                    .iter()
                    .map(|value| String::from_utf8_lossy(value.as_bytes()))
                    .collect();
                if values.is_empty() {
                    None
                } else {
                    Some(format!("{}:{}", name.as_str(), values.join(",")))
                }
            })
            .collect();

        raw.push_str("|headers:");
        raw.push_str(&segments.join("/"));
        raw
    }
}
