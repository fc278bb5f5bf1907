//! Response capture and serialization.
//!
//! A [`CacheEntry`] is a fully buffered response. Its body is a [`Bytes`]
//! handle, so the same captured body can be given to the caller and to the
//! store without either consuming it. A [`CacheCodec`] turns entries into
//! the opaque bytes a backend keeps.

use std::io::Write;

use bytes::Bytes;
use http::response::Parts;
use http::{HeaderName, HeaderValue, Response, StatusCode, Version};
use http_body_util::Full;
use serde::{Deserialize, Serialize};

use crate::error::CacheError;

/// Cached response payload captured by the cache layer.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub status: StatusCode,
    pub version: Version,
    pub headers: Vec<(String, Vec<u8>)>,
    pub body: Bytes,
}

impl CacheEntry {
    pub fn new(
        status: StatusCode,
        version: Version,
        headers: Vec<(String, Vec<u8>)>,
        body: Bytes,
    ) -> Self {
        Self {
            status,
            version,
            headers,
            body,
        }
    }

    /// Captures a response from its parts and collected body.
    ///
    /// Every header is kept, repeated names included.
    pub fn from_parts(parts: &Parts, body: Bytes) -> Self {
        let headers = parts
            .headers
            .iter()
            .map(|(name, value)| (name.as_str().to_owned(), value.as_bytes().to_vec()))
            .collect();
        Self::new(parts.status, parts.version, headers, body)
    }

    /// Converts the entry back into an `http::Response`.
    pub fn into_response(self) -> Response<Full<Bytes>> {
        let mut response = Response::new(Full::from(self.body));
        *response.status_mut() = self.status;
        *response.version_mut() = self.version;

        let headers = response.headers_mut();
        for (name, value) in self.headers {
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_bytes(&value),
            ) {
                headers.append(name, value);
            }
        }

        response
    }
}

/// Trait representing a serialization strategy for cached entries.
pub trait CacheCodec: Send + Sync + Clone + 'static {
    fn encode(&self, entry: &CacheEntry) -> Result<Vec<u8>, CacheError>;
    fn decode(&self, bytes: &[u8]) -> Result<CacheEntry, CacheError>;
}

/// Default [`CacheCodec`] implementation backed by `bincode`.
#[derive(Clone, Copy, Debug, Default)]
pub struct BincodeCodec;

#[derive(Serialize, Deserialize)]
struct StoredEntry {
    status: u16,
    version: u8,
    headers: Vec<(String, Vec<u8>)>,
    body: Vec<u8>,
}

impl CacheCodec for BincodeCodec {
    fn encode(&self, entry: &CacheEntry) -> Result<Vec<u8>, CacheError> {
        let stored = StoredEntry {
            status: entry.status.as_u16(),
            version: version_to_u8(entry.version),
            headers: entry.headers.clone(),
            body: entry.body.to_vec(),
        };

        bincode::serialize(&stored).map_err(|err| CacheError::Codec(err.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> Result<CacheEntry, CacheError> {
        let stored: StoredEntry =
            bincode::deserialize(bytes).map_err(|err| CacheError::Codec(err.to_string()))?;
        Ok(CacheEntry::new(
            StatusCode::from_u16(stored.status).map_err(|err| CacheError::Codec(err.to_string()))?,
            version_from_u8(stored.version)?,
            stored.headers,
            Bytes::from(stored.body),
        ))
    }
}

/// [`CacheCodec`] that stores the response as an HTTP/1.1 message: status
/// line, header lines, blank line, raw body.
///
/// Entries stay human-readable in a shared store (`redis-cli GET` shows the
/// response as it went over the wire). The version is always written as
/// HTTP/1.1 and the body is whatever follows the header block, so framing
/// headers such as `Content-Length` are carried but never interpreted.
#[derive(Clone, Copy, Debug, Default)]
pub struct Http1Codec;

impl CacheCodec for Http1Codec {
    fn encode(&self, entry: &CacheEntry) -> Result<Vec<u8>, CacheError> {
        let mut out = Vec::with_capacity(entry.body.len() + 64 * (entry.headers.len() + 1));
        write!(
            out,
            "HTTP/1.1 {} {}\r\n",
            entry.status.as_u16(),
            entry.status.canonical_reason().unwrap_or("")
        )
        .map_err(|err| CacheError::Codec(err.to_string()))?;

        for (name, value) in &entry.headers {
            if value.iter().any(|b| matches!(b, b'\r' | b'\n')) {
                return Err(CacheError::Codec(format!("header {name} contains a line break")));
            }
            out.extend_from_slice(name.as_bytes());
            out.extend_from_slice(b": ");
            out.extend_from_slice(value);
            out.extend_from_slice(b"\r\n");
        }
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(&entry.body);
        Ok(out)
    }

    fn decode(&self, bytes: &[u8]) -> Result<CacheEntry, CacheError> {
        // One slot per line of the head, so every header `encode` wrote fits.
        let head_end = bytes
            .windows(4)
            .position(|window| window == b"\r\n\r\n")
            .ok_or_else(|| CacheError::Codec("truncated response head".into()))?;
        let lines = bytes[..head_end]
            .windows(2)
            .filter(|window| *window == b"\r\n")
            .count();
        let mut slots = vec![httparse::EMPTY_HEADER; lines + 1];
        let mut parsed = httparse::Response::new(&mut slots);

        let head_len = match parsed.parse(bytes) {
            Ok(httparse::Status::Complete(len)) => len,
            Ok(httparse::Status::Partial) => {
                return Err(CacheError::Codec("truncated response head".into()))
            }
            Err(err) => return Err(CacheError::Codec(err.to_string())),
        };

        let code = parsed
            .code
            .ok_or_else(|| CacheError::Codec("missing status code".into()))?;
        let status =
            StatusCode::from_u16(code).map_err(|err| CacheError::Codec(err.to_string()))?;
        let version = match parsed.version {
            Some(0) => Version::HTTP_10,
            _ => Version::HTTP_11,
        };
        let headers = parsed
            .headers
            .iter()
            .map(|header| (header.name.to_ascii_lowercase(), header.value.to_vec()))
            .collect();

        Ok(CacheEntry::new(
            status,
            version,
            headers,
            Bytes::copy_from_slice(&bytes[head_len..]),
        ))
    }
}

fn version_to_u8(version: Version) -> u8 {
    match version {
        Version::HTTP_09 => 0,
        Version::HTTP_10 => 1,
        Version::HTTP_11 => 2,
        Version::HTTP_2 => 3,
        Version::HTTP_3 => 4,
        _ => 2,
    }
}

fn version_from_u8(value: u8) -> Result<Version, CacheError> {
    match value {
        0 => Ok(Version::HTTP_09),
        1 => Ok(Version::HTTP_10),
        2 => Ok(Version::HTTP_11),
        3 => Ok(Version::HTTP_2),
        4 => Ok(Version::HTTP_3),
        _ => Err(CacheError::Codec("unknown HTTP version".into())),
    }
}
