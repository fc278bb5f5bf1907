//! Preparing requests for the origin.

use http::header::{
    ACCEPT_ENCODING, CACHE_CONTROL, IF_MATCH, IF_MODIFIED_SINCE, IF_NONE_MATCH,
    IF_UNMODIFIED_SINCE,
};
use http::{HeaderMap, HeaderName, Request};

/// Headers removed before a request is forwarded. With them the origin could
/// answer 304 itself or compress the body, and the cache would store a
/// response that only suits one client.
pub const STRIPPED_HEADERS: [HeaderName; 6] = [
    IF_MODIFIED_SINCE,
    IF_UNMODIFIED_SINCE,
    IF_NONE_MATCH,
    IF_MATCH,
    CACHE_CONTROL,
    ACCEPT_ENCODING,
];

/// Splits a request into the version sent to the origin and the untouched
/// headers the client sent, which freshness evaluation needs later.
pub fn sanitize<B>(mut req: Request<B>) -> (Request<B>, HeaderMap) {
    let original = req.headers().clone();
    strip_conditional_headers(req.headers_mut());
    (req, original)
}

pub fn strip_conditional_headers(headers: &mut HeaderMap) {
    for name in &STRIPPED_HEADERS {
        headers.remove(name);
    }
}
