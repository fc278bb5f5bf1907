//! Conditional GET evaluation.
//!
//! Decides whether the client already holds the representation the cache is
//! about to send, in which case the body can be replaced with an empty
//! `304 Not Modified`. The rules follow RFC 7232:
//!
//! - `Cache-Control: no-cache` on the request disables the shortcut;
//! - `If-None-Match` wins over `If-Modified-Since` when both are present and
//!   is compared with the weak comparison function;
//! - `If-Modified-Since` matches when the response's `Last-Modified` is not
//!   later than the client's date.

use std::time::SystemTime;

use http::header::{CACHE_CONTROL, ETAG, IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED};
use http::HeaderMap;

/// Returns `true` when `request` carries validators that match `response`.
pub fn is_fresh(request: &HeaderMap, response: &HeaderMap) -> bool {
    let none_match = header_str(request, &IF_NONE_MATCH);
    let modified_since = header_str(request, &IF_MODIFIED_SINCE);

    if none_match.is_none() && modified_since.is_none() {
        return false;
    }

    if requests_no_cache(request) {
        return false;
    }

    if let Some(none_match) = none_match {
        return etag_matches(none_match, header_str(response, &ETAG));
    }

    match (modified_since, header_str(response, &LAST_MODIFIED)) {
        (Some(since), Some(last_modified)) => not_modified_since(since, last_modified),
        _ => false,
    }
}

fn etag_matches(none_match: &str, etag: Option<&str>) -> bool {
    if none_match.trim() == "*" {
        return true;
    }

    let Some(etag) = etag else {
        return false;
    };
    let current = opaque_tag(etag);

    none_match
        .split(',')
        .map(str::trim)
        .filter(|candidate| !candidate.is_empty())
        .any(|candidate| opaque_tag(candidate) == current)
}

fn opaque_tag(tag: &str) -> &str {
    let tag = tag.trim();
    tag.strip_prefix("W/").unwrap_or(tag)
}

fn not_modified_since(since: &str, last_modified: &str) -> bool {
    match (parse_date(since), parse_date(last_modified)) {
        (Some(since), Some(last_modified)) => last_modified <= since,
        _ => false,
    }
}

fn parse_date(value: &str) -> Option<SystemTime> {
    httpdate::parse_http_date(value.trim()).ok()
}

fn requests_no_cache(request: &HeaderMap) -> bool {
    request
        .get_all(CACHE_CONTROL)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .any(|token| token.trim().eq_ignore_ascii_case("no-cache"))
}

fn header_str<'a>(headers: &'a HeaderMap, name: &http::HeaderName) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.trim().is_empty())
}
