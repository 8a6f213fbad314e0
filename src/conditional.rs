//! Conditional-request evaluation and the outbound finalizer.
//!
//! Every response leaving the middleware passes through [`finalize`]: the
//! trace is stamped into `X-Plug-Cache`, a conditional GET or HEAD that the
//! staged response satisfies collapses to 304 with the entity headers
//! stripped, and HEAD responses lose their body.

use crate::headers::HeaderMap;
use crate::http::HttpResponse;
use bytes::Bytes;

/// Trace header written on every response.
pub const TRACE_HEADER: &str = "X-Plug-Cache";

/// Entity headers a 304 must not carry (RFC 2616 §10.3.5).
const NOT_MODIFIED_OMIT_HEADERS: [&str; 7] = [
    "Allow",
    "Content-Encoding",
    "Content-Language",
    "Content-Length",
    "Content-MD5",
    "Content-Type",
    "Last-Modified",
];

/// Split an etag list header on commas, trimming whitespace.
pub fn split_etags(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|etag| !etag.is_empty())
        .map(str::to_string)
        .collect()
}

/// Does the staged response satisfy the request's conditional headers?
///
/// The request headers are scanned in order; whichever of `If-None-Match`
/// or `If-Modified-Since` appears first decides the evaluation mode:
///
/// - `If-None-Match` first: the response's `ETag` must be listed (or `*`
///   given); when the request also carries `If-Modified-Since`, that must
///   additionally equal the response's `Last-Modified` verbatim. A response
///   without an `ETag` matches only `*`.
/// - `If-Modified-Since` first: matches iff it equals the response's
///   `Last-Modified` verbatim.
pub fn not_modified(request_headers: &HeaderMap, response: &HttpResponse) -> bool {
    for (name, value) in request_headers.iter() {
        if name.eq_ignore_ascii_case("If-None-Match") {
            let req_etags = split_etags(value);
            let wildcard = req_etags.iter().any(|etag| etag == "*");

            let Some(etag) = response.headers.get("ETag") else {
                return wildcard;
            };
            let etag_matches = wildcard || req_etags.contains(etag);

            return match request_headers.get("If-Modified-Since") {
                None => etag_matches,
                Some(since) => {
                    etag_matches && response.headers.get("Last-Modified") == Some(since)
                }
            };
        }
        if name.eq_ignore_ascii_case("If-Modified-Since") {
            return response.headers.get("Last-Modified") == Some(value);
        }
    }
    false
}

/// Normalize the staged response just before it is sent.
pub fn finalize(
    method: &str,
    request_headers: &HeaderMap,
    mut response: HttpResponse,
    trace: &str,
) -> HttpResponse {
    let stamped = match response.headers.get(TRACE_HEADER) {
        Some(existing) if !existing.is_empty() => format!("{}, {}", existing, trace),
        _ => trace.to_string(),
    };
    response.headers.insert(TRACE_HEADER, stamped);

    if (method == "GET" || method == "HEAD") && not_modified(request_headers, &response) {
        for header in NOT_MODIFIED_OMIT_HEADERS {
            response.headers.remove_all(header);
        }
        response.status = 304;
        response.body = Bytes::new();
    } else if method == "HEAD" {
        response.body = Bytes::new();
    }
    response
}
