//! Canonical cache key derivation.
//!
//! Two requests that name the same resource must produce the same key, so
//! the query string is normalized: pairs are decoded, sorted, and re-encoded
//! before joining. Default ports are elided. A caller-supplied generator in
//! the request's extensions overrides the whole derivation.

use crate::http::HttpRequest;
use percent_encoding::percent_decode_str;
use std::sync::Arc;
use url::form_urlencoded;

/// Per-request override for key derivation.
///
/// Attach to a request's extensions to group cache entries by something
/// other than the URL (session, tenant, ...).
#[derive(Clone)]
pub struct KeyGenerator(pub Arc<dyn Fn(&HttpRequest) -> String + Send + Sync>);

impl KeyGenerator {
    /// Wrap a key-derivation function.
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&HttpRequest) -> String + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }
}

impl std::fmt::Debug for KeyGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("KeyGenerator")
    }
}

/// Derive the cache key for a request.
pub fn cache_key(request: &HttpRequest) -> String {
    if let Some(generator) = request.extensions.get::<KeyGenerator>() {
        return (generator.0)(request);
    }
    default_key(request)
}

fn default_key(request: &HttpRequest) -> String {
    let mut key = format!("{}://{}", request.scheme, request.host);

    let default_port = matches!(
        (request.scheme.as_str(), request.port),
        ("http", 80) | ("https", 443)
    );
    if !default_port && (request.scheme == "http" || request.scheme == "https") {
        key.push(':');
        key.push_str(&request.port.to_string());
    }

    // A bare root path contributes nothing, so `GET /` and `GET /?a=1` key
    // under the naked authority.
    if !(request.script_name.is_empty() && request.path == "/") {
        key.push_str(&request.script_name);
        key.push_str(&request.path);
    }

    if !request.query_string.is_empty() {
        key.push('?');
        key.push_str(&normalize_query(&request.query_string));
    }
    key
}

/// Decode, sort and re-encode a query string.
///
/// Pairs split on `&` or `;` (with optional trailing spaces) and on the
/// first `=`; a value may be absent entirely, which sorts before an empty
/// one. Sorting happens on the decoded pair so percent-encoding variations
/// of the same parameter collapse.
fn normalize_query(query: &str) -> String {
    let mut pairs: Vec<(String, Option<String>)> = Vec::new();
    for piece in query.split(['&', ';']) {
        let piece = piece.trim_start_matches(' ');
        if piece.is_empty() {
            continue;
        }
        match piece.split_once('=') {
            Some((name, value)) => pairs.push((decode(name), Some(decode(value)))),
            None => pairs.push((decode(piece), None)),
        }
    }
    pairs.sort();
    pairs
        .iter()
        .map(|(name, value)| match value {
            Some(value) => format!("{}={}", encode(name), encode(value)),
            None => encode(name),
        })
        .collect::<Vec<_>>()
        .join("&")
}

fn decode(component: &str) -> String {
    let with_spaces = component.replace('+', " ");
    percent_decode_str(&with_spaces)
        .decode_utf8_lossy()
        .into_owned()
}

fn encode(component: &str) -> String {
    form_urlencoded::byte_serialize(component.as_bytes()).collect()
}
