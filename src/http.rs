//! HTTP request and response types.
//!
//! These are the plain-data views the cache works on. The surrounding
//! pipeline owns parsing and transport; the cache only reads the request and
//! rewrites response status, headers and body on the outbound path.

use crate::extensions::Extensions;
use crate::headers::HeaderMap;
use bytes::Bytes;

/// The request view the cache reads from the pipeline.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    /// HTTP method, uppercase (`GET`, `POST`, ...)
    pub method: String,
    /// URL scheme, `http` or `https`
    pub scheme: String,
    /// Host name
    pub host: String,
    /// Port the request arrived on
    pub port: u16,
    /// Mount point of the application, usually empty
    pub script_name: String,
    /// Request path below the mount point
    pub path: String,
    /// Raw query string, without the leading `?`
    pub query_string: String,
    /// Request headers, in the order the pipeline presented them
    pub headers: HeaderMap,
    /// Typed per-request state ([`ForcePass`](crate::extensions::ForcePass),
    /// [`KeyGenerator`](crate::key::KeyGenerator))
    pub extensions: Extensions,
}

impl HttpRequest {
    /// Create a request for `method` and `path` with library defaults
    /// (`http://localhost:80`, empty query).
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            scheme: "http".to_string(),
            host: "localhost".to_string(),
            port: 80,
            script_name: String::new(),
            path: path.into(),
            query_string: String::new(),
            headers: HeaderMap::new(),
            extensions: Extensions::new(),
        }
    }

    /// Set the host.
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Set scheme and port together.
    pub fn with_scheme(mut self, scheme: impl Into<String>, port: u16) -> Self {
        self.scheme = scheme.into();
        self.port = port;
        self
    }

    /// Set the raw query string.
    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query_string = query.into();
        self
    }

    /// Add a request header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.append(name, value);
        self
    }

    /// True for methods the cache may answer from storage.
    pub fn is_safe(&self) -> bool {
        self.method == "GET" || self.method == "HEAD"
    }
}

/// An HTTP response: status, headers and an opaque body blob.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// Status code
    pub status: u16,
    /// Response headers
    pub headers: HeaderMap,
    /// Body bytes; bodies are whole blobs of known length
    pub body: Bytes,
}

impl HttpResponse {
    /// Create a response with the given status and no headers or body.
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    /// 200 OK.
    pub fn ok() -> Self {
        Self::new(200)
    }

    /// 304 Not Modified.
    pub fn not_modified() -> Self {
        Self::new(304)
    }

    /// Set the body.
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Set a header, replacing any existing value.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_defaults() {
        let req = HttpRequest::new("GET", "/");
        assert_eq!(req.method, "GET");
        assert_eq!(req.scheme, "http");
        assert_eq!(req.port, 80);
        assert!(req.is_safe());
        assert!(req.headers.is_empty());
    }

    #[test]
    fn test_safe_methods() {
        assert!(HttpRequest::new("GET", "/").is_safe());
        assert!(HttpRequest::new("HEAD", "/").is_safe());
        assert!(!HttpRequest::new("POST", "/").is_safe());
        assert!(!HttpRequest::new("DELETE", "/").is_safe());
    }

    #[test]
    fn test_response_builder() {
        let res = HttpResponse::ok()
            .with_header("Content-Type", "text/plain")
            .with_body("hello");

        assert_eq!(res.status, 200);
        assert_eq!(res.headers.get("content-type"), Some(&"text/plain".to_string()));
        assert_eq!(&res.body[..], b"hello");
    }
}
