//! Cache configuration.

/// Configuration for [`CacheMiddleware`](crate::middleware::CacheMiddleware).
///
/// The two stores are constructor arguments of the middleware; everything
/// tunable lives here as an immutable value.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Allow a request's `max-age` to shorten an entry's freshness.
    pub allow_revalidate: bool,

    /// Seconds of `s-maxage` assigned to responses that arrive with no TTL
    /// of their own and are not `must-revalidate`. Zero disables it.
    pub default_ttl: i64,

    /// Response headers whose presence demotes the response to `private`
    /// unless it is explicitly `public`.
    pub private_header_keys: Vec<String>,

    /// Headers stripped from responses before storage.
    pub ignored_headers: Vec<String>,

    /// Log per-request cache decisions at `debug` instead of `trace`.
    pub verbose: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            allow_revalidate: true,
            default_ttl: 0,
            private_header_keys: Vec::new(),
            ignored_headers: vec!["Set-Cookie".to_string()],
            verbose: false,
        }
    }
}

impl CacheConfig {
    /// Create a configuration with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set whether request `max-age` may shorten freshness.
    pub fn with_allow_revalidate(mut self, allow: bool) -> Self {
        self.allow_revalidate = allow;
        self
    }

    /// Set the default TTL in seconds.
    pub fn with_default_ttl(mut self, seconds: i64) -> Self {
        self.default_ttl = seconds;
        self
    }

    /// Set the private-forcing response headers.
    pub fn with_private_header_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.private_header_keys = keys.into_iter().map(Into::into).collect();
        self
    }

    /// Set the headers stripped before storage.
    pub fn with_ignored_headers<I, S>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ignored_headers = headers.into_iter().map(Into::into).collect();
        self
    }

    /// Set verbose decision logging.
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CacheConfig::default();
        assert!(config.allow_revalidate);
        assert_eq!(config.default_ttl, 0);
        assert!(config.private_header_keys.is_empty());
        assert_eq!(config.ignored_headers, vec!["Set-Cookie".to_string()]);
        assert!(!config.verbose);
    }

    #[test]
    fn test_builder() {
        let config = CacheConfig::new()
            .with_allow_revalidate(false)
            .with_default_ttl(120)
            .with_private_header_keys(["Set-Cookie", "X-Session"])
            .with_ignored_headers(Vec::<String>::new())
            .with_verbose(true);

        assert!(!config.allow_revalidate);
        assert_eq!(config.default_ttl, 120);
        assert_eq!(config.private_header_keys.len(), 2);
        assert!(config.ignored_headers.is_empty());
        assert!(config.verbose);
    }
}
