//! The caching middleware and its request state machine.
//!
//! Each request is classified exactly once: unsafe methods invalidate and
//! pass, opted-out or `Expect` requests pass, client reloads refetch, and
//! everything else goes through lookup. A lookup hit is served when fresh
//! enough, revalidated with a conditional GET when stale, and refetched on a
//! miss. Every outbound response runs through the finalizer in
//! [`conditional`](crate::conditional).
//!
//! All store writes happen after the downstream handler has produced its
//! response, so a cancelled request never persists partial state.

use crate::conditional::{finalize, split_etags};
use crate::config::CacheConfig;
use crate::control::CacheControl;
use crate::error::CacheResult;
use crate::extensions::ForcePass;
use crate::freshness::{Clock, FreshnessExt, SystemClock};
use crate::http::{HttpRequest, HttpResponse};
use crate::store::{EntityStore, MetaStore, Storage};
use async_trait::async_trait;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, error, trace, warn};

/// The rest of the pipeline, ending in the origin handler.
pub type Next = Box<
    dyn FnOnce(HttpRequest) -> Pin<Box<dyn Future<Output = CacheResult<HttpResponse>> + Send>>
        + Send,
>;

/// A middleware processes a request and may invoke the rest of the chain.
#[async_trait]
pub trait Middleware: Send + Sync {
    /// Handle the request, optionally forwarding to `next`.
    async fn handle(&self, request: HttpRequest, next: Next) -> CacheResult<HttpResponse>;
}

/// One step the state machine took, in the order recorded. The joined list
/// is emitted as the `X-Plug-Cache` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trace {
    /// Unsafe method made stored variants stale
    Invalidate,
    /// Request was forwarded untouched
    Pass,
    /// Client demanded an end-to-end reload
    Reload,
    /// No usable stored variant
    Miss,
    /// Served from storage without contacting the origin
    Fresh,
    /// Stored variant needed revalidation
    Stale,
    /// Origin confirmed the stored variant with a 304
    Valid,
}

impl Trace {
    /// The label emitted in the trace header.
    pub fn as_str(&self) -> &'static str {
        match self {
            Trace::Invalidate => "invalidate",
            Trace::Pass => "pass",
            Trace::Reload => "reload",
            Trace::Miss => "miss",
            Trace::Fresh => "fresh",
            Trace::Stale => "stale",
            Trace::Valid => "valid",
        }
    }
}

impl std::fmt::Display for Trace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Headers a 304 may refresh on the stored entry it validates.
const VALIDATION_HEADERS: [&str; 5] = ["Date", "Expires", "Cache-Control", "ETag", "Last-Modified"];

/// Shared HTTP cache as a pipeline middleware.
pub struct CacheMiddleware {
    storage: Storage,
    config: CacheConfig,
    clock: Arc<dyn Clock>,
}

impl CacheMiddleware {
    /// Create a cache over the given metastore and entitystore with default
    /// configuration and the system clock.
    pub fn new(meta: Arc<dyn MetaStore>, entity: Arc<dyn EntityStore>) -> Self {
        Self {
            storage: Storage::new(meta, entity),
            config: CacheConfig::default(),
            clock: Arc::new(SystemClock),
        }
    }

    /// Replace the configuration.
    pub fn with_config(mut self, config: CacheConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the clock. Tests install fixed clocks here.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Does the client demand an end-to-end reload?
    fn wants_reload(&self, request: &HttpRequest) -> bool {
        let cc = CacheControl::parse_opt(request.headers.get("Cache-Control").map(String::as_str));
        cc.is_no_cache() || request.headers.get("Pragma").map(String::as_str) == Some("no-cache")
    }

    /// Is a stored entry fresh enough to serve without revalidation?
    ///
    /// A fresh entry is enough unless revalidation is allowed and the
    /// request carries its own `max-age`, in which case the entry's age
    /// must stay below it.
    fn fresh_enough(
        &self,
        entry: &HttpResponse,
        request: &HttpRequest,
        now: SystemTime,
    ) -> CacheResult<bool> {
        if !entry.is_fresh(now)? {
            return Ok(false);
        }
        if !self.config.allow_revalidate {
            return Ok(true);
        }
        let cc = CacheControl::parse_opt(request.headers.get("Cache-Control").map(String::as_str));
        match cc.max_age() {
            Some(max_age) => Ok(max_age > entry.age(now)?),
            None => Ok(true),
        }
    }

    async fn lookup_entry(
        &self,
        request: HttpRequest,
        next: Next,
        trace: &mut Vec<Trace>,
        now: SystemTime,
    ) -> CacheResult<HttpResponse> {
        let entry = match self.storage.lookup(&request).await {
            Ok(entry) => entry,
            Err(error) => {
                error!(error = %error, "cache lookup failed, passing request through");
                None
            }
        };

        let Some(entry) = entry else {
            trace.push(Trace::Miss);
            return self.fetch(request, next, now).await;
        };

        match self.fresh_enough(&entry, &request, now) {
            Ok(true) => {
                trace.push(Trace::Fresh);
                Ok(self.serve_fresh(entry, now))
            }
            Ok(false) => {
                trace.push(Trace::Stale);
                self.validate(entry, request, next, trace, now).await
            }
            Err(error) => {
                warn!(error = %error, "stored entry has unparseable dates, refetching");
                trace.push(Trace::Miss);
                self.fetch(request, next, now).await
            }
        }
    }

    /// Serve a stored entry, stamping its current age.
    fn serve_fresh(&self, mut entry: HttpResponse, now: SystemTime) -> HttpResponse {
        if let Ok(age) = entry.age(now) {
            entry.headers.insert("Age", age.to_string());
        }
        entry
    }

    /// Revalidate a stale entry with a conditional GET.
    async fn validate(
        &self,
        entry: HttpResponse,
        request: HttpRequest,
        next: Next,
        trace: &mut Vec<Trace>,
        now: SystemTime,
    ) -> CacheResult<HttpResponse> {
        let cached_etags: Vec<String> = entry
            .headers
            .get("ETag")
            .map(|value| split_etags(value))
            .unwrap_or_default();
        let request_etags: Vec<String> = request
            .headers
            .get_all("If-None-Match")
            .into_iter()
            .flat_map(|value| split_etags(value))
            .collect();

        // The origin sees both validator sets, so it can recognize a
        // client-held variant we never stored.
        let mut etags = cached_etags.clone();
        for etag in &request_etags {
            if !etags.contains(etag) {
                etags.push(etag.clone());
            }
        }

        let mut forward = request.clone();
        forward.method = "GET".to_string();
        forward.headers.remove_all("If-None-Match");
        if !etags.is_empty() {
            forward.headers.insert("If-None-Match", etags.join(", "));
        }
        match entry.headers.get("Last-Modified") {
            Some(last_modified) => {
                forward
                    .headers
                    .insert("If-Modified-Since", last_modified.clone());
            }
            None => {
                forward.headers.remove_all("If-Modified-Since");
            }
        }

        let origin = next(forward).await?;
        if origin.status == 304 {
            trace.push(Trace::Valid);

            // A 304 naming an etag the client sent but we never stored
            // validated the client's variant, not ours.
            let origin_etag = origin.headers.get("ETag").cloned();
            if let Some(etag) = origin_etag {
                if request_etags.contains(&etag) && !cached_etags.contains(&etag) {
                    return Ok(origin);
                }
            }

            let mut merged = entry;
            for name in VALIDATION_HEADERS {
                if let Some(value) = origin.headers.get(name) {
                    merged.headers.insert(name, value.clone());
                }
            }
            return self.store_if_cacheable(&request, merged, now).await;
        }

        // Anything else supersedes the stored entry, like a fresh miss.
        self.store_if_cacheable(&request, origin, now).await
    }

    /// Forward to the origin as a GET and cache the result when allowed.
    async fn fetch(
        &self,
        request: HttpRequest,
        next: Next,
        now: SystemTime,
    ) -> CacheResult<HttpResponse> {
        let mut forward = request.clone();
        // HEAD still fetches as GET so the stored entry has a body.
        forward.method = "GET".to_string();

        let mut response = next(forward).await?;
        self.clean_cache_control(&mut response, now);
        self.store_if_cacheable(&request, response, now).await
    }

    /// Rewrite the fetched response's `Cache-Control` per configuration.
    fn clean_cache_control(&self, response: &mut HttpResponse, now: SystemTime) {
        let mut cc = response.cache_control();

        let forced_private = self
            .config
            .private_header_keys
            .iter()
            .any(|name| response.headers.contains(name));

        if forced_private && !cc.is_public() {
            cc.insert_flag("private");
        } else if self.config.default_ttl > 0 && !cc.is_must_revalidate() {
            match response.ttl(now) {
                Ok(None) => {
                    let age = response.age(now).unwrap_or(0);
                    cc.insert_value("s-maxage", (age + self.config.default_ttl).to_string());
                }
                Ok(Some(_)) => {}
                Err(error) => {
                    warn!(error = %error, "response dates unparseable, not assigning default ttl");
                }
            }
        }

        let serialized = cc.to_header_value();
        if serialized.is_empty() {
            response.headers.remove_all("Cache-Control");
        } else {
            response.headers.insert("Cache-Control", serialized);
        }
    }

    async fn store_if_cacheable(
        &self,
        request: &HttpRequest,
        response: HttpResponse,
        now: SystemTime,
    ) -> CacheResult<HttpResponse> {
        match response.is_cacheable(now) {
            Ok(true) => Ok(self.store(request, response, now).await),
            Ok(false) => Ok(response),
            Err(error) => {
                warn!(error = %error, "response dates unparseable, not caching");
                Ok(response)
            }
        }
    }

    /// Strip ignored headers, persist, and stamp the stored age.
    ///
    /// A backend failure is logged and the response served unstored.
    async fn store(
        &self,
        request: &HttpRequest,
        mut response: HttpResponse,
        now: SystemTime,
    ) -> HttpResponse {
        for name in &self.config.ignored_headers {
            response.headers.remove_all(name);
        }
        match self.storage.store_response(request, &mut response).await {
            Ok(()) => {
                if let Ok(age) = response.age(now) {
                    response.headers.insert("Age", age.to_string());
                }
            }
            Err(error) => {
                error!(error = %error, "cache store failed, serving response unstored");
            }
        }
        response
    }
}

#[async_trait]
impl Middleware for CacheMiddleware {
    async fn handle(&self, request: HttpRequest, next: Next) -> CacheResult<HttpResponse> {
        let method = request.method.clone();
        let client_headers = request.headers.clone();
        let now = self.clock.now();
        let mut steps: Vec<Trace> = Vec::new();

        let response = if !request.is_safe() {
            steps.push(Trace::Invalidate);
            if let Err(error) = self.storage.invalidate(&request, now).await {
                error!(error = %error, "invalidate failed");
            }
            steps.push(Trace::Pass);
            next(request).await?
        } else if request.extensions.get::<ForcePass>().is_some_and(|f| f.0) {
            steps.push(Trace::Pass);
            next(request).await?
        } else if request.headers.contains("Expect") {
            steps.push(Trace::Pass);
            next(request).await?
        } else if self.wants_reload(&request) {
            steps.push(Trace::Reload);
            self.fetch(request, next, now).await?
        } else {
            self.lookup_entry(request, next, &mut steps, now).await?
        };

        let labels = steps
            .iter()
            .map(Trace::as_str)
            .collect::<Vec<_>>()
            .join(", ");
        if self.config.verbose {
            debug!(method = %method, outcome = %labels, "cache decision");
        } else {
            trace!(method = %method, outcome = %labels, "cache decision");
        }
        Ok(finalize(&method, &client_headers, response, &labels))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryEntityStore, MemoryMetaStore};

    fn middleware() -> CacheMiddleware {
        CacheMiddleware::new(
            Arc::new(MemoryMetaStore::new()),
            Arc::new(MemoryEntityStore::new()),
        )
    }

    #[test]
    fn test_trace_labels() {
        assert_eq!(Trace::Invalidate.as_str(), "invalidate");
        assert_eq!(Trace::Valid.to_string(), "valid");
    }

    #[test]
    fn test_wants_reload() {
        let mw = middleware();

        let plain = HttpRequest::new("GET", "/");
        assert!(!mw.wants_reload(&plain));

        let no_cache = HttpRequest::new("GET", "/").with_header("Cache-Control", "no-cache");
        assert!(mw.wants_reload(&no_cache));

        let pragma = HttpRequest::new("GET", "/").with_header("Pragma", "no-cache");
        assert!(mw.wants_reload(&pragma));

        let other = HttpRequest::new("GET", "/").with_header("Cache-Control", "max-age=0");
        assert!(!mw.wants_reload(&other));
    }

    #[test]
    fn test_fresh_enough_without_request_max_age() {
        let mw = middleware();
        let now = SystemTime::now();
        let entry = HttpResponse::ok()
            .with_header("Cache-Control", "public, max-age=60")
            .with_header("Age", "10");

        let request = HttpRequest::new("GET", "/");
        assert!(mw.fresh_enough(&entry, &request, now).unwrap());
    }

    #[test]
    fn test_fresh_enough_shortened_by_request() {
        let mw = middleware();
        let now = SystemTime::now();
        let entry = HttpResponse::ok()
            .with_header("Cache-Control", "public, max-age=60")
            .with_header("Age", "10");

        let strict = HttpRequest::new("GET", "/").with_header("Cache-Control", "max-age=5");
        assert!(!mw.fresh_enough(&entry, &strict, now).unwrap());

        let loose = HttpRequest::new("GET", "/").with_header("Cache-Control", "max-age=30");
        assert!(mw.fresh_enough(&entry, &loose, now).unwrap());
    }

    #[test]
    fn test_fresh_enough_ignores_request_when_revalidate_disallowed() {
        let mw = middleware().with_config(CacheConfig::new().with_allow_revalidate(false));
        let now = SystemTime::now();
        let entry = HttpResponse::ok()
            .with_header("Cache-Control", "public, max-age=60")
            .with_header("Age", "10");

        let strict = HttpRequest::new("GET", "/").with_header("Cache-Control", "max-age=5");
        assert!(mw.fresh_enough(&entry, &strict, now).unwrap());
    }

    #[test]
    fn test_stale_entry_never_fresh_enough() {
        let mw = middleware();
        let now = SystemTime::now();
        let entry = HttpResponse::ok()
            .with_header("Cache-Control", "public, max-age=60")
            .with_header("Age", "61");

        let request = HttpRequest::new("GET", "/");
        assert!(!mw.fresh_enough(&entry, &request, now).unwrap());
    }

    #[test]
    fn test_clean_cache_control_forces_private() {
        let mw = middleware()
            .with_config(CacheConfig::new().with_private_header_keys(["X-Session-Token"]));
        let now = SystemTime::now();

        let mut response = HttpResponse::ok()
            .with_header("X-Session-Token", "abc")
            .with_header("Cache-Control", "max-age=60");
        mw.clean_cache_control(&mut response, now);
        assert_eq!(
            response.headers.get("Cache-Control"),
            Some(&"private, max-age=60".to_string())
        );

        // Explicit public wins over the trigger header.
        let mut public = HttpResponse::ok()
            .with_header("X-Session-Token", "abc")
            .with_header("Cache-Control", "public, max-age=60");
        mw.clean_cache_control(&mut public, now);
        assert_eq!(
            public.headers.get("Cache-Control"),
            Some(&"public, max-age=60".to_string())
        );
    }

    #[test]
    fn test_clean_cache_control_assigns_default_ttl() {
        let mw = middleware().with_config(CacheConfig::new().with_default_ttl(120));
        let now = SystemTime::now();

        let mut response = HttpResponse::ok();
        mw.clean_cache_control(&mut response, now);
        assert_eq!(
            response.headers.get("Cache-Control"),
            Some(&"s-maxage=120".to_string())
        );

        // A response with its own TTL keeps it.
        let mut own_ttl = HttpResponse::ok().with_header("Cache-Control", "max-age=5");
        mw.clean_cache_control(&mut own_ttl, now);
        assert_eq!(
            own_ttl.headers.get("Cache-Control"),
            Some(&"max-age=5".to_string())
        );

        // must-revalidate opts out of the default.
        let mut strict = HttpResponse::ok().with_header("Cache-Control", "must-revalidate");
        mw.clean_cache_control(&mut strict, now);
        assert_eq!(
            strict.headers.get("Cache-Control"),
            Some(&"must-revalidate".to_string())
        );
    }
}
