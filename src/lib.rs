//! HTTP caching middleware with RFC 2616 §13 semantics.
//!
//! `plug-cache` sits between clients and an origin handler inside a
//! middleware pipeline. For every request it picks one of the paths
//! invalidate, pass, reload, miss, fresh or stale-then-revalidate, records
//! the decision in the `X-Plug-Cache` response header, and finalizes the
//! outbound response (conditional-GET 304 short-circuit, HEAD body
//! stripping).
//!
//! Storage is a content-addressed two-tier store: response metadata lives in
//! a metastore keyed by canonical request URL with one variant per `Vary`
//! combination, and bodies live in an entitystore keyed by their SHA-1
//! digest, so identical bodies are stored once.
//!
//! # Example
//!
//! ```no_run
//! use plug_cache::prelude::*;
//! use std::sync::Arc;
//!
//! # async fn run() -> CacheResult<()> {
//! let cache = CacheMiddleware::new(
//!     Arc::new(MemoryMetaStore::new()),
//!     Arc::new(MemoryEntityStore::new()),
//! )
//! .with_config(CacheConfig::new().with_default_ttl(60));
//!
//! let request = HttpRequest::new("GET", "/articles");
//! let response = cache
//!     .handle(
//!         request,
//!         Box::new(|_req| {
//!             Box::pin(async {
//!                 Ok(HttpResponse::ok()
//!                     .with_header("Cache-Control", "public, max-age=300")
//!                     .with_body("hello"))
//!             })
//!         }),
//!     )
//!     .await?;
//!
//! assert_eq!(response.headers.get("X-Plug-Cache"), Some(&"miss".to_string()));
//! # Ok(())
//! # }
//! ```

pub mod conditional;
pub mod config;
pub mod control;
pub mod error;
pub mod extensions;
pub mod freshness;
pub mod headers;
pub mod http;
pub mod key;
pub mod middleware;
pub mod store;

pub use conditional::{not_modified, TRACE_HEADER};
pub use config::CacheConfig;
pub use control::CacheControl;
pub use error::{CacheError, CacheResult};
pub use extensions::{Extensions, ForcePass};
pub use freshness::{Clock, FreshnessExt, SystemClock};
pub use headers::HeaderMap;
pub use http::{HttpRequest, HttpResponse};
pub use key::{cache_key, KeyGenerator};
pub use middleware::{CacheMiddleware, Middleware, Next, Trace};
pub use store::{
    EntityStore, MemoryEntityStore, MemoryMetaStore, MetaStore, Storage, Variant,
};

/// Re-export of the commonly used types.
pub mod prelude {
    pub use crate::config::CacheConfig;
    pub use crate::error::{CacheError, CacheResult};
    pub use crate::extensions::ForcePass;
    pub use crate::freshness::FreshnessExt;
    pub use crate::http::{HttpRequest, HttpResponse};
    pub use crate::key::KeyGenerator;
    pub use crate::middleware::{CacheMiddleware, Middleware, Next};
    pub use crate::store::{MemoryEntityStore, MemoryMetaStore};
}
