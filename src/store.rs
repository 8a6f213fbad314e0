//! The content-addressed two-tier store.
//!
//! Response metadata and response bodies live apart: the metastore maps a
//! cache key to an ordered list of variants (persisted request headers plus
//! persisted response headers), while the entitystore maps a SHA-1 digest to
//! the body bytes. Identical bodies are stored once regardless of how many
//! URLs or variants point at them.
//!
//! Both tiers are abstract key/value backends; [`Storage`] layers the
//! variant matching, digest bookkeeping and per-key write atomicity on top.

use crate::error::{CacheError, CacheResult};
use crate::freshness::FreshnessExt;
use crate::headers::HeaderMap;
use crate::http::{HttpRequest, HttpResponse};
use crate::key::cache_key;
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::Mutex;
use tracing::warn;

/// Persisted-response header carrying the stringified status code.
pub const X_STATUS: &str = "X-Status";

/// Persisted-response header pointing into the entitystore.
pub const X_CONTENT_DIGEST: &str = "X-Content-Digest";

/// Hex-uppercase SHA-1 of a body, the entitystore key.
pub fn body_digest(body: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(body);
    hex::encode_upper(hasher.finalize())
}

/// One stored variant of a cached URL.
///
/// `request_headers` are the headers of the request that produced the
/// response, verbatim and in order; `response_headers` are the response
/// headers plus [`X_STATUS`] and [`X_CONTENT_DIGEST`], minus `Age`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variant {
    /// Headers of the request that produced this variant
    pub request_headers: HeaderMap,
    /// Persisted response headers
    pub response_headers: HeaderMap,
}

/// Variant-list backend, keyed by cache key.
#[async_trait]
pub trait MetaStore: Send + Sync {
    /// Read the variant list for a key; absent keys read as empty.
    async fn read(&self, key: &str) -> CacheResult<Vec<Variant>>;

    /// Replace the variant list for a key.
    async fn write(&self, key: &str, variants: Vec<Variant>) -> CacheResult<()>;

    /// Drop a key entirely.
    async fn purge(&self, key: &str) -> CacheResult<()>;
}

/// Body backend, keyed by content digest.
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Read a body by digest.
    async fn read(&self, digest: &str) -> CacheResult<Option<Bytes>>;

    /// Insert-or-replace a body. Concurrent writers of the same digest
    /// write the same bytes, so last-write-wins is safe.
    async fn write(&self, digest: &str, body: Bytes) -> CacheResult<()>;

    /// True when the digest is present.
    async fn contains(&self, digest: &str) -> CacheResult<bool>;
}

/// In-process metastore on a concurrent map.
#[derive(Debug, Default)]
pub struct MemoryMetaStore {
    entries: DashMap<String, Vec<Variant>>,
}

impl MemoryMetaStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of cache keys with at least one variant.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no keys are stored.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl MetaStore for MemoryMetaStore {
    async fn read(&self, key: &str) -> CacheResult<Vec<Variant>> {
        Ok(self
            .entries
            .get(key)
            .map(|entry| entry.value().clone())
            .unwrap_or_default())
    }

    async fn write(&self, key: &str, variants: Vec<Variant>) -> CacheResult<()> {
        self.entries.insert(key.to_string(), variants);
        Ok(())
    }

    async fn purge(&self, key: &str) -> CacheResult<()> {
        self.entries.remove(key);
        Ok(())
    }
}

/// In-process entitystore on a concurrent map.
#[derive(Debug, Default)]
pub struct MemoryEntityStore {
    entries: DashMap<String, Bytes>,
}

impl MemoryEntityStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored bodies.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no bodies are stored.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl EntityStore for MemoryEntityStore {
    async fn read(&self, digest: &str) -> CacheResult<Option<Bytes>> {
        Ok(self.entries.get(digest).map(|entry| entry.value().clone()))
    }

    async fn write(&self, digest: &str, body: Bytes) -> CacheResult<()> {
        self.entries.insert(digest.to_string(), body);
        Ok(())
    }

    async fn contains(&self, digest: &str) -> CacheResult<bool> {
        Ok(self.entries.contains_key(digest))
    }
}

/// Does a stored request match the current one under a `Vary` value?
///
/// An absent or empty `Vary` matches trivially; otherwise every named
/// header must carry the same value in both requests, where absent on both
/// sides also matches.
pub fn requests_match(vary: Option<&str>, saved: &HeaderMap, current: &HeaderMap) -> bool {
    let Some(vary) = vary else { return true };
    vary.split(|c: char| c.is_whitespace() || c == ',')
        .filter(|name| !name.is_empty())
        .all(|name| saved.get(name) == current.get(name))
}

/// Variant matching, digest bookkeeping and write atomicity over a pair of
/// backends. Writes to one cache key serialize behind a keyed mutex;
/// there is no cross-key ordering.
pub struct Storage {
    meta: Arc<dyn MetaStore>,
    entity: Arc<dyn EntityStore>,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl Storage {
    /// Create storage over the given backends.
    pub fn new(meta: Arc<dyn MetaStore>, entity: Arc<dyn EntityStore>) -> Self {
        Self {
            meta,
            entity,
            locks: DashMap::new(),
        }
    }

    fn key_lock(&self, key: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Find the stored response that answers `request`, if any.
    ///
    /// Scans the key's variants most-recent first and reconstructs the
    /// response from the first one whose `Vary` matches. A matching variant
    /// whose entity is gone resolves as a miss.
    pub async fn lookup(&self, request: &HttpRequest) -> CacheResult<Option<HttpResponse>> {
        let key = cache_key(request);
        let variants = self.meta.read(&key).await?;

        for variant in &variants {
            let vary = variant.response_headers.get("Vary").map(String::as_str);
            if !requests_match(vary, &variant.request_headers, &request.headers) {
                continue;
            }

            let Some(digest) = variant.response_headers.get(X_CONTENT_DIGEST) else {
                return Ok(None);
            };
            let Some(body) = self.entity.read(digest).await? else {
                // TODO: purge the orphaned variant from the metastore when
                // its entity is found missing.
                warn!(key = %key, digest = %digest, "metastore variant references missing entity");
                return Ok(None);
            };

            let mut headers = variant.response_headers.clone();
            let Some(status) = headers.remove(X_STATUS).and_then(|s| s.parse().ok()) else {
                return Ok(None);
            };
            return Ok(Some(HttpResponse {
                status,
                headers,
                body,
            }));
        }
        Ok(None)
    }

    /// Persist `response` as the freshest variant for `request`'s key.
    ///
    /// Writes the body to the entitystore under its digest (skipped when the
    /// response already carries [`X_CONTENT_DIGEST`]), injects
    /// `Content-Length` when no `Transfer-Encoding` is set, drops stored
    /// variants equivalent under the response's `Vary`, and prepends the new
    /// variant. The response is updated in place with the injected headers
    /// and the deduplicated body.
    pub async fn store_response(
        &self,
        request: &HttpRequest,
        response: &mut HttpResponse,
    ) -> CacheResult<()> {
        let key = cache_key(request);
        let lock = self.key_lock(&key);
        let _guard = lock.lock().await;

        if response.headers.get(X_CONTENT_DIGEST).is_none() {
            let digest = body_digest(&response.body);
            let size = response.body.len();
            self.entity.write(&digest, response.body.clone()).await?;
            if let Some(stored) = self.entity.read(&digest).await? {
                response.body = stored;
            }
            response.headers.insert(X_CONTENT_DIGEST, digest);
            if !response.headers.contains("Transfer-Encoding") {
                response.headers.insert("Content-Length", size.to_string());
            }
        }

        let vary = response.headers.get("Vary").cloned();
        let mut persisted = response.headers.clone();
        persisted.insert(X_STATUS, response.status.to_string());
        persisted.remove_all("Age");

        let mut variants = self.meta.read(&key).await?;
        variants.retain(|variant| {
            let same_vary = variant.response_headers.get("Vary") == vary.as_ref();
            !(same_vary
                && requests_match(vary.as_deref(), &variant.request_headers, &request.headers))
        });
        variants.insert(
            0,
            Variant {
                request_headers: request.headers.clone(),
                response_headers: persisted,
            },
        );
        self.meta.write(&key, variants).await
    }

    /// Force every fresh variant under `request`'s key stale.
    ///
    /// Fresh variants get their `Age` pinned to their `max_age` and are
    /// written back; stale variants and the entitystore are untouched.
    pub async fn invalidate(&self, request: &HttpRequest, now: SystemTime) -> CacheResult<()> {
        let key = cache_key(request);
        let lock = self.key_lock(&key);
        let _guard = lock.lock().await;

        let variants = self.meta.read(&key).await?;
        if variants.is_empty() {
            return Ok(());
        }

        let mut changed = false;
        let mut updated = Vec::with_capacity(variants.len());
        for variant in variants {
            updated.push(match expire_variant(&variant, now) {
                Ok(Some(expired)) => {
                    changed = true;
                    expired
                }
                Ok(None) => variant,
                Err(error) => {
                    warn!(key = %key, error = %error, "variant headers unparseable, leaving as-is");
                    variant
                }
            });
        }

        if changed {
            self.meta.write(&key, updated).await?;
        }
        Ok(())
    }
}

/// Expire one variant if it is fresh, returning the rewritten variant.
fn expire_variant(variant: &Variant, now: SystemTime) -> CacheResult<Option<Variant>> {
    let mut headers = variant.response_headers.clone();
    let status: u16 = headers
        .remove(X_STATUS)
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| CacheError::Store("variant missing X-Status".to_string()))?;

    let mut transient = HttpResponse {
        status,
        headers,
        body: Bytes::new(),
    };
    if !transient.is_fresh(now)? {
        return Ok(None);
    }
    transient.expire(now)?;

    let mut persisted = transient.headers;
    persisted.insert(X_STATUS, status.to_string());
    Ok(Some(Variant {
        request_headers: variant.request_headers.clone(),
        response_headers: persisted,
    }))
}
