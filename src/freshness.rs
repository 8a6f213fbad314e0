//! Expiration-model arithmetic over response headers.
//!
//! Everything the state machine decides — serve fresh, revalidate, store —
//! reduces to the quantities computed here: `max_age`, `age`, `ttl` and the
//! predicates built on them. All time-dependent methods take an explicit
//! `now`, so tests can pin the wall clock.
//!
//! As a shared cache, `r-maxage` and `s-maxage` override `max-age` when
//! present.

use crate::control::CacheControl;
use crate::error::{CacheError, CacheResult};
use crate::http::HttpResponse;
use std::time::SystemTime;

/// Status codes eligible for caching (RFC 2616 §13.4).
pub const CACHEABLE_STATUS_CODES: [u16; 7] = [200, 203, 300, 301, 302, 404, 410];

/// Wall-clock source for the middleware. Inject a fixed implementation in
/// tests to make freshness arithmetic deterministic.
pub trait Clock: Send + Sync {
    /// The current time.
    fn now(&self) -> SystemTime;
}

/// The real wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }
}

/// Signed whole seconds from `earlier` to `later`.
fn seconds_between(earlier: SystemTime, later: SystemTime) -> i64 {
    match later.duration_since(earlier) {
        Ok(d) => d.as_secs() as i64,
        Err(e) => -(e.duration().as_secs() as i64),
    }
}

fn parse_date(header: &str, value: &str) -> CacheResult<SystemTime> {
    httpdate::parse_http_date(value).map_err(|_| CacheError::MalformedDate {
        header: header.to_string(),
        value: value.to_string(),
    })
}

/// Freshness calculus over a response's headers.
pub trait FreshnessExt {
    /// The parsed `Cache-Control` header, empty when absent.
    fn cache_control(&self) -> CacheControl;

    /// Freshness lifetime in seconds: first of `r-maxage`, `s-maxage`,
    /// `max-age`, else `Expires − Date`, else `None`. May be negative.
    fn max_age(&self, now: SystemTime) -> CacheResult<Option<i64>>;

    /// The response's `Date`, defaulting to `now` when absent.
    fn date(&self, now: SystemTime) -> CacheResult<SystemTime>;

    /// Current age in seconds: the `Age` header when present and numeric,
    /// else `max(0, now − Date)`.
    fn age(&self, now: SystemTime) -> CacheResult<i64>;

    /// Remaining freshness: `max_age − age`, or `None` without a lifetime.
    fn ttl(&self, now: SystemTime) -> CacheResult<Option<i64>>;

    /// True while `ttl > 0`.
    fn is_fresh(&self, now: SystemTime) -> CacheResult<bool>;

    /// Carries a validator (`Last-Modified` or `ETag`).
    fn is_validateable(&self) -> bool;

    /// Eligible for storage: cacheable status, not `private`, not
    /// `no-store`, and either fresh or validateable.
    fn is_cacheable(&self, now: SystemTime) -> CacheResult<bool>;

    /// Force the response stale by pinning `Age` to its `max_age`.
    /// A second application is a no-op.
    fn expire(&mut self, now: SystemTime) -> CacheResult<()>;
}

impl FreshnessExt for HttpResponse {
    fn cache_control(&self) -> CacheControl {
        CacheControl::parse_opt(self.headers.get("Cache-Control").map(String::as_str))
    }

    fn max_age(&self, now: SystemTime) -> CacheResult<Option<i64>> {
        let cc = self.cache_control();
        if let Some(secs) = cc
            .reverse_max_age()
            .or_else(|| cc.shared_max_age())
            .or_else(|| cc.max_age())
        {
            return Ok(Some(secs));
        }
        match self.headers.get("Expires") {
            Some(value) => {
                let expires = parse_date("Expires", value)?;
                Ok(Some(seconds_between(self.date(now)?, expires)))
            }
            None => Ok(None),
        }
    }

    fn date(&self, now: SystemTime) -> CacheResult<SystemTime> {
        match self.headers.get("Date") {
            Some(value) => parse_date("Date", value),
            None => Ok(now),
        }
    }

    fn age(&self, now: SystemTime) -> CacheResult<i64> {
        if let Some(secs) = self.headers.get("Age").and_then(|v| v.trim().parse().ok()) {
            return Ok(secs);
        }
        Ok(seconds_between(self.date(now)?, now).max(0))
    }

    fn ttl(&self, now: SystemTime) -> CacheResult<Option<i64>> {
        match self.max_age(now)? {
            Some(max_age) => Ok(Some(max_age - self.age(now)?)),
            None => Ok(None),
        }
    }

    fn is_fresh(&self, now: SystemTime) -> CacheResult<bool> {
        Ok(matches!(self.ttl(now)?, Some(ttl) if ttl > 0))
    }

    fn is_validateable(&self) -> bool {
        self.headers.contains("Last-Modified") || self.headers.contains("ETag")
    }

    fn is_cacheable(&self, now: SystemTime) -> CacheResult<bool> {
        if !CACHEABLE_STATUS_CODES.contains(&self.status) {
            return Ok(false);
        }
        let cc = self.cache_control();
        if cc.is_no_store() || cc.is_private() {
            return Ok(false);
        }
        Ok(self.is_validateable() || self.is_fresh(now)?)
    }

    fn expire(&mut self, now: SystemTime) -> CacheResult<()> {
        if self.is_fresh(now)? {
            let max_age = self.max_age(now)?.unwrap_or(0);
            self.headers.insert("Age", max_age.to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn at(now: SystemTime, offset_secs: i64) -> SystemTime {
        if offset_secs >= 0 {
            now + Duration::from_secs(offset_secs as u64)
        } else {
            now - Duration::from_secs((-offset_secs) as u64)
        }
    }

    fn http_date(time: SystemTime) -> String {
        httpdate::fmt_http_date(time)
    }

    #[test]
    fn test_fresh_iff_age_below_max_age() {
        let now = SystemTime::now();
        let res = HttpResponse::ok()
            .with_header("Cache-Control", "public, max-age=300")
            .with_header("Age", "299");
        assert!(res.is_fresh(now).unwrap());

        let res = res.with_header("Age", "301");
        assert!(!res.is_fresh(now).unwrap());

        let res = res.with_header("Age", "300");
        assert!(!res.is_fresh(now).unwrap());
    }

    #[test]
    fn test_expires_minus_date() {
        let now = SystemTime::now();
        let res = HttpResponse::ok()
            .with_header("Date", http_date(at(now, -10)))
            .with_header("Expires", http_date(at(now, 50)));

        assert_eq!(res.max_age(now).unwrap(), Some(60));
        assert_eq!(res.age(now).unwrap(), 10);
        assert_eq!(res.ttl(now).unwrap(), Some(50));
        assert!(res.is_fresh(now).unwrap());

        let expired = HttpResponse::ok()
            .with_header("Date", http_date(at(now, -120)))
            .with_header("Expires", http_date(at(now, -60)));
        assert!(!expired.is_fresh(now).unwrap());
    }

    #[test]
    fn test_shared_lifetimes_override_max_age() {
        let now = SystemTime::now();
        let res = HttpResponse::ok().with_header("Cache-Control", "max-age=1, s-maxage=100");
        assert_eq!(res.max_age(now).unwrap(), Some(100));

        let res = HttpResponse::ok()
            .with_header("Cache-Control", "max-age=1, s-maxage=100, r-maxage=200");
        assert_eq!(res.max_age(now).unwrap(), Some(200));
    }

    #[test]
    fn test_age_falls_back_to_date() {
        let now = SystemTime::now();
        let res = HttpResponse::ok().with_header("Date", http_date(at(now, -42)));
        assert_eq!(res.age(now).unwrap(), 42);

        // Date in the future clamps to zero.
        let res = HttpResponse::ok().with_header("Date", http_date(at(now, 42)));
        assert_eq!(res.age(now).unwrap(), 0);
    }

    #[test]
    fn test_malformed_date_is_an_error() {
        let now = SystemTime::now();
        let res = HttpResponse::ok().with_header("Expires", "not a date");
        assert!(matches!(
            res.max_age(now),
            Err(CacheError::MalformedDate { .. })
        ));
    }

    #[test]
    fn test_validateable() {
        assert!(!HttpResponse::ok().is_validateable());
        assert!(HttpResponse::ok()
            .with_header("ETag", "\"x\"")
            .is_validateable());
        assert!(HttpResponse::ok()
            .with_header("Last-Modified", "Sat, 23 Nov 1996 03:30:00 GMT")
            .is_validateable());
    }

    #[test]
    fn test_cacheable() {
        let now = SystemTime::now();
        let fresh = HttpResponse::ok().with_header("Cache-Control", "public, max-age=10");
        assert!(fresh.is_cacheable(now).unwrap());

        let private = HttpResponse::ok().with_header("Cache-Control", "private, max-age=10");
        assert!(!private.is_cacheable(now).unwrap());

        let no_store = HttpResponse::ok().with_header("Cache-Control", "no-store, max-age=10");
        assert!(!no_store.is_cacheable(now).unwrap());

        let teapot = HttpResponse::new(418).with_header("Cache-Control", "max-age=10");
        assert!(!teapot.is_cacheable(now).unwrap());

        // Stale but validateable is still storable.
        let validateable = HttpResponse::ok().with_header("ETag", "\"x\"");
        assert!(validateable.is_cacheable(now).unwrap());

        // Neither fresh nor validateable is not.
        assert!(!HttpResponse::ok().is_cacheable(now).unwrap());
    }

    #[test]
    fn test_expire_is_idempotent() {
        let now = SystemTime::now();
        let mut res = HttpResponse::ok().with_header("Cache-Control", "max-age=300");
        res.expire(now).unwrap();
        assert_eq!(res.headers.get("Age"), Some(&"300".to_string()));
        assert!(!res.is_fresh(now).unwrap());

        res.expire(now).unwrap();
        assert_eq!(res.headers.get("Age"), Some(&"300".to_string()));
    }

    #[test]
    fn test_expire_leaves_stale_untouched() {
        let now = SystemTime::now();
        let mut res = HttpResponse::ok().with_header("ETag", "\"x\"");
        res.expire(now).unwrap();
        assert!(res.headers.get("Age").is_none());
    }
}
