//! `Cache-Control` header parsing and serialization.
//!
//! Directives are kept as a map from lowercase name to either a bare flag or
//! a raw string value, so unknown directives survive a parse/serialize round
//! trip untouched. Serialization is deterministic: flags first, then valued
//! directives, each group sorted alphabetically.

use std::collections::BTreeMap;
use std::fmt;

/// A single directive value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    /// Bare directive such as `public` or `no-store`
    Flag,
    /// `name=value` directive; the value is kept verbatim
    Value(String),
}

/// A parsed `Cache-Control` header.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheControl {
    directives: BTreeMap<String, Directive>,
}

impl CacheControl {
    /// Create an empty directive map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a header value.
    ///
    /// Pieces are split on `,` and trimmed; each piece splits on the first
    /// `=`. Names are lowercased, empty names dropped, values kept as raw
    /// strings (digits stay strings until a query coerces them).
    pub fn parse(value: &str) -> Self {
        let mut directives = BTreeMap::new();
        for piece in value.split(',') {
            let piece = piece.trim();
            if piece.is_empty() {
                continue;
            }
            match piece.split_once('=') {
                Some((name, value)) => {
                    let name = name.to_ascii_lowercase();
                    if !name.is_empty() {
                        directives.insert(name, Directive::Value(value.to_string()));
                    }
                }
                None => {
                    directives.insert(piece.to_ascii_lowercase(), Directive::Flag);
                }
            }
        }
        Self { directives }
    }

    /// Parse a header that may be absent; absent parses as empty.
    pub fn parse_opt(value: Option<&str>) -> Self {
        value.map(Self::parse).unwrap_or_default()
    }

    /// True when no directives are present.
    pub fn is_empty(&self) -> bool {
        self.directives.is_empty()
    }

    /// True when the named directive is present (flag or valued).
    pub fn contains(&self, name: &str) -> bool {
        self.directives.contains_key(name)
    }

    /// `public` present.
    pub fn is_public(&self) -> bool {
        self.contains("public")
    }

    /// `private` present.
    pub fn is_private(&self) -> bool {
        self.contains("private")
    }

    /// `no-cache` present.
    pub fn is_no_cache(&self) -> bool {
        self.contains("no-cache")
    }

    /// `no-store` present.
    pub fn is_no_store(&self) -> bool {
        self.contains("no-store")
    }

    /// `must-revalidate` present.
    pub fn is_must_revalidate(&self) -> bool {
        self.contains("must-revalidate")
    }

    /// `proxy-revalidate` present.
    pub fn is_proxy_revalidate(&self) -> bool {
        self.contains("proxy-revalidate")
    }

    /// `max-age` in seconds. Malformed values read as absent.
    pub fn max_age(&self) -> Option<i64> {
        self.int_value("max-age")
    }

    /// `s-maxage` in seconds.
    pub fn shared_max_age(&self) -> Option<i64> {
        self.int_value("s-maxage")
    }

    /// `r-maxage` in seconds, a reverse-proxy override of `s-maxage`.
    pub fn reverse_max_age(&self) -> Option<i64> {
        self.int_value("r-maxage")
    }

    fn int_value(&self, name: &str) -> Option<i64> {
        match self.directives.get(name) {
            Some(Directive::Value(v)) => v.trim().parse().ok(),
            _ => None,
        }
    }

    /// Add a bare directive.
    pub fn insert_flag(&mut self, name: impl Into<String>) {
        self.directives
            .insert(name.into().to_ascii_lowercase(), Directive::Flag);
    }

    /// Add a `name=value` directive.
    pub fn insert_value(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.directives.insert(
            name.into().to_ascii_lowercase(),
            Directive::Value(value.into()),
        );
    }

    /// Remove a directive.
    pub fn remove(&mut self, name: &str) {
        self.directives.remove(name);
    }

    /// Serialize back to a header value.
    ///
    /// Flags come first, then valued directives, both sorted alphabetically.
    /// The ordering is observable and pinned by tests.
    pub fn to_header_value(&self) -> String {
        let flags = self
            .directives
            .iter()
            .filter(|(_, d)| matches!(d, Directive::Flag))
            .map(|(name, _)| name.clone());
        let valued = self.directives.iter().filter_map(|(name, d)| match d {
            Directive::Value(v) => Some(format!("{}={}", name, v)),
            Directive::Flag => None,
        });
        flags.chain(valued).collect::<Vec<_>>().join(", ")
    }
}

impl fmt::Display for CacheControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_header_value())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_flags_and_values() {
        let cc = CacheControl::parse("public, max-age=300");
        assert!(cc.is_public());
        assert!(!cc.is_private());
        assert_eq!(cc.max_age(), Some(300));
    }

    #[test]
    fn test_values_stay_strings_until_coerced() {
        let cc = CacheControl::parse("max-age=300");
        assert_eq!(
            cc.directives.get("max-age"),
            Some(&Directive::Value("300".to_string()))
        );
    }

    #[test]
    fn test_parse_lowercases_names() {
        let cc = CacheControl::parse("Public, Max-Age=60");
        assert!(cc.is_public());
        assert_eq!(cc.max_age(), Some(60));
    }

    #[test]
    fn test_parse_drops_empty_pieces() {
        let cc = CacheControl::parse(", public, , =5,");
        assert!(cc.is_public());
        assert_eq!(cc.to_header_value(), "public");
    }

    #[test]
    fn test_value_splits_on_first_equals() {
        let cc = CacheControl::parse("private=\"a=b\"");
        assert_eq!(
            cc.directives.get("private"),
            Some(&Directive::Value("\"a=b\"".to_string()))
        );
        assert!(cc.is_private());
    }

    #[test]
    fn test_malformed_numeric_reads_absent() {
        let cc = CacheControl::parse("max-age=abc");
        assert_eq!(cc.max_age(), None);
        assert!(cc.contains("max-age"));
    }

    #[test]
    fn test_shared_and_reverse_max_age() {
        let cc = CacheControl::parse("s-maxage=10, r-maxage=20, max-age=30");
        assert_eq!(cc.shared_max_age(), Some(10));
        assert_eq!(cc.reverse_max_age(), Some(20));
        assert_eq!(cc.max_age(), Some(30));
    }

    #[test]
    fn test_serialization_ordering() {
        let cc = CacheControl::parse("max-age=300, public");
        assert_eq!(cc.to_header_value(), "public, max-age=300");

        let cc = CacheControl::parse("s-maxage=10, no-store, max-age=5, private");
        assert_eq!(
            cc.to_header_value(),
            "no-store, private, max-age=5, s-maxage=10"
        );
    }

    #[test]
    fn test_round_trip() {
        for header in [
            "public, max-age=300",
            "no-cache, no-store, must-revalidate",
            "private, s-maxage=60, stale-while-revalidate=30",
        ] {
            let parsed = CacheControl::parse(header);
            let emitted = parsed.to_header_value();
            assert_eq!(CacheControl::parse(&emitted), parsed);
        }
    }

    #[test]
    fn test_mutation() {
        let mut cc = CacheControl::parse("public, max-age=10");
        cc.remove("public");
        cc.insert_flag("private");
        cc.insert_value("s-maxage", "99");
        assert_eq!(cc.to_header_value(), "private, max-age=10, s-maxage=99");
    }

    #[test]
    fn test_parse_opt_absent() {
        let cc = CacheControl::parse_opt(None);
        assert!(cc.is_empty());
        assert_eq!(cc.to_header_value(), "");
    }
}
