//! URL canonicalization and fingerprinting (spec §3).
//!
//! Canonicalization is the single source of truth for URL identity: every
//! module that needs to compare or deduplicate URLs goes through
//! [`canonicalize`] and, for persistence keys, [`fingerprint`]. No module
//! may compare raw URL strings for equality (spec §9).

use sha2::{Digest, Sha256};
use url::Url;

/// Normalizes a URL to its canonical form (spec §3):
/// ASCII scheme restricted to http/https, lowercased host, default ports
/// (80/443) stripped, fragment stripped, trailing slash stripped except for
/// the root path, path/query preserved byte-exact otherwise.
///
/// Returns `None` if the URL cannot be parsed or is not http(s).
pub fn canonicalize(raw: &str) -> Option<String> {
    let mut url = Url::parse(raw).ok()?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return None;
    }
    url.set_fragment(None);

    // `Url` already lowercases the host during parsing, but be explicit in
    // case a caller constructs one some other way.
    if let Some(host) = url.host_str() {
        let lowered = host.to_ascii_lowercase();
        let _ = url.set_host(Some(&lowered));
    }

    let default_port = match url.scheme() {
        "http" => Some(80),
        "https" => Some(443),
        _ => None,
    };
    if url.port() == default_port {
        let _ = url.set_port(None);
    }

    let path = url.path();
    if path.len() > 1 && path.ends_with('/') {
        let trimmed = path.trim_end_matches('/').to_string();
        url.set_path(&trimmed);
    }

    Some(url.to_string())
}

/// Resolves `href` against `base` (already canonical) and canonicalizes the
/// result. Used for link extraction (spec §4.3).
pub fn resolve_and_canonicalize(base: &Url, href: &str) -> Option<String> {
    let joined = base.join(href).ok()?;
    canonicalize(joined.as_str())
}

/// SHA-256 hex digest of the canonical URL's UTF-8 bytes (spec §3).
pub fn fingerprint(canonical_url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical_url.as_bytes());
    hex::encode(hasher.finalize())
}

/// First 16 hex characters of [`fingerprint`], used as the PageRank KV key
/// suffix. Callers reading/writing PageRank MUST use this same prefix
/// length (spec §3).
pub fn fingerprint_prefix16(canonical_url: &str) -> String {
    fingerprint(canonical_url)[..16].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_idempotence() {
        let once = canonicalize("HTTPS://Example.COM:443/A/B/#frag").unwrap();
        assert_eq!(once, "https://example.com/A/B");
        let twice = canonicalize(&once).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn root_path_keeps_trailing_slash() {
        assert_eq!(canonicalize("https://example.com/").unwrap(), "https://example.com/");
    }

    #[test]
    fn strips_default_ports() {
        assert_eq!(
            canonicalize("http://example.com:80/x").unwrap(),
            "http://example.com/x"
        );
        assert_eq!(
            canonicalize("https://example.com:443/x").unwrap(),
            "https://example.com/x"
        );
    }

    #[test]
    fn keeps_non_default_ports() {
        assert_eq!(
            canonicalize("http://example.com:8080/x").unwrap(),
            "http://example.com:8080/x"
        );
    }

    #[test]
    fn rejects_non_http_schemes() {
        assert!(canonicalize("ftp://example.com/").is_none());
        assert!(canonicalize("javascript:alert(1)").is_none());
    }

    #[test]
    fn fingerprint_equality_follows_canonical_equality() {
        let a = canonicalize("HTTPS://Example.com/a").unwrap();
        let b = canonicalize("https://example.com/a").unwrap();
        assert_eq!(a, b);
        assert_eq!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn fingerprint_is_64_hex_chars() {
        let fp = fingerprint("https://example.com/a");
        assert_eq!(fp.len(), 64);
        assert!(fp.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn prefix16_matches_fingerprint_prefix() {
        let url = "https://example.com/a";
        assert_eq!(fingerprint_prefix16(url), &fingerprint(url)[..16]);
    }
}
