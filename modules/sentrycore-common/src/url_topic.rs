//! URL canonicalisation and topic key helpers.
//!
//! Two URLs that differ only in fragment, tracking params, scheme/host case,
//! a `www.` prefix, or a trailing slash canonicalise identically and share a
//! topic key, which is what cross-source dedupe keys on.

use sha2::{Digest, Sha256};
use url::Url;

/// Non-`utm_` query keys that carry tracking state and never content.
const TRACKING_QUERY_KEYS: &[&str] = &["spm", "from", "ref", "source"];

/// Canonicalise a URL for topic-level dedupe.
///
/// Rules:
/// - lowercase scheme (default `https`) and host, strip leading `www.`
/// - drop the fragment
/// - drop `utm_*` and fixed tracking query keys; lowercase the rest and sort
/// - lowercase the path; trim trailing slashes except for the root path
pub fn canonicalize_url_for_topic(url: &str) -> String {
    let raw = url.trim();
    if raw.is_empty() {
        return String::new();
    }

    let with_scheme = if raw.contains("://") {
        raw.to_string()
    } else {
        format!("https://{raw}")
    };
    let parsed = match Url::parse(&with_scheme) {
        Ok(u) => u,
        // Unparseable input dedupes on its literal form.
        Err(_) => return raw.to_string(),
    };

    let scheme = parsed.scheme().to_ascii_lowercase();
    let mut host = parsed.host_str().unwrap_or("").to_ascii_lowercase();
    if let Some(stripped) = host.strip_prefix("www.") {
        host = stripped.to_string();
    }
    let port = parsed.port().map(|p| format!(":{p}")).unwrap_or_default();

    let mut path = parsed.path().to_ascii_lowercase();
    while path.len() > 1 && path.ends_with('/') {
        path.pop();
    }
    if path.is_empty() {
        path = "/".to_string();
    }

    let mut pairs: Vec<(String, String)> = parsed
        .query_pairs()
        .filter_map(|(k, v)| {
            let key = k.to_ascii_lowercase();
            if key.starts_with("utm_") || TRACKING_QUERY_KEYS.contains(&key.as_str()) {
                None
            } else {
                Some((key, v.into_owned()))
            }
        })
        .collect();
    pairs.sort();

    if pairs.is_empty() {
        format!("{scheme}://{host}{port}{path}")
    } else {
        let mut serializer = url::form_urlencoded::Serializer::new(String::new());
        for (k, v) in &pairs {
            serializer.append_pair(k, v);
        }
        format!("{scheme}://{host}{port}{path}?{}", serializer.finish())
    }
}

/// Full sha256 hex digest of the canonical URL. The store's unique index on
/// this value enforces cross-source dedupe.
pub fn url_hash(url: &str) -> String {
    let canonical = canonicalize_url_for_topic(url);
    hex::encode(Sha256::digest(canonical.as_bytes()))
}

/// Stable 32-hex-char topic key from the canonical URL.
pub fn build_topic_key(url: &str) -> String {
    url_hash(url)[..32].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonicalize_is_idempotent() {
        let urls = [
            "https://www.Example.com/A/?utm_source=x&b=2&a=1",
            "http://news.site/path/page?ref=feed&id=9#comment-3",
            "example.com/story",
            "https://example.com/",
        ];
        for u in urls {
            let once = canonicalize_url_for_topic(u);
            let twice = canonicalize_url_for_topic(&once);
            assert_eq!(once, twice, "canon not idempotent for {u}");
        }
    }

    #[test]
    fn tracking_params_are_dropped() {
        let canon = canonicalize_url_for_topic(
            "https://example.com/a?utm_source=x&utm_campaign=y&spm=z&from=f&ref=r&source=s&keep=1",
        );
        assert_eq!(canon, "https://example.com/a?keep=1");
    }

    #[test]
    fn query_keys_lowercased_and_sorted() {
        let canon = canonicalize_url_for_topic("https://example.com/a?B=2&A=1");
        assert_eq!(canon, "https://example.com/a?a=1&b=2");
    }

    #[test]
    fn reordering_query_does_not_change_canon() {
        let a = canonicalize_url_for_topic("https://example.com/a?b=2&a=1");
        let b = canonicalize_url_for_topic("https://example.com/a?a=1&b=2");
        assert_eq!(a, b);
    }

    #[test]
    fn fragment_dropped() {
        let canon = canonicalize_url_for_topic("https://example.com/a#section-2");
        assert_eq!(canon, "https://example.com/a");
    }

    #[test]
    fn www_and_case_normalized() {
        let a = canonicalize_url_for_topic("HTTPS://WWW.Example.COM/News/Story/");
        assert_eq!(a, "https://example.com/news/story");
    }

    #[test]
    fn root_path_kept_as_slash() {
        assert_eq!(
            canonicalize_url_for_topic("https://example.com"),
            "https://example.com/"
        );
        assert_eq!(
            canonicalize_url_for_topic("https://example.com/"),
            "https://example.com/"
        );
    }

    #[test]
    fn missing_scheme_defaults_to_https() {
        assert_eq!(
            canonicalize_url_for_topic("example.com/a"),
            "https://example.com/a"
        );
    }

    #[test]
    fn empty_input_yields_empty_canon() {
        assert_eq!(canonicalize_url_for_topic("   "), "");
    }

    #[test]
    fn topic_key_stable_across_variants() {
        let variants = [
            "https://www.Example.com/A/?utm_source=x&b=2&a=1",
            "https://example.com/a?b=2&a=1#frag",
            "HTTP://example.com/a?a=1&b=2", // scheme differs → different key
        ];
        let k0 = build_topic_key(variants[0]);
        let k1 = build_topic_key(variants[1]);
        assert_eq!(k0, k1);
        assert_eq!(k0.len(), 32);
        assert!(k0.chars().all(|c| c.is_ascii_hexdigit()));
        // Different scheme canonicalises differently.
        assert_ne!(k0, build_topic_key(variants[2]));
    }

    #[test]
    fn url_hash_matches_topic_key_prefix() {
        let url = "https://example.com/story?id=1";
        assert_eq!(&url_hash(url)[..32], build_topic_key(url));
        assert_eq!(url_hash(url).len(), 64);
    }
}
