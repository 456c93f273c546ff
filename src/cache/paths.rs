//! Cache path contract shared by the origin renderer and the edge reader.
//!
//! The on-disk location of a page is
//! `{root}/{domain}/{h[0..2]}/{h[2..4]}/{normalize(path)}` where `h` is the
//! lowercase hex SHA-256 of the request path *as received*, leading slash
//! included. Both layers call into this module; `tests/cache_paths.rs` pins
//! golden vectors so an independent implementation can be checked against it.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

const INDEX_DOCUMENT: &str = "index.html";
const DEFAULT_EXTENSION: &str = ".html";

/// Normalise a request path into the relative file name stored under a shard.
///
/// Leading separators are stripped, an empty path becomes `index.html`, a
/// trailing separator maps to the directory's `index.html`, and a final
/// segment without an extension gains `.html`. `.`, `..` and empty segments
/// are dropped so the result never escapes the shard directory.
pub fn normalize(path: &str) -> String {
    let trimmed = path.trim_start_matches('/');
    if trimmed.is_empty() {
        return INDEX_DOCUMENT.to_string();
    }

    let directory_request = trimmed.ends_with('/');
    let segments: Vec<&str> = trimmed
        .split('/')
        .filter(|segment| !segment.is_empty() && *segment != "." && *segment != "..")
        .collect();

    if segments.is_empty() {
        return INDEX_DOCUMENT.to_string();
    }

    let mut normalized = segments.join("/");
    if directory_request {
        normalized.push('/');
        normalized.push_str(INDEX_DOCUMENT);
        return normalized;
    }

    if !has_extension(segments[segments.len() - 1]) {
        normalized.push_str(DEFAULT_EXTENSION);
    }

    normalized
}

/// Lowercase hex SHA-256 of the raw (pre-normalisation) request path.
pub fn shard_hash(raw_path: &str) -> String {
    hex::encode(Sha256::digest(raw_path.as_bytes()))
}

/// Compute the cache file location for `(domain, raw_path)` below `root`.
///
/// `domain` is expected to have passed [`normalize_domain`]; the hash is taken
/// over `raw_path` before normalisation.
pub fn cache_path(root: &Path, domain: &str, raw_path: &str) -> PathBuf {
    let hash = shard_hash(raw_path);
    root.join(domain)
        .join(&hash[0..2])
        .join(&hash[2..4])
        .join(normalize(raw_path))
}

/// Canonicalise a `Host` header value into a domain usable as a directory
/// name. Returns `None` for anything that is not a plain host name.
pub fn normalize_domain(host: &str) -> Option<String> {
    let host = host.trim();
    let without_port = match host.rsplit_once(':') {
        Some((name, port)) if !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) => name,
        _ => host,
    };
    let domain = without_port.trim_end_matches('.').to_ascii_lowercase();

    if domain.is_empty() || domain.starts_with('.') || domain.contains("..") {
        return None;
    }
    if !domain
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'.' || b == b'-')
    {
        return None;
    }

    Some(domain)
}

fn has_extension(segment: &str) -> bool {
    match segment.rfind('.') {
        Some(index) => index + 1 < segment.len(),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_matches_documented_examples() {
        assert_eq!(normalize(""), "index.html");
        assert_eq!(normalize("/"), "index.html");
        assert_eq!(normalize("/a/b"), "a/b.html");
        assert_eq!(normalize("/a/b.json"), "a/b.json");
        assert_eq!(normalize("///promo"), "promo.html");
    }

    #[test]
    fn normalize_maps_directories_to_index() {
        assert_eq!(normalize("/news/"), "news/index.html");
        assert_eq!(normalize("/news/2024/"), "news/2024/index.html");
    }

    #[test]
    fn normalize_refuses_to_escape_the_shard() {
        assert_eq!(normalize("/../../etc/passwd"), "etc/passwd.html");
        assert_eq!(normalize("/a/./b//c"), "a/b/c.html");
        assert_eq!(normalize("/.."), "index.html");
    }

    #[test]
    fn trailing_dot_is_not_an_extension() {
        assert_eq!(normalize("/file."), "file..html");
    }

    #[test]
    fn hash_is_taken_before_normalisation() {
        let root = Path::new("/srv/cache");
        let with_slash = cache_path(root, "x.com", "/promo");
        let without_slash = cache_path(root, "x.com", "promo");

        assert_ne!(with_slash, without_slash);
        assert!(with_slash.ends_with("promo.html"));
        assert!(without_slash.ends_with("promo.html"));
    }

    #[test]
    fn cache_path_is_stable() {
        let root = Path::new("/srv/cache");
        assert_eq!(
            cache_path(root, "x.com", "/a/b"),
            cache_path(root, "x.com", "/a/b")
        );
    }

    #[test]
    fn normalize_domain_strips_port_and_case() {
        assert_eq!(normalize_domain("X.com:8080").as_deref(), Some("x.com"));
        assert_eq!(normalize_domain("x.com.").as_deref(), Some("x.com"));
        assert_eq!(normalize_domain("sub-1.x.com").as_deref(), Some("sub-1.x.com"));
    }

    #[test]
    fn normalize_domain_rejects_path_like_hosts() {
        assert!(normalize_domain("").is_none());
        assert!(normalize_domain("..").is_none());
        assert!(normalize_domain("a/b").is_none());
        assert!(normalize_domain(".x.com").is_none());
        assert!(normalize_domain("x..com").is_none());
    }
}
