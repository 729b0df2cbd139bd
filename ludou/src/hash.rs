//! Stable content hashing for cache keys and artifact file names
//!
//! Uses rapidhash: fast, and stable across runs and processes, which matters
//! because file cache artifacts outlive the process that wrote them.

use crate::types::CacheKey;
use camino::Utf8Path;
use rapidhash::fast::RapidHasher;
use std::hash::Hasher;

/// Hash arbitrary bytes to a 64-bit digest
pub fn digest(content: &[u8]) -> u64 {
    let mut hasher = RapidHasher::default();
    hasher.write(content);
    hasher.finish()
}

/// Hex form of [`digest`], 16 characters
pub fn hex_digest(content: &[u8]) -> String {
    format!("{:016x}", digest(content))
}

/// Cache key for a template: resolved path plus an optional discriminator
/// (locale, build id, ...). The source mtime is not part of the
/// key: a recompiled artifact overwrites the stale one in place.
pub fn cache_key(path: &Utf8Path, discriminator: Option<&str>) -> CacheKey {
    let mut material = path.as_str().as_bytes().to_vec();
    if let Some(d) = discriminator {
        material.push(0);
        material.extend_from_slice(d.as_bytes());
    }
    CacheKey::new(hex_digest(&material))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_is_deterministic() {
        let a = hex_digest(b"hello world");
        let b = hex_digest(b"hello world");
        let c = hex_digest(b"different content");

        assert_eq!(a.len(), 16);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_cache_key_discriminator() {
        let path = Utf8Path::new("/srv/views/home.ludou.html");
        let plain = cache_key(path, None);
        let en = cache_key(path, Some("en"));
        let fr = cache_key(path, Some("fr"));

        assert_eq!(plain, cache_key(path, None));
        assert_ne!(plain, en);
        assert_ne!(en, fr);
    }
}
