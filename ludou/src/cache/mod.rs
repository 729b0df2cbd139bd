//! Compiled artifact storage
//!
//! Every backend implements [`CacheBackend`]. Reads never fail: a backend
//! that cannot answer reports a miss, so rendering never depends on the
//! cache being available. Writes report errors, which the engine logs
//! before rendering uncached.

mod file;
mod memory;
#[cfg(feature = "redis")]
mod kv;

pub use file::FileCache;
pub use memory::MemoryCache;
#[cfg(feature = "redis")]
pub use kv::RedisCache;

use crate::types::CacheKeyRef;
use camino::Utf8PathBuf;
use miette::Diagnostic;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use thiserror::Error;

#[derive(Error, Debug, Diagnostic)]
pub enum CacheError {
    #[error("Failed to write cache entry `{key}` to {location}")]
    #[diagnostic(code(ludou::cache::write))]
    Write {
        key: String,
        location: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Cache backend `{backend}` is unavailable: {message}")]
    #[diagnostic(code(ludou::cache::unavailable))]
    Unavailable {
        backend: &'static str,
        message: String,
    },

    #[error("Failed to serialize the compiled artifact for `{name}`")]
    #[diagnostic(code(ludou::cache::serialize))]
    Serialize {
        name: String,
        #[source]
        source: serde_json::Error,
    },
}

pub trait CacheBackend: Send + Sync {
    /// Short backend name for logs
    fn name(&self) -> &'static str;

    fn get(&self, key: &CacheKeyRef) -> Option<Vec<u8>>;

    /// Store `value`, replacing any previous entry. `ttl` is honoured by
    /// backends that support expiry.
    fn put(&self, key: &CacheKeyRef, value: &[u8], ttl: Option<Duration>) -> Result<(), CacheError>;

    fn has(&self, key: &CacheKeyRef) -> bool;

    /// Remove one entry; `true` if something was removed
    fn forget(&self, key: &CacheKeyRef) -> bool;

    /// Remove every entry; `true` on success
    fn flush(&self) -> bool;

    /// Whether the stored entry is at least as new as the source it was
    /// built from. Backends without a notion of entry age answer `true`.
    fn is_fresh(&self, _key: &CacheKeyRef, _source_modified: SystemTime) -> bool {
        true
    }

    /// Where an entry lives on disk, for backends that have one
    fn location(&self, _key: &CacheKeyRef) -> Option<Utf8PathBuf> {
        None
    }
}

impl<C: CacheBackend + ?Sized> CacheBackend for Arc<C> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn get(&self, key: &CacheKeyRef) -> Option<Vec<u8>> {
        (**self).get(key)
    }

    fn put(&self, key: &CacheKeyRef, value: &[u8], ttl: Option<Duration>) -> Result<(), CacheError> {
        (**self).put(key, value, ttl)
    }

    fn has(&self, key: &CacheKeyRef) -> bool {
        (**self).has(key)
    }

    fn forget(&self, key: &CacheKeyRef) -> bool {
        (**self).forget(key)
    }

    fn flush(&self) -> bool {
        (**self).flush()
    }

    fn is_fresh(&self, key: &CacheKeyRef, source_modified: SystemTime) -> bool {
        (**self).is_fresh(key, source_modified)
    }

    fn location(&self, key: &CacheKeyRef) -> Option<Utf8PathBuf> {
        (**self).location(key)
    }
}

/// Stores nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NullCache;

impl CacheBackend for NullCache {
    fn name(&self) -> &'static str {
        "none"
    }

    fn get(&self, _key: &CacheKeyRef) -> Option<Vec<u8>> {
        None
    }

    fn put(&self, _key: &CacheKeyRef, _value: &[u8], _ttl: Option<Duration>) -> Result<(), CacheError> {
        Ok(())
    }

    fn has(&self, _key: &CacheKeyRef) -> bool {
        false
    }

    fn forget(&self, _key: &CacheKeyRef) -> bool {
        false
    }

    fn flush(&self) -> bool {
        true
    }
}
