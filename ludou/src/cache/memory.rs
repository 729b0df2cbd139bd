//! In-process cache with a bounded entry count
//!
//! Eviction is FIFO: when full, the entry inserted longest ago goes, no
//! matter how recently it was read.

use super::{CacheBackend, CacheError};
use crate::types::{CacheKey, CacheKeyRef};
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

struct Entry {
    value: Vec<u8>,
    expires: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires.is_some_and(|at| at <= now)
    }
}

#[derive(Default)]
struct Inner {
    entries: HashMap<CacheKey, Entry>,
    /// Insertion order, oldest first
    order: VecDeque<CacheKey>,
}

impl Inner {
    fn remove(&mut self, key: &CacheKeyRef) -> bool {
        let removed = self.entries.remove(key).is_some();
        if removed {
            self.order.retain(|k| k.as_str() != key.as_str());
        }
        removed
    }
}

pub struct MemoryCache {
    max_entries: usize,
    inner: Mutex<Inner>,
}

impl MemoryCache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            max_entries: max_entries.max(1),
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for MemoryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryCache")
            .field("max_entries", &self.max_entries)
            .field("len", &self.len())
            .finish()
    }
}

impl CacheBackend for MemoryCache {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn get(&self, key: &CacheKeyRef) -> Option<Vec<u8>> {
        let mut inner = self.lock();
        let expired = inner.entries.get(key)?.is_expired(Instant::now());
        if expired {
            inner.remove(key);
            return None;
        }
        inner.entries.get(key).map(|e| e.value.clone())
    }

    fn put(&self, key: &CacheKeyRef, value: &[u8], ttl: Option<Duration>) -> Result<(), CacheError> {
        let mut inner = self.lock();
        inner.remove(key);
        while inner.entries.len() >= self.max_entries {
            let Some(oldest) = inner.order.pop_front() else {
                break;
            };
            inner.entries.remove(&oldest);
            tracing::debug!(key = %oldest, "evicted oldest cache entry");
        }
        inner.entries.insert(
            key.to_owned(),
            Entry {
                value: value.to_vec(),
                expires: ttl.map(|ttl| Instant::now() + ttl),
            },
        );
        inner.order.push_back(key.to_owned());
        Ok(())
    }

    fn has(&self, key: &CacheKeyRef) -> bool {
        self.get(key).is_some()
    }

    fn forget(&self, key: &CacheKeyRef) -> bool {
        self.lock().remove(key)
    }

    fn flush(&self) -> bool {
        let mut inner = self.lock();
        inner.entries.clear();
        inner.order.clear();
        true
    }
}
