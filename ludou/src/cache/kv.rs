//! Redis-backed cache shared between processes
//!
//! Every failure degrades to a miss with a warning; the connection is
//! dropped and re-established on the next call.

use super::{CacheBackend, CacheError};
use crate::types::CacheKeyRef;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

pub struct RedisCache {
    client: redis::Client,
    connection: Mutex<Option<redis::Connection>>,
    prefix: String,
    default_ttl: Option<Duration>,
}

impl RedisCache {
    /// Validate the URL; no connection is made until first use
    pub fn open(
        url: &str,
        prefix: impl Into<String>,
        default_ttl: Option<Duration>,
    ) -> Result<Self, CacheError> {
        let client = redis::Client::open(url).map_err(|e| CacheError::Unavailable {
            backend: "redis",
            message: e.to_string(),
        })?;
        Ok(Self {
            client,
            connection: Mutex::new(None),
            prefix: prefix.into(),
            default_ttl,
        })
    }

    fn full_key(&self, key: &CacheKeyRef) -> String {
        format!("{}{}", self.prefix, key)
    }

    fn with_connection<T>(
        &self,
        op: &'static str,
        f: impl FnOnce(&mut redis::Connection) -> redis::RedisResult<T>,
    ) -> Result<T, CacheError> {
        let mut guard = self
            .connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if guard.is_none() {
            let connection = self.client.get_connection().map_err(|e| {
                tracing::warn!(error = %e, op, "redis cache unreachable");
                CacheError::Unavailable {
                    backend: "redis",
                    message: e.to_string(),
                }
            })?;
            *guard = Some(connection);
        }
        let Some(connection) = guard.as_mut() else {
            return Err(CacheError::Unavailable {
                backend: "redis",
                message: "no connection".to_string(),
            });
        };
        match f(connection) {
            Ok(value) => Ok(value),
            Err(e) => {
                tracing::warn!(error = %e, op, "redis cache command failed");
                *guard = None;
                Err(CacheError::Unavailable {
                    backend: "redis",
                    message: e.to_string(),
                })
            }
        }
    }
}

impl std::fmt::Debug for RedisCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisCache")
            .field("prefix", &self.prefix)
            .field("default_ttl", &self.default_ttl)
            .finish_non_exhaustive()
    }
}

impl CacheBackend for RedisCache {
    fn name(&self) -> &'static str {
        "redis"
    }

    fn get(&self, key: &CacheKeyRef) -> Option<Vec<u8>> {
        let key = self.full_key(key);
        self.with_connection("get", |conn| {
            redis::cmd("GET").arg(&key).query::<Option<Vec<u8>>>(conn)
        })
        .ok()
        .flatten()
    }

    fn put(&self, key: &CacheKeyRef, value: &[u8], ttl: Option<Duration>) -> Result<(), CacheError> {
        let key = self.full_key(key);
        let ttl = ttl.or(self.default_ttl);
        self.with_connection("put", |conn| {
            let mut cmd = redis::cmd("SET");
            cmd.arg(&key).arg(value);
            if let Some(ttl) = ttl {
                cmd.arg("EX").arg(ttl.as_secs().max(1));
            }
            cmd.query::<()>(conn)
        })
    }

    fn has(&self, key: &CacheKeyRef) -> bool {
        let key = self.full_key(key);
        self.with_connection("has", |conn| redis::cmd("EXISTS").arg(&key).query::<bool>(conn))
            .unwrap_or(false)
    }

    fn forget(&self, key: &CacheKeyRef) -> bool {
        let key = self.full_key(key);
        self.with_connection("forget", |conn| redis::cmd("DEL").arg(&key).query::<i64>(conn))
            .is_ok_and(|removed| removed > 0)
    }

    /// Deletes every key under the prefix, walking the keyspace with SCAN
    fn flush(&self) -> bool {
        let pattern = format!("{}*", self.prefix);
        self.with_connection("flush", |conn| {
            let mut cursor: u64 = 0;
            loop {
                let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                    .arg(cursor)
                    .arg("MATCH")
                    .arg(&pattern)
                    .arg("COUNT")
                    .arg(100)
                    .query(conn)?;
                if !keys.is_empty() {
                    redis::cmd("DEL").arg(&keys).query::<()>(conn)?;
                }
                if next == 0 {
                    return Ok(());
                }
                cursor = next;
            }
        })
        .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unreachable_server_is_a_miss() {
        let cache = RedisCache::open("redis://127.0.0.1:1/", "ludou:", None).unwrap();
        let key = CacheKeyRef::from_str("k");
        assert_eq!(cache.get(key), None);
        assert!(!cache.has(key));
        assert!(cache.put(key, b"x", None).is_err());
        assert!(!cache.flush());
    }

    #[test]
    fn test_invalid_url() {
        assert!(RedisCache::open("not a url", "p:", None).is_err());
    }
}
