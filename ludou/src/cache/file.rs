//! On-disk cache, one file per entry
//!
//! Entries are written to a temporary file in the cache directory and then
//! renamed over the destination, so a concurrent reader sees either the old
//! complete entry or the new one.

use super::{CacheBackend, CacheError};
use crate::hash;
use crate::types::CacheKeyRef;
use camino::{Utf8Path, Utf8PathBuf};
use std::fs;
use std::io::Write;
use std::time::{Duration, SystemTime};

/// Extension of artifact files in the cache directory
const EXTENSION: &str = "ludou";

#[derive(Debug, Clone)]
pub struct FileCache {
    dir: Utf8PathBuf,
}

impl FileCache {
    pub fn new(dir: impl Into<Utf8PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Utf8Path {
        &self.dir
    }

    /// `dir/<hash of key>.ludou`
    pub fn path_for(&self, key: &CacheKeyRef) -> Utf8PathBuf {
        self.dir
            .join(format!("{}.{EXTENSION}", hash::hex_digest(key.as_str().as_bytes())))
    }

    fn write_atomic(&self, path: &Utf8Path, value: &[u8]) -> std::io::Result<()> {
        fs::create_dir_all(&self.dir)?;
        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(value)?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| e.error)?;
        Ok(())
    }
}

impl CacheBackend for FileCache {
    fn name(&self) -> &'static str {
        "file"
    }

    fn get(&self, key: &CacheKeyRef) -> Option<Vec<u8>> {
        fs::read(self.path_for(key)).ok()
    }

    /// TTL is ignored; file entries live until their source changes
    fn put(&self, key: &CacheKeyRef, value: &[u8], _ttl: Option<Duration>) -> Result<(), CacheError> {
        let path = self.path_for(key);
        self.write_atomic(&path, value)
            .map_err(|source| CacheError::Write {
                key: key.to_string(),
                location: path.to_string(),
                source,
            })?;
        tracing::debug!(%key, %path, bytes = value.len(), "wrote cache file");
        Ok(())
    }

    fn has(&self, key: &CacheKeyRef) -> bool {
        self.path_for(key).is_file()
    }

    fn forget(&self, key: &CacheKeyRef) -> bool {
        fs::remove_file(self.path_for(key)).is_ok()
    }

    fn flush(&self) -> bool {
        let entries = match self.dir.read_dir_utf8() {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return true,
            Err(e) => {
                tracing::warn!(dir = %self.dir, error = %e, "failed to list cache directory");
                return false;
            }
        };
        let mut ok = true;
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension() == Some(EXTENSION) && fs::remove_file(path).is_err() {
                ok = false;
            }
        }
        ok
    }

    /// The cache file must be at least as new as the source
    fn is_fresh(&self, key: &CacheKeyRef, source_modified: SystemTime) -> bool {
        fs::metadata(self.path_for(key))
            .and_then(|m| m.modified())
            .is_ok_and(|cached| cached >= source_modified)
    }

    fn location(&self, key: &CacheKeyRef) -> Option<Utf8PathBuf> {
        Some(self.path_for(key))
    }
}
