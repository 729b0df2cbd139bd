//! Engine configuration
//!
//! ```json
//! {
//!   "roots": ["views"],
//!   "namespaces": { "admin": "admin/views" },
//!   "cache": { "backend": "file", "dir": ".ludou-cache" },
//!   "optimize": true
//! }
//! ```

use camino::{Utf8Path, Utf8PathBuf};
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Template roots, searched in order
    pub roots: Vec<Utf8PathBuf>,
    /// `ns::name` lookups resolve under these directories
    pub namespaces: BTreeMap<String, Utf8PathBuf>,
    /// File extensions tried for dotted names, in order
    pub extensions: Vec<String>,
    pub cache: CacheConfig,
    /// Run the optimizer on compiled artifacts
    pub optimize: bool,
    /// Ignore cached artifacts and always recompile
    pub force_recompile: bool,
    /// Mixed into every cache key (locale, build id, ...)
    pub discriminator: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            roots: Vec::new(),
            namespaces: BTreeMap::new(),
            extensions: vec!["ludou.html".to_string(), "html".to_string()],
            cache: CacheConfig::default(),
            optimize: true,
            force_recompile: false,
            discriminator: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum CacheConfig {
    None,
    Memory {
        #[serde(default = "default_max_entries")]
        max_entries: usize,
    },
    File {
        dir: Utf8PathBuf,
    },
    Redis {
        url: String,
        #[serde(default)]
        ttl_secs: Option<u64>,
        #[serde(default = "default_prefix")]
        prefix: String,
    },
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig::Memory {
            max_entries: default_max_entries(),
        }
    }
}

fn default_max_entries() -> usize {
    256
}

fn default_prefix() -> String {
    "ludou:".to_string()
}

#[derive(Error, Debug, Diagnostic)]
pub enum ConfigError {
    #[error("Failed to read config file `{path}`")]
    #[diagnostic(code(ludou::config::read))]
    Read {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config file `{path}`")]
    #[diagnostic(code(ludou::config::parse))]
    Parse {
        path: Utf8PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a JSON config file. Relative paths inside it are resolved
    /// against the file's directory.
    pub fn load(path: &Utf8Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: Self = serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        if let Some(base) = path.parent() {
            config.resolve_relative_to(base);
        }
        tracing::debug!(%path, roots = config.roots.len(), "loaded engine config");
        Ok(config)
    }

    fn resolve_relative_to(&mut self, base: &Utf8Path) {
        let absolutize = |p: &mut Utf8PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        self.roots.iter_mut().for_each(absolutize);
        self.namespaces.values_mut().for_each(absolutize);
        if let CacheConfig::File { dir } = &mut self.cache {
            absolutize(dir);
        }
    }

    pub fn with_root(mut self, root: impl Into<Utf8PathBuf>) -> Self {
        self.roots.push(root.into());
        self
    }

    pub fn with_namespace(mut self, name: impl Into<String>, dir: impl Into<Utf8PathBuf>) -> Self {
        self.namespaces.insert(name.into(), dir.into());
        self
    }

    pub fn with_cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_optimize(mut self, optimize: bool) -> Self {
        self.optimize = optimize;
        self
    }

    pub fn with_force_recompile(mut self, force: bool) -> Self {
        self.force_recompile = force;
        self
    }

    pub fn with_discriminator(mut self, discriminator: impl Into<String>) -> Self {
        self.discriminator = Some(discriminator.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config: EngineConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.cache, CacheConfig::Memory { max_entries: 256 });
        assert!(config.optimize);
    }

    #[test]
    fn test_cache_variants() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"cache": {"backend": "redis", "url": "redis://x"}}"#).unwrap();
        assert_eq!(
            config.cache,
            CacheConfig::Redis {
                url: "redis://x".to_string(),
                ttl_secs: None,
                prefix: "ludou:".to_string()
            }
        );
        let config: EngineConfig = serde_json::from_str(r#"{"cache": {"backend": "none"}}"#).unwrap();
        assert_eq!(config.cache, CacheConfig::None);
        assert!(serde_json::from_str::<EngineConfig>(r#"{"rots": []}"#).is_err());
    }

    #[test]
    fn test_load_resolves_relative_paths() {
        let dir = tempfile::tempdir().unwrap();
        let base = Utf8Path::from_path(dir.path()).unwrap();
        let path = base.join("ludou.json");
        std::fs::write(
            &path,
            r#"{"roots": ["views", "/abs"], "cache": {"backend": "file", "dir": "cache"}}"#,
        )
        .unwrap();

        let config = EngineConfig::load(&path).unwrap();
        assert_eq!(config.roots, vec![base.join("views"), Utf8PathBuf::from("/abs")]);
        assert_eq!(config.cache, CacheConfig::File { dir: base.join("cache") });

        assert!(matches!(
            EngineConfig::load(&base.join("missing.json")),
            Err(ConfigError::Read { .. })
        ));
    }
}
