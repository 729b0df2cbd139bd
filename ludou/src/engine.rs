//! The template engine: lookup, compile, cache, render
//!
//! A render resolves the template's path, looks for a fresh artifact in
//! the cache and only parses and compiles on a miss. An artifact is fresh
//! when every file it was built from still has the recorded mtime and the
//! backend's entry is not older than the newest of them.

use crate::cache::{CacheBackend, CacheError, FileCache, MemoryCache, NullCache};
use crate::config::{CacheConfig, EngineConfig};
use crate::hash;
use crate::loader::{FileLoader, Loader};
use crate::template::compiler::{CompiledArtifact, Compiler};
use crate::template::directive::{Arity, DirectiveHandler, DirectiveRegistry};
use crate::template::error::{Result, TemplateError};
use crate::template::functions::Functions;
use crate::template::render;
use crate::template::value::{Context, Value};
use crate::types::{CacheKey, TemplateName, TemplateNameRef};
use camino::{Utf8Path, Utf8PathBuf};
use ignore::WalkBuilder;
use std::time::SystemTime;

/// Whether a compile produced a new artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompileStatus {
    Compiled,
    /// A fresh artifact was already cached
    Cached,
}

#[derive(Debug, Clone)]
pub struct CompileOutcome {
    pub name: TemplateName,
    pub key: CacheKey,
    /// Where the artifact is stored, for backends that write files
    pub artifact_path: Option<Utf8PathBuf>,
    pub status: CompileStatus,
}

#[derive(Debug)]
pub struct FailedTemplate {
    pub path: Utf8PathBuf,
    pub error: TemplateError,
}

/// Result of [`Engine::compile_all`]; paths are relative to the walked root
#[derive(Debug, Default)]
pub struct CompileAllReport {
    pub compiled: Vec<Utf8PathBuf>,
    pub cached: Vec<Utf8PathBuf>,
    pub failed: Vec<FailedTemplate>,
    pub total: usize,
}

pub struct Engine {
    config: EngineConfig,
    loader: Box<dyn Loader>,
    cache: Box<dyn CacheBackend>,
    directives: DirectiveRegistry,
    functions: Functions,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("cache", &self.cache.name())
            .field("directives", &self.directives)
            .field("functions", &self.functions)
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Engine reading templates from the configured roots, with the
    /// configured cache backend and the built-in functions and filters
    pub fn new(config: EngineConfig) -> std::result::Result<Self, CacheError> {
        let loader = FileLoader::new(config.roots.clone(), config.extensions.clone())
            .with_namespaces(config.namespaces.clone());
        let cache = cache_backend(&config.cache)?;
        Ok(Self {
            config,
            loader: Box::new(loader),
            cache,
            directives: DirectiveRegistry::new(),
            functions: Functions::with_builtins(),
        })
    }

    /// Engine over an explicit loader and cache backend
    pub fn with_parts(
        config: EngineConfig,
        loader: impl Loader + 'static,
        cache: impl CacheBackend + 'static,
    ) -> Self {
        Self {
            config,
            loader: Box::new(loader),
            cache: Box::new(cache),
            directives: DirectiveRegistry::new(),
            functions: Functions::with_builtins(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn cache(&self) -> &dyn CacheBackend {
        self.cache.as_ref()
    }

    pub fn loader(&self) -> &dyn Loader {
        self.loader.as_ref()
    }

    pub fn register_function<F>(&mut self, name: impl Into<String>, f: F)
    where
        F: Fn(&[Value]) -> std::result::Result<Value, String> + Send + Sync + 'static,
    {
        self.functions.register_function(name, f);
    }

    pub fn register_filter<F>(&mut self, name: impl Into<String>, f: F)
    where
        F: Fn(Value, &[Value]) -> std::result::Result<Value, String> + Send + Sync + 'static,
    {
        self.functions.register_filter(name, f);
    }

    /// Register a custom directive; see [`DirectiveRegistry::register`]
    pub fn register_directive(
        &mut self,
        name: impl Into<String>,
        arity: Arity,
        handler: impl DirectiveHandler + 'static,
    ) -> std::result::Result<(), String> {
        self.directives.register(name, arity, handler)
    }

    /// Render a template by logical name
    pub fn render(&self, name: &str, ctx: &Context) -> Result<String> {
        let name = TemplateNameRef::from_str(name);
        let (artifact, _) = self.artifact(name, self.config.force_recompile)?;
        render::render(&artifact, &self.functions, ctx)
    }

    /// [`Engine::render`] with a JSON object as the data context
    pub fn render_json(&self, name: &str, data: serde_json::Value) -> Result<String> {
        self.render(name, &Context::from_json(data))
    }

    /// Make sure a fresh artifact for `name` is cached
    pub fn compile(&self, name: &str) -> Result<CompileOutcome> {
        let name = TemplateNameRef::from_str(name);
        self.artifact(name, self.config.force_recompile)
            .map(|(_, outcome)| outcome)
    }

    /// Compile `name` even if a fresh artifact is cached
    pub fn recompile(&self, name: &str) -> Result<CompileOutcome> {
        let name = TemplateNameRef::from_str(name);
        self.artifact(name, true).map(|(_, outcome)| outcome)
    }

    /// Compile a template file by path
    pub fn compile_path(&self, path: &Utf8Path) -> Result<CompileOutcome> {
        self.compile(path.as_str())
    }

    /// Compile every template under `root`, for warming the cache before
    /// serving. Failures are collected, not fatal.
    pub fn compile_all(&self, root: &Utf8Path, force: bool) -> CompileAllReport {
        let mut report = CompileAllReport::default();
        let templates = self.discover(root);
        report.total = templates.len();

        for path in templates {
            let relative = path
                .strip_prefix(root)
                .map(Utf8Path::to_path_buf)
                .unwrap_or_else(|_| path.clone());
            let name = TemplateNameRef::from_str(path.as_str());
            match self.artifact(name, force || self.config.force_recompile) {
                Ok((_, outcome)) => match outcome.status {
                    CompileStatus::Compiled => report.compiled.push(relative),
                    CompileStatus::Cached => report.cached.push(relative),
                },
                Err(error) => {
                    tracing::warn!(template = %relative, %error, "failed to compile");
                    report.failed.push(FailedTemplate {
                        path: relative,
                        error,
                    });
                }
            }
        }

        tracing::info!(
            root = %root,
            compiled = report.compiled.len(),
            cached = report.cached.len(),
            failed = report.failed.len(),
            total = report.total,
            "compiled templates"
        );
        report
    }

    /// Drop every cached artifact
    pub fn flush_cache(&self) -> bool {
        self.cache.flush()
    }

    /// Template files under `root`, sorted. Hidden and ignore-listed files
    /// are included.
    fn discover(&self, root: &Utf8Path) -> Vec<Utf8PathBuf> {
        let mut found = Vec::new();
        for entry in WalkBuilder::new(root).standard_filters(false).build() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!(error = %e, "skipping unreadable entry");
                    continue;
                }
            };
            if !entry.file_type().is_some_and(|t| t.is_file()) {
                continue;
            }
            let Some(path) = Utf8Path::from_path(entry.path()) else {
                tracing::warn!(path = %entry.path().display(), "skipping non-UTF-8 path");
                continue;
            };
            let is_template = self
                .config
                .extensions
                .iter()
                .any(|ext| path.as_str().ends_with(&format!(".{ext}")));
            if is_template {
                found.push(path.to_path_buf());
            }
        }
        found.sort();
        found
    }

    /// A fresh artifact for `name`, compiling and caching it if needed
    fn artifact(
        &self,
        name: &TemplateNameRef,
        force: bool,
    ) -> Result<(CompiledArtifact, CompileOutcome)> {
        let path = self.loader.resolve(name)?;
        let key = hash::cache_key(&path, self.config.discriminator.as_deref());
        let outcome = |status, artifact_path| CompileOutcome {
            name: name.to_owned(),
            key: key.clone(),
            artifact_path,
            status,
        };

        if !force {
            if let Some(artifact) = self.cached(&key, &path) {
                tracing::debug!(template = %name, %key, "cache hit");
                let location = self.cache.location(&key);
                return Ok((artifact, outcome(CompileStatus::Cached, location)));
            }
        }

        let mut artifact = Compiler::new(self.loader.as_ref(), &self.directives, &self.functions)
            .compile(name)?;
        if self.config.optimize {
            artifact.optimize();
        }

        let location = match self.store(&key, &artifact) {
            Ok(()) => self.cache.location(&key),
            Err(error) => {
                tracing::warn!(
                    template = %name,
                    backend = self.cache.name(),
                    %error,
                    "failed to cache compiled template, rendering uncached"
                );
                None
            }
        };
        Ok((artifact, outcome(CompileStatus::Compiled, location)))
    }

    fn cached(&self, key: &CacheKey, path: &Utf8Path) -> Option<CompiledArtifact> {
        let Some(bytes) = self.cache.get(key) else {
            tracing::debug!(%key, %path, "cache miss");
            return None;
        };
        let artifact = CompiledArtifact::decode(&bytes)?;
        if artifact.template_path() != Some(path) {
            tracing::debug!(%key, %path, "cache entry belongs to another template");
            return None;
        }
        if artifact.is_stale(self.loader.as_ref()) {
            tracing::debug!(%key, %path, "cached artifact is stale");
            return None;
        }
        let newest = artifact
            .dependencies
            .iter()
            .filter_map(|dep| self.loader.modified(&dep.path))
            .max()
            .unwrap_or(SystemTime::UNIX_EPOCH);
        if !self.cache.is_fresh(key, newest) {
            tracing::debug!(%key, %path, "cache entry is older than its sources");
            return None;
        }
        Some(artifact)
    }

    fn store(&self, key: &CacheKey, artifact: &CompiledArtifact) -> std::result::Result<(), CacheError> {
        let bytes = artifact.encode().map_err(|source| CacheError::Serialize {
            name: artifact.name.clone(),
            source,
        })?;
        self.cache.put(key, &bytes, None)
    }
}

fn cache_backend(config: &CacheConfig) -> std::result::Result<Box<dyn CacheBackend>, CacheError> {
    let backend: Box<dyn CacheBackend> = match config {
        CacheConfig::None => Box::new(NullCache),
        CacheConfig::Memory { max_entries } => Box::new(MemoryCache::new(*max_entries)),
        CacheConfig::File { dir } => Box::new(FileCache::new(dir.clone())),
        #[cfg(feature = "redis")]
        CacheConfig::Redis {
            url,
            ttl_secs,
            prefix,
        } => Box::new(crate::cache::RedisCache::open(
            url,
            prefix.clone(),
            ttl_secs.map(std::time::Duration::from_secs),
        )?),
        #[cfg(not(feature = "redis"))]
        CacheConfig::Redis { .. } => {
            return Err(CacheError::Unavailable {
                backend: "redis",
                message: "ludou was built without the `redis` feature".to_string(),
            });
        }
    };
    Ok(backend)
}
