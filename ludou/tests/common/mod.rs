//! Shared setup for the integration tests
#![allow(dead_code)]

use camino::{Utf8Path, Utf8PathBuf};
use ludou::{CacheConfig, Engine, EngineConfig, InMemoryLoader, MemoryCache};
use std::sync::{Arc, LazyLock};
use std::time::Instant;
use tempfile::TempDir;
use tracing_subscriber::filter::Targets;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::time::FormatTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

static START_TIME: LazyLock<Instant> = LazyLock::new(Instant::now);

struct Uptime;

impl FormatTime for Uptime {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        let elapsed = START_TIME.elapsed();
        write!(w, "{:4}.{:03}s", elapsed.as_secs(), elapsed.subsec_millis())
    }
}

static SUBSCRIBER_INIT: LazyLock<()> = LazyLock::new(|| {
    let _ = *START_TIME;

    // LUDOU_LOG=ludou=debug shows cache hits and misses
    let filter = std::env::var("LUDOU_LOG")
        .ok()
        .and_then(|s| s.parse::<Targets>().ok())
        .unwrap_or_else(|| Targets::new().with_default(tracing::Level::INFO));

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_test_writer()
                .with_timer(Uptime)
                .with_target(false)
                .with_file(true)
                .with_line_number(true)
                .compact(),
        )
        .with(filter)
        .try_init()
        .ok();
});

/// Install the test tracing subscriber, once per process
pub fn setup() {
    #[allow(clippy::let_unit_value)]
    let _ = *SUBSCRIBER_INIT;
}

/// Template files under a temporary `views/` directory, with a sibling
/// `cache/` directory for file-backed engines
pub struct TemplateTree {
    _dir: TempDir,
    base: Utf8PathBuf,
}

impl TemplateTree {
    pub fn new() -> Self {
        setup();
        let dir = tempfile::tempdir().unwrap();
        let base = Utf8Path::from_path(dir.path()).unwrap().to_path_buf();
        std::fs::create_dir_all(base.join("views")).unwrap();
        Self { _dir: dir, base }
    }

    pub fn root(&self) -> Utf8PathBuf {
        self.base.join("views")
    }

    pub fn cache_dir(&self) -> Utf8PathBuf {
        self.base.join("cache")
    }

    /// Write `views/<relative>`, creating parent directories
    pub fn write(&self, relative: &str, source: &str) -> Utf8PathBuf {
        let path = self.root().join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&path, source).unwrap();
        path
    }

    pub fn config(&self) -> EngineConfig {
        EngineConfig::new()
            .with_root(self.root())
            .with_cache(CacheConfig::File {
                dir: self.cache_dir(),
            })
    }

    /// Engine over this tree with a file cache in `cache/`
    pub fn engine(&self) -> Engine {
        Engine::new(self.config()).unwrap()
    }
}

/// Engine over in-memory templates; the loader and cache handles stay
/// usable for editing templates and inspecting entries
pub struct MemoryFixture {
    pub engine: Engine,
    pub loader: Arc<InMemoryLoader>,
    pub cache: Arc<MemoryCache>,
}

pub fn memory_engine(templates: &[(&str, &str)]) -> MemoryFixture {
    memory_engine_with(EngineConfig::new(), templates)
}

pub fn memory_engine_with(config: EngineConfig, templates: &[(&str, &str)]) -> MemoryFixture {
    setup();
    let loader = Arc::new(InMemoryLoader::new());
    for (name, source) in templates {
        loader.set(*name, *source);
    }
    let cache = Arc::new(MemoryCache::new(64));
    let engine = Engine::with_parts(config, Arc::clone(&loader), Arc::clone(&cache));
    MemoryFixture {
        engine,
        loader,
        cache,
    }
}

/// Collapse every whitespace run to one space and trim
pub fn squash(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}
