//! Ludou compiles `#`-directive templates into cached artifacts and renders
//! them against JSON-shaped data.
//!
//! ```ignore
//! use ludou::{Engine, EngineConfig};
//!
//! let engine = Engine::new(EngineConfig::new().with_root("views"))?;
//! let html = engine.render_json("pages.home", serde_json::json!({ "name": "Ana" }))?;
//! ```

pub mod cache;
pub mod config;
pub mod engine;
pub mod hash;
pub mod loader;
pub mod logging;
pub mod template;
pub mod types;

pub use cache::{CacheBackend, CacheError, FileCache, MemoryCache, NullCache};
pub use config::{CacheConfig, ConfigError, EngineConfig};
pub use engine::{CompileAllReport, CompileOutcome, CompileStatus, Engine, FailedTemplate};
pub use loader::{FileLoader, InMemoryLoader, Loader, TemplateFile};
pub use template::{Arity, Context, TemplateError, Value};
pub use types::{CacheKey, CacheKeyRef, TemplateName, TemplateNameRef};
