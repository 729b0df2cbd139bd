//! Template lookup
//!
//! A logical name such as `errors.404` resolves to `errors/404.<ext>` under
//! the first root that has it; `admin::users.index` resolves under the
//! `admin` namespace directory instead. Names that already look like paths
//! are used as given, relative to the roots.

use crate::template::error::{Result, TemplateError, TemplateNotFoundError, TemplateSource};
use crate::types::{TemplateName, TemplateNameRef};
use camino::{Utf8Path, Utf8PathBuf};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

/// A template read from its backing store
#[derive(Debug, Clone)]
pub struct TemplateFile {
    pub name: TemplateName,
    /// Resolved location; this is the template's identity for caching
    pub path: Utf8PathBuf,
    pub source: TemplateSource,
    pub modified: SystemTime,
}

pub trait Loader: Send + Sync {
    /// Resolve a logical name to the path that identifies it
    fn resolve(&self, name: &TemplateNameRef) -> Result<Utf8PathBuf>;

    /// Read the template behind `name`
    fn load(&self, name: &TemplateNameRef) -> Result<TemplateFile>;

    /// Live modification time of a resolved path, `None` if it is gone
    fn modified(&self, path: &Utf8Path) -> Option<SystemTime>;
}

impl<L: Loader + ?Sized> Loader for Arc<L> {
    fn resolve(&self, name: &TemplateNameRef) -> Result<Utf8PathBuf> {
        (**self).resolve(name)
    }

    fn load(&self, name: &TemplateNameRef) -> Result<TemplateFile> {
        (**self).load(name)
    }

    fn modified(&self, path: &Utf8Path) -> Option<SystemTime> {
        (**self).modified(path)
    }
}

/// Loads templates from directories on disk
#[derive(Debug, Clone)]
pub struct FileLoader {
    roots: Vec<Utf8PathBuf>,
    namespaces: BTreeMap<String, Utf8PathBuf>,
    extensions: Vec<String>,
}

impl FileLoader {
    pub fn new(roots: Vec<Utf8PathBuf>, extensions: Vec<String>) -> Self {
        Self {
            roots,
            namespaces: BTreeMap::new(),
            extensions,
        }
    }

    pub fn with_namespaces(mut self, namespaces: BTreeMap<String, Utf8PathBuf>) -> Self {
        self.namespaces = namespaces;
        self
    }

    /// Candidate paths for `name`, in lookup order
    pub fn candidates(&self, name: &TemplateNameRef) -> Vec<Utf8PathBuf> {
        let (namespace, rest) = name.namespace();
        let roots: Vec<&Utf8Path> = match namespace {
            Some(ns) => self.namespaces.get(ns).map(|p| p.as_path()).into_iter().collect(),
            None => self.roots.iter().map(|p| p.as_path()).collect(),
        };

        if TemplateNameRef::from_str(rest).is_path_like(&self.extensions) {
            let rest = Utf8Path::new(rest);
            if rest.is_absolute() {
                return vec![rest.to_path_buf()];
            }
            return roots.iter().map(|root| root.join(rest)).collect();
        }

        let relative = rest.replace('.', "/");
        let relative = relative.as_str();
        roots
            .iter()
            .flat_map(|root| {
                self.extensions
                    .iter()
                    .map(move |ext| root.join(format!("{relative}.{ext}")))
            })
            .collect()
    }
}

impl Loader for FileLoader {
    fn resolve(&self, name: &TemplateNameRef) -> Result<Utf8PathBuf> {
        let candidates = self.candidates(name);
        match candidates.iter().find(|p| p.is_file()) {
            Some(found) => Ok(found.canonicalize_utf8().unwrap_or_else(|_| found.clone())),
            None => Err(TemplateNotFoundError {
                name: name.to_string(),
                searched: candidates.iter().map(|p| p.to_string()).collect(),
            }
            .into()),
        }
    }

    fn load(&self, name: &TemplateNameRef) -> Result<TemplateFile> {
        let path = self.resolve(name)?;
        // stat first: a concurrent write leaves the mtime older than the text
        let read = std::fs::metadata(&path)
            .and_then(|meta| meta.modified())
            .and_then(|modified| Ok((std::fs::read_to_string(&path)?, modified)));
        let (text, modified) = read.map_err(|source| TemplateError::Io {
            path: path.to_string(),
            source,
        })?;
        tracing::debug!(template = %name, %path, "loaded template source");
        Ok(TemplateFile {
            name: name.to_owned(),
            source: TemplateSource::new(name.as_str(), text),
            path,
            modified,
        })
    }

    fn modified(&self, path: &Utf8Path) -> Option<SystemTime> {
        std::fs::metadata(path).and_then(|m| m.modified()).ok()
    }
}

/// Templates held in memory, for tests and embedding. Every `set` advances
/// a logical clock, so rewriting a template always makes it newer.
#[derive(Debug, Default)]
pub struct InMemoryLoader {
    templates: RwLock<HashMap<String, (String, SystemTime)>>,
    clock: AtomicU64,
}

impl InMemoryLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style [`InMemoryLoader::set`]
    pub fn with(self, name: impl Into<String>, source: impl Into<String>) -> Self {
        self.set(name, source);
        self
    }

    /// Add or replace a template
    pub fn set(&self, name: impl Into<String>, source: impl Into<String>) {
        let modified = self.tick();
        self.templates
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(name.into(), (source.into(), modified));
    }

    /// Bump a template's modification time without changing its text
    pub fn touch(&self, name: &str) {
        let modified = self.tick();
        if let Some(entry) = self
            .templates
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get_mut(name)
        {
            entry.1 = modified;
        }
    }

    pub fn remove(&self, name: &str) {
        self.templates
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .remove(name);
    }

    fn tick(&self) -> SystemTime {
        let n = self.clock.fetch_add(1, Ordering::SeqCst) + 1;
        SystemTime::UNIX_EPOCH + Duration::from_secs(n)
    }
}

impl Loader for InMemoryLoader {
    fn resolve(&self, name: &TemplateNameRef) -> Result<Utf8PathBuf> {
        let templates = self
            .templates
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if templates.contains_key(name.as_str()) {
            Ok(Utf8PathBuf::from(name.as_str()))
        } else {
            Err(TemplateNotFoundError {
                name: name.to_string(),
                searched: vec![format!("memory:{name}")],
            }
            .into())
        }
    }

    fn load(&self, name: &TemplateNameRef) -> Result<TemplateFile> {
        let path = self.resolve(name)?;
        let templates = self
            .templates
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let Some((text, modified)) = templates.get(name.as_str()) else {
            return Err(TemplateNotFoundError {
                name: name.to_string(),
                searched: vec![format!("memory:{name}")],
            }
            .into());
        };
        Ok(TemplateFile {
            name: name.to_owned(),
            path,
            source: TemplateSource::new(name.as_str(), text.clone()),
            modified: *modified,
        })
    }

    fn modified(&self, path: &Utf8Path) -> Option<SystemTime> {
        self.templates
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(path.as_str())
            .map(|(_, modified)| *modified)
    }
}
