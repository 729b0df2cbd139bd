//! Strongly-typed string wrappers using aliri_braid
//!
//! Template names and cache keys are both "just strings" at runtime, but
//! mixing them up (looking up a cache entry by template name, say) is a bug
//! the compiler can catch for us.
//!
//! The `#[braid]` macro generates two types from each definition:
//!
//! - **Owned type** (e.g., `TemplateName`) - owns a `String`
//! - **Borrowed type** (e.g., `TemplateNameRef`) - a newtype over `str`
//!
//! ```ignore
//! let name = TemplateName::from_static("errors.404");
//! let key: &CacheKeyRef = CacheKeyRef::from_str("5f2b9c01d3e4a7b6");
//! ```

use aliri_braid::braid;

/// Logical template name.
/// Example: "errors.404", "layouts.app", "admin::users.index"
#[braid]
pub struct TemplateName;

/// Key under which a compiled artifact is stored in a cache backend.
#[braid]
pub struct CacheKey;

impl TemplateNameRef {
    /// Split a `namespace::name` reference into its parts.
    pub fn namespace(&self) -> (Option<&str>, &str) {
        match self.as_str().split_once("::") {
            Some((ns, rest)) => (Some(ns), rest),
            None => (None, self.as_str()),
        }
    }

    /// Whether this name is a file path rather than a dotted logical name.
    pub fn is_path_like(&self, extensions: &[String]) -> bool {
        let s = self.as_str();
        s.contains('/')
            || s.contains('\\')
            || extensions
                .iter()
                .any(|ext| s.ends_with(&format!(".{ext}")))
    }
}
