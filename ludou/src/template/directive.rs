//! Directive registry
//!
//! The built-in directives (`#if`, `#foreach`, `#extends`, ...) are part of
//! the grammar. Everything else goes through a [`DirectiveHandler`]
//! registered before the first compile, which lowers the raw argument text
//! into a [`Node`].

use super::ast::Node;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Names handled by the parser itself; they cannot be overridden
pub const BUILTIN_DIRECTIVES: &[&str] = &[
    "if",
    "elseif",
    "else",
    "endif",
    "foreach",
    "endforeach",
    "extends",
    "section",
    "endsection",
    "yield",
    "connect",
];

/// Compile-time lowering of a custom directive
pub trait DirectiveHandler: Send + Sync {
    /// `args` is the text between the parentheses, or empty when the
    /// directive was written without any.
    fn compile(&self, args: &str) -> Result<Node, String>;
}

impl<F> DirectiveHandler for F
where
    F: Fn(&str) -> Result<Node, String> + Send + Sync,
{
    fn compile(&self, args: &str) -> Result<Node, String> {
        self(args)
    }
}

/// Whether a directive takes a parenthesized argument
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    /// `#name`
    None,
    /// `#name` or `#name(...)`
    Optional,
    /// `#name(...)`
    Required,
}

#[derive(Clone)]
pub struct DirectiveDefinition {
    pub name: String,
    pub arity: Arity,
    pub handler: Arc<dyn DirectiveHandler>,
}

impl std::fmt::Debug for DirectiveDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectiveDefinition")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Default)]
pub struct DirectiveRegistry {
    custom: BTreeMap<String, DirectiveDefinition>,
}

impl DirectiveRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a custom directive. Built-in names are refused.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        arity: Arity,
        handler: impl DirectiveHandler + 'static,
    ) -> Result<(), String> {
        let name = name.into();
        if BUILTIN_DIRECTIVES.contains(&name.as_str()) {
            return Err(format!("`#{name}` is a built-in directive"));
        }
        let valid = name.chars().next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
            && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !valid {
            return Err(format!("`{name}` is not a valid directive name"));
        }
        tracing::debug!(directive = %name, "registered custom directive");
        self.custom.insert(
            name.clone(),
            DirectiveDefinition {
                name,
                arity,
                handler: Arc::new(handler),
            },
        );
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&DirectiveDefinition> {
        self.custom.get(name)
    }

    pub fn is_custom(&self, name: &str) -> bool {
        self.custom.contains_key(name)
    }

    /// Built-in and custom names, for diagnostics
    pub fn names(&self) -> Vec<String> {
        BUILTIN_DIRECTIVES
            .iter()
            .map(|s| s.to_string())
            .chain(self.custom.keys().cloned())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_lookup() {
        let mut registry = DirectiveRegistry::new();
        registry
            .register("csrf", Arity::None, |_: &str| -> Result<Node, String> {
                Ok(Node::Text("<input type=\"hidden\">".to_string()))
            })
            .unwrap();

        let def = registry.get("csrf").unwrap();
        assert_eq!(def.arity, Arity::None);
        assert_eq!(
            def.handler.compile("").unwrap(),
            Node::Text("<input type=\"hidden\">".to_string())
        );
        assert!(registry.names().contains(&"csrf".to_string()));
    }

    #[test]
    fn test_builtin_names_refused() {
        let mut registry = DirectiveRegistry::new();
        let handler = |_: &str| -> Result<Node, String> { Ok(Node::Text(String::new())) };
        assert!(registry.register("if", Arity::Required, handler).is_err());
        assert!(registry.register("has-dash", Arity::None, handler).is_err());
    }
}
