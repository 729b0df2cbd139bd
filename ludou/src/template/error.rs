//! Template errors with enough structure for good diagnostics
//!
//! Every compile-time error carries the template path, a best-effort line
//! number and the source span, so miette can render a snippet. Compile-time
//! errors fail the whole render before any output is produced.

use miette::{Diagnostic, NamedSource, SourceSpan};
use std::ops::Range;
use std::sync::Arc;
use thiserror::Error;

/// A template source file for error reporting
#[derive(Debug, Clone)]
pub struct TemplateSource {
    /// Name of the template (logical name or path)
    pub name: String,
    /// The full source text
    pub source: Arc<String>,
}

impl TemplateSource {
    pub fn new(name: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: Arc::new(source.into()),
        }
    }

    /// Create a NamedSource for miette
    pub fn named_source(&self) -> NamedSource<String> {
        NamedSource::new(&self.name, (*self.source).clone())
    }

    /// 1-based line number of a byte offset
    pub fn line_of(&self, offset: usize) -> usize {
        let end = offset.min(self.source.len());
        self.source.as_bytes()[..end]
            .iter()
            .filter(|&&b| b == b'\n')
            .count()
            + 1
    }

    pub fn syntax_error(&self, message: impl Into<String>, span: Range<usize>) -> TemplateError {
        TemplateSyntaxError {
            message: message.into(),
            path: self.name.clone(),
            line: self.line_of(span.start),
            span: span.into(),
            src: self.named_source(),
        }
        .into()
    }
}

/// All template errors
#[derive(Error, Debug, Diagnostic)]
pub enum TemplateError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    NotFound(#[from] TemplateNotFoundError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Syntax(#[from] TemplateSyntaxError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    UnknownDirective(#[from] UnknownDirectiveError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    UnknownFilter(#[from] UnknownFilterError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    UnknownFunction(#[from] UnknownFunctionError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    BlockedFunction(#[from] BlockedFunctionError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Render(#[from] RenderError),

    #[error("Failed to read `{path}`")]
    #[diagnostic(code(ludou::io))]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T, E = TemplateError> = std::result::Result<T, E>;

/// The logical name did not resolve under any template root
#[derive(Error, Debug, Diagnostic)]
#[error("Template `{name}` not found")]
#[diagnostic(
    code(ludou::not_found),
    help("Searched: {}", searched.join(", "))
)]
pub struct TemplateNotFoundError {
    pub name: String,
    /// Candidate paths that were tried, in order
    pub searched: Vec<String>,
}

/// Malformed template: unbalanced directives, bad expression, misplaced `#extends`...
#[derive(Error, Debug, Diagnostic)]
#[error("{path}:{line}: {message}")]
#[diagnostic(code(ludou::syntax))]
pub struct TemplateSyntaxError {
    pub message: String,
    pub path: String,
    pub line: usize,
    #[label("here")]
    pub span: SourceSpan,
    #[source_code]
    pub src: NamedSource<String>,
}

/// `#name(...)` where `name` is not a registered directive
#[derive(Error, Debug, Diagnostic)]
#[error("{path}:{line}: unknown directive `#{name}`")]
#[diagnostic(
    code(ludou::unknown_directive),
    help("Registered directives: {}", known.join(", "))
)]
pub struct UnknownDirectiveError {
    pub name: String,
    pub known: Vec<String>,
    pub path: String,
    pub line: usize,
    #[label("this directive doesn't exist")]
    pub span: SourceSpan,
    #[source_code]
    pub src: NamedSource<String>,
}

/// Unknown filter
#[derive(Error, Debug, Diagnostic)]
#[error("{path}:{line}: unknown filter `{name}`")]
#[diagnostic(
    code(ludou::unknown_filter),
    help("Available filters: {}", known_filters.join(", "))
)]
pub struct UnknownFilterError {
    /// The filter that doesn't exist
    pub name: String,
    /// Known filters
    pub known_filters: Vec<String>,
    pub path: String,
    pub line: usize,
    #[label("this filter doesn't exist")]
    pub span: SourceSpan,
    #[source_code]
    pub src: NamedSource<String>,
}

/// Call to a function that was never registered
#[derive(Error, Debug, Diagnostic)]
#[error("{path}:{line}: unknown function `{name}`")]
#[diagnostic(
    code(ludou::unknown_function),
    help("Available functions: {}", known_functions.join(", "))
)]
pub struct UnknownFunctionError {
    pub name: String,
    pub known_functions: Vec<String>,
    pub path: String,
    pub line: usize,
    #[label("this function isn't registered")]
    pub span: SourceSpan,
    #[source_code]
    pub src: NamedSource<String>,
}

/// Deny-list hit. Raised at compile time, never at render time.
#[derive(Error, Debug, Diagnostic)]
#[error("{path}:{line}: `{name}` may not be called from a template")]
#[diagnostic(
    code(ludou::blocked_function),
    help("Process execution, filesystem writes and dynamic code execution are never available")
)]
pub struct BlockedFunctionError {
    pub name: String,
    pub path: String,
    pub line: usize,
    #[label("blocked")]
    pub span: SourceSpan,
    #[source_code]
    pub src: NamedSource<String>,
}

/// A registered function or filter failed while rendering
#[derive(Error, Debug, Diagnostic)]
#[error("Rendering `{template}` failed in `{callable}`: {message}")]
#[diagnostic(code(ludou::render))]
pub struct RenderError {
    pub template: String,
    pub callable: String,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_of() {
        let src = TemplateSource::new("t", "a\nb\nc");
        assert_eq!(src.line_of(0), 1);
        assert_eq!(src.line_of(2), 2);
        assert_eq!(src.line_of(4), 3);
        assert_eq!(src.line_of(100), 3);
    }

    #[test]
    fn test_syntax_error_display() {
        let src = TemplateSource::new("pages.home", "x\n#if(1)");
        let err = src.syntax_error("unclosed #if", 2..8);
        assert_eq!(err.to_string(), "pages.home:2: unclosed #if");
    }
}
