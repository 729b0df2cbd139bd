//! The Ludou template language
//!
//! ```text
//! #[$user.name | upper]             - Escaped expression output
//! #[raw($html)]                     - Unescaped output
//! #if($x > 1) ... #elseif($y) ... #else ... #endif
//! #foreach($items as $key => $item) ... #endforeach
//! #extends["layouts.app"]           - Layout inheritance
//! #section("title") ... #endsection - Named content block
//! #yield("title", "Default")        - Section placeholder in a layout
//! #connect("partials.nav")          - Inline another template
//! #-- comment --#
//! ```
//!
//! Source goes through [`lexer::scan`] and [`parser::parse`] into an
//! [`ast::Node`] tree. [`compiler::Compiler`] resolves inheritance and
//! partials into a [`compiler::CompiledArtifact`], which [`render::render`]
//! evaluates against a [`value::Context`].

pub mod ast;
pub mod compiler;
pub mod directive;
pub mod error;
pub mod expr;
pub mod functions;
pub mod lexer;
pub mod optimize;
pub mod parser;
pub mod render;
pub mod security;
pub mod value;

pub use compiler::{CompiledArtifact, Compiler};
pub use directive::{Arity, DirectiveHandler, DirectiveRegistry};
pub use error::{Result, TemplateError, TemplateSource};
pub use functions::Functions;
pub use value::{Context, Value};
