//! # mext
//!
//! A text template engine for composing prompts from literal text, brace
//! field substitutions, and `@`-prefixed directives (variable binding,
//! conditionals, loops, file inclusion, data import, and formatting).

pub mod config;
pub mod debug;
pub mod directive;
pub mod error;
pub mod formatters;
pub mod interpreter;
pub mod lexer;
pub mod loader;
pub mod resolve;
pub mod value;
pub mod whitespace;

pub use error::{MextError, MextResult, SourceLocation};
pub use formatters::FormatterFn;
pub use interpreter::{Callback, CallbacksGuard, Parser, ParamsGuard, TemplateGuard};
pub use loader::{FileTemplateLoader, TemplateCache, TemplateLoader};
pub use value::{Scope, Value};

use std::path::Path;

use indexmap::IndexMap;

/// Renders a template string with the given params, no input callbacks, and
/// the default filesystem loader. A one-shot convenience wrapper around
/// [`Parser::render`] for callers that don't need a reusable engine.
pub fn render(template: &str, params: IndexMap<String, Value>) -> MextResult<String> {
    Parser::new().render(template.to_string(), None, params, IndexMap::new())
}

/// Renders a template file with the given params.
pub fn render_file(path: &Path, params: IndexMap<String, Value>) -> MextResult<String> {
    Parser::new().render_file(path, params, IndexMap::new())
}
