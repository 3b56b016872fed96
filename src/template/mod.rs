//! Sandboxed template engine
//!
//! Compilation, static analysis and resource-bounded rendering on top of
//! handlebars, plus resolution of invocation values into a render context.

mod ast;
mod context;
mod renderer;
mod sandbox;

pub use ast::{Comparison, HelperUse, Span, TemplateFacts, VariableRef, analyze, root_variable};
pub use context::{RenderContext, check_value, representative_values};
pub use renderer::{RenderLimits, TemplateRenderer, compile, resource_limit};
pub use sandbox::{CONTROL_HELPERS, STRING_FILTERS, is_allowed_helper};

pub use handlebars::Template;
