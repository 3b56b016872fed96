//! Template compilation and resource-bounded rendering

use handlebars::{Context, RenderErrorReason, Template};
use serde_json::Value as Json;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::sandbox::{RenderBudget, build_registry};
use crate::error::{RenderError, ResourceLimit};

const ENTRY_TEMPLATE: &str = "__promptd_entry";

/// Ceilings enforced on every render
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderLimits {
    /// Total `each` iterations across the whole render
    pub max_loop_iterations: usize,
    /// Wall-clock budget
    pub timeout: Duration,
    /// Largest output accepted
    pub max_output_bytes: usize,
}

impl Default for RenderLimits {
    fn default() -> Self {
        Self {
            max_loop_iterations: 1000,
            timeout: Duration::from_millis(2000),
            max_output_bytes: 256 * 1024,
        }
    }
}

/// Output sink that charges every write against the budget
struct LimitedWriter {
    buf: Vec<u8>,
    budget: Arc<RenderBudget>,
}

impl io::Write for LimitedWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.budget
            .charge_output(data.len())
            .map_err(|limit| io::Error::other(limit.to_string()))?;
        self.buf.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Compile template text into an AST
pub fn compile(source: &str) -> Result<Template, RenderError> {
    Template::compile(source).map_err(|e| {
        let (line, column) = e.pos().map(|(l, c)| (Some(l), Some(c))).unwrap_or((None, None));
        RenderError::Compile {
            message: e.reason().to_string(),
            line,
            column,
        }
    })
}

/// Renders compiled templates inside the sandbox
///
/// Every call builds a fresh registry with its own budget, so concurrent
/// renders never share iteration counts or deadlines.
#[derive(Debug, Clone, Default)]
pub struct TemplateRenderer {
    limits: RenderLimits,
}

impl TemplateRenderer {
    pub fn new(limits: RenderLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> &RenderLimits {
        &self.limits
    }

    /// Render `template` against `data`; partial output is discarded on failure
    pub fn render(&self, template: &Template, data: &Json) -> Result<String, RenderError> {
        let budget = RenderBudget::new(self.limits.clone());
        let mut registry = build_registry(budget.clone());
        registry.register_template(ENTRY_TEMPLATE, template.clone());

        let ctx = Context::wraps(data).map_err(|e| RenderError::Failed(e.to_string()))?;
        let mut writer = LimitedWriter {
            buf: Vec::new(),
            budget: budget.clone(),
        };

        let outcome = registry.render_with_context_to_write(ENTRY_TEMPLATE, &ctx, &mut writer);
        if let Err(e) = outcome {
            let mapped = map_render_error(&e, &budget);
            debug!(error = %mapped, iterations = budget.iterations(), "TemplateRenderer::render: failed");
            return Err(mapped);
        }
        if let Err(limit) = budget.check_deadline() {
            return Err(RenderError::ResourceLimitExceeded(limit));
        }

        String::from_utf8(writer.buf).map_err(|e| RenderError::Failed(e.to_string()))
    }

    /// Compile and render in one step
    pub fn render_source(&self, source: &str, data: &Json) -> Result<String, RenderError> {
        let template = compile(source)?;
        self.render(&template, data)
    }
}

fn map_render_error(e: &handlebars::RenderError, budget: &RenderBudget) -> RenderError {
    if let Some(limit) = budget.breach() {
        return RenderError::ResourceLimitExceeded(limit);
    }
    match e.reason() {
        RenderErrorReason::MissingVariable(path) => RenderError::UndefinedVariable {
            name: path.clone().unwrap_or_else(|| "<unknown>".to_string()),
        },
        RenderErrorReason::HelperNotFound(name) | RenderErrorReason::DecoratorNotFound(name) => {
            RenderError::HelperNotAllowed(name.clone())
        }
        RenderErrorReason::PartialNotFound(name) => RenderError::HelperNotAllowed(format!("> {name}")),
        other => RenderError::Failed(other.to_string()),
    }
}

/// Resource limit carried by an error, if it is one
pub fn resource_limit(err: &RenderError) -> Option<&ResourceLimit> {
    match err {
        RenderError::ResourceLimitExceeded(limit) => Some(limit),
        _ => None,
    }
}
