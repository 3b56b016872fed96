//! Per-file validation pipeline

use handlebars::Template;
use tracing::{debug, warn};

use super::result::{IssueKind, Layer, Location, ValidationIssue, ValidationResult};
use super::{quality, schema, security, semantic};
use crate::config::Config;
use crate::error::LoadError;
use crate::spec::{DocumentScope, SpecDocument, Specification};
use crate::template::{TemplateFacts, analyze, compile};

/// A document that passed every blocking layer
#[derive(Debug, Clone)]
pub struct Validated {
    pub spec: Specification,
    pub template: Template,
    pub facts: TemplateFacts,
}

/// Runs schema, semantic, security and quality layers over one document
#[derive(Debug, Clone)]
pub struct Validator {
    strict: bool,
    quality: bool,
    max_template_bytes: usize,
}

impl Default for Validator {
    fn default() -> Self {
        Self {
            strict: true,
            quality: true,
            max_template_bytes: 64 * 1024,
        }
    }
}

impl Validator {
    pub fn new(strict: bool, quality: bool, max_template_bytes: usize) -> Self {
        Self {
            strict,
            quality,
            max_template_bytes,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.validation.strict,
            config.validation.quality,
            config.limits.max_template_bytes,
        )
    }

    /// Validate `doc`; `scope` supplies the documents it may extend
    ///
    /// The template is only compiled once the static security scan is clean.
    /// Returns the result and, when no layer reported an error, the typed
    /// specification with its compiled template.
    pub fn validate(&self, doc: &SpecDocument, scope: &DocumentScope) -> (ValidationResult, Option<Validated>) {
        debug!(path = ?doc.path, "Validator::validate: called");
        let mut result = ValidationResult::new(&doc.path);
        result.id = doc.identifier().map(str::to_string);
        result.record(Layer::Parse, Vec::new());

        result.record(Layer::Schema, schema::check(doc, self.strict));
        if !result.passed() {
            debug!(path = ?doc.path, errors = result.errors.len(), "Validator::validate: schema failed");
            for layer in [Layer::Semantic, Layer::Security, Layer::Quality] {
                result.skip(layer);
            }
            return (result, None);
        }

        let source = doc.template_source().unwrap_or_default();
        let static_issues = security::check_static(doc, source, self.max_template_bytes);
        let compiled = if static_issues.is_empty() {
            Some(compile(source))
        } else {
            None
        };

        let mut semantic_issues = semantic::check_declarations(doc);
        semantic_issues.extend(semantic::check_includes(doc, source));
        let params = match semantic::resolve_parameters(doc, scope) {
            Ok(params) => Some(params),
            Err(issue) => {
                semantic_issues.push(issue);
                None
            }
        };
        let template = match compiled {
            Some(Ok(template)) => Some(template),
            Some(Err(e)) => {
                semantic_issues.push(semantic::compile_error(doc, &e));
                None
            }
            None => None,
        };
        let facts = template.as_ref().map(analyze);
        if let (Some(params), Some(facts)) = (&params, &facts) {
            semantic_issues.extend(semantic::check_references(doc, params, facts));
        }
        result.record(Layer::Semantic, semantic_issues);

        let mut security_issues = static_issues;
        if let Some(facts) = &facts {
            security_issues.extend(security::check_capabilities(doc, facts));
        }
        if !security_issues.is_empty() {
            warn!(path = ?doc.path, count = security_issues.len(), "Validator::validate: security findings");
        }
        result.record(Layer::Security, security_issues);

        match (&params, &facts) {
            (Some(params), Some(facts)) if self.quality => {
                result.record(Layer::Quality, quality::check(doc, params, facts));
            }
            _ => result.skip(Layer::Quality),
        }

        if !result.passed() {
            return (result, None);
        }
        let (Some(params), Some(template), Some(facts)) = (params, template, facts) else {
            return (result, None);
        };
        match Specification::from_document(doc, params) {
            Ok(spec) => {
                debug!(id = %spec.id, "Validator::validate: passed");
                (result, Some(Validated { spec, template, facts }))
            }
            Err(message) => {
                let issue = ValidationIssue::error(Layer::Schema, IssueKind::SchemaError, message, doc.locate("metadata"));
                result.record(Layer::Schema, vec![issue]);
                (result, None)
            }
        }
    }
}

/// Result for a file that never became a document
pub fn load_failure(err: &LoadError) -> ValidationResult {
    let mut result = ValidationResult::new(err.path());
    let (line, column) = err.position();
    let (layer, kind) = match err {
        LoadError::Io { .. } | LoadError::Parse { .. } => (Layer::Parse, IssueKind::ParseError),
        LoadError::NotFound { .. } => (Layer::Parse, IssueKind::NotFound),
        LoadError::IncludeDepthExceeded { .. } => (Layer::Parse, IssueKind::IncludeDepthExceeded),
        LoadError::IncludeOutsideRoot { .. } => (Layer::Security, IssueKind::SecurityViolation),
    };
    let mut location = if matches!(err, LoadError::Io { .. } | LoadError::Parse { .. }) {
        Location::default()
    } else {
        Location::at("template.source")
    };
    location.line = line;
    location.column = column;

    let issue = ValidationIssue::error(layer, kind, err.to_string(), location);
    result.record(layer, vec![issue]);
    if layer != Layer::Parse {
        result.record(Layer::Parse, Vec::new());
    }
    for layer in [Layer::Schema, Layer::Semantic, Layer::Security, Layer::Quality] {
        if result.layer(layer).is_none() {
            result.skip(layer);
        }
    }
    result
}
