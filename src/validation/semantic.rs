//! Cross-field checks
//!
//! Needs a schema-valid document. Resolves the `extends` chain, then checks
//! template references against the effective parameter set and the
//! parameter declarations against themselves.

use regex::Regex;
use std::collections::HashSet;
use tracing::debug;

use super::result::{IssueKind, Layer, ValidationIssue};
use crate::error::RenderError;
use crate::spec::{
    DocumentScope, InheritanceError, ParamType, ParameterSchema, ParameterSpec, SpecDocument, effective_parameters,
    parameter_entries, parse_include_directive,
};
use crate::template::{TemplateFacts, check_value};

fn error(doc: &SpecDocument, kind: IssueKind, path: &str, message: impl Into<String>) -> ValidationIssue {
    ValidationIssue::error(Layer::Semantic, kind, message, doc.locate(path))
}

/// Resolve the effective parameter set, reporting inheritance failures
pub fn resolve_parameters(
    doc: &SpecDocument,
    scope: &DocumentScope,
) -> Result<ParameterSchema, ValidationIssue> {
    effective_parameters(doc, scope).map_err(|e| {
        let kind = match e {
            InheritanceError::Cycle(_) => IssueKind::CircularReference,
            InheritanceError::UnknownParent { .. } | InheritanceError::Invalid { .. } => IssueKind::SemanticError,
        };
        error(doc, kind, "extends", e.to_string())
    })
}

/// Declaration-level checks on the document's own parameters
pub fn check_declarations(doc: &SpecDocument) -> Vec<ValidationIssue> {
    debug!(path = ?doc.path, "semantic::check_declarations: called");
    let mut issues = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();

    for entry in parameter_entries(&doc.root) {
        let Some(name) = entry.name.clone() else {
            continue;
        };
        if !seen.insert(name.clone()) {
            issues.push(error(
                doc,
                IssueKind::SemanticError,
                &entry.pointer,
                format!("parameter '{name}' is declared more than once"),
            ));
            continue;
        }
        let param = match ParameterSpec::from_yaml(&name, entry.def) {
            Ok(p) => p,
            Err(message) => {
                issues.push(error(doc, IssueKind::SemanticError, &entry.pointer, message));
                continue;
            }
        };
        issues.extend(check_parameter(doc, &param, &entry.pointer));
    }
    issues
}

fn check_parameter(doc: &SpecDocument, param: &ParameterSpec, pointer: &str) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    let c = &param.constraints;

    if param.param_type == ParamType::Enum && param.values.is_empty() {
        issues.push(error(
            doc,
            IssueKind::SemanticError,
            &format!("{pointer}.values"),
            format!("enum parameter '{}' declares no allowed values", param.name),
        ));
    }

    if let Some(pattern) = &c.pattern
        && let Err(e) = Regex::new(pattern)
    {
        issues.push(error(
            doc,
            IssueKind::SemanticError,
            &format!("{pointer}.constraints.pattern"),
            format!("invalid pattern for '{}': {e}", param.name),
        ));
    }

    let inverted = matches!((c.min, c.max), (Some(lo), Some(hi)) if lo > hi)
        || matches!((c.min_length, c.max_length), (Some(lo), Some(hi)) if lo > hi)
        || matches!((c.min_items, c.max_items), (Some(lo), Some(hi)) if lo > hi);
    if inverted {
        issues.push(error(
            doc,
            IssueKind::SemanticError,
            &format!("{pointer}.constraints"),
            format!("constraints of '{}' have a minimum above the maximum", param.name),
        ));
    }

    if let Some(default) = &param.default
        && !(param.param_type == ParamType::Enum && param.values.is_empty())
        && issues.is_empty()
        && let Err(e) = check_value(param, default)
    {
        issues.push(error(
            doc,
            IssueKind::SemanticError,
            &format!("{pointer}.default"),
            format!("default does not satisfy its declaration: {e}"),
        ));
    }
    issues
}

/// Template references against the effective parameters
pub fn check_references(doc: &SpecDocument, params: &ParameterSchema, facts: &TemplateFacts) -> Vec<ValidationIssue> {
    debug!(path = ?doc.path, refs = facts.variables.len(), "semantic::check_references: called");
    let mut issues = Vec::new();
    let mut reported: HashSet<&str> = HashSet::new();

    for var in &facts.variables {
        if params.get(&var.name).is_some() || !reported.insert(&var.name) {
            continue;
        }
        let location = if var.span.line > 0 {
            doc.template_location(var.span.line, var.span.column)
        } else {
            doc.locate("template.source")
        };
        issues.push(ValidationIssue::error(
            Layer::Semantic,
            IssueKind::SemanticError,
            format!("Template references undeclared parameter '{}'", var.name),
            location,
        ));
    }

    for entry in parameter_entries(&doc.root) {
        if let Some(name) = &entry.name
            && !facts.references(name)
        {
            issues.push(ValidationIssue::warning(
                Layer::Semantic,
                IssueKind::Quality,
                format!("Parameter '{name}' is never referenced by the template"),
                doc.locate(&entry.pointer),
            ));
        }
    }
    issues
}

/// Include directives left in the template after loading
pub fn check_includes(doc: &SpecDocument, source: &str) -> Vec<ValidationIssue> {
    source
        .lines()
        .filter_map(parse_include_directive)
        .map(|target| {
            error(
                doc,
                IssueKind::SemanticError,
                "template.source",
                format!("unresolved include '{target}'"),
            )
        })
        .collect()
}

/// Template compile failure as a semantic issue
pub fn compile_error(doc: &SpecDocument, err: &RenderError) -> ValidationIssue {
    let location = match err {
        RenderError::Compile {
            line: Some(line),
            column,
            ..
        } => doc.template_location(*line, column.unwrap_or(1)),
        _ => doc.locate("template.source"),
    };
    ValidationIssue::error(Layer::Semantic, IssueKind::SemanticError, err.to_string(), location)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::SpecLoader;
    use crate::template::{analyze, compile};
    use std::path::Path;
    use std::sync::Arc;

    fn load(name: &str, yaml: &str) -> SpecDocument {
        SpecLoader::default()
            .load_str(Path::new(&format!("{name}.yml")), yaml.to_string())
            .unwrap()
    }

    #[test]
    fn test_undeclared_variable_named() {
        let doc = load(
            "a",
            "metadata: { name: a }\nparameters:\n  topic: { type: string }\ntemplate:\n  source: \"{{topic}} {{audience}}\"\n",
        );
        let params = ParameterSchema::from_document(&doc.root).unwrap();
        let facts = analyze(&compile(doc.template_source().unwrap()).unwrap());
        let issues = check_references(&doc, &params, &facts);
        let errors: Vec<_> = issues.iter().filter(|i| i.is_error()).collect();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("'audience'"));
        assert_eq!(errors[0].location.path.as_deref(), Some("template.source"));
        assert_eq!(errors[0].location.line, Some(5));
    }

    #[test]
    fn test_unreferenced_parameter_is_warning() {
        let doc = load(
            "a",
            "metadata: { name: a }\nparameters:\n  topic: { type: string }\n  unused: { type: int }\ntemplate:\n  source: \"{{topic}}\"\n",
        );
        let params = ParameterSchema::from_document(&doc.root).unwrap();
        let facts = analyze(&compile(doc.template_source().unwrap()).unwrap());
        let issues = check_references(&doc, &params, &facts);
        assert_eq!(issues.len(), 1);
        assert!(!issues[0].is_error());
        assert_eq!(issues[0].location.path.as_deref(), Some("parameters.unused"));
    }

    #[test]
    fn test_duplicate_parameter_in_list_form() {
        let doc = load(
            "a",
            "parameters:\n  - { name: x, type: string }\n  - { name: x, type: int }\n",
        );
        let issues = check_declarations(&doc);
        assert_eq!(issues.len(), 1);
        assert!(issues[0].message.contains("more than once"));
    }

    #[test]
    fn test_enum_without_values() {
        let doc = load("a", "parameters:\n  mode: { type: enum }\n");
        let issues = check_declarations(&doc);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].location.path.as_deref(), Some("parameters.mode.values"));
    }

    #[test]
    fn test_default_must_match_declaration() {
        let doc = load(
            "a",
            "parameters:\n  mode: { type: enum, values: [a, b], default: c }\n  n: { type: int, default: \"two\" }\n",
        );
        let issues = check_declarations(&doc);
        assert_eq!(issues.len(), 2);
        assert!(issues.iter().all(|i| i.location.path.as_deref().unwrap().ends_with(".default")));
    }

    #[test]
    fn test_inverted_constraints() {
        let doc = load("a", "parameters:\n  n: { type: int, constraints: { min: 5, max: 1 } }\n");
        assert_eq!(check_declarations(&doc).len(), 1);
    }

    #[test]
    fn test_cycle_reported_as_circular_reference() {
        let a = Arc::new(load("a", "metadata: { name: a }\nextends: b\n"));
        let b = Arc::new(load("b", "metadata: { name: b }\nextends: a\n"));
        let mut scope = DocumentScope::new();
        scope.insert(a.clone());
        scope.insert(b);
        let issue = resolve_parameters(&a, &scope).unwrap_err();
        assert_eq!(issue.kind, IssueKind::CircularReference);
        assert!(issue.message.contains("a -> b -> a"));
    }

    #[test]
    fn test_compile_error_location() {
        let doc = load("a", "template:\n  source: |\n    ok\n    {{#if x}}\n");
        let err = compile(doc.template_source().unwrap()).unwrap_err();
        let issue = compile_error(&doc, &err);
        assert_eq!(issue.layer, Layer::Semantic);
        assert_eq!(issue.location.path.as_deref(), Some("template.source"));
    }
}
