//! Non-blocking documentation and coverage checks; warnings only

use tracing::debug;

use super::result::{IssueKind, Layer, ValidationIssue};
use crate::spec::{ParamType, ParameterSchema, SpecDocument, parameter_entries};
use crate::template::TemplateFacts;

fn warn(doc: &SpecDocument, path: &str, message: impl Into<String>) -> ValidationIssue {
    ValidationIssue::warning(Layer::Quality, IssueKind::Quality, message, doc.locate(path))
}

pub fn check(doc: &SpecDocument, params: &ParameterSchema, facts: &TemplateFacts) -> Vec<ValidationIssue> {
    debug!(path = ?doc.path, "quality::check: called");
    let mut issues = Vec::new();

    if doc.metadata_str("description").is_none_or(|d| d.trim().is_empty()) {
        issues.push(warn(doc, "metadata.description", "metadata.description is missing"));
    }
    if doc.metadata_str("category").is_none_or(|c| c.trim().is_empty()) {
        issues.push(warn(
            doc,
            "metadata.category",
            "metadata.category is missing; filed under 'uncategorized'",
        ));
    }
    if doc.get("examples").and_then(|e| e.as_sequence()).is_none_or(|e| e.is_empty()) {
        issues.push(warn(doc, "examples", "no examples are provided"));
    }

    for entry in parameter_entries(&doc.root) {
        let Some(name) = &entry.name else {
            continue;
        };
        if params.get(name).is_some_and(|p| p.description.is_none()) {
            issues.push(warn(
                doc,
                &entry.pointer,
                format!("parameter '{name}' has no description"),
            ));
        }
    }

    // Enum values only count as branch values when the template compares on them
    for param in params.iter() {
        if param.param_type != ParamType::Enum || !facts.compared(&param.name) {
            continue;
        }
        for value in &param.values {
            if !facts.mentions_literal(value) {
                let shown = value.as_str().map(str::to_string).unwrap_or_else(|| value.to_string());
                issues.push(warn(
                    doc,
                    &format!("parameters.{}.values", param.name),
                    format!(
                        "enum value \"{shown}\" of '{}' is referenced nowhere in the template",
                        param.name
                    ),
                ));
            }
        }
    }
    issues
}
