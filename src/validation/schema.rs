//! Structural checks on the normalized document
//!
//! Pure function of the document: required fields, field types, the closed
//! parameter type set and the `MAJOR.MINOR` version format. Every issue carries
//! the dotted document path of the offending field.

use regex::Regex;
use serde_yaml::{Mapping, Value};
use std::sync::LazyLock;
use tracing::debug;

use super::result::{IssueKind, Layer, ValidationIssue};
use crate::spec::{Constraints, ParamType, ParameterSpec, SpecDocument, parameter_entries};

/// Top-level keys a specification may carry
pub const TOP_LEVEL_KEYS: [&str; 6] = ["version", "extends", "metadata", "parameters", "template", "examples"];

const METADATA_KEYS: [&str; 6] = ["name", "display_name", "category", "description", "author", "tags"];
const TEMPLATE_KEYS: [&str; 1] = ["source"];
const MAX_IDENTIFIER_LEN: usize = 64;

static VERSION_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d+\.\d+$").expect("static regex"));
static IDENTIFIER_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[a-z][a-z0-9_-]*$").expect("static regex"));
static PARAM_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("static regex"));

struct SchemaCheck<'a> {
    doc: &'a SpecDocument,
    strict: bool,
    issues: Vec<ValidationIssue>,
}

impl SchemaCheck<'_> {
    fn error(&mut self, path: &str, message: impl Into<String>) {
        let location = self.doc.locate(path);
        self.issues
            .push(ValidationIssue::error(Layer::Schema, IssueKind::SchemaError, message, location));
    }

    fn unknown_key(&mut self, path: &str, key: &str) {
        let message = format!("unknown field '{key}'");
        let location = self.doc.locate(path);
        let issue = if self.strict {
            ValidationIssue::error(Layer::Schema, IssueKind::SchemaError, message, location)
        } else {
            ValidationIssue::warning(Layer::Schema, IssueKind::SchemaError, message, location)
        };
        self.issues.push(issue);
    }

    fn known_keys(&mut self, map: &Mapping, prefix: &str, known: &[&str]) {
        for key in map.keys() {
            match key.as_str() {
                Some(k) if known.contains(&k) => {}
                Some(k) => {
                    let path = if prefix.is_empty() { k.to_string() } else { format!("{prefix}.{k}") };
                    self.unknown_key(&path, k);
                }
                None => self.error(prefix, format!("non-string key {key:?}")),
            }
        }
    }

    fn optional_str(&mut self, map: &Mapping, key: &str, path: &str) {
        if let Some(v) = map.get(key)
            && !v.is_string()
            && !v.is_null()
        {
            self.error(path, format!("{path} must be a string"));
        }
    }

    fn version(&mut self) {
        let version = match self.doc.get("version") {
            None => return self.error("version", "required field 'version' is missing"),
            Some(Value::String(s)) => s.clone(),
            // An unquoted 1.10 parses as the float 1.1
            Some(Value::Number(n)) => {
                return self.error("version", format!("version must be a quoted string, got number {n}"));
            }
            Some(_) => return self.error("version", "version must be a string"),
        };
        if !VERSION_RE.is_match(&version) {
            self.error("version", format!("version '{version}' does not match MAJOR.MINOR"));
        }
    }

    fn metadata(&mut self) {
        let meta = match self.doc.get("metadata") {
            None => return self.error("metadata", "required field 'metadata' is missing"),
            Some(Value::Mapping(m)) => m,
            Some(_) => return self.error("metadata", "metadata must be a mapping"),
        };
        self.known_keys(meta, "metadata", &METADATA_KEYS);

        match meta.get("name") {
            None => self.error("metadata.name", "required field 'metadata.name' is missing"),
            Some(Value::String(name)) => {
                if name.len() > MAX_IDENTIFIER_LEN {
                    self.error(
                        "metadata.name",
                        format!("identifier is {} characters, limit is {MAX_IDENTIFIER_LEN}", name.len()),
                    );
                } else if !IDENTIFIER_RE.is_match(name) {
                    self.error(
                        "metadata.name",
                        format!("identifier '{name}' must be lowercase letters, digits, '_' or '-'"),
                    );
                }
            }
            Some(_) => self.error("metadata.name", "metadata.name must be a string"),
        }

        match meta.get("display_name") {
            None => self.error("metadata.display_name", "required field 'metadata.display_name' is missing"),
            Some(Value::String(_)) => {}
            Some(_) => self.error("metadata.display_name", "metadata.display_name must be a string"),
        }

        for key in ["category", "description", "author"] {
            self.optional_str(meta, key, &format!("metadata.{key}"));
        }

        match meta.get("tags") {
            None | Some(Value::Null) => {}
            Some(Value::Sequence(tags)) if tags.iter().all(Value::is_string) => {}
            Some(_) => self.error("metadata.tags", "metadata.tags must be a list of strings"),
        }
    }

    fn extends(&mut self) {
        if let Some(v) = self.doc.get("extends")
            && !v.is_string()
        {
            self.error("extends", "extends must be a specification identifier");
        }
    }

    fn parameters(&mut self) {
        match self.doc.get("parameters") {
            None | Some(Value::Null) | Some(Value::Mapping(_)) | Some(Value::Sequence(_)) => {}
            Some(_) => return self.error("parameters", "parameters must be a mapping or a list"),
        }

        let list_form = matches!(self.doc.get("parameters"), Some(Value::Sequence(_)));
        let entries = parameter_entries(&self.doc.root);
        for entry in entries {
            let Value::Mapping(def) = entry.def else {
                self.error(&entry.pointer, format!("{} must be a mapping", entry.pointer));
                continue;
            };

            match &entry.name {
                Some(name) if !PARAM_NAME_RE.is_match(name) => self.error(
                    &entry.pointer,
                    format!("parameter name '{name}' is not a valid template identifier"),
                ),
                Some(_) => {}
                None if list_form => self.error(&entry.pointer, "parameter is missing 'name'"),
                None => self.error(&entry.pointer, "parameter name must be a string"),
            }

            let known: &[&str] = if list_form {
                &ParameterSpec::KEYS
            } else {
                &ParameterSpec::KEYS[1..]
            };
            self.known_keys(def, &entry.pointer, known);
            self.parameter(def, &entry.pointer);
        }
    }

    fn parameter(&mut self, def: &Mapping, pointer: &str) {
        let type_path = format!("{pointer}.type");
        match def.get("type") {
            None => self.error(&type_path, "parameter is missing 'type'"),
            Some(Value::String(t)) => {
                if t.parse::<ParamType>().is_err() {
                    self.error(
                        &type_path,
                        format!("unknown type '{t}', expected one of {}", ParamType::NAMES.join(", ")),
                    );
                }
            }
            Some(_) => self.error(&type_path, "type must be a string"),
        }

        if let Some(v) = def.get("required")
            && !v.is_bool()
        {
            self.error(&format!("{pointer}.required"), "required must be a boolean");
        }
        self.optional_str(def, "description", &format!("{pointer}.description"));

        if let Some(v) = def.get("values")
            && !v.is_sequence()
        {
            self.error(&format!("{pointer}.values"), "values must be a list");
        }

        let constraints_path = format!("{pointer}.constraints");
        match def.get("constraints") {
            None | Some(Value::Null) => {}
            Some(Value::Mapping(c)) => {
                self.known_keys(c, &constraints_path, &Constraints::KEYS);
                if let Err(e) = serde_yaml::from_value::<Constraints>(Value::Mapping(c.clone())) {
                    self.error(&constraints_path, format!("invalid constraints: {e}"));
                }
            }
            Some(_) => self.error(&constraints_path, "constraints must be a mapping"),
        }
    }

    fn template(&mut self) {
        let template = match self.doc.get("template") {
            None => return self.error("template", "required field 'template' is missing"),
            Some(Value::Mapping(m)) => m,
            Some(_) => return self.error("template", "template must be a mapping"),
        };
        self.known_keys(template, "template", &TEMPLATE_KEYS);
        match template.get("source") {
            None => self.error("template.source", "required field 'template.source' is missing"),
            Some(Value::String(s)) if s.trim().is_empty() => self.error("template.source", "template.source is empty"),
            Some(Value::String(_)) => {}
            Some(_) => self.error("template.source", "template.source must be a string"),
        }
    }

    fn examples(&mut self) {
        match self.doc.get("examples") {
            None | Some(Value::Null) => {}
            Some(Value::Sequence(items)) => {
                for (i, item) in items.iter().enumerate() {
                    let ok = item
                        .as_mapping()
                        .map(|m| m.get("parameters").is_none_or(|p| p.is_mapping() || p.is_null()))
                        .unwrap_or(false);
                    if !ok {
                        self.error(
                            &format!("examples[{i}]"),
                            "example must be a mapping with a 'parameters' mapping",
                        );
                    }
                }
            }
            Some(_) => self.error("examples", "examples must be a list"),
        }
    }
}

/// Run the schema layer
pub fn check(doc: &SpecDocument, strict: bool) -> Vec<ValidationIssue> {
    debug!(path = ?doc.path, strict, "schema::check: called");
    let mut check = SchemaCheck {
        doc,
        strict,
        issues: Vec::new(),
    };
    check.known_keys(&doc.root, "", &TOP_LEVEL_KEYS);
    check.version();
    check.metadata();
    check.extends();
    check.parameters();
    check.template();
    check.examples();
    check.issues
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::SpecLoader;
    use std::path::Path;

    fn run(yaml: &str, strict: bool) -> Vec<ValidationIssue> {
        let doc = SpecLoader::default()
            .load_str(Path::new("s.yml"), yaml.to_string())
            .unwrap();
        check(&doc, strict)
    }

    const VALID: &str = r#"
version: "1.0"
metadata:
  name: code_review
  display_name: Code Review
parameters:
  target: { type: string, required: true }
template:
  source: "Review {{target}}"
"#;

    #[test]
    fn test_valid_document_passes() {
        assert!(run(VALID, true).is_empty());
    }

    #[test]
    fn test_missing_required_fields() {
        let issues = run("version: \"1.0\"\nmetadata:\n  display_name: X\n", true);
        let paths: Vec<&str> = issues.iter().filter_map(|i| i.location.path.as_deref()).collect();
        assert!(paths.contains(&"metadata.name"));
        assert!(paths.contains(&"template"));
        assert!(issues.iter().all(|i| i.kind == IssueKind::SchemaError));
    }

    #[test]
    fn test_bad_version_format() {
        let yaml = VALID.replace("\"1.0\"", "\"v1\"");
        let issues = run(&yaml, true);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].location.path.as_deref(), Some("version"));
        assert_eq!(issues[0].location.line, Some(2));
    }

    #[test]
    fn test_unquoted_version_is_rejected() {
        let yaml = VALID.replace("\"1.0\"", "1.10");
        let issues = run(&yaml, true);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].location.path.as_deref(), Some("version"));
        assert!(issues[0].message.contains("quoted string"));
    }

    #[test]
    fn test_unknown_parameter_type() {
        let yaml = VALID.replace("type: string", "type: tuple");
        let issues = run(&yaml, true);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].location.path.as_deref(), Some("parameters.target.type"));
        assert!(issues[0].message.contains("tuple"));
    }

    #[test]
    fn test_unknown_top_level_strict_vs_lenient() {
        let yaml = format!("{VALID}owner: someone\n");
        let strict = run(&yaml, true);
        assert_eq!(strict.len(), 1);
        assert!(strict[0].is_error());

        let lenient = run(&yaml, false);
        assert_eq!(lenient.len(), 1);
        assert!(!lenient[0].is_error());
    }

    #[test]
    fn test_identifier_format() {
        let yaml = VALID.replace("name: code_review", "name: Code Review");
        let issues = run(&yaml, true);
        assert_eq!(issues[0].location.path.as_deref(), Some("metadata.name"));
    }

    #[test]
    fn test_list_form_requires_name() {
        let yaml = r#"
version: "1.0"
metadata: { name: a, display_name: A }
parameters:
  - type: string
template: { source: "x" }
"#;
        let issues = run(yaml, true);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].location.path.as_deref(), Some("parameters[0]"));
    }

    #[test]
    fn test_bad_constraints() {
        let yaml = VALID.replace("required: true", "constraints: { min_length: many }");
        let issues = run(&yaml, true);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].location.path.as_deref(), Some("parameters.target.constraints"));
    }
}
