//! Typed specification model
//!
//! Built from a `SpecDocument` once the schema layer has accepted it. Parameter
//! types are a closed enumeration so every value check is exhaustive.

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use serde_yaml::{Mapping, Value};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use super::document::SpecDocument;

/// Declared parameter type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    #[serde(alias = "integer")]
    Int,
    #[serde(alias = "number")]
    Float,
    #[serde(alias = "boolean")]
    Bool,
    Enum,
    #[serde(alias = "array")]
    List,
    #[serde(alias = "object")]
    Map,
}

impl ParamType {
    pub const NAMES: [&'static str; 7] = ["string", "int", "float", "bool", "enum", "list", "map"];

    pub fn as_str(&self) -> &'static str {
        match self {
            ParamType::String => "string",
            ParamType::Int => "int",
            ParamType::Float => "float",
            ParamType::Bool => "bool",
            ParamType::Enum => "enum",
            ParamType::List => "list",
            ParamType::Map => "map",
        }
    }

    /// Whether a JSON value inhabits this type (enum membership is checked separately)
    pub fn accepts(&self, value: &Json) -> bool {
        match self {
            ParamType::String => value.is_string(),
            ParamType::Int => value.is_i64() || value.is_u64(),
            ParamType::Float => value.is_number(),
            ParamType::Bool => value.is_boolean(),
            ParamType::Enum => !value.is_null() && !value.is_array() && !value.is_object(),
            ParamType::List => value.is_array(),
            ParamType::Map => value.is_object(),
        }
    }
}

impl FromStr for ParamType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "string" => Ok(ParamType::String),
            "int" | "integer" => Ok(ParamType::Int),
            "float" | "number" => Ok(ParamType::Float),
            "bool" | "boolean" => Ok(ParamType::Bool),
            "enum" => Ok(ParamType::Enum),
            "list" | "array" => Ok(ParamType::List),
            "map" | "object" => Ok(ParamType::Map),
            other => Err(format!("unknown parameter type '{other}'")),
        }
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-type value constraints
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Constraints {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_length: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_items: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_items: Option<usize>,
}

impl Constraints {
    pub const KEYS: [&'static str; 7] = [
        "min",
        "max",
        "min_length",
        "max_length",
        "pattern",
        "min_items",
        "max_items",
    ];

    pub fn is_empty(&self) -> bool {
        *self == Constraints::default()
    }
}

/// One declared parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: ParamType,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Json>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<Json>,
    #[serde(default, skip_serializing_if = "Constraints::is_empty")]
    pub constraints: Constraints,
}

#[derive(Debug, Deserialize)]
struct RawParameter {
    #[serde(rename = "type")]
    param_type: ParamType,
    #[serde(default)]
    required: bool,
    #[serde(default)]
    default: Option<Json>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    values: Vec<Json>,
    #[serde(default)]
    constraints: Constraints,
}

impl ParameterSpec {
    pub const KEYS: [&'static str; 7] = ["name", "type", "required", "default", "description", "values", "constraints"];

    /// Build from one YAML parameter definition
    pub fn from_yaml(name: &str, def: &Value) -> Result<Self, String> {
        let raw: RawParameter =
            serde_yaml::from_value(def.clone()).map_err(|e| format!("parameter '{name}': {e}"))?;
        Ok(Self {
            name: name.to_string(),
            param_type: raw.param_type,
            required: raw.required,
            default: raw.default,
            description: raw.description.filter(|d| !d.trim().is_empty()),
            values: raw.values,
            constraints: raw.constraints,
        })
    }
}

/// Where a parameter definition sits in the document
#[derive(Debug, Clone)]
pub struct ParamEntry<'a> {
    /// Declared name (list form entries may lack one)
    pub name: Option<String>,
    /// Document path, e.g. `parameters.phase` or `parameters[2]`
    pub pointer: String,
    pub def: &'a Value,
}

/// Enumerate parameter definitions in either mapping or list form
pub fn parameter_entries(root: &Mapping) -> Vec<ParamEntry<'_>> {
    match root.get("parameters") {
        Some(Value::Mapping(map)) => map
            .iter()
            .map(|(k, def)| {
                let name = k.as_str().map(str::to_string);
                let pointer = format!("parameters.{}", name.as_deref().unwrap_or("?"));
                ParamEntry { name, pointer, def }
            })
            .collect(),
        Some(Value::Sequence(items)) => items
            .iter()
            .enumerate()
            .map(|(i, def)| ParamEntry {
                name: def.get("name").and_then(Value::as_str).map(str::to_string),
                pointer: format!("parameters[{i}]"),
                def,
            })
            .collect(),
        _ => Vec::new(),
    }
}

/// Ordered parameter set
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParameterSchema {
    params: Vec<ParameterSpec>,
}

impl ParameterSchema {
    pub fn new(params: Vec<ParameterSpec>) -> Self {
        Self { params }
    }

    /// Parse all parameters of a document (first definition of a name wins)
    pub fn from_document(root: &Mapping) -> Result<Self, String> {
        let mut schema = Self::default();
        for entry in parameter_entries(root) {
            let name = entry
                .name
                .ok_or_else(|| format!("{}: parameter has no name", entry.pointer))?;
            if schema.get(&name).is_some() {
                continue;
            }
            schema.params.push(ParameterSpec::from_yaml(&name, entry.def)?);
        }
        Ok(schema)
    }

    pub fn get(&self, name: &str) -> Option<&ParameterSpec> {
        self.params.iter().find(|p| p.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ParameterSpec> {
        self.params.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.params.iter().map(|p| p.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Overlay `child` on top of `self`: child definitions replace same-named ones
    pub fn overlay(&self, child: &ParameterSchema) -> ParameterSchema {
        let mut params: Vec<ParameterSpec> = self
            .params
            .iter()
            .filter(|p| child.get(&p.name).is_none())
            .cloned()
            .collect();
        params.extend(child.params.iter().cloned());
        ParameterSchema { params }
    }
}

/// A worked example shipped with the specification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Example {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub parameters: serde_json::Map<String, Json>,
}

/// Validated specification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Specification {
    pub id: String,
    pub display_name: String,
    pub category: String,
    pub description: Option<String>,
    pub author: Option<String>,
    pub tags: Vec<String>,
    pub version: String,
    pub extends: Option<String>,
    /// Effective parameters (inherited ones included)
    pub parameters: ParameterSchema,
    pub template: String,
    pub examples: Vec<Example>,
    pub path: PathBuf,
    pub content_hash: String,
    pub source_digest: String,
}

pub const DEFAULT_CATEGORY: &str = "uncategorized";

impl Specification {
    /// Assemble from a schema-valid document and its effective parameters
    pub fn from_document(doc: &SpecDocument, parameters: ParameterSchema) -> Result<Self, String> {
        let id = doc.identifier().ok_or("metadata.name is missing")?.to_string();
        let display_name = doc
            .metadata_str("display_name")
            .ok_or("metadata.display_name is missing")?
            .to_string();
        let template = doc.template_source().ok_or("template.source is missing")?.to_string();
        let version = match doc.get("version") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => return Err("version is missing".to_string()),
        };
        let tags = doc
            .get("metadata")
            .and_then(|m| m.get("tags"))
            .and_then(Value::as_sequence)
            .map(|seq| seq.iter().filter_map(Value::as_str).map(str::to_string).collect())
            .unwrap_or_default();
        let examples = match doc.get("examples") {
            Some(v @ Value::Sequence(_)) => {
                serde_yaml::from_value(v.clone()).map_err(|e| format!("examples: {e}"))?
            }
            _ => Vec::new(),
        };

        Ok(Self {
            id,
            display_name,
            category: doc
                .metadata_str("category")
                .filter(|c| !c.trim().is_empty())
                .unwrap_or(DEFAULT_CATEGORY)
                .to_string(),
            description: doc
                .metadata_str("description")
                .filter(|d| !d.trim().is_empty())
                .map(str::to_string),
            author: doc.metadata_str("author").map(str::to_string),
            tags,
            version,
            extends: doc.extends().map(str::to_string),
            parameters,
            template,
            examples,
            path: doc.path.clone(),
            content_hash: doc.content_hash.clone(),
            source_digest: doc.source_digest.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::SpecLoader;
    use serde_json::json;
    use std::path::Path;

    fn mapping(yaml: &str) -> Mapping {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn test_param_type_parse_and_aliases() {
        assert_eq!("int".parse::<ParamType>().unwrap(), ParamType::Int);
        assert_eq!("integer".parse::<ParamType>().unwrap(), ParamType::Int);
        assert_eq!("array".parse::<ParamType>().unwrap(), ParamType::List);
        assert!("tuple".parse::<ParamType>().is_err());

        let t: ParamType = serde_yaml::from_str("boolean").unwrap();
        assert_eq!(t, ParamType::Bool);
    }

    #[test]
    fn test_param_type_accepts() {
        assert!(ParamType::Int.accepts(&json!(3)));
        assert!(!ParamType::Int.accepts(&json!(3.5)));
        assert!(ParamType::Float.accepts(&json!(3)));
        assert!(ParamType::List.accepts(&json!([1])));
        assert!(!ParamType::String.accepts(&json!(null)));
        assert!(ParamType::Enum.accepts(&json!("quick")));
    }

    #[test]
    fn test_mapping_form_preserves_order() {
        let root = mapping(
            r#"
parameters:
  zeta: { type: string }
  alpha: { type: int, required: true, constraints: { min: 1, max: 5 } }
"#,
        );
        let schema = ParameterSchema::from_document(&root).unwrap();
        let names: Vec<&str> = schema.names().collect();
        assert_eq!(names, vec!["zeta", "alpha"]);
        let alpha = schema.get("alpha").unwrap();
        assert!(alpha.required);
        assert_eq!(alpha.constraints.max, Some(5.0));
    }

    #[test]
    fn test_list_form_entries() {
        let root = mapping(
            r#"
parameters:
  - name: phase
    type: enum
    values: [quick, full]
  - type: string
"#,
        );
        let entries = parameter_entries(&root);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name.as_deref(), Some("phase"));
        assert_eq!(entries[1].pointer, "parameters[1]");
        assert!(entries[1].name.is_none());
        assert!(ParameterSchema::from_document(&root).is_err());
    }

    #[test]
    fn test_overlay_child_wins() {
        let parent = ParameterSchema::new(vec![
            ParameterSpec::from_yaml("a", &serde_yaml::from_str("type: string").unwrap()).unwrap(),
            ParameterSpec::from_yaml("b", &serde_yaml::from_str("type: string").unwrap()).unwrap(),
        ]);
        let child = ParameterSchema::new(vec![
            ParameterSpec::from_yaml("b", &serde_yaml::from_str("type: int").unwrap()).unwrap(),
        ]);
        let merged = parent.overlay(&child);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged.get("b").unwrap().param_type, ParamType::Int);
        assert_eq!(merged.get("a").unwrap().param_type, ParamType::String);
    }

    #[test]
    fn test_specification_from_document() {
        let doc = SpecLoader::default()
            .load_str(
                Path::new("review.yml"),
                r#"
version: "1.2"
metadata:
  name: review
  display_name: Review
  tags: [code, quality]
parameters:
  target: { type: string, required: true }
template:
  source: "Review {{target}}"
examples:
  - name: simple
    parameters: { target: main.rs }
"#
                .to_string(),
            )
            .unwrap();
        let params = ParameterSchema::from_document(&doc.root).unwrap();
        let spec = Specification::from_document(&doc, params).unwrap();

        assert_eq!(spec.id, "review");
        assert_eq!(spec.category, DEFAULT_CATEGORY);
        assert_eq!(spec.version, "1.2");
        assert_eq!(spec.tags, vec!["code", "quality"]);
        assert_eq!(spec.examples.len(), 1);
        assert_eq!(spec.examples[0].parameters["target"], json!("main.rs"));
        assert_eq!(spec.content_hash, doc.content_hash);
    }
}
