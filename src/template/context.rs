//! Invocation values resolved against a parameter schema

use regex::Regex;
use serde_json::{Map, Value as Json};
use tracing::debug;

use crate::error::ContextError;
use crate::spec::{Example, ParamType, ParameterSchema, ParameterSpec, value_hash};

/// Resolved parameter values for one render
///
/// Built per invocation and dropped afterwards. `hash` keys the render cache
/// together with the specification's content hash.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderContext {
    pub values: Map<String, Json>,
    pub hash: String,
}

impl RenderContext {
    /// Apply defaults, then check every value against its declaration
    pub fn resolve(schema: &ParameterSchema, values: Map<String, Json>) -> Result<Self, ContextError> {
        debug!(params = schema.len(), given = values.len(), "RenderContext::resolve: called");
        Self::build(schema, values, true)
    }

    /// Context for the generation dry run
    ///
    /// Values come from [`representative_values`]. Synthesized samples are
    /// not checked against constraints: the dry run exercises the template,
    /// not the sample.
    pub fn representative(schema: &ParameterSchema, examples: &[Example]) -> Result<Self, ContextError> {
        debug!(params = schema.len(), examples = examples.len(), "RenderContext::representative: called");
        Self::build(schema, representative_values(schema, examples), false)
    }

    fn build(schema: &ParameterSchema, values: Map<String, Json>, checked: bool) -> Result<Self, ContextError> {
        if let Some(unknown) = values.keys().find(|k| schema.get(k).is_none()) {
            return Err(ContextError::UnknownParameter(unknown.clone()));
        }

        let mut resolved = Map::new();
        for param in schema.iter() {
            let value = match values.get(&param.name) {
                Some(v) if !v.is_null() => v.clone(),
                _ => match &param.default {
                    Some(default) => default.clone(),
                    None if param.required => return Err(ContextError::MissingRequired(param.name.clone())),
                    None => continue,
                },
            };
            if checked {
                check_value(param, &value)?;
            }
            resolved.insert(param.name.clone(), value);
        }

        let hash = value_hash(&Json::Object(resolved.clone()));
        Ok(Self { values: resolved, hash })
    }

    pub fn into_json(self) -> Json {
        Json::Object(self.values)
    }

    pub fn as_json(&self) -> Json {
        Json::Object(self.values.clone())
    }
}

fn type_name(value: &Json) -> &'static str {
    match value {
        Json::Null => "null",
        Json::Bool(_) => "bool",
        Json::Number(n) if n.is_f64() => "float",
        Json::Number(_) => "int",
        Json::String(_) => "string",
        Json::Array(_) => "list",
        Json::Object(_) => "map",
    }
}

/// Type and constraint check for a single value
pub fn check_value(param: &ParameterSpec, value: &Json) -> Result<(), ContextError> {
    let name = &param.name;
    if !param.param_type.accepts(value) {
        return Err(ContextError::TypeMismatch {
            name: name.clone(),
            expected: param.param_type.to_string(),
            found: type_name(value).to_string(),
        });
    }

    let constraint = |message: String| ContextError::Constraint {
        name: name.clone(),
        message,
    };
    let c = &param.constraints;

    match param.param_type {
        ParamType::Enum => {
            if !param.values.contains(value) {
                let allowed: Vec<String> = param.values.iter().map(Json::to_string).collect();
                return Err(constraint(format!("{value} is not one of [{}]", allowed.join(", "))));
            }
        }
        ParamType::Int | ParamType::Float => {
            let n = value.as_f64().unwrap_or_default();
            if let Some(min) = c.min
                && n < min
            {
                return Err(constraint(format!("{n} is below minimum {min}")));
            }
            if let Some(max) = c.max
                && n > max
            {
                return Err(constraint(format!("{n} is above maximum {max}")));
            }
        }
        ParamType::String => {
            let s = value.as_str().unwrap_or_default();
            let len = s.chars().count();
            if let Some(min) = c.min_length
                && len < min
            {
                return Err(constraint(format!("length {len} is below minimum {min}")));
            }
            if let Some(max) = c.max_length
                && len > max
            {
                return Err(constraint(format!("length {len} is above maximum {max}")));
            }
            if let Some(pattern) = &c.pattern {
                let re = Regex::new(pattern).map_err(|e| constraint(format!("invalid pattern: {e}")))?;
                if !re.is_match(s) {
                    return Err(constraint(format!("'{s}' does not match /{pattern}/")));
                }
            }
        }
        ParamType::List => {
            let count = value.as_array().map(Vec::len).unwrap_or_default();
            if let Some(min) = c.min_items
                && count < min
            {
                return Err(constraint(format!("{count} items, minimum is {min}")));
            }
            if let Some(max) = c.max_items
                && count > max
            {
                return Err(constraint(format!("{count} items, maximum is {max}")));
            }
        }
        ParamType::Bool | ParamType::Map => {}
    }
    Ok(())
}

/// Representative value set used for the generation dry run
///
/// Prefers the declared default, then the value from the first example that
/// sets the parameter, then the first enum value, then a value synthesized
/// from the type and its constraints.
pub fn representative_values(schema: &ParameterSchema, examples: &[Example]) -> Map<String, Json> {
    let mut values = Map::new();
    for param in schema.iter() {
        if param.default.is_some() {
            continue;
        }
        let from_example = examples
            .iter()
            .filter_map(|e| e.parameters.get(&param.name))
            .find(|v| !v.is_null());
        let value = match from_example {
            Some(v) => v.clone(),
            None => sample_value(param),
        };
        values.insert(param.name.clone(), value);
    }
    values
}

fn sample_value(param: &ParameterSpec) -> Json {
    let c = &param.constraints;
    match param.param_type {
        ParamType::Enum => param.values.first().cloned().unwrap_or(Json::Null),
        ParamType::String => {
            let len = c.min_length.unwrap_or(1).max(1);
            let len = c.max_length.map_or(len, |max| len.min(max));
            Json::String("x".repeat(len))
        }
        ParamType::Int => {
            let n = c.min.map(|m| m.ceil() as i64).unwrap_or(0);
            let n = match c.max {
                Some(max) if (n as f64) > max => max.floor() as i64,
                _ => n,
            };
            Json::from(n)
        }
        ParamType::Float => Json::from(c.min.or(c.max).unwrap_or(0.0)),
        ParamType::Bool => Json::Bool(false),
        ParamType::List => {
            let count = c.min_items.unwrap_or(1);
            let count = c.max_items.map_or(count, |max| count.min(max));
            Json::Array(vec![Json::String("x".to_string()); count])
        }
        ParamType::Map => Json::Object(Map::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema(yaml: &str) -> ParameterSchema {
        let root: serde_yaml::Mapping = serde_yaml::from_str(yaml).unwrap();
        ParameterSchema::from_document(&root).unwrap()
    }

    fn values(v: Json) -> Map<String, Json> {
        v.as_object().cloned().unwrap()
    }

    const PHASE: &str = r#"
parameters:
  phase: { type: enum, values: [quick, full], required: true }
  depth: { type: int, default: 2, constraints: { min: 1, max: 5 } }
  note: { type: string, constraints: { max_length: 5, pattern: "^[a-z]+$" } }
"#;

    #[test]
    fn test_defaults_applied() {
        let ctx = RenderContext::resolve(&schema(PHASE), values(json!({"phase": "quick"}))).unwrap();
        assert_eq!(ctx.values["depth"], json!(2));
        assert!(!ctx.values.contains_key("note"));
    }

    #[test]
    fn test_unknown_and_missing() {
        let s = schema(PHASE);
        assert_eq!(
            RenderContext::resolve(&s, values(json!({"phase": "quick", "bogus": 1}))).unwrap_err(),
            ContextError::UnknownParameter("bogus".to_string())
        );
        assert_eq!(
            RenderContext::resolve(&s, Map::new()).unwrap_err(),
            ContextError::MissingRequired("phase".to_string())
        );
    }

    #[test]
    fn test_type_and_constraints() {
        let s = schema(PHASE);
        let err = RenderContext::resolve(&s, values(json!({"phase": "slow"}))).unwrap_err();
        assert!(matches!(err, ContextError::Constraint { ref name, .. } if name == "phase"));

        let err = RenderContext::resolve(&s, values(json!({"phase": "full", "depth": "deep"}))).unwrap_err();
        assert!(matches!(err, ContextError::TypeMismatch { ref found, .. } if found == "string"));

        let err = RenderContext::resolve(&s, values(json!({"phase": "full", "depth": 9}))).unwrap_err();
        assert!(err.to_string().contains("above maximum"));

        let err = RenderContext::resolve(&s, values(json!({"phase": "full", "note": "UPPER"}))).unwrap_err();
        assert!(err.to_string().contains("does not match"));
    }

    #[test]
    fn test_hash_is_order_independent() {
        let s = schema(PHASE);
        let a = RenderContext::resolve(&s, values(json!({"phase": "full", "note": "ab"}))).unwrap();
        let b = RenderContext::resolve(&s, values(json!({"note": "ab", "phase": "full"}))).unwrap();
        assert_eq!(a.hash, b.hash);
        let c = RenderContext::resolve(&s, values(json!({"phase": "quick", "note": "ab"}))).unwrap();
        assert_ne!(a.hash, c.hash);
    }

    #[test]
    fn test_representative_values_resolve() {
        let s = schema(
            r#"
parameters:
  phase: { type: enum, values: [quick, full], required: true }
  count: { type: int, required: true, constraints: { min: 3 } }
  name: { type: string, required: true, constraints: { min_length: 2 } }
  items: { type: list, required: true, constraints: { min_items: 2 } }
  tone: { type: string, default: calm }
"#,
        );
        let sample = representative_values(&s, &[]);
        assert_eq!(sample["phase"], json!("quick"));
        assert_eq!(sample["count"], json!(3));
        assert!(!sample.contains_key("tone"));
        let ctx = RenderContext::resolve(&s, sample).unwrap();
        assert_eq!(ctx.values["tone"], json!("calm"));
    }

    #[test]
    fn test_representative_prefers_example_values() {
        let s = schema(
            r#"
parameters:
  tag: { type: string, required: true, constraints: { pattern: "^v[0-9]+$" } }
  size: { type: int, required: true }
"#,
        );
        let examples = vec![
            Example {
                name: None,
                parameters: values(json!({"size": 4})),
            },
            Example {
                name: None,
                parameters: values(json!({"tag": "v2", "size": 7})),
            },
        ];
        let sample = representative_values(&s, &examples);
        assert_eq!(sample["tag"], json!("v2"));
        assert_eq!(sample["size"], json!(4));
    }

    #[test]
    fn test_representative_skips_constraints_on_samples() {
        let s = schema(
            r#"
parameters:
  tag: { type: string, required: true, constraints: { pattern: "^v[0-9]+$" } }
  empty: { type: string, required: true, constraints: { max_length: 0 } }
  none: { type: list, required: true, constraints: { max_items: 0 } }
"#,
        );
        assert!(RenderContext::resolve(&s, representative_values(&s, &[])).is_err());

        let ctx = RenderContext::representative(&s, &[]).unwrap();
        assert_eq!(ctx.values["tag"], json!("x"));
        assert_eq!(ctx.values["empty"], json!(""));
        assert_eq!(ctx.values["none"], json!([]));
    }
}
