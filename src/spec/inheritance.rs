//! `extends` resolution
//!
//! A specification may extend another by identifier. Only parameters are
//! inherited: the parent's effective set is overlaid by the child's own
//! definitions, child winning by name. Chains are followed recursively with
//! cycle detection.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use super::document::SpecDocument;
use super::model::ParameterSchema;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InheritanceError {
    #[error("Circular reference: {}", .0.join(" -> "))]
    Cycle(Vec<String>),

    #[error("'{child}' extends unknown specification '{parent}'")]
    UnknownParent { child: String, parent: String },

    #[error("'{id}' has unreadable parameters: {message}")]
    Invalid { id: String, message: String },
}

/// Documents visible to one another during validation, keyed by identifier
#[derive(Debug, Clone, Default)]
pub struct DocumentScope {
    docs: HashMap<String, Arc<SpecDocument>>,
}

impl DocumentScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a document under its identifier; documents without one are ignored
    pub fn insert(&mut self, doc: Arc<SpecDocument>) {
        if let Some(id) = doc.identifier() {
            self.docs.insert(id.to_string(), doc);
        }
    }

    pub fn remove(&mut self, id: &str) {
        self.docs.remove(id);
    }

    pub fn get(&self, id: &str) -> Option<&Arc<SpecDocument>> {
        self.docs.get(id)
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    /// Identifiers that extend `id`, directly or transitively
    pub fn descendants_of(&self, id: &str) -> BTreeSet<String> {
        let mut found = BTreeSet::new();
        let mut frontier = vec![id.to_string()];
        while let Some(parent) = frontier.pop() {
            for (child_id, doc) in &self.docs {
                if doc.extends() == Some(parent.as_str()) && child_id != id && found.insert(child_id.clone()) {
                    frontier.push(child_id.clone());
                }
            }
        }
        found
    }
}

/// Effective parameter set of `doc` after following its `extends` chain
pub fn effective_parameters(doc: &SpecDocument, scope: &DocumentScope) -> Result<ParameterSchema, InheritanceError> {
    let id = doc.identifier().unwrap_or("<unnamed>").to_string();
    debug!(%id, extends = ?doc.extends(), "effective_parameters: called");
    resolve(&id, doc, scope, &mut Vec::new())
}

fn resolve(
    id: &str,
    doc: &SpecDocument,
    scope: &DocumentScope,
    visited: &mut Vec<String>,
) -> Result<ParameterSchema, InheritanceError> {
    if visited.iter().any(|v| v == id) {
        let mut chain = visited.clone();
        chain.push(id.to_string());
        debug!(?chain, "resolve: cycle detected");
        return Err(InheritanceError::Cycle(chain));
    }
    visited.push(id.to_string());

    let own = ParameterSchema::from_document(&doc.root).map_err(|message| InheritanceError::Invalid {
        id: id.to_string(),
        message,
    })?;

    let Some(parent_id) = doc.extends() else {
        return Ok(own);
    };
    let parent = scope.get(parent_id).ok_or_else(|| InheritanceError::UnknownParent {
        child: id.to_string(),
        parent: parent_id.to_string(),
    })?;

    let inherited = resolve(parent_id, parent, scope, visited)?;
    debug!(%id, %parent_id, "resolve: merged parent parameters");
    Ok(inherited.overlay(&own))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::SpecLoader;
    use std::path::Path;

    fn doc(name: &str, extends: Option<&str>, params: &str) -> Arc<SpecDocument> {
        let mut yaml = format!("metadata:\n  name: {name}\n");
        if let Some(parent) = extends {
            yaml.push_str(&format!("extends: {parent}\n"));
        }
        yaml.push_str(params);
        Arc::new(
            SpecLoader::default()
                .load_str(Path::new(&format!("{name}.yml")), yaml)
                .unwrap(),
        )
    }

    #[test]
    fn test_child_overrides_parent() {
        let mut scope = DocumentScope::new();
        let base = doc("base", None, "parameters:\n  tone: { type: string }\n  depth: { type: int }\n");
        let child = doc("child", Some("base"), "parameters:\n  depth: { type: float }\n");
        scope.insert(base);
        scope.insert(child.clone());

        let params = effective_parameters(&child, &scope).unwrap();
        assert_eq!(params.len(), 2);
        assert_eq!(
            params.get("depth").unwrap().param_type,
            crate::spec::ParamType::Float
        );
        assert!(params.get("tone").is_some());
    }

    #[test]
    fn test_cycle_is_reported_with_chain() {
        let mut scope = DocumentScope::new();
        let a = doc("a", Some("b"), "");
        scope.insert(a.clone());
        scope.insert(doc("b", Some("a"), ""));

        let err = effective_parameters(&a, &scope).unwrap_err();
        assert_eq!(
            err,
            InheritanceError::Cycle(vec!["a".to_string(), "b".to_string(), "a".to_string()])
        );
        assert!(err.to_string().contains("a -> b -> a"));
    }

    #[test]
    fn test_self_extension_is_a_cycle() {
        let mut scope = DocumentScope::new();
        let a = doc("a", Some("a"), "");
        scope.insert(a.clone());
        assert!(matches!(
            effective_parameters(&a, &scope),
            Err(InheritanceError::Cycle(_))
        ));
    }

    #[test]
    fn test_unknown_parent() {
        let scope = DocumentScope::new();
        let orphan = doc("orphan", Some("ghost"), "");
        assert_eq!(
            effective_parameters(&orphan, &scope).unwrap_err(),
            InheritanceError::UnknownParent {
                child: "orphan".to_string(),
                parent: "ghost".to_string()
            }
        );
    }

    #[test]
    fn test_descendants_transitive() {
        let mut scope = DocumentScope::new();
        scope.insert(doc("root", None, ""));
        scope.insert(doc("mid", Some("root"), ""));
        scope.insert(doc("leaf", Some("mid"), ""));
        scope.insert(doc("other", None, ""));

        let found: Vec<String> = scope.descendants_of("root").into_iter().collect();
        assert_eq!(found, vec!["leaf".to_string(), "mid".to_string()]);
        assert!(scope.descendants_of("leaf").is_empty());
    }
}
