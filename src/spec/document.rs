//! Normalized specification document
//!
//! A `SpecDocument` is what the loader hands to the validation layers: the
//! parsed YAML mapping with includes already substituted, plus the digests used
//! for staleness and cache checks. It is never mutated after loading; a reload
//! produces a new document.

use serde_yaml::{Mapping, Value};
use std::path::PathBuf;

use crate::validation::Location;

/// Parsed specification file, includes resolved
#[derive(Debug, Clone, PartialEq)]
pub struct SpecDocument {
    /// Source file
    pub path: PathBuf,

    /// Top-level mapping, key order preserved
    pub root: Mapping,

    /// Original file text, used for locating keys
    pub raw: String,

    /// SHA-256 of the raw file bytes
    pub source_digest: String,

    /// SHA-256 of the canonical normalized document
    pub content_hash: String,

    /// First file line of the template body
    pub template_line: Option<usize>,

    /// Files pulled in through `@include`
    pub includes: Vec<PathBuf>,
}

impl SpecDocument {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.root.get(key)
    }

    /// `metadata.<key>` as a string
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.get("metadata")
            .and_then(Value::as_mapping)
            .and_then(|m| m.get(key))
            .and_then(Value::as_str)
    }

    /// Declared identifier (`metadata.name`)
    pub fn identifier(&self) -> Option<&str> {
        self.metadata_str("name")
    }

    /// Parent identifier (`extends`)
    pub fn extends(&self) -> Option<&str> {
        self.get("extends").and_then(Value::as_str)
    }

    /// Template body (`template.source`)
    pub fn template_source(&self) -> Option<&str> {
        self.get("template")
            .and_then(Value::as_mapping)
            .and_then(|m| m.get("source"))
            .and_then(Value::as_str)
    }

    /// Location for a dotted document path, with the file line when it can be found
    pub fn locate(&self, path: &str) -> Location {
        let segments: Vec<&str> = path
            .split('.')
            .map(|s| s.split('[').next().unwrap_or(s))
            .filter(|s| !s.is_empty())
            .collect();
        Location {
            path: Some(path.to_string()),
            file: Some(self.path.clone()),
            line: find_key_line(&self.raw, &segments),
            column: None,
        }
    }

    /// Location for a 1-based position inside the template body
    pub fn template_location(&self, line: usize, column: usize) -> Location {
        Location {
            path: Some("template.source".to_string()),
            file: Some(self.path.clone()),
            line: self.template_line.map(|start| start + line.saturating_sub(1)).or(Some(line)),
            column: Some(column),
        }
    }
}

/// Best-effort line lookup for a nested key path in YAML text
///
/// Walks the text tracking indentation: each segment must appear as `key:` on a
/// line indented deeper than the previous match. Returns the deepest line found.
pub(crate) fn find_key_line(raw: &str, segments: &[&str]) -> Option<usize> {
    let mut found: Option<usize> = None;
    let mut parent_indent: Option<usize> = None;
    let mut depth = 0;

    for (idx, line) in raw.lines().enumerate() {
        if depth >= segments.len() {
            break;
        }
        let trimmed = line.trim_start();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let indent = line.len() - trimmed.len();
        match parent_indent {
            Some(pi) if indent <= pi => break,
            None if indent > 0 => continue,
            _ => {}
        }

        let key = trimmed.strip_prefix("- ").unwrap_or(trimmed);
        let key = key.trim_start_matches(['"', '\'']);
        let seg = segments[depth];
        if key.starts_with(seg) && key[seg.len()..].trim_start_matches(['"', '\'']).starts_with(':') {
            found = Some(idx + 1);
            parent_indent = Some(indent);
            depth += 1;
        }
    }
    found
}

/// Line where the body of `template.source` starts
pub(crate) fn find_template_line(raw: &str) -> Option<usize> {
    let line = find_key_line(raw, &["template", "source"])?;
    let text = raw.lines().nth(line - 1)?;
    let after = text.split_once(':').map(|(_, v)| v.trim()).unwrap_or("");
    if after.starts_with('|') || after.starts_with('>') || after.is_empty() {
        Some(line + 1)
    } else {
        Some(line)
    }
}
