//! Specification loading
//!
//! Reads a YAML file, checks it is a mapping, substitutes `@include` lines in
//! the template body and computes the document digests. Nothing is cached
//! here; the index owns caching.
//!
//! ## Includes
//!
//! A template line consisting only of an include directive is replaced by the
//! contents of the named file, resolved relative to the including file:
//! ```yaml
//! template:
//!   source: |
//!     @include "shared/preamble.md"
//!     Review {{target}} now.
//! ```
//! Nesting is bounded by the configured depth (default 1), so an included file
//! that itself includes another fails with `IncludeDepthExceeded`.

use serde_yaml::{Mapping, Value};
use std::fs;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

use super::document::{SpecDocument, find_template_line};
use super::hash::{sha256_hex, value_hash};
use crate::error::LoadError;

/// Parse an include directive line, returning the referenced path
pub fn parse_include_directive(line: &str) -> Option<&str> {
    let rest = line.trim().strip_prefix("@include")?;
    if !rest.is_empty() && !rest.starts_with(char::is_whitespace) {
        return None;
    }
    let target = rest.trim().trim_matches(|c| c == '"' || c == '\'');
    if target.is_empty() { None } else { Some(target) }
}

/// Loads specification files into normalized documents
#[derive(Debug, Clone)]
pub struct SpecLoader {
    include_depth: usize,
}

impl Default for SpecLoader {
    fn default() -> Self {
        Self { include_depth: 1 }
    }
}

impl SpecLoader {
    pub fn new(include_depth: usize) -> Self {
        debug!(include_depth, "SpecLoader::new: called");
        Self { include_depth }
    }

    /// Load and normalize one file
    pub fn load(&self, path: &Path) -> Result<SpecDocument, LoadError> {
        debug!(?path, "SpecLoader::load: called");
        let bytes = fs::read(path).map_err(|source| LoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let raw = String::from_utf8(bytes).map_err(|e| LoadError::Parse {
            path: path.to_path_buf(),
            message: format!("file is not valid UTF-8: {e}"),
            line: None,
            column: None,
        })?;
        self.load_str(path, raw)
    }

    /// Normalize already-read text as if it came from `path`
    pub fn load_str(&self, path: &Path, raw: String) -> Result<SpecDocument, LoadError> {
        debug!(?path, len = raw.len(), "SpecLoader::load_str: called");
        let source_digest = sha256_hex(raw.as_bytes());

        let value: Value = serde_yaml::from_str(&raw).map_err(|e| {
            let (line, column) = e
                .location()
                .map(|loc| (Some(loc.line()), Some(loc.column())))
                .unwrap_or((None, None));
            LoadError::Parse {
                path: path.to_path_buf(),
                message: e.to_string(),
                line,
                column,
            }
        })?;

        let mut root = match value {
            Value::Mapping(map) => map,
            Value::Null => {
                return Err(LoadError::Parse {
                    path: path.to_path_buf(),
                    message: "file is empty".to_string(),
                    line: None,
                    column: None,
                });
            }
            _ => {
                return Err(LoadError::Parse {
                    path: path.to_path_buf(),
                    message: "top level must be a mapping".to_string(),
                    line: Some(1),
                    column: Some(1),
                });
            }
        };

        let mut includes = Vec::new();
        self.resolve_template_includes(&mut root, path, &mut includes)?;

        let json = serde_json::to_value(&root).map_err(|e| LoadError::Parse {
            path: path.to_path_buf(),
            message: format!("document is not representable as JSON: {e}"),
            line: None,
            column: None,
        })?;
        let content_hash = value_hash(&json);
        let template_line = find_template_line(&raw);

        debug!(?path, %content_hash, includes = includes.len(), "SpecLoader::load_str: complete");
        Ok(SpecDocument {
            path: path.to_path_buf(),
            root,
            raw,
            source_digest,
            content_hash,
            template_line,
            includes,
        })
    }

    fn resolve_template_includes(
        &self,
        root: &mut Mapping,
        path: &Path,
        includes: &mut Vec<PathBuf>,
    ) -> Result<(), LoadError> {
        let Some(Value::Mapping(template)) = root.get_mut("template") else {
            return Ok(());
        };
        let Some(Value::String(source)) = template.get_mut("source") else {
            return Ok(());
        };
        if !source.lines().any(|l| parse_include_directive(l).is_some()) {
            debug!(?path, "resolve_template_includes: no directives");
            return Ok(());
        }
        let resolved = self.resolve_includes(source, path, 1, includes)?;
        *source = resolved;
        Ok(())
    }

    fn resolve_includes(
        &self,
        text: &str,
        from: &Path,
        depth: usize,
        includes: &mut Vec<PathBuf>,
    ) -> Result<String, LoadError> {
        debug!(?from, depth, "resolve_includes: called");
        let base = from.parent().unwrap_or_else(|| Path::new("."));
        let mut out = String::with_capacity(text.len());

        for line in text.split_inclusive('\n') {
            let Some(target) = parse_include_directive(line) else {
                out.push_str(line);
                continue;
            };

            let include = PathBuf::from(target);
            if depth > self.include_depth {
                return Err(LoadError::IncludeDepthExceeded {
                    include,
                    from: from.to_path_buf(),
                    limit: self.include_depth,
                });
            }
            if include.is_absolute() || include.components().any(|c| matches!(c, Component::ParentDir)) {
                return Err(LoadError::IncludeOutsideRoot {
                    include,
                    from: from.to_path_buf(),
                });
            }

            let full = base.join(&include);
            let content = fs::read_to_string(&full).map_err(|e| {
                debug!(?full, error = %e, "resolve_includes: read failed");
                LoadError::NotFound {
                    include: full.clone(),
                    from: from.to_path_buf(),
                }
            })?;
            includes.push(full.clone());

            let mut expanded = self.resolve_includes(&content, &full, depth + 1, includes)?;
            if line.ends_with('\n') && !expanded.ends_with('\n') {
                expanded.push('\n');
            }
            out.push_str(&expanded);
        }

        Ok(out)
    }
}
