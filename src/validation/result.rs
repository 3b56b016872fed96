//! Validation issues and per-file results

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::error::FailureCategory;

/// Pipeline layer that produced an issue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Layer {
    Parse,
    Schema,
    Semantic,
    Security,
    Quality,
    Generation,
}

impl Layer {
    /// Layers in the order the pipeline runs them
    pub const ALL: [Layer; 6] = [
        Layer::Parse,
        Layer::Schema,
        Layer::Semantic,
        Layer::Security,
        Layer::Quality,
        Layer::Generation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Layer::Parse => "parse",
            Layer::Schema => "schema",
            Layer::Semantic => "semantic",
            Layer::Security => "security",
            Layer::Quality => "quality",
            Layer::Generation => "generation",
        }
    }
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

/// Error class within the taxonomy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    ParseError,
    NotFound,
    IncludeDepthExceeded,
    SchemaError,
    SemanticError,
    CircularReference,
    SecurityViolation,
    ResourceLimitExceeded,
    GenerationError,
    Quality,
}

/// Pointer into the source: a document path plus file position when known
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    /// Machine-addressable document path, e.g. `metadata.name`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<usize>,
}

impl Location {
    pub fn at(path: impl Into<String>) -> Self {
        Self {
            path: Some(path.into()),
            ..Default::default()
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut wrote = false;
        if let Some(file) = &self.file {
            write!(f, "{}", file.display())?;
            if let Some(line) = self.line {
                write!(f, ":{line}")?;
                if let Some(col) = self.column {
                    write!(f, ":{col}")?;
                }
            }
            wrote = true;
        }
        if let Some(path) = &self.path {
            if wrote {
                f.write_str(" ")?;
            }
            write!(f, "[{path}]")?;
        }
        Ok(())
    }
}

/// One finding from one layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub layer: Layer,
    pub severity: Severity,
    pub kind: IssueKind,
    pub message: String,
    pub location: Location,
}

impl ValidationIssue {
    pub fn error(layer: Layer, kind: IssueKind, message: impl Into<String>, location: Location) -> Self {
        Self {
            layer,
            severity: Severity::Error,
            kind,
            message: message.into(),
            location,
        }
    }

    pub fn warning(layer: Layer, kind: IssueKind, message: impl Into<String>, location: Location) -> Self {
        Self {
            layer,
            severity: Severity::Warning,
            kind,
            message: message.into(),
            location,
        }
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }

    pub fn category(&self) -> FailureCategory {
        match self.kind {
            IssueKind::SecurityViolation => FailureCategory::Security,
            IssueKind::GenerationError => FailureCategory::Generation,
            _ => FailureCategory::Validation,
        }
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.layer, self.message)?;
        let loc = self.location.to_string();
        if !loc.is_empty() {
            write!(f, " ({loc})")?;
        }
        Ok(())
    }
}

/// Whether a layer ran and whether it passed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerOutcome {
    pub layer: Layer,
    pub ran: bool,
    pub passed: bool,
}

/// Output of running the pipeline on one file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    /// Identifier, when the document got far enough to have one
    pub id: Option<String>,
    pub path: PathBuf,
    pub layers: Vec<LayerOutcome>,
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
}

impl ValidationResult {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    /// Record a layer's findings, splitting errors from warnings
    pub fn record(&mut self, layer: Layer, issues: Vec<ValidationIssue>) {
        let mut passed = true;
        for mut issue in issues {
            if issue.location.file.is_none() {
                issue.location.file = Some(self.path.clone());
            }
            if issue.is_error() {
                passed = false;
                self.errors.push(issue);
            } else {
                self.warnings.push(issue);
            }
        }
        self.set_layer(layer, true, passed);
    }

    /// Mark a layer as skipped
    pub fn skip(&mut self, layer: Layer) {
        self.set_layer(layer, false, false);
    }

    fn set_layer(&mut self, layer: Layer, ran: bool, passed: bool) {
        if let Some(existing) = self.layers.iter_mut().find(|o| o.layer == layer) {
            existing.passed = if existing.ran && ran {
                existing.passed && passed
            } else if ran {
                passed
            } else {
                existing.passed
            };
            existing.ran |= ran;
        } else {
            self.layers.push(LayerOutcome { layer, ran, passed });
        }
    }

    pub fn passed(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn layer(&self, layer: Layer) -> Option<&LayerOutcome> {
        self.layers.iter().find(|o| o.layer == layer)
    }

    pub fn security_violations(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.errors.iter().filter(|e| e.kind == IssueKind::SecurityViolation)
    }

    pub fn has_security_violation(&self) -> bool {
        self.security_violations().next().is_some()
    }

    /// Most severe failure class among the errors
    pub fn category(&self) -> Option<FailureCategory> {
        self.errors
            .iter()
            .map(ValidationIssue::category)
            .reduce(FailureCategory::max)
    }
}
