//! Error taxonomy for the specification pipeline
//!
//! Each stage owns a small `thiserror` enum. None of these ever escape as a
//! process fault from discovery or the watcher: the pipeline folds them into
//! `ValidationIssue`s so one bad file never affects another.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

fn position(line: &Option<usize>, column: &Option<usize>) -> String {
    match (line, column) {
        (Some(l), Some(c)) => format!(" at line {l}, column {c}"),
        (Some(l), None) => format!(" at line {l}"),
        _ => String::new(),
    }
}

/// Errors raised while reading a specification file and resolving its includes
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("Failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Parse error in {}{}: {message}", .path.display(), position(.line, .column))]
    Parse {
        path: PathBuf,
        message: String,
        line: Option<usize>,
        column: Option<usize>,
    },

    #[error("Include not found: {} (referenced from {})", .include.display(), .from.display())]
    NotFound { include: PathBuf, from: PathBuf },

    #[error("Include depth {limit} exceeded: {} includes {}", .from.display(), .include.display())]
    IncludeDepthExceeded { include: PathBuf, from: PathBuf, limit: usize },

    #[error("Include path must stay inside the specification directory: {}", .include.display())]
    IncludeOutsideRoot { include: PathBuf, from: PathBuf },
}

impl LoadError {
    /// Source file the error belongs to
    pub fn path(&self) -> &PathBuf {
        match self {
            LoadError::Io { path, .. } | LoadError::Parse { path, .. } => path,
            LoadError::NotFound { from, .. }
            | LoadError::IncludeDepthExceeded { from, .. }
            | LoadError::IncludeOutsideRoot { from, .. } => from,
        }
    }

    /// Line/column when the parser could derive one
    pub fn position(&self) -> (Option<usize>, Option<usize>) {
        match self {
            LoadError::Parse { line, column, .. } => (*line, *column),
            _ => (None, None),
        }
    }
}

/// Which sandbox ceiling a render (or template) breached
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResourceLimit {
    TemplateTooLarge { size: usize, limit: usize },
    LoopIterations { limit: usize },
    RenderTimeout { limit_ms: u64 },
    OutputTooLarge { limit: usize },
}

impl ResourceLimit {
    pub fn timeout(limit: Duration) -> Self {
        ResourceLimit::RenderTimeout {
            limit_ms: limit.as_millis() as u64,
        }
    }
}

impl fmt::Display for ResourceLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceLimit::TemplateTooLarge { size, limit } => {
                write!(f, "template is {size} bytes, limit is {limit}")
            }
            ResourceLimit::LoopIterations { limit } => write!(f, "more than {limit} loop iterations"),
            ResourceLimit::RenderTimeout { limit_ms } => write!(f, "render exceeded {limit_ms}ms"),
            ResourceLimit::OutputTooLarge { limit } => write!(f, "output exceeded {limit} bytes"),
        }
    }
}

/// Errors from compiling or rendering a template in the sandbox
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RenderError {
    #[error("Template compile error{}: {message}", position(.line, .column))]
    Compile {
        message: String,
        line: Option<usize>,
        column: Option<usize>,
    },

    #[error("Undefined variable: {name}")]
    UndefinedVariable { name: String },

    #[error("Resource limit exceeded: {0}")]
    ResourceLimitExceeded(ResourceLimit),

    #[error("Helper '{0}' is not available in the sandbox")]
    HelperNotAllowed(String),

    #[error("Render failed: {0}")]
    Failed(String),
}

impl RenderError {
    pub fn is_resource_limit(&self) -> bool {
        matches!(self, RenderError::ResourceLimitExceeded(_))
    }

    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            RenderError::ResourceLimitExceeded(ResourceLimit::RenderTimeout { .. })
        )
    }

    pub fn is_output_too_large(&self) -> bool {
        matches!(
            self,
            RenderError::ResourceLimitExceeded(ResourceLimit::OutputTooLarge { .. })
        )
    }
}

/// Errors resolving invocation values against a parameter schema
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ContextError {
    #[error("Unknown parameter: {0}")]
    UnknownParameter(String),

    #[error("Missing required parameter: {0}")]
    MissingRequired(String),

    #[error("Parameter '{name}' expects {expected}, got {found}")]
    TypeMismatch {
        name: String,
        expected: String,
        found: String,
    },

    #[error("Parameter '{name}': {message}")]
    Constraint { name: String, message: String },
}

/// Errors producing an artifact from a validated specification
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("Dry-run render of '{id}' failed: {source}")]
    DryRun {
        id: String,
        #[source]
        source: RenderError,
    },

    #[error("No representative context for '{id}': {source}")]
    Context {
        id: String,
        #[source]
        source: ContextError,
    },

    #[error("Failed to write artifact {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize artifact: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Errors serving lookups and renders from the index
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("Unknown specification: {0}")]
    NotFound(String),

    #[error("Specification '{0}' has no valid artifact")]
    NoArtifact(String),

    #[error(transparent)]
    Context(#[from] ContextError),

    #[error(transparent)]
    Render(#[from] RenderError),
}

/// Errors opening an audit sink
#[derive(Debug, Error)]
pub enum AuditError {
    #[error("Failed to open audit journal {}: {message}", .path.display())]
    Open { path: PathBuf, message: String },
}

/// Coarse failure class used for command exit codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureCategory {
    Validation,
    Generation,
    Security,
    Other,
}

impl FailureCategory {
    pub fn exit_code(self) -> i32 {
        match self {
            FailureCategory::Other => 1,
            FailureCategory::Validation => 2,
            FailureCategory::Generation => 3,
            FailureCategory::Security => 4,
        }
    }

    /// Most severe of two categories (security > generation > validation > other)
    pub fn max(self, other: FailureCategory) -> FailureCategory {
        fn rank(c: FailureCategory) -> u8 {
            match c {
                FailureCategory::Other => 0,
                FailureCategory::Validation => 1,
                FailureCategory::Generation => 2,
                FailureCategory::Security => 3,
            }
        }
        if rank(other) > rank(self) { other } else { self }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes_are_distinct() {
        let codes = [
            FailureCategory::Validation.exit_code(),
            FailureCategory::Generation.exit_code(),
            FailureCategory::Security.exit_code(),
            FailureCategory::Other.exit_code(),
        ];
        for (i, a) in codes.iter().enumerate() {
            assert_ne!(*a, 0);
            for b in &codes[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn test_category_max() {
        assert_eq!(
            FailureCategory::Validation.max(FailureCategory::Security),
            FailureCategory::Security
        );
        assert_eq!(
            FailureCategory::Generation.max(FailureCategory::Validation),
            FailureCategory::Generation
        );
    }

    #[test]
    fn test_parse_error_display_includes_position() {
        let err = LoadError::Parse {
            path: PathBuf::from("a.yml"),
            message: "bad indent".to_string(),
            line: Some(3),
            column: Some(7),
        };
        assert_eq!(err.to_string(), "Parse error in a.yml at line 3, column 7: bad indent");
        assert_eq!(err.position(), (Some(3), Some(7)));
    }

    #[test]
    fn test_resource_limit_kinds() {
        let timeout = RenderError::ResourceLimitExceeded(ResourceLimit::timeout(Duration::from_millis(20)));
        assert!(timeout.is_resource_limit());
        assert!(timeout.is_timeout());
        assert!(!timeout.is_output_too_large());
        assert!(timeout.to_string().contains("20ms"));
    }
}
