//! promptd - validating, sandboxed, hot-reloading prompt specification pipeline
//!
//! Declarative prompt specifications (YAML) are discovered under a set of scan
//! roots, validated in layers, compiled into render-ready artifacts and kept in
//! a live index that is updated in place as files change on disk.
//!
//! # Modules
//!
//! - [`spec`] - Loading, hashing, typed model and `extends` inheritance
//! - [`validation`] - Parse, schema, semantic, security and quality layers
//! - [`template`] - Template analysis, parameter context and sandboxed rendering
//! - [`artifact`] - Artifact generation, on-disk cache and registration
//! - [`index`] - Discovery, override policy and the live index
//! - [`watcher`] - Debounced hot reload driven by filesystem events
//! - [`audit`] - Fire-and-forget audit events
//! - [`config`] - Configuration types and loading
//! - [`cli`] / [`report`] - Command-line surface

pub mod artifact;
pub mod audit;
pub mod cli;
pub mod config;
pub mod error;
pub mod index;
pub mod report;
pub mod spec;
pub mod template;
pub mod validation;
pub mod watcher;

// Re-export commonly used types
pub use artifact::{Artifact, ArtifactGenerator, ArtifactRegistrar, InMemoryRegistrar, NullRegistrar};
pub use audit::{AuditEvent, AuditEventType, AuditSink, JournalAuditSink, MemoryAuditSink, NullAuditSink};
pub use config::{Config, OverridePolicy};
pub use error::{ContextError, FailureCategory, GenerationError, IndexError, LoadError, RenderError};
pub use index::{DiscoveryResult, IndexEntry, ReprocessOutcome, SpecIndex};
pub use spec::{ParamType, ParameterSchema, SpecDocument, SpecLoader, Specification};
pub use template::{RenderContext, RenderLimits, TemplateRenderer};
pub use validation::{Layer, ValidationIssue, ValidationResult, Validator};
pub use watcher::{ChangeWatcher, WatcherConfig};
