//! Multi-layer validation of specification documents
//!
//! Layers run in order: schema, semantic, security, then the optional
//! non-blocking quality layer. A schema failure stops the pipeline; later
//! layers need a well-formed document to say anything useful. The static
//! half of the security layer runs before the template is compiled.

mod pipeline;
mod quality;
mod result;
mod schema;
mod security;
mod semantic;

pub use pipeline::{Validated, Validator, load_failure};
pub use result::{IssueKind, Layer, LayerOutcome, Location, Severity, ValidationIssue, ValidationResult};
pub use security::{StaticRule, scan_static};
