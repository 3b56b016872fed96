//! Specification documents: loading, hashing, typed model and inheritance

mod document;
mod hash;
mod inheritance;
mod loader;
mod model;

pub use document::SpecDocument;
pub use hash::{canonical_json, sha256_hex, value_hash};
pub use inheritance::{DocumentScope, InheritanceError, effective_parameters};
pub use loader::{SpecLoader, parse_include_directive};
pub use model::{
    Constraints, DEFAULT_CATEGORY, Example, ParamEntry, ParamType, ParameterSchema, ParameterSpec, Specification,
    parameter_entries,
};
