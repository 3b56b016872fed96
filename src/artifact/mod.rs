//! Generated artifacts and their registration
//!
//! An `Artifact` is the render-ready form of a validated specification: the
//! compiled template bound to its effective parameter schema. It is immutable;
//! a changed specification yields a new artifact that replaces the old one.

mod generator;
mod registry;

pub use generator::{ArtifactGenerator, ArtifactRecord, generation_issue};
pub use registry::{ArtifactRegistrar, InMemoryRegistrar, NullRegistrar};

use chrono::{DateTime, Utc};
use handlebars::Template;
use serde_json::{Map, Value as Json};
use std::sync::Arc;

use crate::error::IndexError;
use crate::spec::{ParameterSchema, Specification};
use crate::template::{RenderContext, TemplateRenderer};

#[derive(Debug, Clone)]
pub struct Artifact {
    pub id: String,
    /// Content hash of the specification this was generated from
    pub content_hash: String,
    pub template: Arc<Template>,
    pub spec: Arc<Specification>,
    pub generated_at: DateTime<Utc>,
}

impl Artifact {
    pub fn parameters(&self) -> &ParameterSchema {
        &self.spec.parameters
    }

    /// Whether this artifact was derived from `spec` as it is now
    pub fn is_current_for(&self, spec: &Specification) -> bool {
        self.content_hash == spec.content_hash
    }

    /// Resolve `values` against the parameter schema and render
    pub fn invoke(&self, renderer: &TemplateRenderer, values: Map<String, Json>) -> Result<String, IndexError> {
        let ctx = RenderContext::resolve(self.parameters(), values)?;
        Ok(renderer.render(&self.template, &ctx.into_json())?)
    }
}

impl PartialEq for Artifact {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.content_hash == other.content_hash && self.generated_at == other.generated_at
    }
}
