//! Artifact generation: dry-run render, then atomic write to the cache

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::NamedTempFile;
use tracing::{debug, info};

use super::Artifact;
use crate::error::{ContextError, GenerationError};
use crate::spec::{ParameterSchema, Specification};
use crate::template::{RenderContext, RenderLimits, TemplateRenderer};
use crate::validation::{IssueKind, Layer, ValidationIssue, Validated};

/// On-disk form of an artifact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactRecord {
    pub id: String,
    #[serde(rename = "content-hash")]
    pub content_hash: String,
    #[serde(rename = "generated-at")]
    pub generated_at: DateTime<Utc>,
    #[serde(rename = "display-name")]
    pub display_name: String,
    pub category: String,
    pub version: String,
    pub parameters: ParameterSchema,
    pub template: String,
}

impl ArtifactRecord {
    fn new(spec: &Specification, generated_at: DateTime<Utc>) -> Self {
        Self {
            id: spec.id.clone(),
            content_hash: spec.content_hash.clone(),
            generated_at,
            display_name: spec.display_name.clone(),
            category: spec.category.clone(),
            version: spec.version.clone(),
            parameters: spec.parameters.clone(),
            template: spec.template.clone(),
        }
    }
}

/// Turns validated specifications into artifacts
#[derive(Debug, Clone)]
pub struct ArtifactGenerator {
    cache_dir: PathBuf,
    renderer: TemplateRenderer,
}

impl ArtifactGenerator {
    pub fn new(cache_dir: impl Into<PathBuf>, limits: RenderLimits) -> Self {
        let cache_dir = cache_dir.into();
        debug!(?cache_dir, "ArtifactGenerator::new: called");
        Self {
            cache_dir,
            renderer: TemplateRenderer::new(limits),
        }
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn renderer(&self) -> &TemplateRenderer {
        &self.renderer
    }

    pub fn artifact_path(&self, id: &str) -> PathBuf {
        self.cache_dir.join(format!("{id}.json"))
    }

    /// Generate the artifact for a validated specification
    ///
    /// Renders once with representative values and once per shipped example.
    /// The cached file is reused, generation timestamp included, when its
    /// recorded content hash still matches; otherwise it is rewritten.
    pub fn generate(&self, validated: &Validated) -> Result<Artifact, GenerationError> {
        let spec = &validated.spec;
        debug!(id = %spec.id, hash = %spec.content_hash, "ArtifactGenerator::generate: called");

        self.dry_run(validated)?;

        let path = self.artifact_path(&spec.id);
        let generated_at = match read_record(&path) {
            Some(record) if record.content_hash == spec.content_hash => {
                debug!(id = %spec.id, "ArtifactGenerator::generate: cached artifact is current");
                record.generated_at
            }
            _ => {
                let now = Utc::now();
                self.write_atomic(&path, &ArtifactRecord::new(spec, now))?;
                info!(id = %spec.id, path = %path.display(), "Generated artifact");
                now
            }
        };

        Ok(Artifact {
            id: spec.id.clone(),
            content_hash: spec.content_hash.clone(),
            template: Arc::new(validated.template.clone()),
            spec: Arc::new(spec.clone()),
            generated_at,
        })
    }

    fn dry_run(&self, validated: &Validated) -> Result<(), GenerationError> {
        let spec = &validated.spec;
        let context_err = |source: ContextError| GenerationError::Context {
            id: spec.id.clone(),
            source,
        };
        let mut contexts = vec![RenderContext::representative(&spec.parameters, &spec.examples).map_err(context_err)?];
        for example in &spec.examples {
            contexts.push(RenderContext::resolve(&spec.parameters, example.parameters.clone()).map_err(context_err)?);
        }

        for ctx in contexts {
            self.renderer
                .render(&validated.template, &ctx.into_json())
                .map_err(|source| GenerationError::DryRun {
                    id: spec.id.clone(),
                    source,
                })?;
        }
        Ok(())
    }

    fn write_atomic(&self, path: &Path, record: &ArtifactRecord) -> Result<(), GenerationError> {
        let io_err = |source: std::io::Error| GenerationError::Io {
            path: path.to_path_buf(),
            source,
        };
        fs::create_dir_all(&self.cache_dir).map_err(io_err)?;
        let json = serde_json::to_string_pretty(record)?;
        let mut tmp = NamedTempFile::new_in(&self.cache_dir).map_err(io_err)?;
        tmp.write_all(json.as_bytes()).map_err(io_err)?;
        tmp.persist(path).map_err(|e| io_err(e.error))?;
        Ok(())
    }

    /// Delete the cached artifact file, if present
    pub fn remove(&self, id: &str) -> Result<(), GenerationError> {
        let path = self.artifact_path(id);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(GenerationError::Io { path, source }),
        }
    }
}

fn read_record(path: &Path) -> Option<ArtifactRecord> {
    let text = fs::read_to_string(path).ok()?;
    serde_json::from_str(&text).ok()
}

/// Generation failure as a validation issue
pub fn generation_issue(err: &GenerationError) -> ValidationIssue {
    let mut issue = ValidationIssue::error(
        Layer::Generation,
        IssueKind::GenerationError,
        err.to_string(),
        Default::default(),
    );
    if matches!(err, GenerationError::DryRun { .. } | GenerationError::Context { .. }) {
        issue.location.path = Some("template.source".to_string());
    }
    issue
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RenderError;
    use crate::spec::{DocumentScope, SpecLoader};
    use crate::validation::Validator;
    use tempfile::TempDir;

    fn validated(yaml: &str) -> Validated {
        let doc = SpecLoader::default()
            .load_str(Path::new("g.yml"), yaml.to_string())
            .unwrap();
        let (result, validated) = Validator::default().validate(&doc, &DocumentScope::new());
        validated.unwrap_or_else(|| panic!("validation failed: {:?}", result.errors))
    }

    const SPEC: &str = r#"
version: "1.0"
metadata: { name: greet, display_name: Greet }
parameters:
  who: { type: string, required: true }
  times: { type: int, default: 2 }
template: { source: "Hello {{who}} x{{times}}" }
"#;

    #[test]
    fn test_generate_writes_artifact() {
        let dir = TempDir::new().unwrap();
        let generator = ArtifactGenerator::new(dir.path(), RenderLimits::default());
        let artifact = generator.generate(&validated(SPEC)).unwrap();

        assert_eq!(artifact.id, "greet");
        let record = read_record(&generator.artifact_path("greet")).unwrap();
        assert_eq!(record.content_hash, artifact.content_hash);
        assert_eq!(record.generated_at, artifact.generated_at);
    }

    #[test]
    fn test_regenerate_unchanged_reuses_timestamp() {
        let dir = TempDir::new().unwrap();
        let generator = ArtifactGenerator::new(dir.path(), RenderLimits::default());
        let v = validated(SPEC);
        let first = generator.generate(&v).unwrap();
        let second = generator.generate(&v).unwrap();
        assert_eq!(first.generated_at, second.generated_at);

        let changed = validated(&SPEC.replace("Hello", "Hi"));
        let third = generator.generate(&changed).unwrap();
        assert_ne!(third.content_hash, first.content_hash);
        let record = read_record(&generator.artifact_path("greet")).unwrap();
        assert_eq!(record.content_hash, third.content_hash);
    }

    #[test]
    fn test_dry_run_failure_is_generation_error() {
        let dir = TempDir::new().unwrap();
        let limits = RenderLimits {
            max_output_bytes: 4,
            ..RenderLimits::default()
        };
        let generator = ArtifactGenerator::new(dir.path(), limits);
        let err = generator.generate(&validated(SPEC)).unwrap_err();
        match &err {
            GenerationError::DryRun { source, .. } => assert!(matches!(source, RenderError::ResourceLimitExceeded(_))),
            other => panic!("unexpected {other:?}"),
        }
        assert!(!generator.artifact_path("greet").exists());

        let issue = generation_issue(&err);
        assert_eq!(issue.layer, Layer::Generation);
        assert_eq!(issue.kind, IssueKind::GenerationError);
    }

    #[test]
    fn test_pattern_constrained_required_string_generates() {
        let dir = TempDir::new().unwrap();
        let generator = ArtifactGenerator::new(dir.path(), RenderLimits::default());
        let yaml = r#"
version: "1.0"
metadata: { name: release, display_name: Release }
parameters:
  tag: { type: string, required: true, constraints: { pattern: "^v[0-9]+$" } }
template: { source: "Release {{tag}}" }
"#;
        let artifact = generator.generate(&validated(yaml)).unwrap();
        assert_eq!(artifact.id, "release");
        assert!(generator.artifact_path("release").exists());
    }

    #[test]
    fn test_bad_example_fails_generation() {
        let dir = TempDir::new().unwrap();
        let generator = ArtifactGenerator::new(dir.path(), RenderLimits::default());
        let yaml = format!("{SPEC}examples:\n  - parameters: {{ times: 3 }}\n");
        let err = generator.generate(&validated(&yaml)).unwrap_err();
        assert!(matches!(err, GenerationError::Context { .. }));
    }

    #[test]
    fn test_remove_missing_is_ok() {
        let dir = TempDir::new().unwrap();
        let generator = ArtifactGenerator::new(dir.path(), RenderLimits::default());
        generator.remove("nothing").unwrap();
    }
}
