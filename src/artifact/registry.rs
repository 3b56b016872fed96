//! Where generated artifacts become visible to the runtime that executes them

use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fmt::Debug;
use tracing::debug;

use super::Artifact;

/// Consumer of generated artifacts
///
/// Called after every successful generate or regenerate, and with
/// `unregister` when a specification's source file is deleted.
pub trait ArtifactRegistrar: Send + Sync + Debug {
    fn register(&self, id: &str, artifact: Artifact);
    fn unregister(&self, id: &str);
    fn list(&self) -> Vec<String>;
}

/// Registrar that drops everything
#[derive(Debug, Default)]
pub struct NullRegistrar;

impl ArtifactRegistrar for NullRegistrar {
    fn register(&self, _id: &str, _artifact: Artifact) {}

    fn unregister(&self, _id: &str) {}

    fn list(&self) -> Vec<String> {
        Vec::new()
    }
}

/// Registrar holding artifacts in memory, ordered by identifier
#[derive(Debug, Default)]
pub struct InMemoryRegistrar {
    artifacts: RwLock<BTreeMap<String, Artifact>>,
}

impl InMemoryRegistrar {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<Artifact> {
        self.artifacts.read().get(id).cloned()
    }
}

impl ArtifactRegistrar for InMemoryRegistrar {
    fn register(&self, id: &str, artifact: Artifact) {
        debug!(%id, hash = %artifact.content_hash, "InMemoryRegistrar::register: called");
        self.artifacts.write().insert(id.to_string(), artifact);
    }

    fn unregister(&self, id: &str) {
        debug!(%id, "InMemoryRegistrar::unregister: called");
        self.artifacts.write().remove(id);
    }

    fn list(&self) -> Vec<String> {
        self.artifacts.read().keys().cloned().collect()
    }
}
