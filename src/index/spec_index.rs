//! Live index of specifications and their artifacts
//!
//! Readers take a snapshot (`Arc` of the whole map) and never observe a
//! partially updated entry. All mutation goes through one writer lock and
//! replaces entries wholesale: a full scan swaps the entire map, an
//! incremental reprocess swaps a copy with one entry replaced.
//!
//! When a reload of an identifier fails, its entry keeps serving the last
//! good specification and artifact and records the failing result as its
//! latest diagnostic.

use lru::LruCache;
use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value as Json, json};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::discovery::{discover_files, root_rank};
use crate::artifact::{Artifact, ArtifactGenerator, ArtifactRegistrar, generation_issue};
use crate::audit::{AuditEvent, AuditEventType, AuditSink, record_result};
use crate::config::{Config, DiscoveryConfig, OverridePolicy};
use crate::error::IndexError;
use crate::spec::{DocumentScope, SpecDocument, SpecLoader, Specification, sha256_hex};
use crate::template::RenderContext;
use crate::validation::{IssueKind, Layer, Location, ValidationIssue, ValidationResult, Validator, load_failure};

/// One identifier's slot in the index
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    pub id: String,
    /// File that owns the identifier
    pub path: PathBuf,
    pub root_rank: usize,
    /// Raw digest of the most recently processed version of `path`
    pub source_digest: String,
    /// Last good specification
    pub spec: Option<Arc<Specification>>,
    /// Artifact generated from `spec`
    pub artifact: Option<Artifact>,
    /// Latest validation result, good or bad
    pub result: ValidationResult,
}

impl IndexEntry {
    pub fn is_serving(&self) -> bool {
        self.artifact.is_some()
    }
}

/// Outcome of a full scan
#[derive(Debug, Clone)]
pub struct DiscoveryResult {
    /// Identifiers serving an artifact, sorted
    pub loaded: Vec<String>,
    /// Every file whose latest result has errors
    pub failed: BTreeMap<PathBuf, ValidationResult>,
    /// Index-level findings, e.g. shadowed duplicate identifiers
    pub diagnostics: Vec<ValidationIssue>,
    pub duration: Duration,
}

impl DiscoveryResult {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

// Scan duration differs between otherwise identical scans
impl PartialEq for DiscoveryResult {
    fn eq(&self, other: &Self) -> bool {
        self.loaded == other.loaded && self.failed == other.failed && self.diagnostics == other.diagnostics
    }
}

/// What an incremental reprocess did
#[derive(Debug, Clone, PartialEq)]
pub enum ReprocessOutcome {
    /// Entry replaced with a freshly generated artifact
    Updated { id: String, result: ValidationResult },
    /// Same bytes as the entry already holds
    Unchanged { id: String },
    /// Pipeline failed; any last good artifact keeps serving
    Failed { id: Option<String>, result: ValidationResult },
    /// Another file owns the identifier under the override policy
    Shadowed { id: String, by: PathBuf },
    /// The file disappeared and its entry was dropped
    Removed { id: String },
    /// The file changed again while processing; the result was discarded
    Stale { path: PathBuf },
    /// Nothing in the index referred to the path
    Ignored { path: PathBuf },
}

impl ReprocessOutcome {
    pub fn is_stale(&self) -> bool {
        matches!(self, ReprocessOutcome::Stale { .. })
    }

    pub fn id(&self) -> Option<&str> {
        match self {
            ReprocessOutcome::Updated { id, .. }
            | ReprocessOutcome::Unchanged { id }
            | ReprocessOutcome::Shadowed { id, .. }
            | ReprocessOutcome::Removed { id } => Some(id),
            ReprocessOutcome::Failed { id, .. } => id.as_deref(),
            ReprocessOutcome::Stale { .. } | ReprocessOutcome::Ignored { .. } => None,
        }
    }
}

#[derive(Debug, Clone)]
struct Candidate {
    rank: usize,
    path: PathBuf,
    doc: Arc<SpecDocument>,
}

/// State only the writer touches
#[derive(Debug, Default)]
struct WriterState {
    roots: Vec<PathBuf>,
    scope: DocumentScope,
    /// Identifier each known file declares
    owners: HashMap<PathBuf, String>,
    /// Losing declarations per identifier, as (rank, path)
    shadowed: BTreeMap<String, Vec<(usize, PathBuf)>>,
    /// Failures that have no entry of their own
    failed: BTreeMap<PathBuf, ValidationResult>,
    diagnostics: Vec<ValidationIssue>,
}

type EntryMap = HashMap<String, Arc<IndexEntry>>;

pub struct SpecIndex {
    entries: RwLock<Arc<EntryMap>>,
    state: Mutex<WriterState>,
    discovery: DiscoveryConfig,
    loader: SpecLoader,
    validator: Validator,
    generator: ArtifactGenerator,
    render_cache: Mutex<LruCache<(String, String), String>>,
    audit: Arc<dyn AuditSink>,
    registrar: Arc<dyn ArtifactRegistrar>,
    #[cfg(test)]
    before_digest_check: Mutex<Option<Box<dyn FnOnce(&Path) + Send>>>,
}

impl std::fmt::Debug for SpecIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpecIndex")
            .field("entries", &self.entries.read().len())
            .field("generator", &self.generator)
            .finish_non_exhaustive()
    }
}

impl SpecIndex {
    pub fn new(config: &Config, audit: Arc<dyn AuditSink>, registrar: Arc<dyn ArtifactRegistrar>) -> Self {
        debug!("SpecIndex::new: called");
        let capacity = NonZeroUsize::new(config.cache.render_cache_size).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: RwLock::new(Arc::new(HashMap::new())),
            state: Mutex::new(WriterState {
                roots: config.discovery.expanded_paths(),
                ..Default::default()
            }),
            discovery: config.discovery.clone(),
            loader: SpecLoader::new(config.validation.include_depth),
            validator: Validator::from_config(config),
            generator: ArtifactGenerator::new(config.cache.expanded_dir(), config.limits.render_limits()),
            render_cache: Mutex::new(LruCache::new(capacity)),
            audit,
            registrar,
            #[cfg(test)]
            before_digest_check: Mutex::new(None),
        }
    }

    // ---- read side ----

    /// Current index contents
    pub fn snapshot(&self) -> Arc<EntryMap> {
        self.entries.read().clone()
    }

    pub fn entry(&self, id: &str) -> Option<Arc<IndexEntry>> {
        self.snapshot().get(id).cloned()
    }

    /// Sorted identifiers with an entry
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.snapshot().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    pub fn roots(&self) -> Vec<PathBuf> {
        self.state.lock().roots.clone()
    }

    /// Whether `path` looks like a specification file
    pub fn watches(&self, path: &Path) -> bool {
        self.discovery.matches_extension(path)
    }

    pub fn latest_result(&self, id: &str) -> Option<ValidationResult> {
        self.entry(id).map(|e| e.result.clone())
    }

    /// Every file whose latest result has errors
    pub fn failures(&self) -> BTreeMap<PathBuf, ValidationResult> {
        let mut failed = self.state.lock().failed.clone();
        for entry in self.snapshot().values() {
            if !entry.result.passed() {
                failed.insert(entry.path.clone(), entry.result.clone());
            }
        }
        failed
    }

    pub fn diagnostics(&self) -> Vec<ValidationIssue> {
        self.state.lock().diagnostics.clone()
    }

    /// Artifact for `id`, provided it still matches its specification
    ///
    /// A stale artifact is evicted rather than served.
    pub fn get(&self, id: &str) -> Option<Artifact> {
        let entry = self.entry(id)?;
        let artifact = entry.artifact.as_ref()?;
        let spec = entry.spec.as_ref()?;
        if artifact.is_current_for(spec) {
            return Some(artifact.clone());
        }
        warn!(%id, artifact = %artifact.content_hash, spec = %spec.content_hash, "Evicting stale artifact");
        self.evict(id, Some(artifact.content_hash.as_str()));
        None
    }

    /// Render `id` with `values`, serving repeated requests from the render cache
    pub fn render(&self, id: &str, values: Map<String, Json>) -> Result<String, IndexError> {
        debug!(%id, "SpecIndex::render: called");
        if self.entry(id).is_none() {
            return Err(IndexError::NotFound(id.to_string()));
        }
        let artifact = self.get(id).ok_or_else(|| IndexError::NoArtifact(id.to_string()))?;
        let ctx = RenderContext::resolve(artifact.parameters(), values)?;
        let key = (artifact.content_hash.clone(), ctx.hash.clone());

        if let Some(hit) = self.render_cache.lock().get(&key) {
            debug!(%id, "SpecIndex::render: cache hit");
            return Ok(hit.clone());
        }
        let output = self.generator.renderer().render(&artifact.template, &ctx.into_json())?;
        self.render_cache.lock().put(key, output.clone());
        Ok(output)
    }

    // ---- write side ----

    /// Rescan the configured roots
    pub fn rescan(&self) -> DiscoveryResult {
        let roots = self.roots();
        self.scan(&roots)
    }

    /// Full rebuild from `roots`; the new index replaces the old one in one swap
    pub fn scan(&self, roots: &[PathBuf]) -> DiscoveryResult {
        let started = Instant::now();
        info!(?roots, "Scanning specification roots");
        let mut state = self.state.lock();
        let previous = self.snapshot();

        let mut fresh = WriterState {
            roots: roots.to_vec(),
            ..Default::default()
        };
        let mut candidates: BTreeMap<String, Vec<Candidate>> = BTreeMap::new();

        for file in discover_files(roots, &self.discovery) {
            match self.loader.load(&file.path) {
                Ok(doc) => {
                    let doc = Arc::new(doc);
                    match doc.identifier().map(str::to_string) {
                        Some(id) => {
                            fresh.owners.insert(file.path.clone(), id.clone());
                            candidates.entry(id).or_default().push(Candidate {
                                rank: file.root_rank,
                                path: file.path,
                                doc,
                            });
                        }
                        None => {
                            let (result, _) = self.validator.validate(&doc, &DocumentScope::new());
                            record_result(self.audit.as_ref(), &result);
                            fresh.failed.insert(file.path, result);
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Failed to load specification");
                    let result = load_failure(&e);
                    record_result(self.audit.as_ref(), &result);
                    fresh.failed.insert(file.path, result);
                }
            }
        }

        let mut winners = Vec::new();
        for (id, mut cands) in candidates {
            cands.sort_by(|a, b| (a.rank, &a.path).cmp(&(b.rank, &b.path)));
            let winner = match self.discovery.override_policy {
                OverridePolicy::LastWins => cands.pop(),
                OverridePolicy::FirstWins | OverridePolicy::Error => Some(cands.remove(0)),
            };
            let Some(winner) = winner else {
                continue;
            };
            for loser in cands {
                self.shadow(&mut fresh, &id, &winner.path, loser.rank, &loser.path);
            }
            fresh.scope.insert(winner.doc.clone());
            winners.push((id, winner));
        }

        let mut map: EntryMap = HashMap::new();
        for (id, winner) in winners {
            let prior = previous.get(&id).filter(|e| e.path == winner.path);
            if let Some(entry) = self.process(&fresh.scope, &id, &winner, prior.map(Arc::as_ref), false) {
                map.insert(id, Arc::new(entry));
            }
        }

        for (id, entry) in &map {
            self.sync_registrar(previous.get(id).map(Arc::as_ref), Some(entry.as_ref()));
        }
        for (id, old) in previous.iter() {
            if !map.contains_key(id) {
                self.sync_registrar(Some(old.as_ref()), None);
            }
        }

        let map = Arc::new(map);
        *self.entries.write() = map.clone();
        *state = fresh;

        let mut loaded: Vec<String> = map.values().filter(|e| e.is_serving()).map(|e| e.id.clone()).collect();
        loaded.sort();
        let mut failed = state.failed.clone();
        for entry in map.values() {
            if !entry.result.passed() {
                failed.insert(entry.path.clone(), entry.result.clone());
            }
        }
        let result = DiscoveryResult {
            loaded,
            failed,
            diagnostics: state.diagnostics.clone(),
            duration: started.elapsed(),
        };

        info!(
            loaded = result.loaded.len(),
            failed = result.failed.len(),
            ms = result.duration.as_millis() as u64,
            "Scan complete"
        );
        self.audit.record(AuditEvent::new(
            AuditEventType::ScanCompleted,
            "",
            if result.is_clean() { "ok" } else { "partial" },
            json!({ "loaded": result.loaded.len(), "failed": result.failed.len() }),
        ));
        result
    }

    /// Re-run the pipeline for one changed, created or deleted file
    ///
    /// Specifications extending the affected identifier are reprocessed too.
    pub fn reprocess_path(&self, path: &Path) -> ReprocessOutcome {
        debug!(?path, "SpecIndex::reprocess_path: called");
        let mut state = self.state.lock();
        let outcome = self.reprocess_locked(&mut state, path, false);

        if let Some(id) = outcome.id().map(str::to_string)
            && matches!(
                outcome,
                ReprocessOutcome::Updated { .. } | ReprocessOutcome::Failed { .. } | ReprocessOutcome::Removed { .. }
            )
        {
            let snapshot = self.snapshot();
            for child in state.scope.descendants_of(&id) {
                if let Some(entry) = snapshot.get(&child) {
                    debug!(%id, %child, "SpecIndex::reprocess_path: cascading to dependent");
                    self.reprocess_locked(&mut state, &entry.path.clone(), true);
                }
            }
        }
        outcome
    }

    /// Drop the entry owned by a deleted file
    pub fn remove_path(&self, path: &Path) -> ReprocessOutcome {
        let mut state = self.state.lock();
        self.remove_locked(&mut state, path)
    }

    /// Drop the artifact for `id` (and its cached file); the next reprocess regenerates it
    pub fn invalidate(&self, id: &str) -> bool {
        debug!(%id, "SpecIndex::invalidate: called");
        let evicted = self.evict(id, None);
        if evicted && let Err(e) = self.generator.remove(id) {
            warn!(%id, error = %e, "Failed to remove cached artifact");
        }
        evicted
    }

    /// Drop the served artifact; with `expected`, only if it still carries that content hash
    fn evict(&self, id: &str, expected: Option<&str>) -> bool {
        let _state = self.state.lock();
        let Some(entry) = self.entry(id) else {
            return false;
        };
        let Some(artifact) = &entry.artifact else {
            return false;
        };
        if let Some(hash) = expected
            && artifact.content_hash != hash
        {
            debug!(%id, "SpecIndex::evict: artifact replaced since lookup, keeping it");
            return false;
        }
        self.purge_render_cache(&artifact.content_hash);

        let mut next = (*entry).clone();
        next.artifact = None;
        next.spec = None;
        self.commit(next);
        true
    }

    fn reprocess_locked(&self, state: &mut WriterState, path: &Path, force: bool) -> ReprocessOutcome {
        if !path.exists() {
            return self.remove_locked(state, path);
        }

        let doc = match self.loader.load(path) {
            Ok(doc) => Arc::new(doc),
            Err(e) => {
                warn!(?path, error = %e, "Reload failed");
                let result = load_failure(&e);
                record_result(self.audit.as_ref(), &result);
                return self.record_failure(state, path, result);
            }
        };

        let Some(id) = doc.identifier().map(str::to_string) else {
            let (result, _) = self.validator.validate(&doc, &state.scope);
            record_result(self.audit.as_ref(), &result);
            if let Some(old_id) = state.owners.remove(path) {
                self.release(state, path, &old_id);
            }
            state.failed.insert(path.to_path_buf(), result.clone());
            return ReprocessOutcome::Failed { id: None, result };
        };

        if let Some(old_id) = state.owners.get(path).cloned()
            && old_id != id
        {
            info!(?path, from = %old_id, to = %id, "Specification changed identifier");
            self.release(state, path, &old_id);
        }
        state.owners.insert(path.to_path_buf(), id.clone());
        state.failed.remove(path);

        let rank = root_rank(&state.roots, path);
        let current = self.snapshot();
        if let Some(incumbent) = current.get(&id)
            && incumbent.path != path
        {
            if !self.challenger_wins((incumbent.root_rank, &incumbent.path), (rank, path)) {
                let winner = incumbent.path.clone();
                self.shadow(state, &id, &winner, rank, path);
                return ReprocessOutcome::Shadowed { id, by: winner };
            }
            self.shadow(state, &id, path, incumbent.root_rank, &incumbent.path.clone());
        }

        if !force
            && let Some(entry) = current.get(&id)
            && entry.path == path
            && entry.source_digest == doc.source_digest
            && (entry.is_serving() || !entry.result.passed())
        {
            debug!(%id, "SpecIndex::reprocess: unchanged");
            return ReprocessOutcome::Unchanged { id };
        }

        if let Some(list) = state.shadowed.get_mut(&id) {
            list.retain(|(_, p)| p != path);
        }

        let candidate = Candidate {
            rank,
            path: path.to_path_buf(),
            doc: doc.clone(),
        };
        let prior = current.get(&id).filter(|e| e.path == path);
        // Last writer by content hash: a newer write supersedes this result
        let Some(entry) = self.process(&state.scope, &id, &candidate, prior.map(Arc::as_ref), true) else {
            info!(?path, "File changed during reprocessing, discarding result");
            self.audit.record(AuditEvent::new(
                AuditEventType::ReloadDiscarded,
                id.as_str(),
                "stale",
                json!({ "path": path }),
            ));
            return ReprocessOutcome::Stale {
                path: path.to_path_buf(),
            };
        };

        state.scope.insert(doc);
        let result = entry.result.clone();
        let passed = result.passed();
        self.commit(entry);

        if passed {
            info!(%id, ?path, "Specification reloaded");
            ReprocessOutcome::Updated { id, result }
        } else {
            warn!(%id, ?path, errors = result.errors.len(), "Specification reload failed");
            ReprocessOutcome::Failed { id: Some(id), result }
        }
    }

    fn remove_locked(&self, state: &mut WriterState, path: &Path) -> ReprocessOutcome {
        debug!(?path, "SpecIndex::remove: called");
        state.failed.remove(path);
        let Some(id) = state.owners.remove(path) else {
            return ReprocessOutcome::Ignored {
                path: path.to_path_buf(),
            };
        };
        if self.release(state, path, &id) {
            ReprocessOutcome::Removed { id }
        } else {
            ReprocessOutcome::Ignored {
                path: path.to_path_buf(),
            }
        }
    }

    /// Detach `path` from `id`; if it owned the entry, drop the entry and promote a shadowed declaration
    fn release(&self, state: &mut WriterState, path: &Path, id: &str) -> bool {
        if let Some(list) = state.shadowed.get_mut(id) {
            list.retain(|(_, p)| p != path);
        }
        state
            .diagnostics
            .retain(|d| d.location.file.as_deref() != Some(path));

        let owned = self.entry(id).is_some_and(|e| e.path == path);
        if !owned {
            return false;
        }

        let previous = {
            let mut guard = self.entries.write();
            let mut next = EntryMap::clone(&guard);
            let removed = next.remove(id);
            *guard = Arc::new(next);
            removed
        };
        self.sync_registrar(previous.as_deref(), None);
        if let Some(artifact) = previous.as_ref().and_then(|e| e.artifact.as_ref()) {
            self.purge_render_cache(&artifact.content_hash);
        }
        if let Err(e) = self.generator.remove(id) {
            warn!(%id, error = %e, "Failed to remove cached artifact");
        }
        state.scope.remove(id);
        info!(%id, ?path, "Specification removed");
        self.audit.record(AuditEvent::new(
            AuditEventType::SpecRemoved,
            id,
            "ok",
            json!({ "path": path }),
        ));

        let successor = state.shadowed.get_mut(id).and_then(|list| {
            list.sort();
            match self.discovery.override_policy {
                OverridePolicy::LastWins => list.pop(),
                OverridePolicy::FirstWins | OverridePolicy::Error => {
                    if list.is_empty() {
                        None
                    } else {
                        Some(list.remove(0))
                    }
                }
            }
        });
        if let Some((_, next_path)) = successor {
            info!(%id, path = ?next_path, "Promoting shadowed declaration");
            state.failed.remove(&next_path);
            state
                .diagnostics
                .retain(|d| d.location.file.as_deref() != Some(next_path.as_path()));
            self.reprocess_locked(state, &next_path, true);
        }
        true
    }

    fn challenger_wins(&self, incumbent: (usize, &Path), challenger: (usize, &Path)) -> bool {
        match self.discovery.override_policy {
            OverridePolicy::LastWins => challenger > incumbent,
            OverridePolicy::FirstWins | OverridePolicy::Error => challenger < incumbent,
        }
    }

    /// Record a losing declaration of `id`
    fn shadow(&self, state: &mut WriterState, id: &str, winner: &Path, rank: usize, loser: &Path) {
        let list = state.shadowed.entry(id.to_string()).or_default();
        if !list.iter().any(|(_, p)| p == loser) {
            list.push((rank, loser.to_path_buf()));
        }

        let location = Location {
            path: Some("metadata.name".to_string()),
            file: Some(loser.to_path_buf()),
            line: None,
            column: None,
        };
        match self.discovery.override_policy {
            OverridePolicy::Error => {
                let mut result = ValidationResult::new(loser);
                result.id = Some(id.to_string());
                result.record(
                    Layer::Semantic,
                    vec![ValidationIssue::error(
                        Layer::Semantic,
                        IssueKind::SemanticError,
                        format!("Duplicate identifier '{id}', already declared in {}", winner.display()),
                        location,
                    )],
                );
                state.failed.insert(loser.to_path_buf(), result);
            }
            OverridePolicy::LastWins | OverridePolicy::FirstWins => {
                let issue = ValidationIssue::warning(
                    Layer::Semantic,
                    IssueKind::SemanticError,
                    format!("Identifier '{id}' is shadowed by {}", winner.display()),
                    location,
                );
                warn!(%id, loser = ?loser, winner = ?winner, "Duplicate identifier");
                if !state.diagnostics.contains(&issue) {
                    state.diagnostics.push(issue);
                }
            }
        }
    }

    fn record_failure(&self, state: &mut WriterState, path: &Path, result: ValidationResult) -> ReprocessOutcome {
        let owned = state
            .owners
            .get(path)
            .cloned()
            .and_then(|id| self.entry(&id).filter(|e| e.path == path));
        match owned {
            Some(entry) => {
                let mut next = (*entry).clone();
                next.result = result.clone();
                next.source_digest = String::new();
                self.commit(next);
                ReprocessOutcome::Failed {
                    id: Some(entry.id.clone()),
                    result,
                }
            }
            None => {
                state.failed.insert(path.to_path_buf(), result.clone());
                ReprocessOutcome::Failed { id: None, result }
            }
        }
    }

    /// Validate and generate one winning declaration
    ///
    /// With `last_writer`, returns `None` without generating or auditing when
    /// the file no longer holds the bytes that were validated.
    fn process(
        &self,
        scope: &DocumentScope,
        id: &str,
        cand: &Candidate,
        prior: Option<&IndexEntry>,
        last_writer: bool,
    ) -> Option<IndexEntry> {
        let (mut result, validated) = self.validator.validate(&cand.doc, scope);
        if last_writer && self.superseded(&cand.path, &cand.doc.source_digest) {
            return None;
        }
        let mut fresh = None;

        match validated {
            Some(validated) => match self.generator.generate(&validated) {
                Ok(artifact) => {
                    result.record(Layer::Generation, Vec::new());
                    self.audit.record(AuditEvent::new(
                        AuditEventType::ArtifactGenerated,
                        id,
                        "ok",
                        json!({ "content_hash": artifact.content_hash, "path": cand.path }),
                    ));
                    fresh = Some(artifact);
                }
                Err(e) => {
                    warn!(%id, error = %e, "Artifact generation failed");
                    result.record(Layer::Generation, vec![generation_issue(&e)]);
                    self.audit.record(AuditEvent::new(
                        AuditEventType::GenerationFailed,
                        id,
                        "failed",
                        json!({ "error": e.to_string() }),
                    ));
                }
            },
            None => result.skip(Layer::Generation),
        }
        record_result(self.audit.as_ref(), &result);

        let (spec, artifact) = match fresh {
            Some(artifact) => (Some(artifact.spec.clone()), Some(artifact)),
            None => prior
                .map(|p| (p.spec.clone(), p.artifact.clone()))
                .unwrap_or((None, None)),
        };
        Some(IndexEntry {
            id: id.to_string(),
            path: cand.path.clone(),
            root_rank: cand.rank,
            source_digest: cand.doc.source_digest.clone(),
            spec,
            artifact,
            result,
        })
    }

    /// Whether `path` was rewritten since its bytes hashed to `digest`
    fn superseded(&self, path: &Path, digest: &str) -> bool {
        #[cfg(test)]
        if let Some(hook) = self.before_digest_check.lock().take() {
            hook(path);
        }
        let on_disk = fs::read(path).map(|bytes| sha256_hex(&bytes)).ok();
        on_disk.as_deref() != Some(digest)
    }

    /// Swap in a copy of the map with `entry` replaced
    fn commit(&self, entry: IndexEntry) {
        let entry = Arc::new(entry);
        let previous = {
            let mut guard = self.entries.write();
            let mut next = EntryMap::clone(&guard);
            let previous = next.insert(entry.id.clone(), entry.clone());
            *guard = Arc::new(next);
            previous
        };
        self.sync_registrar(previous.as_deref(), Some(entry.as_ref()));
    }

    fn sync_registrar(&self, previous: Option<&IndexEntry>, next: Option<&IndexEntry>) {
        let before = previous.and_then(|e| e.artifact.as_ref());
        let after = next.and_then(|e| e.artifact.as_ref());
        match (before, after) {
            (_, Some(a)) if before != Some(a) => self.registrar.register(&a.id, a.clone()),
            (Some(b), None) => self.registrar.unregister(&b.id),
            _ => {}
        }
    }

    fn purge_render_cache(&self, content_hash: &str) {
        let mut cache = self.render_cache.lock();
        let stale: Vec<(String, String)> = cache
            .iter()
            .filter(|((hash, _), _)| hash == content_hash)
            .map(|(k, _)| k.clone())
            .collect();
        for key in stale {
            cache.pop(&key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::InMemoryRegistrar;
    use crate::audit::MemoryAuditSink;
    use serde_json::json;
    use tempfile::TempDir;

    struct Fixture {
        _cache: TempDir,
        roots: Vec<TempDir>,
        index: SpecIndex,
        audit: Arc<MemoryAuditSink>,
        registrar: Arc<InMemoryRegistrar>,
    }

    fn fixture(roots: usize, policy: OverridePolicy) -> Fixture {
        let cache = TempDir::new().unwrap();
        let roots: Vec<TempDir> = (0..roots).map(|_| TempDir::new().unwrap()).collect();
        let mut config = Config::default();
        config.cache.dir = cache.path().to_string_lossy().into_owned();
        config.discovery.paths = roots.iter().map(|r| r.path().to_string_lossy().into_owned()).collect();
        config.discovery.override_policy = policy;
        let audit = Arc::new(MemoryAuditSink::new());
        let registrar = Arc::new(InMemoryRegistrar::new());
        let index = SpecIndex::new(&config, audit.clone(), registrar.clone());
        Fixture {
            _cache: cache,
            roots,
            index,
            audit,
            registrar,
        }
    }

    fn spec(name: &str, body: &str) -> String {
        format!(
            "version: \"1.0\"\nmetadata:\n  name: {name}\n  display_name: {name}\nparameters:\n  topic: {{ type: string, default: rust }}\ntemplate:\n  source: \"{body}\"\n"
        )
    }

    fn write(dir: &TempDir, file: &str, content: &str) -> PathBuf {
        let path = dir.path().join(file);
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_scan_isolates_failures() {
        let f = fixture(1, OverridePolicy::LastWins);
        write(&f.roots[0], "good.yml", &spec("good", "About {{topic}}"));
        write(&f.roots[0], "bad.yml", "version: [unclosed");
        write(&f.roots[0], "evil.yml", &spec("evil", "{{read_file topic}}"));

        let result = f.index.rescan();
        assert_eq!(result.loaded, vec!["good".to_string()]);
        assert_eq!(result.failed.len(), 2);
        assert!(f.index.get("good").is_some());
        assert!(f.index.get("evil").is_none());
        assert_eq!(f.registrar.list(), vec!["good".to_string()]);
        assert_eq!(f.audit.count(AuditEventType::SecurityViolation), 1);
    }

    #[test]
    fn test_scan_is_idempotent() {
        let f = fixture(1, OverridePolicy::LastWins);
        write(&f.roots[0], "a.yml", &spec("a", "A {{topic}}"));
        write(&f.roots[0], "b.yml", &spec("b", "B {{missing}}"));

        let first = f.index.rescan();
        let snap1 = f.index.snapshot();
        let second = f.index.rescan();
        let snap2 = f.index.snapshot();
        assert_eq!(first, second);
        assert_eq!(*snap1, *snap2);
    }

    #[test]
    fn test_reprocess_replaces_single_entry() {
        let f = fixture(1, OverridePolicy::LastWins);
        let a = write(&f.roots[0], "a.yml", &spec("a", "A {{topic}}"));
        write(&f.roots[0], "b.yml", &spec("b", "B {{topic}}"));
        f.index.rescan();
        let before_a = f.index.get("a").unwrap();
        let before_b = f.index.entry("b").unwrap();

        write(&f.roots[0], "a.yml", &spec("a", "A2 {{topic}}"));
        let outcome = f.index.reprocess_path(&a);
        assert!(matches!(outcome, ReprocessOutcome::Updated { ref id, .. } if id == "a"));

        let after_a = f.index.get("a").unwrap();
        assert_ne!(after_a.content_hash, before_a.content_hash);
        assert_eq!(f.index.len(), 2);
        assert!(Arc::ptr_eq(&before_b, &f.index.entry("b").unwrap()));
    }

    #[test]
    fn test_failed_reload_keeps_last_good() {
        let f = fixture(1, OverridePolicy::LastWins);
        let a = write(&f.roots[0], "a.yml", &spec("a", "A {{topic}}"));
        f.index.rescan();
        let good = f.index.get("a").unwrap();

        write(&f.roots[0], "a.yml", &spec("a", "A {{undeclared}}"));
        let outcome = f.index.reprocess_path(&a);
        assert!(matches!(outcome, ReprocessOutcome::Failed { .. }));
        assert_eq!(f.index.get("a").unwrap().content_hash, good.content_hash);
        assert!(!f.index.latest_result("a").unwrap().passed());
    }

    #[test]
    fn test_unchanged_file_is_skipped() {
        let f = fixture(1, OverridePolicy::LastWins);
        let a = write(&f.roots[0], "a.yml", &spec("a", "A {{topic}}"));
        f.index.rescan();
        assert_eq!(
            f.index.reprocess_path(&a),
            ReprocessOutcome::Unchanged { id: "a".to_string() }
        );
    }

    #[test]
    fn test_delete_removes_and_unregisters() {
        let f = fixture(1, OverridePolicy::LastWins);
        let a = write(&f.roots[0], "a.yml", &spec("a", "A {{topic}}"));
        f.index.rescan();
        fs::remove_file(&a).unwrap();

        assert_eq!(f.index.reprocess_path(&a), ReprocessOutcome::Removed { id: "a".to_string() });
        assert!(f.index.entry("a").is_none());
        assert!(f.registrar.list().is_empty());
    }

    #[test]
    fn test_last_wins_and_promotion_on_delete() {
        let f = fixture(2, OverridePolicy::LastWins);
        write(&f.roots[0], "dup.yml", &spec("dup", "global {{topic}}"));
        let local = write(&f.roots[1], "dup.yml", &spec("dup", "local {{topic}}"));

        let result = f.index.rescan();
        assert_eq!(result.diagnostics.len(), 1);
        assert_eq!(f.index.entry("dup").unwrap().path, local);
        assert_eq!(f.index.render("dup", Map::new()).unwrap(), "local rust");

        fs::remove_file(&local).unwrap();
        f.index.reprocess_path(&local);
        assert_eq!(f.index.render("dup", Map::new()).unwrap(), "global rust");
    }

    #[test]
    fn test_error_policy_reports_duplicate() {
        let f = fixture(2, OverridePolicy::Error);
        let global = write(&f.roots[0], "dup.yml", &spec("dup", "global {{topic}}"));
        let local = write(&f.roots[1], "dup.yml", &spec("dup", "local {{topic}}"));

        let result = f.index.rescan();
        assert_eq!(f.index.entry("dup").unwrap().path, global);
        assert!(result.failed.contains_key(&local));
    }

    #[test]
    fn test_render_uses_cache_and_validates_context() {
        let f = fixture(1, OverridePolicy::LastWins);
        write(&f.roots[0], "a.yml", &spec("a", "A {{topic}}"));
        f.index.rescan();

        let values = json!({"topic": "go"}).as_object().cloned().unwrap();
        assert_eq!(f.index.render("a", values.clone()).unwrap(), "A go");
        assert_eq!(f.index.render("a", values).unwrap(), "A go");
        assert_eq!(f.index.render_cache.lock().len(), 1);

        let bad = json!({"nope": 1}).as_object().cloned().unwrap();
        assert!(matches!(f.index.render("a", bad), Err(IndexError::Context(_))));
        assert!(matches!(f.index.render("zzz", Map::new()), Err(IndexError::NotFound(_))));
    }

    #[test]
    fn test_invalidate_evicts_artifact() {
        let f = fixture(1, OverridePolicy::LastWins);
        let a = write(&f.roots[0], "a.yml", &spec("a", "A {{topic}}"));
        f.index.rescan();
        assert!(f.index.invalidate("a"));
        assert!(f.index.get("a").is_none());
        assert!(f.registrar.list().is_empty());

        let outcome = f.index.reprocess_path(&a);
        assert!(matches!(outcome, ReprocessOutcome::Updated { .. }));
        assert!(f.index.get("a").is_some());
        assert_eq!(f.registrar.list(), vec!["a".to_string()]);
        assert_eq!(
            f.index.reprocess_path(&a),
            ReprocessOutcome::Unchanged { id: "a".to_string() }
        );
    }

    #[test]
    fn test_evict_keeps_replacement_artifact() {
        let f = fixture(1, OverridePolicy::LastWins);
        let a = write(&f.roots[0], "a.yml", &spec("a", "A {{topic}}"));
        f.index.rescan();
        let old = f.index.get("a").unwrap();

        write(&f.roots[0], "a.yml", &spec("a", "A2 {{topic}}"));
        f.index.reprocess_path(&a);
        assert!(!f.index.evict("a", Some(old.content_hash.as_str())));
        assert_ne!(f.index.get("a").unwrap().content_hash, old.content_hash);
    }

    #[test]
    fn test_superseded_reload_is_discarded() {
        let f = fixture(1, OverridePolicy::LastWins);
        let a = write(&f.roots[0], "a.yml", &spec("a", "A {{topic}}"));
        f.index.rescan();
        let before = f.index.entry("a").unwrap();
        let cached = fs::read_to_string(f.index.generator.artifact_path("a")).unwrap();
        let generated = f.audit.count(AuditEventType::ArtifactGenerated);
        let registered = f.registrar.get("a").unwrap();

        write(&f.roots[0], "a.yml", &spec("a", "A2 {{topic}}"));
        let newer = spec("a", "A3 {{topic}}");
        *f.index.before_digest_check.lock() = Some(Box::new(move |path: &Path| {
            fs::write(path, newer).unwrap();
        }));

        let outcome = f.index.reprocess_path(&a);
        assert!(outcome.is_stale());
        assert!(Arc::ptr_eq(&before, &f.index.entry("a").unwrap()));
        assert_eq!(fs::read_to_string(f.index.generator.artifact_path("a")).unwrap(), cached);
        assert_eq!(f.audit.count(AuditEventType::ArtifactGenerated), generated);
        assert_eq!(f.audit.count(AuditEventType::ReloadDiscarded), 1);
        assert_eq!(f.registrar.get("a").unwrap().content_hash, registered.content_hash);

        // The newer write is picked up by the next cycle
        let outcome = f.index.reprocess_path(&a);
        assert!(matches!(outcome, ReprocessOutcome::Updated { .. }));
        assert_eq!(f.index.render("a", Map::new()).unwrap(), "A3 rust");
    }

    #[test]
    fn test_parent_change_cascades_to_child() {
        let f = fixture(1, OverridePolicy::LastWins);
        let base = write(&f.roots[0], "base.yml", &spec("base", "{{topic}}"));
        write(
            &f.roots[0],
            "child.yml",
            "version: \"1.0\"\nextends: base\nmetadata: { name: child, display_name: Child }\ntemplate: { source: \"Child {{topic}}\" }\n",
        );
        f.index.rescan();
        assert!(f.index.get("child").is_some());

        write(
            &f.roots[0],
            "base.yml",
            "version: \"1.0\"\nmetadata: { name: base, display_name: Base }\nparameters:\n  subject: { type: string, default: x }\ntemplate: { source: \"{{subject}}\" }\n",
        );
        f.index.reprocess_path(&base);
        assert!(!f.index.latest_result("child").unwrap().passed());
    }
}
