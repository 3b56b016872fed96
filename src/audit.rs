//! Audit event sink
//!
//! Fire-and-forget: the pipeline records events and carries on whether or not
//! the sink managed to store them. Failures are logged, never returned.

use auditlog::{Journal, JournalEntry};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Value as Json, json};
use std::fmt::{self, Debug};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::AuditConfig;
use crate::error::AuditError;
use crate::validation::ValidationResult;

/// Pipeline transitions worth recording
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    SpecValidated,
    SpecRejected,
    SecurityViolation,
    ArtifactGenerated,
    GenerationFailed,
    SpecRemoved,
    ReloadDiscarded,
    ScanCompleted,
}

impl AuditEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditEventType::SpecValidated => "spec_validated",
            AuditEventType::SpecRejected => "spec_rejected",
            AuditEventType::SecurityViolation => "security_violation",
            AuditEventType::ArtifactGenerated => "artifact_generated",
            AuditEventType::GenerationFailed => "generation_failed",
            AuditEventType::SpecRemoved => "spec_removed",
            AuditEventType::ReloadDiscarded => "reload_discarded",
            AuditEventType::ScanCompleted => "scan_completed",
        }
    }
}

impl fmt::Display for AuditEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AuditEvent {
    pub event_type: AuditEventType,
    pub identifier: String,
    pub outcome: String,
    pub detail: Json,
}

impl AuditEvent {
    pub fn new(
        event_type: AuditEventType,
        identifier: impl Into<String>,
        outcome: impl Into<String>,
        detail: Json,
    ) -> Self {
        Self {
            event_type,
            identifier: identifier.into(),
            outcome: outcome.into(),
            detail,
        }
    }
}

pub trait AuditSink: Send + Sync + Debug {
    fn record(&self, event: AuditEvent);
}

#[derive(Debug, Default)]
pub struct NullAuditSink;

impl AuditSink for NullAuditSink {
    fn record(&self, _event: AuditEvent) {}
}

/// Keeps events in memory; used by tests and the one-shot commands
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().clone()
    }

    pub fn count(&self, event_type: AuditEventType) -> usize {
        self.events.lock().iter().filter(|e| e.event_type == event_type).count()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, event: AuditEvent) {
        self.events.lock().push(event);
    }
}

/// Appends events to the JSONL journal
#[derive(Debug)]
pub struct JournalAuditSink {
    journal: Journal,
}

impl JournalAuditSink {
    pub fn open(path: &Path) -> Result<Self, AuditError> {
        debug!(?path, "JournalAuditSink::open: called");
        let journal = Journal::open(path).map_err(|e| AuditError::Open {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Ok(Self { journal })
    }

    pub fn journal(&self) -> &Journal {
        &self.journal
    }
}

impl AuditSink for JournalAuditSink {
    fn record(&self, event: AuditEvent) {
        let entry = JournalEntry::new(event.event_type.as_str(), event.identifier, event.outcome, event.detail);
        if let Err(e) = self.journal.append(&entry) {
            warn!(error = %e, event_type = %entry.event_type, "JournalAuditSink::record: append failed");
        }
    }
}

/// Sink described by the configuration; falls back to a null sink if the journal cannot be opened
pub fn sink_from_config(config: &AuditConfig) -> Arc<dyn AuditSink> {
    if !config.enabled {
        return Arc::new(NullAuditSink);
    }
    match JournalAuditSink::open(&config.expanded_path()) {
        Ok(sink) => Arc::new(sink),
        Err(e) => {
            warn!(error = %e, "Audit journal unavailable, events will not be recorded");
            Arc::new(NullAuditSink)
        }
    }
}

/// Record the outcome of one validation run
///
/// Every security violation gets its own event, followed by one
/// validated/rejected event for the file.
pub fn record_result(sink: &dyn AuditSink, result: &ValidationResult) {
    let id = result.id.clone().unwrap_or_else(|| result.path.display().to_string());
    for violation in result.security_violations() {
        sink.record(AuditEvent::new(
            AuditEventType::SecurityViolation,
            id.as_str(),
            "rejected",
            json!({
                "path": result.path,
                "message": violation.message,
                "location": violation.location.to_string(),
            }),
        ));
    }
    let (event_type, outcome) = if result.passed() {
        (AuditEventType::SpecValidated, "ok")
    } else {
        (AuditEventType::SpecRejected, "failed")
    };
    sink.record(AuditEvent::new(
        event_type,
        id.as_str(),
        outcome,
        json!({
            "path": result.path,
            "errors": result.errors.len(),
            "warnings": result.warnings.len(),
            "category": result.category(),
        }),
    ));
}
