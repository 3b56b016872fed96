//! Core journal implementation

use chrono::{DateTime, Utc};
use eyre::{Context, Result};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::debug;
use uuid::Uuid;

/// A single journal line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    /// Time-ordered unique id
    pub id: String,
    /// When the event was recorded
    pub timestamp: DateTime<Utc>,
    /// Event type (e.g. `spec_loaded`, `security_violation`)
    pub event_type: String,
    /// Identifier of the subject the event is about
    pub identifier: String,
    /// Outcome label (`ok`, `failed`, `rejected`, ...)
    pub outcome: String,
    /// Free-form structured detail
    #[serde(default)]
    pub detail: Value,
}

impl JournalEntry {
    /// Create an entry stamped with a fresh id and the current time
    pub fn new(
        event_type: impl Into<String>,
        identifier: impl Into<String>,
        outcome: impl Into<String>,
        detail: Value,
    ) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            timestamp: Utc::now(),
            event_type: event_type.into(),
            identifier: identifier.into(),
            outcome: outcome.into(),
            detail,
        }
    }
}

/// Append-only JSONL journal backed by a single file
#[derive(Debug, Clone)]
pub struct Journal {
    path: PathBuf,
}

impl Journal {
    /// Open (or create) a journal at the given path
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).context("Failed to create journal directory")?;
        }
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open journal: {}", path.display()))?;
        debug!(?path, "Opened audit journal");
        Ok(Self { path })
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one entry
    ///
    /// Holds an exclusive lock on the file for the duration of the write so
    /// concurrent writers (including other processes) never interleave lines.
    pub fn append(&self, entry: &JournalEntry) -> Result<()> {
        let mut line = serde_json::to_string(entry).context("Failed to serialize journal entry")?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open journal: {}", self.path.display()))?;

        file.lock_exclusive().context("Failed to lock journal")?;
        let written = file.write_all(line.as_bytes()).and_then(|_| file.flush());
        let unlocked = FileExt::unlock(&file);
        written.context("Failed to write journal entry")?;
        unlocked.context("Failed to unlock journal")?;

        debug!(event_type = %entry.event_type, identifier = %entry.identifier, "Journal entry appended");
        Ok(())
    }

    /// Read every entry in append order
    ///
    /// Lines that fail to parse are skipped; a torn final line from a crashed
    /// writer must not make the rest of the journal unreadable.
    pub fn read_all(&self) -> Result<Vec<JournalEntry>> {
        let file = fs::File::open(&self.path)
            .with_context(|| format!("Failed to open journal: {}", self.path.display()))?;
        let reader = BufReader::new(file);

        let mut entries = Vec::new();
        for line in reader.lines() {
            let line = line.context("Failed to read journal line")?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<JournalEntry>(&line) {
                Ok(entry) => entries.push(entry),
                Err(e) => debug!(error = %e, "Skipping unparseable journal line"),
            }
        }
        Ok(entries)
    }

    /// Read the last `n` entries
    pub fn tail(&self, n: usize) -> Result<Vec<JournalEntry>> {
        let entries = self.read_all()?;
        let skip = entries.len().saturating_sub(n);
        Ok(entries.into_iter().skip(skip).collect())
    }

    /// All entries about one identifier
    pub fn for_identifier(&self, identifier: &str) -> Result<Vec<JournalEntry>> {
        Ok(self
            .read_all()?
            .into_iter()
            .filter(|e| e.identifier == identifier)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_append_and_read_all() {
        let temp = TempDir::new().unwrap();
        let journal = Journal::open(temp.path().join("audit.jsonl")).unwrap();

        journal
            .append(&JournalEntry::new("spec_loaded", "alpha", "ok", json!({})))
            .unwrap();
        journal
            .append(&JournalEntry::new(
                "security_violation",
                "beta",
                "rejected",
                json!({"rule": "filesystem"}),
            ))
            .unwrap();

        let entries = journal.read_all().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].identifier, "alpha");
        assert_eq!(entries[1].event_type, "security_violation");
        assert_eq!(entries[1].detail["rule"], "filesystem");
    }

    #[test]
    fn test_tail_and_filter() {
        let temp = TempDir::new().unwrap();
        let journal = Journal::open(temp.path().join("nested/dir/audit.jsonl")).unwrap();

        for i in 0..5 {
            let id = if i % 2 == 0 { "even" } else { "odd" };
            journal
                .append(&JournalEntry::new("tick", id, "ok", json!({ "i": i })))
                .unwrap();
        }

        let tail = journal.tail(2).unwrap();
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[1].detail["i"], 4);

        assert_eq!(journal.for_identifier("even").unwrap().len(), 3);
        assert_eq!(journal.tail(100).unwrap().len(), 5);
    }

    #[test]
    fn test_torn_line_is_skipped() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("audit.jsonl");
        let journal = Journal::open(&path).unwrap();
        journal
            .append(&JournalEntry::new("spec_loaded", "alpha", "ok", Value::Null))
            .unwrap();

        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"{\"id\":\"trunc").unwrap();

        let entries = journal.read_all().unwrap();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_entry_ids_are_unique() {
        let a = JournalEntry::new("x", "y", "ok", Value::Null);
        let b = JournalEntry::new("x", "y", "ok", Value::Null);
        assert_ne!(a.id, b.id);
    }
}
