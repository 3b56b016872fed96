//! AuditLog - append-only event journal
//!
//! Stores one JSON object per line. Entries are never rewritten or removed;
//! readers can replay the whole journal or just its tail.
//!
//! # Layout
//!
//! ```text
//! audit.jsonl
//! {"id":"0190...","timestamp":"...","event_type":"spec_loaded","identifier":"think_aloud",...}
//! {"id":"0190...","timestamp":"...","event_type":"security_violation",...}
//! ```
//!
//! # Example
//!
//! ```ignore
//! use auditlog::{Journal, JournalEntry};
//!
//! let journal = Journal::open("audit.jsonl")?;
//! journal.append(&JournalEntry::new("artifact_generated", "think_aloud", "ok", json!({})))?;
//! let recent = journal.tail(10)?;
//! ```

mod journal;

pub use journal::{Journal, JournalEntry};
