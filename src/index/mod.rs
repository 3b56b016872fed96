//! Specification index: discovery, override resolution and hot reload

mod discovery;
mod spec_index;

pub use discovery::{DiscoveredFile, discover_files, root_rank};
pub use spec_index::{DiscoveryResult, IndexEntry, ReprocessOutcome, SpecIndex};
