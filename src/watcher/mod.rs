//! Hot reload of specification files
//!
//! The ChangeWatcher turns filesystem notifications into debounced,
//! per-file reprocessing cycles against the SpecIndex.

mod change_watcher;
mod config;
mod debounce;

pub use change_watcher::{ChangeWatcher, WatchReport};
pub use config::WatcherConfig;
pub use debounce::{Debouncer, FileState};
