//! Per-file debounce state machine
//!
//! Pure bookkeeping: no timers, no filesystem. The driver feeds it events and
//! the current time and gets back the files that are due for reprocessing.
//!
//! ```text
//! Idle -> PendingChange -> Debouncing -> Reprocessing -> Idle
//!              ^               |              |
//!              +---- event ----+              +-- event or stale --> Debouncing
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileState {
    Idle,
    /// Event seen at `at`; the quiet period has not been armed yet
    PendingChange { at: Instant },
    /// Quiet period running until `deadline`
    Debouncing { deadline: Instant },
    /// Pipeline in flight; `rerun` records a change that arrived meanwhile
    Reprocessing { rerun: bool },
}

#[derive(Debug)]
pub struct Debouncer {
    window: Duration,
    files: HashMap<PathBuf, FileState>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            files: HashMap::new(),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn state(&self, path: &Path) -> FileState {
        self.files.get(path).copied().unwrap_or(FileState::Idle)
    }

    /// No file is waiting or in flight
    pub fn is_idle(&self) -> bool {
        self.files.is_empty()
    }

    /// A filesystem notification for `path`
    pub fn on_event(&mut self, path: &Path, now: Instant) {
        let next = match self.state(path) {
            FileState::Idle | FileState::PendingChange { .. } | FileState::Debouncing { .. } => {
                FileState::PendingChange { at: now }
            }
            FileState::Reprocessing { .. } => FileState::Reprocessing { rerun: true },
        };
        self.files.insert(path.to_path_buf(), next);
    }

    /// Arm pending files and return those whose quiet period has expired
    ///
    /// Returned files move to `Reprocessing`; they are not returned again
    /// until `on_complete` is called for them.
    pub fn tick(&mut self, now: Instant) -> Vec<PathBuf> {
        let mut due = Vec::new();
        for (path, state) in self.files.iter_mut() {
            if let FileState::PendingChange { at } = *state {
                *state = FileState::Debouncing {
                    deadline: at + self.window,
                };
            }
            if let FileState::Debouncing { deadline } = *state
                && deadline <= now
            {
                *state = FileState::Reprocessing { rerun: false };
                due.push(path.clone());
            }
        }
        due.sort();
        due
    }

    /// Reprocessing of `path` finished
    ///
    /// A change that arrived in flight, or a result discarded as stale,
    /// schedules exactly one more cycle.
    pub fn on_complete(&mut self, path: &Path, now: Instant, stale: bool) {
        match self.state(path) {
            FileState::Reprocessing { rerun } if rerun || stale => {
                self.files.insert(
                    path.to_path_buf(),
                    FileState::Debouncing {
                        deadline: now + self.window,
                    },
                );
            }
            FileState::Reprocessing { .. } => {
                self.files.remove(path);
            }
            _ => {}
        }
    }

    /// Earliest instant at which `tick` has work to hand out
    pub fn next_deadline(&self) -> Option<Instant> {
        self.files
            .values()
            .filter_map(|s| match s {
                FileState::PendingChange { at } => Some(*at + self.window),
                FileState::Debouncing { deadline } => Some(*deadline),
                _ => None,
            })
            .min()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_millis(100);

    #[test]
    fn test_burst_yields_single_cycle() {
        let mut d = Debouncer::new(WINDOW);
        let path = Path::new("/specs/a.yml");
        let t0 = Instant::now();

        d.on_event(path, t0);
        assert!(d.tick(t0).is_empty());
        d.on_event(path, t0 + Duration::from_millis(30));
        assert!(d.tick(t0 + Duration::from_millis(30)).is_empty());
        d.on_event(path, t0 + Duration::from_millis(60));
        assert!(d.tick(t0 + Duration::from_millis(120)).is_empty());

        let due = d.tick(t0 + Duration::from_millis(160));
        assert_eq!(due, vec![path.to_path_buf()]);
        assert!(d.tick(t0 + Duration::from_secs(10)).is_empty());
    }

    #[test]
    fn test_event_during_reprocessing_coalesces() {
        let mut d = Debouncer::new(WINDOW);
        let path = Path::new("/specs/a.yml");
        let t0 = Instant::now();

        d.on_event(path, t0);
        d.tick(t0);
        assert_eq!(d.tick(t0 + WINDOW).len(), 1);

        d.on_event(path, t0 + WINDOW);
        d.on_event(path, t0 + WINDOW);
        assert_eq!(d.state(path), FileState::Reprocessing { rerun: true });

        let done = t0 + WINDOW * 2;
        d.on_complete(path, done, false);
        assert_eq!(d.state(path), FileState::Debouncing { deadline: done + WINDOW });
        assert_eq!(d.tick(done + WINDOW).len(), 1);
        d.on_complete(path, done + WINDOW, false);
        assert!(d.is_idle());
    }

    #[test]
    fn test_stale_result_retriggers() {
        let mut d = Debouncer::new(WINDOW);
        let path = Path::new("/specs/a.yml");
        let t0 = Instant::now();

        d.on_event(path, t0);
        d.tick(t0);
        d.tick(t0 + WINDOW);
        d.on_complete(path, t0 + WINDOW, true);
        assert!(matches!(d.state(path), FileState::Debouncing { .. }));
    }

    #[test]
    fn test_files_are_independent() {
        let mut d = Debouncer::new(WINDOW);
        let a = Path::new("/specs/a.yml");
        let b = Path::new("/specs/b.yml");
        let t0 = Instant::now();

        d.on_event(a, t0);
        d.on_event(b, t0 + Duration::from_millis(50));
        d.tick(t0 + Duration::from_millis(50));
        assert_eq!(d.next_deadline(), Some(t0 + WINDOW));
        assert_eq!(d.tick(t0 + WINDOW), vec![a.to_path_buf()]);
        assert_eq!(d.tick(t0 + Duration::from_millis(150)), vec![b.to_path_buf()]);
    }
}
