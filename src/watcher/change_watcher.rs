//! Filesystem-driven hot reload
//!
//! notify callbacks push paths into a bounded queue; a single driver task owns
//! the debounce state and hands due files to the blocking pool, one cycle per
//! file at a time.

use eyre::{Context, Result};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::config::WatcherConfig;
use super::debounce::Debouncer;
use crate::index::{ReprocessOutcome, SpecIndex};
use crate::validation::ValidationResult;

/// Result of one reprocessing cycle
#[derive(Debug, Clone, PartialEq)]
pub struct WatchReport {
    pub path: PathBuf,
    pub outcome: ReprocessOutcome,
}

pub struct ChangeWatcher {
    index: Arc<SpecIndex>,
    debouncer: Debouncer,
    events_tx: mpsc::Sender<PathBuf>,
    events_rx: mpsc::Receiver<PathBuf>,
    reports_tx: Option<mpsc::Sender<WatchReport>>,
    _watcher: Option<RecommendedWatcher>,
}

impl ChangeWatcher {
    pub fn new(index: Arc<SpecIndex>, config: &WatcherConfig) -> Self {
        debug!(debounce_ms = config.debounce_ms, "ChangeWatcher::new: called");
        let (events_tx, events_rx) = mpsc::channel(config.queue_capacity.max(1));
        Self {
            index,
            debouncer: Debouncer::new(config.debounce()),
            events_tx,
            events_rx,
            reports_tx: None,
            _watcher: None,
        }
    }

    /// Deliver a report for every finished cycle to `tx`
    pub fn with_reports(mut self, tx: mpsc::Sender<WatchReport>) -> Self {
        self.reports_tx = Some(tx);
        self
    }

    /// Queue handle for change notifications
    pub fn sender(&self) -> mpsc::Sender<PathBuf> {
        self.events_tx.clone()
    }

    /// Start receiving filesystem notifications for every existing root
    pub fn watch_roots(&mut self, roots: &[PathBuf]) -> Result<()> {
        let tx = self.events_tx.clone();
        let index = self.index.clone();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) if is_relevant(&event) => {
                for path in event.paths {
                    if index.watches(&path) && tx.blocking_send(path).is_err() {
                        return;
                    }
                }
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Filesystem watcher error"),
        })
        .context("Failed to create filesystem watcher")?;

        for root in roots {
            if !root.is_dir() {
                warn!(?root, "Watch root does not exist, skipping");
                continue;
            }
            watcher
                .watch(root, RecursiveMode::Recursive)
                .with_context(|| format!("Failed to watch {}", root.display()))?;
            info!(?root, "Watching for specification changes");
        }
        self._watcher = Some(watcher);
        Ok(())
    }

    /// Drive the debounce state machine until shutdown
    pub async fn run(mut self, mut shutdown_rx: mpsc::Receiver<()>) -> Result<()> {
        info!(window_ms = self.debouncer.window().as_millis() as u64, "ChangeWatcher started");
        let (done_tx, mut done_rx) = mpsc::unbounded_channel::<WatchReport>();

        loop {
            for path in self.debouncer.tick(Instant::now()) {
                self.spawn_cycle(path, done_tx.clone());
            }

            let deadline = self.debouncer.next_deadline();
            let sleep = async move {
                match deadline {
                    Some(at) => tokio::time::sleep_until(at.into()).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                Some(path) = self.events_rx.recv() => {
                    debug!(?path, "ChangeWatcher::run: change notification");
                    self.debouncer.on_event(&path, Instant::now());
                }
                Some(report) = done_rx.recv() => {
                    self.debouncer.on_complete(&report.path, Instant::now(), report.outcome.is_stale());
                    self.publish(report);
                }
                _ = sleep => {}
                _ = shutdown_rx.recv() => {
                    info!("ChangeWatcher shutting down");
                    break;
                }
            }
        }
        Ok(())
    }

    fn spawn_cycle(&self, path: PathBuf, done_tx: mpsc::UnboundedSender<WatchReport>) {
        debug!(?path, "ChangeWatcher::spawn_cycle: called");
        let index = self.index.clone();
        tokio::spawn(async move {
            let target = path.clone();
            let outcome = tokio::task::spawn_blocking(move || index.reprocess_path(&target)).await;
            let outcome = match outcome {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(?path, error = %e, "Reprocessing task failed");
                    ReprocessOutcome::Failed {
                        id: None,
                        result: ValidationResult::new(&path),
                    }
                }
            };
            let _ = done_tx.send(WatchReport { path, outcome });
        });
    }

    fn publish(&self, report: WatchReport) {
        match &report.outcome {
            ReprocessOutcome::Updated { id, .. } => info!(%id, path = ?report.path, "Reloaded"),
            ReprocessOutcome::Failed { id, result } => {
                warn!(?id, path = ?report.path, errors = result.errors.len(), "Reload rejected")
            }
            ReprocessOutcome::Removed { id } => info!(%id, "Removed"),
            ReprocessOutcome::Stale { path } => debug!(?path, "Stale result discarded, retrying"),
            other => debug!(outcome = ?other, "ChangeWatcher::publish: no change"),
        }
        if let Some(tx) = &self.reports_tx
            && tx.try_send(report).is_err()
        {
            debug!("ChangeWatcher::publish: report dropped");
        }
    }
}

fn is_relevant(event: &Event) -> bool {
    matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_))
}
