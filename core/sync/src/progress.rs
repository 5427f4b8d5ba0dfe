//! Observable sync progress counters.

use serde::Serialize;
use tokio::sync::watch;

/// Snapshot of a sync run's progress.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncProgress {
    pub current_table: Option<String>,
    /// Page number within the current table, starting at 1.
    pub current_batch: usize,
    pub total_tables: usize,
    pub completed_tables: usize,
    /// Sum of the remote counts of the tables started so far.
    pub total_records: usize,
    pub loaded_records: usize,
}

/// Read-only view of the orchestrator's progress.
///
/// Cheap to clone and safe to poll from any task while a run is going.
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    rx: watch::Receiver<SyncProgress>,
}

impl ProgressReporter {
    pub fn snapshot(&self) -> SyncProgress {
        self.rx.borrow().clone()
    }

    /// Wait for the next update. Returns `false` once the orchestrator is gone.
    pub async fn changed(&mut self) -> bool {
        self.rx.changed().await.is_ok()
    }
}

/// Write side, owned by the orchestrator.
#[derive(Debug)]
pub(crate) struct ProgressTracker {
    tx: watch::Sender<SyncProgress>,
}

impl ProgressTracker {
    pub(crate) fn new() -> Self {
        let (tx, _) = watch::channel(SyncProgress::default());
        Self { tx }
    }

    pub(crate) fn reporter(&self) -> ProgressReporter {
        ProgressReporter {
            rx: self.tx.subscribe(),
        }
    }

    pub(crate) fn begin_run(&self, total_tables: usize) {
        self.tx.send_replace(SyncProgress {
            total_tables,
            ..Default::default()
        });
    }

    pub(crate) fn begin_table(&self, table: &str) {
        self.tx.send_modify(|p| {
            p.current_table = Some(table.to_string());
            p.current_batch = 0;
        });
    }

    pub(crate) fn add_total_records(&self, count: usize) {
        self.tx.send_modify(|p| p.total_records += count);
    }

    pub(crate) fn set_batch(&self, batch: usize) {
        self.tx.send_modify(|p| p.current_batch = batch);
    }

    pub(crate) fn record_loaded(&self) {
        self.tx.send_modify(|p| p.loaded_records += 1);
    }

    pub(crate) fn finish_table(&self) {
        self.tx.send_modify(|p| p.completed_tables += 1);
    }

    pub(crate) fn finish_run(&self) {
        self.tx.send_modify(|p| {
            p.current_table = None;
            p.current_batch = 0;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let tracker = ProgressTracker::new();
        let reporter = tracker.reporter();

        tracker.begin_run(2);
        tracker.begin_table("messages");
        tracker.add_total_records(3);
        tracker.set_batch(1);
        tracker.record_loaded();
        tracker.record_loaded();

        let snapshot = reporter.snapshot();
        assert_eq!(snapshot.current_table.as_deref(), Some("messages"));
        assert_eq!(snapshot.current_batch, 1);
        assert_eq!(snapshot.total_tables, 2);
        assert_eq!(snapshot.loaded_records, 2);
        assert_eq!(snapshot.total_records, 3);

        tracker.finish_table();
        tracker.finish_run();
        let snapshot = reporter.snapshot();
        assert_eq!(snapshot.completed_tables, 1);
        assert!(snapshot.current_table.is_none());

        tracker.begin_run(1);
        assert_eq!(reporter.snapshot(), SyncProgress {
            total_tables: 1,
            ..Default::default()
        });
    }

    #[tokio::test]
    async fn test_changed_wakes_on_update() {
        let tracker = ProgressTracker::new();
        let mut reporter = tracker.reporter();

        let waiter = tokio::spawn(async move {
            let changed = reporter.changed().await;
            (changed, reporter.snapshot().total_tables)
        });
        tokio::task::yield_now().await;
        tracker.begin_run(4);

        assert_eq!(waiter.await.unwrap(), (true, 4));

        let mut reporter = tracker.reporter();
        drop(tracker);
        assert!(!reporter.changed().await);
    }
}
