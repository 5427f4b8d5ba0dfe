//! Offline replay queue.
//!
//! Operations submitted while the backend is unreachable wait here and are
//! replayed in FIFO order once the connection monitor sees the backend again.
//! An entry leaves the queue only after it replays successfully; a failed
//! replay goes back to the head with a backoff deadline, and the drain pass
//! stops there so later entries never overtake it.

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt};
use serde::Serialize;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use tethersync_common::Result;

use crate::retry::RetryConfig;

/// A re-invocable unit of deferred work.
pub type Operation = Arc<dyn Fn() -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// A deferred operation waiting for the backend.
pub struct QueuedOperation {
    pub id: Uuid,
    /// Human readable description, used in logs and reports.
    pub label: String,
    pub enqueued_at: DateTime<Utc>,
    /// Failed replays so far.
    pub attempt_count: u32,
    not_before: Option<Instant>,
    operation: Operation,
}

impl QueuedOperation {
    pub fn new<F, Fut>(label: impl Into<String>, operation: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        Self {
            id: Uuid::new_v4(),
            label: label.into(),
            enqueued_at: Utc::now(),
            attempt_count: 0,
            not_before: None,
            operation: Arc::new(move || operation().boxed()),
        }
    }

    /// Time left before the entry may be replayed again.
    fn remaining_backoff(&self, now: Instant) -> Option<Duration> {
        self.not_before
            .filter(|deadline| *deadline > now)
            .map(|deadline| deadline - now)
    }
}

impl std::fmt::Debug for QueuedOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueuedOperation")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("enqueued_at", &self.enqueued_at)
            .field("attempt_count", &self.attempt_count)
            .finish_non_exhaustive()
    }
}

/// Why a drain pass stopped before emptying the queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DrainHalt {
    pub label: String,
    pub error: String,
    /// The failure was the backend becoming unreachable again.
    pub connectivity: bool,
    pub attempt_count: u32,
}

/// Outcome of one drain pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    /// Entries replayed and removed.
    pub replayed: usize,
    /// Entries still queued after the pass.
    pub remaining: usize,
    pub halted: Option<DrainHalt>,
    /// When the head entry becomes due again.
    pub retry_after: Option<Duration>,
    /// Another pass was already running; this one did nothing.
    pub already_draining: bool,
}

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Clears the draining flag however the pass ends.
struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// FIFO queue of operations deferred while offline.
pub struct OfflineQueue {
    entries: Mutex<VecDeque<QueuedOperation>>,
    draining: AtomicBool,
    backoff: RetryConfig,
}

impl OfflineQueue {
    pub fn new(backoff: RetryConfig) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            draining: AtomicBool::new(false),
            backoff,
        }
    }

    /// Append an operation to the tail. Never blocks on a running drain.
    pub fn enqueue(&self, operation: QueuedOperation) -> Uuid {
        let id = operation.id;
        let mut entries = locked(&self.entries);
        info!(
            "Queued '{}' for replay ({} pending)",
            operation.label,
            entries.len() + 1
        );
        entries.push_back(operation);
        id
    }

    pub fn len(&self) -> usize {
        locked(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        locked(&self.entries).is_empty()
    }

    /// Labels from head to tail.
    pub fn labels(&self) -> Vec<String> {
        locked(&self.entries)
            .iter()
            .map(|op| op.label.clone())
            .collect()
    }

    pub fn contains_label(&self, label: &str) -> bool {
        locked(&self.entries).iter().any(|op| op.label == label)
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::Acquire)
    }

    /// Replay queued operations from the head until the queue is empty, an
    /// operation fails, or the head entry is still backing off.
    pub async fn drain(&self) -> DrainReport {
        if self
            .draining
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Drain already in progress");
            return DrainReport {
                already_draining: true,
                remaining: self.len(),
                ..Default::default()
            };
        }
        let _guard = DrainGuard(&self.draining);
        let mut report = DrainReport::default();

        loop {
            let next = {
                let mut entries = locked(&self.entries);
                match entries.front() {
                    None => None,
                    Some(head) => match head.remaining_backoff(Instant::now()) {
                        Some(wait) => {
                            debug!("Queue head '{}' not due for {:?}", head.label, wait);
                            report.retry_after = Some(wait);
                            None
                        }
                        None => entries.pop_front(),
                    },
                }
            };
            let Some(mut op) = next else { break };

            debug!("Replaying '{}' (attempt {})", op.label, op.attempt_count + 1);
            match (op.operation)().await {
                Ok(()) => {
                    info!("Replayed '{}'", op.label);
                    report.replayed += 1;
                }
                Err(e) => {
                    let delay = self.backoff.delay_for_attempt(op.attempt_count);
                    op.attempt_count += 1;
                    op.not_before = Some(Instant::now() + delay);
                    warn!(
                        "Replay of '{}' failed (attempt {}): {}. Next try in {:?}",
                        op.label, op.attempt_count, e, delay
                    );
                    report.halted = Some(DrainHalt {
                        label: op.label.clone(),
                        error: e.to_string(),
                        connectivity: e.is_connectivity(),
                        attempt_count: op.attempt_count,
                    });
                    report.retry_after = Some(delay);
                    locked(&self.entries).push_front(op);
                    break;
                }
            }
        }

        report.remaining = self.len();
        report
    }
}

impl Default for OfflineQueue {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}
