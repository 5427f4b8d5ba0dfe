//! Connection health tracking for the remote backend.
//!
//! The monitor owns the only mutable [`ConnectionState`]. A failed probe
//! starts a fixed-interval retry timer that keeps probing until the backend
//! answers; the transition back to connected triggers an offline queue drain.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use tethersync_common::Error;
use tethersync_remote::RemoteBackend;

use crate::queue::{DrainReport, OfflineQueue};

/// Reachability of the remote backend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConnectionState {
    pub is_connected: bool,
    /// The transport is encrypted (https).
    pub is_secure: bool,
    pub last_error: Option<String>,
    pub consecutive_failures: u32,
    pub last_checked: Option<DateTime<Utc>>,
}

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Tracks backend reachability and replays the offline queue on reconnect.
pub struct ConnectionMonitor {
    backend: Arc<dyn RemoteBackend>,
    queue: Arc<OfflineQueue>,
    state: watch::Sender<ConnectionState>,
    retry_interval: Duration,
    retry_task: Mutex<Option<JoinHandle<()>>>,
    drain_task: Mutex<Option<JoinHandle<DrainReport>>>,
    redrain_task: Mutex<Option<JoinHandle<()>>>,
    shutdown: CancellationToken,
}

impl ConnectionMonitor {
    /// Create a monitor in the "disconnected, zero failures" state.
    ///
    /// Nothing is spawned until the first probe.
    pub fn new(
        backend: Arc<dyn RemoteBackend>,
        queue: Arc<OfflineQueue>,
        retry_interval: Duration,
    ) -> Arc<Self> {
        let initial = ConnectionState {
            is_secure: backend.is_secure(),
            ..Default::default()
        };
        let (state, _) = watch::channel(initial);
        Arc::new(Self {
            backend,
            queue,
            state,
            retry_interval,
            retry_task: Mutex::new(None),
            drain_task: Mutex::new(None),
            redrain_task: Mutex::new(None),
            shutdown: CancellationToken::new(),
        })
    }

    pub fn state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.state.borrow().is_connected
    }

    /// Receiver notified on every state change.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn queue(&self) -> &Arc<OfflineQueue> {
        &self.queue
    }

    /// Check the backend now.
    ///
    /// On failure the retry timer is started if it is not already running.
    /// On a disconnected-to-connected transition a queue drain is spawned.
    pub async fn probe(self: &Arc<Self>) -> ConnectionState {
        let (state, reconnected) = self.check().await;
        if reconnected {
            self.trigger_drain();
        } else if !state.is_connected {
            self.ensure_retry_timer();
        }
        state
    }

    /// Mark the backend down after a caller saw a connectivity error.
    pub fn report_failure(self: &Arc<Self>, error: &Error) {
        self.record_failure(error.to_string());
        self.ensure_retry_timer();
    }

    /// Await the most recently spawned drain pass, if any.
    pub async fn wait_for_drain(&self) -> Option<DrainReport> {
        let handle = locked(&self.drain_task).take()?;
        match handle.await {
            Ok(report) => Some(report),
            Err(e) => {
                warn!("Queue drain task ended abnormally: {}", e);
                None
            }
        }
    }

    /// Whether the retry timer is currently running.
    pub fn is_retrying(&self) -> bool {
        locked(&self.retry_task)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Stop the retry timer and any scheduled re-drain.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        if let Some(handle) = locked(&self.retry_task).take() {
            handle.abort();
        }
        if let Some(handle) = locked(&self.redrain_task).take() {
            handle.abort();
        }
    }

    /// Ping the backend and update state. Returns the new state and whether
    /// this call flipped it from disconnected to connected.
    async fn check(&self) -> (ConnectionState, bool) {
        match self.backend.ping().await {
            Ok(()) => {
                let mut reconnected = false;
                self.state.send_modify(|state| {
                    reconnected = !state.is_connected;
                    state.is_connected = true;
                    state.consecutive_failures = 0;
                    state.last_error = None;
                    state.last_checked = Some(Utc::now());
                });
                if reconnected {
                    info!("Backend {} reachable", self.backend.name());
                }
                (self.state(), reconnected)
            }
            Err(e) => {
                self.record_failure(e.to_string());
                (self.state(), false)
            }
        }
    }

    fn record_failure(&self, error: String) {
        self.state.send_modify(|state| {
            if state.is_connected {
                warn!("Backend {} unreachable: {}", self.backend.name(), error);
            } else {
                debug!("Backend {} still unreachable: {}", self.backend.name(), error);
            }
            state.is_connected = false;
            state.consecutive_failures = state.consecutive_failures.saturating_add(1);
            state.last_error = Some(error);
            state.last_checked = Some(Utc::now());
        });
    }

    fn ensure_retry_timer(self: &Arc<Self>) {
        if self.shutdown.is_cancelled() {
            return;
        }
        let mut slot = locked(&self.retry_task);
        if slot.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }

        let monitor = Arc::downgrade(self);
        let interval = self.retry_interval;
        let shutdown = self.shutdown.clone();
        debug!("Starting connection retry timer ({:?})", interval);
        *slot = Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
                let Some(monitor) = Weak::upgrade(&monitor) else { break };
                let (state, reconnected) = monitor.check().await;
                if reconnected {
                    monitor.trigger_drain();
                }
                if state.is_connected {
                    break;
                }
            }
        }));
    }

    fn trigger_drain(self: &Arc<Self>) {
        if self.queue.is_empty() {
            return;
        }
        let monitor = Arc::downgrade(self);
        let queue = self.queue.clone();
        let handle = tokio::spawn(async move {
            let report = queue.drain().await;
            if let Some(monitor) = Weak::upgrade(&monitor) {
                monitor.after_drain(&report);
            }
            report
        });
        *locked(&self.drain_task) = Some(handle);
    }

    fn after_drain(self: &Arc<Self>, report: &DrainReport) {
        if let Some(halt) = &report.halted {
            if halt.connectivity {
                // The reconnect timer drains again once the backend is back.
                self.report_failure(&Error::Network(halt.error.clone()));
                return;
            }
        }
        if let Some(wait) = report.retry_after {
            self.schedule_redrain(wait);
        }
    }

    fn schedule_redrain(self: &Arc<Self>, wait: Duration) {
        if self.shutdown.is_cancelled() {
            return;
        }
        let monitor = Arc::downgrade(self);
        let shutdown = self.shutdown.clone();
        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = tokio::time::sleep(wait) => {}
            }
            if let Some(monitor) = Weak::upgrade(&monitor) {
                if monitor.is_connected() {
                    monitor.trigger_drain();
                }
            }
        });
        if let Some(previous) = locked(&self.redrain_task).replace(handle) {
            previous.abort();
        }
    }
}

impl Drop for ConnectionMonitor {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::QueuedOperation;
    use crate::retry::RetryConfig;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tethersync_remote::MemoryBackend;

    fn monitor_for(backend: Arc<MemoryBackend>, interval: Duration) -> Arc<ConnectionMonitor> {
        let queue = Arc::new(OfflineQueue::new(
            RetryConfig::new(3)
                .with_initial_delay(Duration::from_millis(1))
                .with_jitter(false),
        ));
        ConnectionMonitor::new(backend, queue, interval)
    }

    #[tokio::test]
    async fn test_initial_state_is_disconnected() {
        let monitor = monitor_for(Arc::new(MemoryBackend::new()), Duration::from_secs(60));
        let state = monitor.state();
        assert!(!state.is_connected);
        assert!(state.is_secure);
        assert_eq!(state.consecutive_failures, 0);
        assert!(state.last_checked.is_none());
    }

    #[tokio::test]
    async fn test_probe_success_and_failure() {
        let backend = Arc::new(MemoryBackend::new().insecure());
        let monitor = monitor_for(backend.clone(), Duration::from_secs(60));

        let state = monitor.probe().await;
        assert!(state.is_connected);
        assert!(!state.is_secure);
        assert!(!monitor.is_retrying());

        backend.set_reachable(false);
        monitor.probe().await;
        let state = monitor.probe().await;
        assert!(!state.is_connected);
        assert_eq!(state.consecutive_failures, 2);
        assert!(state.last_error.is_some());
        assert!(monitor.is_retrying());

        backend.set_reachable(true);
        let state = monitor.probe().await;
        assert!(state.is_connected);
        assert_eq!(state.consecutive_failures, 0);
        assert!(state.last_error.is_none());
        monitor.shutdown();
    }

    #[tokio::test]
    async fn test_retry_timer_reconnects_and_drains() {
        let backend = Arc::new(MemoryBackend::new());
        backend.set_reachable(false);
        let monitor = monitor_for(backend.clone(), Duration::from_millis(5));
        let mut changes = monitor.subscribe();

        let replayed = Arc::new(AtomicUsize::new(0));
        let counter = replayed.clone();
        monitor.queue().enqueue(QueuedOperation::new("replay", move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }));

        assert!(!monitor.probe().await.is_connected);
        backend.set_reachable(true);

        tokio::time::timeout(Duration::from_secs(5), async {
            while !changes.borrow_and_update().is_connected {
                changes.changed().await.unwrap();
            }
        })
        .await
        .unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            while !monitor.queue().is_empty() {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .unwrap();

        assert_eq!(replayed.load(Ordering::SeqCst), 1);
        monitor.shutdown();
    }

    #[tokio::test]
    async fn test_report_failure_marks_disconnected() {
        let backend = Arc::new(MemoryBackend::new());
        let monitor = monitor_for(backend, Duration::from_secs(60));
        monitor.probe().await;

        monitor.report_failure(&Error::Network("reset by peer".to_string()));

        let state = monitor.state();
        assert!(!state.is_connected);
        assert_eq!(state.consecutive_failures, 1);
        assert!(state.last_error.unwrap().contains("reset by peer"));
        assert!(monitor.is_retrying());

        monitor.shutdown();
        assert!(!monitor.is_retrying());
    }

    #[tokio::test]
    async fn test_reconnect_without_queue_spawns_nothing() {
        let backend = Arc::new(MemoryBackend::new());
        let monitor = monitor_for(backend, Duration::from_secs(60));

        monitor.probe().await;

        assert!(monitor.wait_for_drain().await.is_none());
    }
}
