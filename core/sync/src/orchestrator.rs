//! Sync orchestrator: the composition root of the engine.
//!
//! A run walks the registry's tables one after another. For each table it
//! counts the remote rows, pages through them, skips records that already
//! exist locally, converts and encrypts the rest and writes them one by one.
//! Push and bidirectional tables then upload local records the backend does
//! not have yet.

use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use tethersync_common::{Error, RemoteRecord, Result, TableName};
use tethersync_crypto::FieldCipher;
use tethersync_remote::RemoteBackend;
use tethersync_store::LocalStore;

use crate::config::{SyncConfig, SyncTarget};
use crate::connection::{ConnectionMonitor, ConnectionState};
use crate::fetcher::{BatchFetcher, Page};
use crate::gate::FieldEncryptionGate;
use crate::progress::{ProgressReporter, ProgressTracker};
use crate::queue::{OfflineQueue, QueuedOperation};
use crate::reconciler::RecordReconciler;
use crate::registry::TableRegistry;
use crate::retry::{is_transient, RetryExecutor};

const RUN_LABEL: &str = "sync run";

/// Lifecycle of the orchestrator's runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunState {
    Idle,
    Running,
    /// The last run aborted on a fatal error.
    Failed,
}

/// Per-table outcome of one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncRunResult {
    pub table_name: String,
    pub records_loaded: usize,
    pub records_skipped: usize,
    /// Failed records. A failed page counts as a full page.
    pub records_failed: usize,
    pub records_pushed: usize,
    pub errors: Vec<String>,
    pub elapsed_ms: u64,
    /// The table was handed to the offline queue.
    pub deferred: bool,
}

impl SyncRunResult {
    fn new(table: &TableName) -> Self {
        Self {
            table_name: table.to_string(),
            ..Default::default()
        }
    }
}

/// What a call to [`SyncOrchestrator::start`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Completed(Vec<SyncRunResult>),
    /// Another run holds the latch; nothing was done.
    AlreadyRunning,
    /// Cancelled between pages or tables; results so far.
    Cancelled(Vec<SyncRunResult>),
    /// The backend was offline; the whole run waits in the offline queue.
    Deferred,
}

impl SyncOutcome {
    pub fn results(&self) -> &[SyncRunResult] {
        match self {
            SyncOutcome::Completed(results) | SyncOutcome::Cancelled(results) => results,
            SyncOutcome::AlreadyRunning | SyncOutcome::Deferred => &[],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunMode {
    /// Started by a caller: connectivity loss defers work to the queue.
    Interactive,
    /// Replayed from the queue: connectivity loss fails the replay so the
    /// entry stays at the head.
    Replay,
}

/// Releases the single-flight latch however a run ends.
struct RunLatch<'a>(&'a AtomicBool);

impl<'a> RunLatch<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for RunLatch<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

struct Inner {
    config: SyncConfig,
    registry: TableRegistry,
    backend: Arc<dyn RemoteBackend>,
    store: Arc<dyn LocalStore>,
    fetcher: BatchFetcher,
    reconciler: RecordReconciler,
    gate: FieldEncryptionGate,
    retry: RetryExecutor,
    queue: Arc<OfflineQueue>,
    monitor: Arc<ConnectionMonitor>,
    syncing: AtomicBool,
    state: watch::Sender<RunState>,
    progress: ProgressTracker,
}

/// Drives sync runs between a remote backend and a local store.
///
/// Cloning yields another handle to the same orchestrator.
#[derive(Clone)]
pub struct SyncOrchestrator {
    inner: Arc<Inner>,
}

impl SyncOrchestrator {
    /// Build an orchestrator.
    ///
    /// A cipher is required when `enable_encryption` is set.
    pub fn new(
        config: SyncConfig,
        backend: Arc<dyn RemoteBackend>,
        store: Arc<dyn LocalStore>,
        cipher: Option<Arc<dyn FieldCipher>>,
    ) -> Result<Self> {
        config.validate()?;

        let gate = match (config.enable_encryption, cipher) {
            (true, Some(cipher)) => {
                if cipher.key_id() != config.key_id {
                    warn!(
                        "Cipher key id {:?} differs from configured key id {:?}",
                        cipher.key_id(),
                        config.key_id
                    );
                }
                FieldEncryptionGate::new(cipher, config.sensitive_fields.clone())
            }
            (true, None) => {
                return Err(Error::Config(
                    "encryption is enabled but no field cipher was provided".to_string(),
                ))
            }
            (false, _) => FieldEncryptionGate::disabled(),
        };

        let queue = Arc::new(OfflineQueue::new(config.queue_backoff()));
        let monitor = ConnectionMonitor::new(backend.clone(), queue.clone(), config.retry_delay());
        let (state, _) = watch::channel(RunState::Idle);

        Ok(Self {
            inner: Arc::new(Inner {
                registry: TableRegistry::from_config(&config),
                fetcher: BatchFetcher::new(backend.clone(), config.page_delay()),
                reconciler: RecordReconciler::new(store.clone(), config.existence_policy),
                retry: RetryExecutor::new(config.remote_retry()),
                gate,
                backend,
                store,
                queue,
                monitor,
                syncing: AtomicBool::new(false),
                state,
                progress: ProgressTracker::new(),
                config,
            }),
        })
    }

    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    pub fn registry(&self) -> &TableRegistry {
        &self.inner.registry
    }

    pub fn monitor(&self) -> &Arc<ConnectionMonitor> {
        &self.inner.monitor
    }

    pub fn queue(&self) -> &Arc<OfflineQueue> {
        &self.inner.queue
    }

    pub fn gate(&self) -> &FieldEncryptionGate {
        &self.inner.gate
    }

    pub fn progress(&self) -> ProgressReporter {
        self.inner.progress.reporter()
    }

    pub fn run_state(&self) -> RunState {
        *self.inner.state.borrow()
    }

    pub fn subscribe_run_state(&self) -> watch::Receiver<RunState> {
        self.inner.state.subscribe()
    }

    pub fn is_syncing(&self) -> bool {
        self.inner.syncing.load(Ordering::Acquire)
    }

    /// Probe the backend now.
    pub async fn probe(&self) -> ConnectionState {
        self.inner.monitor.probe().await
    }

    /// Tables in the remote catalog that are not configured.
    pub async fn detect_new_tables(&self) -> Result<Vec<TableName>> {
        self.inner
            .registry
            .detect_new_tables(self.inner.backend.as_ref())
            .await
    }

    /// Run a full sync over every configured table.
    ///
    /// Returns [`SyncOutcome::AlreadyRunning`] without doing anything when a
    /// run is in flight, and [`SyncOutcome::Deferred`] when the backend is
    /// unreachable. Fatal errors leave the orchestrator `Failed` and are
    /// returned.
    pub async fn start(&self, cancel: &CancellationToken) -> Result<SyncOutcome> {
        let Some(_latch) = RunLatch::acquire(&self.inner.syncing) else {
            warn!("Sync already in progress; ignoring start request");
            return Ok(SyncOutcome::AlreadyRunning);
        };

        let connection = self.inner.monitor.probe().await;
        if !connection.is_connected {
            info!(
                "Backend unreachable ({}); deferring sync run",
                connection.last_error.as_deref().unwrap_or("unknown error")
            );
            self.enqueue_run();
            return Ok(SyncOutcome::Deferred);
        }

        self.run(cancel, RunMode::Interactive).await
    }

    /// Stop background connection work.
    pub fn shutdown(&self) {
        self.inner.monitor.shutdown();
    }

    async fn run(&self, cancel: &CancellationToken, mode: RunMode) -> Result<SyncOutcome> {
        self.inner.state.send_replace(RunState::Running);
        let started = Instant::now();

        let result = self.run_tables(cancel, mode).await;
        match &result {
            Ok(outcome) => {
                self.inner.state.send_replace(RunState::Idle);
                let results = outcome.results();
                info!(
                    "Sync run finished in {:?}: {} tables, {} loaded, {} skipped, {} failed",
                    started.elapsed(),
                    results.len(),
                    results.iter().map(|r| r.records_loaded).sum::<usize>(),
                    results.iter().map(|r| r.records_skipped).sum::<usize>(),
                    results.iter().map(|r| r.records_failed).sum::<usize>(),
                );
            }
            Err(e) if mode == RunMode::Replay && e.is_connectivity() => {
                self.inner.state.send_replace(RunState::Idle);
                info!("Replayed sync run interrupted: {}", e);
            }
            Err(e) => {
                self.inner.state.send_replace(RunState::Failed);
                error!("Sync run failed: {}", e);
            }
        }
        self.inner.progress.finish_run();
        result
    }

    async fn run_tables(&self, cancel: &CancellationToken, mode: RunMode) -> Result<SyncOutcome> {
        let inner = &self.inner;
        let mut targets = inner.registry.targets().to_vec();

        if inner.config.adopt_discovered_tables {
            match self.detect_new_tables().await {
                Ok(found) => {
                    for table in found {
                        info!("Adopting newly discovered table {}", table);
                        targets.push(inner.registry.target_for_discovered(table));
                    }
                }
                Err(e) => warn!("Table discovery failed: {}", e),
            }
        }

        inner.progress.begin_run(targets.len());
        let mut results = Vec::with_capacity(targets.len());

        for target in &targets {
            if cancel.is_cancelled() {
                info!("Sync run cancelled before {}", target.table);
                return Ok(SyncOutcome::Cancelled(results));
            }
            results.push(self.sync_table(target, cancel, mode).await?);
        }

        if cancel.is_cancelled() {
            return Ok(SyncOutcome::Cancelled(results));
        }
        Ok(SyncOutcome::Completed(results))
    }

    async fn sync_table(
        &self,
        target: &SyncTarget,
        cancel: &CancellationToken,
        mode: RunMode,
    ) -> Result<SyncRunResult> {
        let started = Instant::now();
        let mut result = SyncRunResult::new(&target.table);
        self.inner.progress.begin_table(target.table.as_str());

        if !self.inner.monitor.is_connected() {
            let error = Error::Network("backend unreachable".to_string());
            self.defer_table(target, &mut result, error, mode)?;
        } else {
            if target.direction.pulls() {
                self.pull_table(target, cancel, mode, &mut result).await?;
            }
            if target.direction.pushes() && !result.deferred && !cancel.is_cancelled() {
                self.push_table(target, cancel, mode, &mut result).await?;
            }
        }

        result.elapsed_ms = started.elapsed().as_millis() as u64;
        self.inner.progress.finish_table();
        info!(
            "{}: {} loaded, {} skipped, {} failed, {} pushed{} in {}ms",
            result.table_name,
            result.records_loaded,
            result.records_skipped,
            result.records_failed,
            result.records_pushed,
            if result.deferred { ", deferred" } else { "" },
            result.elapsed_ms
        );
        Ok(result)
    }

    async fn pull_table(
        &self,
        target: &SyncTarget,
        cancel: &CancellationToken,
        mode: RunMode,
        result: &mut SyncRunResult,
    ) -> Result<()> {
        let inner = &self.inner;
        let table = &target.table;

        let total = match inner.retry.execute(|| inner.fetcher.count(table)).await {
            Ok(total) => total,
            Err(e) if e.is_connectivity() => return self.connection_lost(target, result, e, mode),
            Err(e) => {
                warn!("{}: count failed: {}", table, e);
                result.errors.push(format!("count failed: {}", e));
                return Ok(());
            }
        };
        debug!("{}: {} remote records", table, total);
        inner.progress.add_total_records(total);

        let mut cursor = inner.fetcher.cursor(target, total);
        loop {
            if cancel.is_cancelled() {
                debug!("{}: cancelled at offset {}", table, cursor.offset());
                break;
            }
            let Some(page) = cursor.next_page().await else {
                break;
            };
            inner.progress.set_batch(cursor.pages_fetched());

            match page {
                Page::Records { records, .. } => {
                    self.apply_page(table, records, result).await?;
                }
                Page::Failed { error, .. } if error.is_connectivity() => {
                    return self.connection_lost(target, result, error, mode);
                }
                Page::Failed {
                    offset,
                    limit,
                    error,
                } => {
                    warn!("{}: page at offset {} failed: {}", table, offset, error);
                    result.records_failed += limit;
                    result
                        .errors
                        .push(format!("page at offset {} failed: {}", offset, error));
                }
            }
        }
        Ok(())
    }

    /// Reconcile and persist one page. Only fatal store errors are returned.
    async fn apply_page(
        &self,
        table: &TableName,
        records: Vec<RemoteRecord>,
        result: &mut SyncRunResult,
    ) -> Result<()> {
        let inner = &self.inner;

        for remote in records {
            match inner.reconciler.exists(table, &remote).await {
                Ok(true) => {
                    result.records_skipped += 1;
                    continue;
                }
                Ok(false) => {}
                Err(e) => {
                    result.records_failed += 1;
                    result.errors.push(format!("existence check failed: {}", e));
                    continue;
                }
            }

            let local = RecordReconciler::convert(remote);
            let outcome = inner.gate.encrypt(local, table);
            result.errors.extend(outcome.warnings);

            match inner.store.create(table, outcome.record).await {
                Ok(()) => {
                    result.records_loaded += 1;
                    inner.progress.record_loaded();
                }
                Err(e) if e.is_record_level() => {
                    debug!("{}: record rejected: {}", table, e);
                    result.records_failed += 1;
                    result.errors.push(format!("record rejected: {}", e));
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Upload local records whose identity the backend does not know.
    async fn push_table(
        &self,
        target: &SyncTarget,
        cancel: &CancellationToken,
        mode: RunMode,
        result: &mut SyncRunResult,
    ) -> Result<()> {
        let inner = &self.inner;
        let table = &target.table;
        let limit = target.page_size();
        let mut offset = 0;

        loop {
            if cancel.is_cancelled() {
                break;
            }
            let page = inner.store.scan(table, offset, limit).await?;
            if page.is_empty() {
                break;
            }
            offset += page.len();

            let mut missing = Vec::new();
            for local in page {
                let Some((field, value)) = local.identity() else {
                    result.records_failed += 1;
                    result
                        .errors
                        .push("local record has no identity field".to_string());
                    continue;
                };
                let lookup = inner
                    .backend
                    .select_where(table, field, &value.to_json(), None)
                    .await;
                match lookup {
                    Ok(found) if !found.is_empty() => continue,
                    Ok(_) => {}
                    Err(e) if e.is_connectivity() => {
                        return self.connection_lost(target, result, e, mode);
                    }
                    Err(e) => {
                        result.records_failed += 1;
                        result.errors.push(format!("remote lookup failed: {}", e));
                        continue;
                    }
                }

                let outcome = inner.gate.decrypt(local, table);
                if !outcome.warnings.is_empty() {
                    // Never upload ciphertext in place of the value.
                    result.records_failed += 1;
                    result.errors.extend(outcome.warnings);
                    continue;
                }
                missing.push(RecordReconciler::to_remote(&outcome.record));
            }

            if missing.is_empty() {
                continue;
            }
            let count = missing.len();
            let upload = inner
                .retry
                .execute_with_condition(
                    || inner.backend.insert(table, missing.clone()),
                    is_transient,
                )
                .await;
            match upload {
                Ok(()) => {
                    debug!("{}: pushed {} records", table, count);
                    result.records_pushed += count;
                }
                Err(e) if e.is_connectivity() => {
                    return self.connection_lost(target, result, e, mode);
                }
                Err(e) => {
                    warn!("{}: push failed: {}", table, e);
                    result.records_failed += count;
                    result.errors.push(format!("push failed: {}", e));
                }
            }
        }
        Ok(())
    }

    /// Tell the monitor the backend went away, then defer the table.
    fn connection_lost(
        &self,
        target: &SyncTarget,
        result: &mut SyncRunResult,
        error: Error,
        mode: RunMode,
    ) -> Result<()> {
        self.inner.monitor.report_failure(&error);
        self.defer_table(target, result, error, mode)
    }

    /// Hand a table to the offline queue.
    ///
    /// During a replay the error is returned instead, so the queue entry
    /// being replayed stays at the head.
    fn defer_table(
        &self,
        target: &SyncTarget,
        result: &mut SyncRunResult,
        error: Error,
        mode: RunMode,
    ) -> Result<()> {
        if mode == RunMode::Replay {
            return Err(error);
        }
        info!("{}: deferring to offline queue: {}", target.table, error);
        result.deferred = true;
        result.errors.push(format!("deferred: {}", error));
        self.enqueue_table(target.clone());
        Ok(())
    }

    fn enqueue_run(&self) {
        if self.inner.queue.contains_label(RUN_LABEL) {
            debug!("Sync run already queued");
            return;
        }
        let handle = Arc::downgrade(&self.inner);
        self.inner
            .queue
            .enqueue(QueuedOperation::new(RUN_LABEL, move || {
                let handle = handle.clone();
                async move {
                    match Weak::upgrade(&handle) {
                        Some(inner) => SyncOrchestrator { inner }.replay_run().await,
                        None => Ok(()),
                    }
                }
            }));
    }

    fn enqueue_table(&self, target: SyncTarget) {
        let handle = Arc::downgrade(&self.inner);
        let label = format!("sync table {}", target.table);
        if self.inner.queue.contains_label(&label) {
            debug!("{} already queued", label);
            return;
        }
        self.inner.queue.enqueue(QueuedOperation::new(label, move || {
            let handle = handle.clone();
            let target = target.clone();
            async move {
                match Weak::upgrade(&handle) {
                    Some(inner) => SyncOrchestrator { inner }.replay_table(&target).await,
                    None => Ok(()),
                }
            }
        }));
    }

    async fn replay_run(&self) -> Result<()> {
        let Some(_latch) = RunLatch::acquire(&self.inner.syncing) else {
            debug!("Sync run in flight; queued run stays queued");
            return Err(Error::Busy("sync run in flight".to_string()));
        };
        self.run(&CancellationToken::new(), RunMode::Replay).await?;
        Ok(())
    }

    async fn replay_table(&self, target: &SyncTarget) -> Result<()> {
        let Some(_latch) = RunLatch::acquire(&self.inner.syncing) else {
            debug!("Sync run in flight; queued sync of {} stays queued", target.table);
            return Err(Error::Busy("sync run in flight".to_string()));
        };

        self.inner.state.send_replace(RunState::Running);
        self.inner.progress.begin_run(1);
        let outcome = self
            .sync_table(target, &CancellationToken::new(), RunMode::Replay)
            .await;
        self.inner.progress.finish_run();

        match outcome {
            Ok(_) => {
                self.inner.state.send_replace(RunState::Idle);
                Ok(())
            }
            Err(e) if e.is_connectivity() => {
                self.inner.state.send_replace(RunState::Idle);
                Err(e)
            }
            Err(e) => {
                error!("Replayed sync of {} failed: {}", target.table, e);
                self.inner.state.send_replace(RunState::Failed);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tethersync_common::{FieldValue, LocalRecord};
    use tethersync_remote::MemoryBackend;
    use tethersync_store::MemoryStore;

    fn table(name: &str) -> TableName {
        TableName::new(name).unwrap()
    }

    fn config(tables: &[&str]) -> SyncConfig {
        SyncConfig::default()
            .with_encryption(false)
            .with_page_delay_ms(0)
            .with_retry(1, 60_000)
            .with_tables(tables.iter().map(|t| SyncTarget::pull(table(t))).collect())
    }

    fn seed(backend: &MemoryBackend, name: &str, count: usize) {
        backend.seed(
            name,
            (0..count).map(|i| RemoteRecord::from_value(json!({"id": i, "n": i})).unwrap()),
        );
    }

    #[tokio::test]
    async fn test_encryption_requires_cipher() {
        let result = SyncOrchestrator::new(
            SyncConfig::default(),
            Arc::new(MemoryBackend::new()),
            Arc::new(MemoryStore::new()),
            None,
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_run_loads_then_skips() {
        let backend = Arc::new(MemoryBackend::new());
        seed(&backend, "messages", 7);
        let store = Arc::new(MemoryStore::new());
        let orchestrator =
            SyncOrchestrator::new(config(&["messages"]), backend, store.clone(), None).unwrap();

        let first = orchestrator.start(&CancellationToken::new()).await.unwrap();
        assert_eq!(first.results()[0].records_loaded, 7);
        assert_eq!(orchestrator.run_state(), RunState::Idle);
        assert!(!orchestrator.is_syncing());

        let second = orchestrator.start(&CancellationToken::new()).await.unwrap();
        assert_eq!(second.results()[0].records_loaded, 0);
        assert_eq!(second.results()[0].records_skipped, 7);
        assert_eq!(store.records("messages").len(), 7);

        let progress = orchestrator.progress().snapshot();
        assert_eq!(progress.total_tables, 1);
        assert_eq!(progress.completed_tables, 1);
        assert_eq!(progress.total_records, 7);
    }

    #[tokio::test]
    async fn test_rejected_records_count_as_failed() {
        let backend = Arc::new(MemoryBackend::new());
        seed(&backend, "messages", 3);
        let store = Arc::new(MemoryStore::new());
        store.set_reject_writes(true);
        let orchestrator =
            SyncOrchestrator::new(config(&["messages"]), backend, store, None).unwrap();

        let outcome = orchestrator.start(&CancellationToken::new()).await.unwrap();
        let result = &outcome.results()[0];
        assert_eq!(result.records_failed, 3);
        assert_eq!(result.records_loaded, 0);
        assert_eq!(result.errors.len(), 3);
        assert_eq!(orchestrator.run_state(), RunState::Idle);
    }

    #[tokio::test]
    async fn test_missing_remote_table_is_recorded_not_fatal() {
        let backend = Arc::new(MemoryBackend::new());
        seed(&backend, "messages", 2);
        let orchestrator = SyncOrchestrator::new(
            config(&["ghosts", "messages"]),
            backend,
            Arc::new(MemoryStore::new()),
            None,
        )
        .unwrap();

        let outcome = orchestrator.start(&CancellationToken::new()).await.unwrap();
        let results = outcome.results();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].errors.len(), 1);
        assert!(results[0].errors[0].starts_with("count failed"));
        assert_eq!(results[1].records_loaded, 2);
    }

    #[tokio::test]
    async fn test_fail_closed_leaves_record_for_next_run() {
        let backend = Arc::new(MemoryBackend::new());
        seed(&backend, "messages", 2);
        let store = Arc::new(MemoryStore::new());
        store.set_fail_lookups(true);
        let config = config(&["messages"])
            .with_existence_policy(crate::config::ExistencePolicy::FailClosed);
        let orchestrator = SyncOrchestrator::new(config, backend, store.clone(), None).unwrap();

        let outcome = orchestrator.start(&CancellationToken::new()).await.unwrap();
        assert_eq!(outcome.results()[0].records_failed, 2);
        assert!(store.records("messages").is_empty());

        store.set_fail_lookups(false);
        let outcome = orchestrator.start(&CancellationToken::new()).await.unwrap();
        assert_eq!(outcome.results()[0].records_loaded, 2);
    }

    #[tokio::test]
    async fn test_unpushable_records_count_as_failed() {
        let drafts = table("drafts");
        let store = Arc::new(MemoryStore::new());
        let mut with_id = LocalRecord::new();
        with_id.insert("id", FieldValue::from("d-1"));
        let mut without_id = LocalRecord::new();
        without_id.insert("body", FieldValue::from("no identity"));
        store.create(&drafts, with_id).await.unwrap();
        store.create(&drafts, without_id).await.unwrap();

        // The backend has no "drafts" table, so the lookup fails.
        let config = config(&[]).with_tables(vec![
            SyncTarget::pull(drafts).with_direction(crate::config::SyncDirection::Push)
        ]);
        let orchestrator =
            SyncOrchestrator::new(config, Arc::new(MemoryBackend::new()), store, None).unwrap();

        let outcome = orchestrator.start(&CancellationToken::new()).await.unwrap();
        let result = &outcome.results()[0];
        assert_eq!(result.records_pushed, 0);
        assert_eq!(result.records_failed, 2);
        assert_eq!(result.errors.len(), 2);
        assert!(result
            .errors
            .iter()
            .any(|e| e.starts_with("remote lookup failed")));
    }
}
