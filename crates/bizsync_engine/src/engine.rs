//! Operation queue processor.

use crate::broadcast::{StatusBroadcaster, Subscription};
use crate::collaborators::{LocalCache, MirrorClient, RecordStore};
use crate::config::EngineConfig;
use crate::error::{SyncError, SyncResult};
use crate::network::NetworkMonitor;
use crate::registry::{DataSource, DataSourceRecord, HealthReport, SourceRegistry};
use crate::scheduler::RetryScheduler;
use crate::status::{SyncFailure, SyncStatus};
use crate::writer::Writer;
use bizsync_core::{
    Clock, IdGenerator, OperationId, OperationRequest, OperationStatus, Repairer, Resource,
    SyncOperation, SystemClock, UuidGenerator,
};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

#[derive(Debug, Default)]
struct EngineState {
    queue: VecDeque<SyncOperation>,
    failed: Vec<SyncOperation>,
    /// A drain pass owns the queue head.
    processing: bool,
    /// An operation is being dispatched.
    syncing: bool,
    last_sync_time: Option<chrono::DateTime<chrono::Utc>>,
    errors: Vec<SyncFailure>,
    version: u64,
}

struct EngineInner {
    config: EngineConfig,
    state: Mutex<EngineState>,
    writer: Writer,
    network: Arc<NetworkMonitor>,
    registry: Arc<SourceRegistry>,
    broadcaster: StatusBroadcaster,
    scheduler: Arc<RetryScheduler>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    runtime: Handle,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// Offline-tolerant sync engine.
///
/// Operations are queued locally and dispatched one at a time, in order,
/// whenever the network monitor reports online. Failed dispatches are
/// retried with exponential backoff; operations that exhaust their
/// retries move to a failed list and are reported in
/// [`SyncStatus::errors`].
///
/// Created with [`SyncEngine::builder`]. Background tasks start on build
/// and stop on [`shutdown`](SyncEngine::shutdown) or drop.
pub struct SyncEngine {
    inner: Arc<EngineInner>,
}

impl SyncEngine {
    /// Returns a builder.
    pub fn builder() -> SyncEngineBuilder {
        SyncEngineBuilder::default()
    }

    /// Queues an operation and returns its ID.
    ///
    /// Never blocks and never fails. If the engine is online and idle a
    /// drain is started in the background.
    pub fn enqueue(&self, request: OperationRequest) -> OperationId {
        let inner = &self.inner;
        let operation = SyncOperation::new(inner.ids.operation_id(), request, inner.clock.now());
        let id = operation.id;

        let idle = {
            let mut state = inner.state.lock();
            tracing::debug!(
                operation_id = %id,
                resource = %operation.resource,
                op = %operation.op_type,
                queued = state.queue.len() + 1,
                "operation enqueued"
            );
            state.queue.push_back(operation);
            !state.processing
        };

        inner.notify();
        if idle && inner.network.is_online() {
            inner.spawn_drain();
        }
        id
    }

    /// Returns the current status.
    pub fn status(&self) -> SyncStatus {
        let state = self.inner.state.lock();
        self.inner.snapshot(&state)
    }

    /// Registers a status listener.
    pub fn on_status_change<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&SyncStatus) + Send + Sync + 'static,
    {
        self.inner.broadcaster.subscribe(listener)
    }

    /// Returns a receiver that always holds the latest status.
    pub fn status_receiver(&self) -> watch::Receiver<SyncStatus> {
        self.inner.broadcaster.receiver()
    }

    /// Drains the queue now.
    ///
    /// Returns when the drain pass ends. Does nothing if offline, if the
    /// queue is empty or if another pass is already running.
    pub async fn force_sync(&self) {
        drain(Arc::clone(&self.inner)).await;
    }

    /// Moves every failed operation back to the queue with a fresh retry
    /// budget, then drains.
    pub async fn retry_failed_operations(&self) {
        let moved = {
            let mut state = self.inner.state.lock();
            let failed = std::mem::take(&mut state.failed);
            let moved = failed.len();
            for mut operation in failed {
                operation.retry_count = 0;
                operation.status = OperationStatus::Pending;
                state.queue.push_back(operation);
            }
            moved
        };

        if moved > 0 {
            tracing::info!(count = moved, "failed operations requeued");
            self.inner.notify();
        }
        drain(Arc::clone(&self.inner)).await;
    }

    /// Clears the reported errors.
    pub fn clear_errors(&self) {
        self.inner.state.lock().errors.clear();
        self.inner.notify();
    }

    /// Reads an entity through the writer.
    ///
    /// Falls back to the local cache when the record store cannot be
    /// reached. Sections are addressed as `<plan_id>/<section_key>`.
    pub async fn fetch_entity(&self, resource: Resource, id: &str) -> SyncResult<Option<Value>> {
        self.inner.writer.fetch(resource, id).await
    }

    /// Aggregated health of the configured backends.
    pub fn health_check(&self) -> HealthReport {
        self.inner.registry.health_check()
    }

    /// Observed state of each configured backend.
    pub fn data_sources(&self) -> Vec<DataSourceRecord> {
        self.inner.registry.status()
    }

    /// The network monitor gating dispatch.
    pub fn network(&self) -> &Arc<NetworkMonitor> {
        &self.inner.network
    }

    /// Operations waiting in the queue, head first.
    pub fn pending_operations(&self) -> Vec<SyncOperation> {
        self.inner.state.lock().queue.iter().cloned().collect()
    }

    /// Operations that exhausted their retries.
    pub fn failed_operations(&self) -> Vec<SyncOperation> {
        self.inner.state.lock().failed.clone()
    }

    /// Returns true when no record store is configured.
    pub fn is_local_only(&self) -> bool {
        self.inner.writer.is_local_only()
    }

    /// Starts the background tasks if they are not running.
    ///
    /// Called by [`SyncEngineBuilder::build`].
    pub fn start(&self) {
        let mut tasks = self.inner.tasks.lock();
        if !tasks.is_empty() {
            return;
        }

        let inner = &self.inner;
        tasks.push(inner.runtime.spawn(run_timer(
            Arc::downgrade(inner),
            inner.config.sync_interval,
        )));
        tasks.push(inner.runtime.spawn(run_network_listener(
            Arc::downgrade(inner),
            inner.network.subscribe(),
        )));
        tasks.push(inner.runtime.spawn(run_scheduler(
            Arc::downgrade(inner),
            Arc::clone(&inner.scheduler),
        )));
        tracing::debug!("sync engine started");
    }

    /// Stops the background tasks.
    ///
    /// Queued and scheduled operations stay where they are; a later
    /// [`start`](SyncEngine::start) resumes them.
    pub fn shutdown(&self) {
        let tasks = std::mem::take(&mut *self.inner.tasks.lock());
        if tasks.is_empty() {
            return;
        }
        for task in tasks {
            task.abort();
        }
        tracing::debug!("sync engine stopped");
    }
}

impl Drop for SyncEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("status", &self.status())
            .field("writer", &self.inner.writer)
            .finish()
    }
}

impl EngineInner {
    fn snapshot(&self, state: &EngineState) -> SyncStatus {
        SyncStatus {
            is_online: self.network.is_online(),
            is_syncing: state.syncing,
            pending_operations: state.queue.len(),
            scheduled_retries: self.scheduler.len(),
            failed_operations: state.failed.len(),
            last_sync_time: state.last_sync_time,
            errors: state.errors.clone(),
            version: state.version,
        }
    }

    /// Publishes a fresh snapshot.
    fn notify(&self) {
        let status = {
            let mut state = self.state.lock();
            state.version += 1;
            self.snapshot(&state)
        };
        self.broadcaster.publish(status);
    }

    fn spawn_drain(self: &Arc<Self>) {
        self.runtime.spawn(drain(Arc::clone(self)));
    }

    /// Claims the queue for a drain pass.
    fn begin_drain(&self) -> bool {
        let mut state = self.state.lock();
        if state.processing || state.queue.is_empty() || !self.network.is_online() {
            return false;
        }
        state.processing = true;
        true
    }

    /// Marks the queue head in flight and returns a copy of it, or ends
    /// the pass.
    fn start_next(&self) -> Option<SyncOperation> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let online = self.network.is_online();
        match state.queue.front_mut() {
            Some(head) if online => {
                head.status = OperationStatus::InProgress;
                let operation = head.clone();
                state.syncing = true;
                Some(operation)
            }
            _ => {
                state.processing = false;
                None
            }
        }
    }

    /// Removes `operation` from the queue and applies the outcome of
    /// dispatching it.
    fn settle(&self, mut operation: SyncOperation, result: SyncResult<()>) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        state.syncing = false;

        let id = operation.id;
        let Some(index) = state.queue.iter().position(|op| op.id == id) else {
            return;
        };
        state.queue.remove(index);

        match result {
            Ok(()) => {
                operation.status = OperationStatus::Completed;
                state.last_sync_time = Some(self.clock.now());
                state.errors.retain(|failure| failure.operation_id != id);
                tracing::info!(
                    operation_id = %id,
                    resource = %operation.resource,
                    op = %operation.op_type,
                    retry = operation.retry_count,
                    "operation synced"
                );
            }
            Err(err) => {
                let policy = &self.config.retry;
                operation.retry_count = operation.retry_count.saturating_add(1);

                if operation.retry_count >= policy.max_retries {
                    operation.status = OperationStatus::Failed;
                    tracing::error!(
                        operation_id = %id,
                        resource = %operation.resource,
                        retry = operation.retry_count,
                        error = %err,
                        "operation failed permanently"
                    );
                    state.errors.push(SyncFailure {
                        operation_id: id,
                        resource: operation.resource,
                        message: err.to_string(),
                        failed_at: self.clock.now(),
                    });
                    while state.errors.len() > self.config.max_errors {
                        state.errors.remove(0);
                    }
                    state.failed.push(operation);
                } else {
                    operation.status = OperationStatus::Pending;
                    let delay = policy.delay_for_retry(operation.retry_count);
                    if err.is_retryable() {
                        tracing::warn!(
                            operation_id = %id,
                            resource = %operation.resource,
                            retry = operation.retry_count,
                            delay_ms = delay.as_millis() as u64,
                            error = %err,
                            "dispatch failed, retry scheduled"
                        );
                    } else {
                        tracing::error!(
                            operation_id = %id,
                            resource = %operation.resource,
                            retry = operation.retry_count,
                            delay_ms = delay.as_millis() as u64,
                            error = %err,
                            "dispatch rejected, retry scheduled"
                        );
                    }
                    self.scheduler.schedule(operation, delay);
                }
            }
        }
    }

    /// Appends operations released by the scheduler to the queue tail.
    fn requeue(self: &Arc<Self>, operations: Vec<SyncOperation>) {
        {
            let mut state = self.state.lock();
            for operation in operations {
                tracing::debug!(
                    operation_id = %operation.id,
                    retry = operation.retry_count,
                    "retry requeued"
                );
                state.queue.push_back(operation);
            }
        }
        self.notify();
        if self.network.is_online() {
            self.spawn_drain();
        }
    }
}

/// Dispatches queue heads until the queue is empty or the network goes
/// offline.
async fn drain(inner: Arc<EngineInner>) {
    if !inner.begin_drain() {
        return;
    }

    while let Some(mut operation) = inner.start_next() {
        inner.notify();
        tracing::debug!(
            operation_id = %operation.id,
            resource = %operation.resource,
            retry = operation.retry_count,
            "dispatching"
        );

        let timeout = inner.config.dispatch_timeout;
        let result = match tokio::time::timeout(timeout, inner.writer.dispatch(&mut operation)).await {
            Ok(result) => result,
            Err(_) => Err(SyncError::Timeout(timeout)),
        };

        inner.settle(operation, result);
        inner.notify();
    }
}

async fn run_timer(inner: Weak<EngineInner>, period: std::time::Duration) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        ticker.tick().await;
        let Some(inner) = inner.upgrade() else { break };
        drain(inner).await;
    }
}

async fn run_network_listener(inner: Weak<EngineInner>, mut online: watch::Receiver<bool>) {
    while online.changed().await.is_ok() {
        let is_online = *online.borrow_and_update();
        let Some(inner) = inner.upgrade() else { break };
        inner.notify();
        if is_online {
            drain(inner).await;
        }
    }
}

async fn run_scheduler(inner: Weak<EngineInner>, scheduler: Arc<RetryScheduler>) {
    scheduler
        .run(move |due| {
            if let Some(inner) = inner.upgrade() {
                inner.requeue(due);
            }
        })
        .await;
}

/// Assembles a [`SyncEngine`].
#[derive(Default)]
pub struct SyncEngineBuilder {
    config: EngineConfig,
    store: Option<Arc<dyn RecordStore>>,
    mirror: Option<Arc<dyn MirrorClient>>,
    cache: Option<Arc<dyn LocalCache>>,
    network: Option<Arc<NetworkMonitor>>,
    clock: Option<Arc<dyn Clock>>,
    ids: Option<Arc<dyn IdGenerator>>,
}

impl SyncEngineBuilder {
    /// Sets the engine configuration.
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the authoritative record store.
    pub fn record_store(mut self, store: Arc<dyn RecordStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Sets the collaborative mirror.
    pub fn mirror(mut self, mirror: Arc<dyn MirrorClient>) -> Self {
        self.mirror = Some(mirror);
        self
    }

    /// Sets the local cache.
    pub fn local_cache(mut self, cache: Arc<dyn LocalCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Shares an existing network monitor. Defaults to a new, online one.
    pub fn network(mut self, network: Arc<NetworkMonitor>) -> Self {
        self.network = Some(network);
        self
    }

    /// Sets the clock. Defaults to the system clock.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Sets the ID generator. Defaults to random UUIDs.
    pub fn id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    /// Builds the engine and starts its background tasks.
    ///
    /// Must be called inside a Tokio runtime. Without a record store the
    /// engine runs in local-only mode against the local cache; with
    /// neither it is an error.
    pub fn build(self) -> SyncResult<SyncEngine> {
        let runtime = Handle::try_current()
            .map_err(|_| SyncError::Config("a Tokio runtime is required".into()))?;
        if self.store.is_none() && self.cache.is_none() {
            return Err(SyncError::Config(
                "a record store or a local cache is required".into(),
            ));
        }
        if self.config.sync_interval.is_zero() {
            return Err(SyncError::Config("sync_interval must be positive".into()));
        }

        let clock: Arc<dyn Clock> = match self.clock {
            Some(clock) => clock,
            None => Arc::new(SystemClock),
        };
        let ids: Arc<dyn IdGenerator> = match self.ids {
            Some(ids) => ids,
            None => Arc::new(UuidGenerator),
        };
        let network = self.network.unwrap_or_default();

        let mut sources = vec![DataSource::RecordStore];
        if self.mirror.is_some() {
            sources.push(DataSource::Collaborative);
        }
        if self.cache.is_some() {
            sources.push(DataSource::LocalCache);
        }
        let registry = Arc::new(SourceRegistry::new(Arc::clone(&clock), &sources));
        if self.store.is_none() {
            registry.record_failure(DataSource::RecordStore, "not configured");
            tracing::info!("no record store configured, running local-only");
        }

        let repairer = Arc::new(
            Repairer::new(Arc::clone(&clock), Arc::clone(&ids))
                .with_ceiling(self.config.repair_ceiling),
        );
        let writer = Writer::new(
            self.store,
            self.mirror,
            self.cache,
            Arc::clone(&registry),
            repairer,
            Arc::clone(&clock),
        );

        let broadcaster = StatusBroadcaster::new(SyncStatus {
            is_online: network.is_online(),
            ..SyncStatus::default()
        });

        let engine = SyncEngine {
            inner: Arc::new(EngineInner {
                config: self.config,
                state: Mutex::new(EngineState::default()),
                writer,
                network,
                registry,
                broadcaster,
                scheduler: Arc::new(RetryScheduler::new()),
                clock,
                ids,
                runtime,
                tasks: Mutex::new(Vec::new()),
            }),
        };
        engine.start();
        Ok(engine)
    }
}

impl std::fmt::Debug for SyncEngineBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngineBuilder")
            .field("config", &self.config)
            .field("record_store", &self.store.is_some())
            .field("mirror", &self.mirror.is_some())
            .field("local_cache", &self.cache.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryCache, MemoryRecordStore};
    use bizsync_core::{ManualClock, SequentialIds};
    use serde_json::json;

    fn plan(id: &str) -> Value {
        json!({
            "id": id,
            "title": "Acme",
            "sections": {},
            "created_at": "2024-01-01T00:00:00Z",
            "updated_at": "2024-01-01T00:00:00Z"
        })
    }

    #[test]
    fn build_requires_runtime() {
        let err = SyncEngine::builder()
            .record_store(Arc::new(MemoryRecordStore::new()))
            .build()
            .unwrap_err();
        assert!(matches!(err, SyncError::Config(_)));
    }

    #[tokio::test]
    async fn build_requires_a_destination() {
        let err = SyncEngine::builder().build().unwrap_err();
        assert!(matches!(err, SyncError::Config(_)));
    }

    #[tokio::test]
    async fn build_rejects_zero_interval() {
        let err = SyncEngine::builder()
            .record_store(Arc::new(MemoryRecordStore::new()))
            .config(EngineConfig::default().with_sync_interval(std::time::Duration::ZERO))
            .build()
            .unwrap_err();
        assert!(matches!(err, SyncError::Config(_)));
    }

    #[tokio::test]
    async fn enqueue_assigns_sequential_ids() {
        let engine = SyncEngine::builder()
            .record_store(Arc::new(MemoryRecordStore::new()))
            .network(Arc::new(NetworkMonitor::new(false)))
            .clock(Arc::new(ManualClock::epoch()))
            .id_generator(Arc::new(SequentialIds::new()))
            .build()
            .unwrap();

        let first = engine.enqueue(OperationRequest::create(Resource::BusinessPlan, plan("p1")));
        let second = engine.enqueue(OperationRequest::create(Resource::BusinessPlan, plan("p2")));

        assert_eq!(first.to_string(), "00000000-0000-0000-0000-000000000001");
        assert_eq!(second.to_string(), "00000000-0000-0000-0000-000000000002");

        let pending = engine.pending_operations();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].id, first);
        assert_eq!(pending[0].enqueued_at, ManualClock::epoch().now());
        assert_eq!(engine.status().pending_operations, 2);
    }

    #[tokio::test]
    async fn status_versions_increase() {
        let engine = SyncEngine::builder()
            .record_store(Arc::new(MemoryRecordStore::new()))
            .network(Arc::new(NetworkMonitor::new(false)))
            .build()
            .unwrap();

        let before = engine.status().version;
        engine.enqueue(OperationRequest::create(Resource::BusinessPlan, plan("p1")));
        engine.clear_errors();
        assert_eq!(engine.status().version, before + 2);
        assert_eq!(engine.status_receiver().borrow().version, before + 2);
    }

    #[tokio::test]
    async fn local_only_registry() {
        let engine = SyncEngine::builder()
            .local_cache(Arc::new(MemoryCache::new()))
            .build()
            .unwrap();

        assert!(engine.is_local_only());
        let sources = engine.data_sources();
        assert_eq!(sources.len(), 2);
        let store = &sources[0];
        assert_eq!(store.source, DataSource::RecordStore);
        assert!(!store.available);
        assert_eq!(store.last_error.as_deref(), Some("not configured"));
    }

    #[tokio::test]
    async fn shutdown_is_idempotent() {
        let engine = SyncEngine::builder()
            .record_store(Arc::new(MemoryRecordStore::new()))
            .build()
            .unwrap();

        engine.shutdown();
        engine.shutdown();
        engine.start();
        assert_eq!(engine.inner.tasks.lock().len(), 3);
    }
}
