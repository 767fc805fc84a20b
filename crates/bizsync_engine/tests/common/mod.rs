//! Shared wiring for engine integration tests.

#![allow(dead_code)]

use bizsync_core::{Clock, ManualClock, SequentialIds};
use bizsync_engine::{
    EngineConfig, MemoryCache, MemoryMirror, MemoryRecordStore, NetworkMonitor, StoreCall,
    StoreMethod, SyncEngine,
};
use std::sync::Arc;
use std::time::Duration;

/// An engine wired to in-memory backends.
pub struct Harness {
    pub engine: SyncEngine,
    pub store: Arc<MemoryRecordStore>,
    pub mirror: Arc<MemoryMirror>,
    pub cache: Arc<MemoryCache>,
    pub network: Arc<NetworkMonitor>,
    pub clock: Arc<ManualClock>,
}

impl Harness {
    /// Default configuration, healthy store.
    pub fn new(online: bool) -> Self {
        Self::with(MemoryRecordStore::new(), EngineConfig::default(), online)
    }

    /// Custom store and configuration.
    pub fn with(store: MemoryRecordStore, config: EngineConfig, online: bool) -> Self {
        let store = Arc::new(store);
        let mirror = Arc::new(MemoryMirror::new());
        let cache = Arc::new(MemoryCache::new());
        let network = Arc::new(NetworkMonitor::new(online));
        let clock = Arc::new(ManualClock::epoch());

        let engine = SyncEngine::builder()
            .config(config)
            .record_store(store.clone())
            .mirror(mirror.clone())
            .local_cache(cache.clone())
            .network(Arc::clone(&network))
            .clock(clock.clone() as Arc<dyn Clock>)
            .id_generator(Arc::new(SequentialIds::new()))
            .build()
            .expect("engine builds");

        Self {
            engine,
            store,
            mirror,
            cache,
            network,
            clock,
        }
    }

    /// Record store calls of one kind, oldest first.
    pub fn calls(&self, method: StoreMethod) -> Vec<StoreCall> {
        self.store
            .calls()
            .into_iter()
            .filter(|call| call.method == method)
            .collect()
    }
}

/// Lets background tasks run while Tokio time moves forward.
pub async fn run_for(duration: Duration) {
    tokio::time::sleep(duration).await;
}

/// Asserts `actual` is `expected` give or take timer granularity.
pub fn assert_about(actual: Duration, expected: Duration) {
    let slack = Duration::from_millis(10);
    assert!(
        actual >= expected && actual < expected + slack,
        "expected about {expected:?}, got {actual:?}"
    );
}
