//! # BizSync Engine
//!
//! Offline-tolerant synchronization engine for business entities.
//!
//! This crate provides:
//! - A FIFO operation queue with a single in-flight dispatch
//! - Retry with exponential backoff through a delay queue
//! - Network-state gating (nothing is dispatched while offline)
//! - A multi-destination writer: durable record store, best-effort
//!   collaborative mirror, local cache write-through
//! - A data source registry for health checks and for holding back a
//!   mirror that keeps failing
//! - Status broadcasting to callback listeners and `watch` receivers
//!
//! ## Architecture
//!
//! ```text
//! enqueue ──▶ queue ──▶ drain (online, idle) ──▶ writer ──▶ record store
//!               ▲                                   │  └──▶ mirror (best effort)
//!               │                                   │  └──▶ local cache
//!               └── retry scheduler ◀── failure ────┘
//! ```
//!
//! ## Key Invariants
//!
//! - At most one operation is in flight
//! - Without failures, operations are dispatched in enqueue order
//! - A failed operation re-enters the queue at the tail after its backoff
//! - After `max_retries` failed attempts the operation is dropped into the
//!   failed list and reported in `SyncStatus::errors`
//! - `enqueue` never blocks and never fails
//!
//! ## Example
//!
//! ```no_run
//! use bizsync_core::{OperationRequest, Resource};
//! use bizsync_engine::{MemoryRecordStore, SyncEngine};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # async fn run() -> bizsync_engine::SyncResult<()> {
//! let engine = SyncEngine::builder()
//!     .record_store(Arc::new(MemoryRecordStore::new()))
//!     .build()?;
//!
//! let _subscription = engine.on_status_change(|status| {
//!     println!("{} pending", status.pending_operations);
//! });
//!
//! engine.enqueue(OperationRequest::create(
//!     Resource::BusinessPlan,
//!     json!({ "title": "Acme" }),
//! ));
//! engine.force_sync().await;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod broadcast;
mod collaborators;
mod config;
mod engine;
mod error;
mod memory;
mod network;
mod registry;
mod scheduler;
mod status;
mod writer;

pub use broadcast::{StatusBroadcaster, Subscription};
pub use collaborators::{LocalCache, MirrorClient, RecordStore, StoreError, StoreErrorKind};
pub use config::{EngineConfig, RetryPolicy};
pub use engine::{SyncEngine, SyncEngineBuilder};
pub use error::{SyncError, SyncResult};
pub use memory::{MemoryCache, MemoryMirror, MemoryRecordStore, StoreCall, StoreMethod};
pub use network::NetworkMonitor;
pub use registry::{DataSource, DataSourceRecord, HealthReport, SourceRegistry};
pub use scheduler::RetryScheduler;
pub use status::{SyncFailure, SyncStatus};
pub use writer::Writer;
