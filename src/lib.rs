//! Offline-first synchronization engine for the Tourbase guide app.
//!
//! Guides work where connectivity is not a given. This crate captures their
//! actions into a durable local queue the moment they happen and replays
//! them against the platform API once the device is back online.
//!
//! # Features
//!
//! - **Durable capture**: every action is persisted to an embedded DuckDB
//!   store before the call returns; queued mutations survive restart and
//!   reboot.
//! - **FIFO, at-least-once replay**: one device's actions arrive at the
//!   server in the order they were performed; server handlers deduplicate
//!   on natural keys.
//! - **Partial-failure isolation**: one undeliverable mutation never blocks
//!   the rest of the queue.
//! - **Offline rendering**: read-mostly trip and manifest snapshots are
//!   pre-loaded while online and served locally at any connectivity state.
//!
//! # Usage
//!
//! ```ignore
//! use std::sync::Arc;
//! use tourbase_sync::{
//!     AttendanceRecorder, ConnectivityMonitor, HttpTransport, MutationQueue,
//!     RouteTable, Store, SyncConfig, SyncManager,
//! };
//!
//! let config = SyncConfig::default();
//! let store = Arc::new(Store::open("guide-sync.duckdb")?);
//! let queue = MutationQueue::new(store.clone());
//! let transport = Arc::new(HttpTransport::new(
//!     &config.server_url,
//!     &store.device_id()?,
//!     config.request_timeout(),
//! )?);
//! let manager = Arc::new(SyncManager::new(
//!     queue.clone(),
//!     transport,
//!     RouteTable::guide_defaults(),
//! ));
//!
//! // Capture actions regardless of connectivity.
//! let attendance = AttendanceRecorder::new(queue);
//!
//! // Replay whenever the device comes back online.
//! let monitor = ConnectivityMonitor::new(true);
//! let _subscription = manager.watch_connectivity(&monitor);
//! manager.drain_if_online(&monitor).await?;
//! ```

pub mod cli;
pub mod config;
pub mod connectivity;
pub mod error;
pub mod manager;
pub mod queue;
pub mod records;
pub mod snapshot;
pub mod store;
pub mod transport;
pub mod types;

// Re-export main types for convenience
pub use config::{default_data_dir, default_store_path, SyncConfig};
pub use connectivity::{ConnectivityMonitor, Subscription};
pub use error::{StorageError, StorageResult};
pub use manager::{DrainSummary, MutationOutcome, RouteTable, SyncManager};
pub use queue::MutationQueue;
pub use records::{AttendanceRecorder, DocumentRecorder, ManifestRecorder};
pub use snapshot::SnapshotStore;
pub use store::{Key, Store, StoreTx};
pub use transport::{HttpTransport, SyncTransport};
pub use types::{
    AttendanceEvent, AttendanceKind, DeadLetter, DocumentUpload, GeoPoint, ManifestEntry,
    ManifestEvent, ManifestKind, Mutation, RecordRef, TripSnapshot,
};
