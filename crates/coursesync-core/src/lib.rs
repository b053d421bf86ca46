//! Local-first course progress tracking.
//!
//! Lesson completion is recorded in a durable local `ProgressStore` and
//! reconciled with the remote progress service by a debounced, single-flight
//! `SyncScheduler`. A teardown flush and a route-boundary trigger cover the
//! moments a normal debounced sync would not get to run. `TtlCache` fronts
//! the idempotent catalog reads.

pub mod api;
pub mod cache;
pub mod config;
pub mod engine;
pub mod models;
pub mod progress;
pub mod storage;
pub mod sync;

pub use api::{ApiClient, ApiError, CatalogClient, CatalogTtls, Fetched};
pub use cache::TtlCache;
pub use config::Config;
pub use engine::{EngineOptions, ProgressEngine};
pub use models::{Course, CourseDraft, CourseProgress, SyncStatus, Trainer};
pub use progress::ProgressStore;
pub use storage::{FileStore, KeyValueStore, MemoryStore, StorageError};
pub use sync::{
    BeaconTransport, HttpBeacon, ProgressService, SyncOutcome, SyncReport, SyncScheduler,
    TeardownReport,
};
