//! Reconciliation of local progress with the remote progress service.
//!
//! - `SyncScheduler`: debounced per-course sync, batch sync, single-flight guard
//! - `Debouncer`: keyed cancellable delayed tasks
//! - `TeardownFlush`: fire-and-forget delivery when the client is going away
//! - `RouteBoundarySync`: batch sync when navigation leaves the classroom

pub mod debounce;
pub mod route;
pub mod scheduler;
pub mod service;
pub mod teardown;

pub use debounce::Debouncer;
pub use route::RouteBoundarySync;
pub use scheduler::{SyncOutcome, SyncReport, SyncScheduler, LAST_SYNC_KEY};
pub use service::ProgressService;
pub use teardown::{BeaconTransport, HttpBeacon, TeardownFlush, TeardownReport};
