//! Key-value persistence used for durable client-side state.
//!
//! This module provides:
//! - `KeyValueStore`: the load/store contract the progress engine persists through
//! - `FileStore`: one JSON document per key in a data directory
//! - `MemoryStore`: process-local storage for tests and throwaway sessions

pub mod store;

pub use store::{FileStore, KeyValueStore, MemoryStore, StorageError};
