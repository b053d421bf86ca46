//! Durable local record of lesson completion.
//!
//! `ProgressStore` is the client-side source of truth for which
//! (course, video) pairs are complete. Every mutation is written through to
//! the `KeyValueStore` before returning.

pub mod store;

pub use store::{percent_of, PendingProgress, ProgressMap, ProgressStore};
