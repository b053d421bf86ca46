//! Short-lived in-memory caching for idempotent read endpoints.
//!
//! `TtlCache` maps string keys to values with a per-entry expiry. Expired
//! entries behave exactly like misses and are evicted when read, so the
//! optional periodic sweep only bounds memory growth.

pub mod ttl;

pub use ttl::{spawn_sweeper, SharedTtlCache, TtlCache};
