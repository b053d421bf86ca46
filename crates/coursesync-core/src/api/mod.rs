//! REST client for the learning platform backend.
//!
//! This module provides:
//! - `ApiClient`: progress updates and catalog reads/writes over HTTP
//! - `CatalogClient`: read-through TTL caching for catalog endpoints
//! - `ApiError`: typed transport and HTTP failures
//!
//! Requests carry an optional bearer token; obtaining it is the caller's job.

pub mod catalog;
pub mod client;
pub mod error;

pub use catalog::{CatalogClient, CatalogTtls, Fetched};
pub use client::ApiClient;
pub use error::ApiError;
