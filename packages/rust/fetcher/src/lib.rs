//! Remote retrieval of manuals and the catalog listing.
//!
//! This crate provides:
//! - [`Fetcher`], a single-GET document download with size and host guards
//! - [`catalog`], the listing call that seeds the record store

pub mod catalog;
pub mod fetch;

pub use catalog::{Catalog, CatalogEntry};
pub use fetch::Fetcher;
