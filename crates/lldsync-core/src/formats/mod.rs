//! # Formats
//!
//! On-disk encodings that are independent of a storage engine.

pub mod persistence;

pub use persistence::{SnapshotHeader, catalog_from_bytes, catalog_to_bytes};
