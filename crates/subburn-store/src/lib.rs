//! Content-addressed artifact store.
//!
//! This crate provides:
//! - Ingest of byte buffers and files, keyed by SHA-256 content digest
//! - Deduplicated object storage on the local filesystem
//! - Materialization of objects to worker-local paths for FFmpeg

pub mod error;
pub mod store;

pub use error::{StorageError, StorageResult};
pub use store::{ArtifactStore, StoreConfig};
