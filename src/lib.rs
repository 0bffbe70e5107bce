//! Stowage library -- object storage abstraction over S3-compatible stores.
//!
//! This crate wraps a blocking remote store client in an async facade,
//! keeps point-in-time snapshots of bucket contents, and computes diffs
//! between them.  Listings are debounced to absorb eventually-consistent
//! results from the store.

pub mod adapter;
pub mod bucket;
pub mod config;
pub mod debounce;
pub mod errors;
pub mod facade;
pub mod listing;
pub mod metrics;
pub mod pool;
pub mod snapshot;
pub mod storage;

pub use adapter::{FileBody, FileHandle, OpenMode, StorageAdapter};
pub use errors::StorageError;
pub use facade::ObjectStorage;
pub use snapshot::{diff, Snapshot, SnapshotDiff};
pub use storage::backend::{ObjectMeta, RemoteStore};
