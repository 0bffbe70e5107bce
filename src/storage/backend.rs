//! Abstract remote store trait.
//!
//! Every object store implements [`RemoteStore`].  The trait is blocking
//! on purpose: SDK calls run on worker threads (see [`crate::pool`]) and
//! never on the async scheduler.  Methods work in terms of plain bytes
//! and strings so no SDK type leaks to callers.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Metadata for one object, as reported by a listing or a head request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMeta {
    /// Object key within the bucket.
    pub key: String,
    /// Content fingerprint (quoted ETag).
    pub etag: String,
    /// Last modification time reported by the store.
    pub last_modified: DateTime<Utc>,
    /// Object size in bytes.
    pub size: u64,
}

impl ObjectMeta {
    /// Last modification time as microseconds since the Unix epoch.
    pub fn modified_micros(&self) -> i64 {
        self.last_modified.timestamp_micros()
    }
}

/// One page of a `ListObjectsV2`-style listing.
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    /// Objects on this page.  May be empty even when more pages follow.
    pub objects: Vec<ObjectMeta>,
    /// Token for the next page, `None` on the last page.
    pub next_continuation: Option<String>,
}

/// Errors raised by a remote store implementation.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// The key does not exist.
    #[error("no such key: {0}")]
    NoSuchKey(String),

    /// The bucket does not exist.
    #[error("no such bucket: {0}")]
    NoSuchBucket(String),

    /// Bucket creation lost a race, or the bucket was already ours.
    #[error("bucket already exists: {0}")]
    BucketAlreadyExists(String),

    /// Transport, auth, or any other service-side failure.
    #[error("{operation}: {message}")]
    Service {
        operation: &'static str,
        message: String,
    },
}

impl RemoteError {
    pub fn service(operation: &'static str, err: impl std::fmt::Display) -> Self {
        RemoteError::Service {
            operation,
            message: err.to_string(),
        }
    }
}

/// Blocking object storage contract.
///
/// Implementations are shared read-only across threads behind an `Arc`.
pub trait RemoteStore: Send + Sync + 'static {
    /// Return `true` if `bucket` exists and is accessible.
    fn head_bucket(&self, bucket: &str) -> Result<bool, RemoteError>;

    /// Create `bucket`.  Fails with [`RemoteError::BucketAlreadyExists`]
    /// when it is already there.
    fn create_bucket(&self, bucket: &str) -> Result<(), RemoteError>;

    /// Fetch one page of keys under `prefix`, continuing from `continuation`.
    fn list_page(
        &self,
        bucket: &str,
        prefix: &str,
        continuation: Option<&str>,
    ) -> Result<ListPage, RemoteError>;

    /// Metadata-only probe.  Returns `None` if the key is absent.
    fn head_object(&self, bucket: &str, key: &str) -> Result<Option<ObjectMeta>, RemoteError>;

    /// Read the full object body.
    fn get_object(&self, bucket: &str, key: &str) -> Result<Bytes, RemoteError>;

    /// Overwrite the object at `key`, returning its new ETag.
    fn put_object(&self, bucket: &str, key: &str, data: Bytes) -> Result<String, RemoteError>;

    /// Delete one object.  Deleting a missing key succeeds.
    fn delete_object(&self, bucket: &str, key: &str) -> Result<(), RemoteError>;

    /// Delete a batch of objects in one request.  Callers keep batches at
    /// or below [`MAX_DELETE_BATCH`].
    fn delete_objects(&self, bucket: &str, keys: &[String]) -> Result<(), RemoteError>;
}

/// Largest batch accepted by a single S3 `DeleteObjects` request.
pub const MAX_DELETE_BATCH: usize = 1000;
