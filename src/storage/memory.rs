//! In-memory remote store.
//!
//! Buckets hold objects in ordered maps so listings paginate by key, the
//! same way S3 does.  ETags are quoted MD5 hex digests and every write
//! gets a strictly increasing last-modified stamp, so timestamp-based
//! change detection behaves even when two writes land in the same
//! microsecond.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use md5::{Digest, Md5};
use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::RwLock;

use super::backend::{ListPage, ObjectMeta, RemoteError, RemoteStore};

/// Default number of keys per listing page (matches S3).
pub const DEFAULT_PAGE_SIZE: usize = 1000;

#[derive(Debug, Clone)]
struct MemoryObject {
    data: Bytes,
    etag: String,
    last_modified: DateTime<Utc>,
}

/// In-memory store: bucket name -> ordered key map.
pub struct MemoryStore {
    buckets: RwLock<HashMap<String, BTreeMap<String, MemoryObject>>>,
    /// Keys returned per `list_page` call.
    page_size: usize,
    /// Last issued modification stamp in microseconds.
    clock: AtomicI64,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_page_size(DEFAULT_PAGE_SIZE)
    }

    /// Create a store that returns at most `page_size` keys per page.
    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            buckets: RwLock::new(HashMap::new()),
            page_size: page_size.max(1),
            clock: AtomicI64::new(0),
        }
    }

    /// Compute the quoted MD5-hex ETag for a byte slice.
    fn compute_etag(data: &[u8]) -> String {
        let mut hasher = Md5::new();
        hasher.update(data);
        format!("\"{}\"", hex::encode(hasher.finalize()))
    }

    /// Next modification stamp: wall clock, bumped past the previous stamp.
    fn next_stamp(&self) -> DateTime<Utc> {
        let now = Utc::now().timestamp_micros();
        let mut prev = self.clock.load(Ordering::Relaxed);
        loop {
            let next = now.max(prev + 1);
            match self
                .clock
                .compare_exchange(prev, next, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => return DateTime::from_timestamp_micros(next).unwrap_or_else(Utc::now),
                Err(actual) => prev = actual,
            }
        }
    }

    fn meta(key: &str, obj: &MemoryObject) -> ObjectMeta {
        ObjectMeta {
            key: key.to_string(),
            etag: obj.etag.clone(),
            last_modified: obj.last_modified,
            size: obj.data.len() as u64,
        }
    }

    fn poisoned(operation: &'static str) -> RemoteError {
        RemoteError::service(operation, "memory store lock poisoned")
    }
}

impl RemoteStore for MemoryStore {
    fn head_bucket(&self, bucket: &str) -> Result<bool, RemoteError> {
        let buckets = self
            .buckets
            .read()
            .map_err(|_| Self::poisoned("head_bucket"))?;
        Ok(buckets.contains_key(bucket))
    }

    fn create_bucket(&self, bucket: &str) -> Result<(), RemoteError> {
        let mut buckets = self
            .buckets
            .write()
            .map_err(|_| Self::poisoned("create_bucket"))?;
        if buckets.contains_key(bucket) {
            return Err(RemoteError::BucketAlreadyExists(bucket.to_string()));
        }
        buckets.insert(bucket.to_string(), BTreeMap::new());
        Ok(())
    }

    fn list_page(
        &self,
        bucket: &str,
        prefix: &str,
        continuation: Option<&str>,
    ) -> Result<ListPage, RemoteError> {
        let buckets = self
            .buckets
            .read()
            .map_err(|_| Self::poisoned("list_page"))?;
        let objects = buckets
            .get(bucket)
            .ok_or_else(|| RemoteError::NoSuchBucket(bucket.to_string()))?;

        // The continuation token is the last key of the previous page.
        let start = match continuation {
            Some(token) => Bound::Excluded(token.to_string()),
            None => Bound::Included(prefix.to_string()),
        };

        let mut page = Vec::with_capacity(self.page_size.min(objects.len()));
        let mut more = false;
        for (key, obj) in objects.range((start, Bound::Unbounded)) {
            if !key.starts_with(prefix) {
                break;
            }
            if page.len() == self.page_size {
                more = true;
                break;
            }
            page.push(Self::meta(key, obj));
        }

        let next_continuation = if more {
            page.last().map(|m| m.key.clone())
        } else {
            None
        };

        Ok(ListPage {
            objects: page,
            next_continuation,
        })
    }

    fn head_object(&self, bucket: &str, key: &str) -> Result<Option<ObjectMeta>, RemoteError> {
        let buckets = self
            .buckets
            .read()
            .map_err(|_| Self::poisoned("head_object"))?;
        Ok(buckets
            .get(bucket)
            .and_then(|objects| objects.get(key))
            .map(|obj| Self::meta(key, obj)))
    }

    fn get_object(&self, bucket: &str, key: &str) -> Result<Bytes, RemoteError> {
        let buckets = self
            .buckets
            .read()
            .map_err(|_| Self::poisoned("get_object"))?;
        let objects = buckets
            .get(bucket)
            .ok_or_else(|| RemoteError::NoSuchBucket(bucket.to_string()))?;
        objects
            .get(key)
            .map(|obj| obj.data.clone())
            .ok_or_else(|| RemoteError::NoSuchKey(key.to_string()))
    }

    fn put_object(&self, bucket: &str, key: &str, data: Bytes) -> Result<String, RemoteError> {
        let etag = Self::compute_etag(&data);
        let last_modified = self.next_stamp();

        let mut buckets = self
            .buckets
            .write()
            .map_err(|_| Self::poisoned("put_object"))?;
        let objects = buckets
            .get_mut(bucket)
            .ok_or_else(|| RemoteError::NoSuchBucket(bucket.to_string()))?;
        objects.insert(
            key.to_string(),
            MemoryObject {
                data,
                etag: etag.clone(),
                last_modified,
            },
        );
        Ok(etag)
    }

    fn delete_object(&self, bucket: &str, key: &str) -> Result<(), RemoteError> {
        let mut buckets = self
            .buckets
            .write()
            .map_err(|_| Self::poisoned("delete_object"))?;
        let objects = buckets
            .get_mut(bucket)
            .ok_or_else(|| RemoteError::NoSuchBucket(bucket.to_string()))?;
        objects.remove(key);
        Ok(())
    }

    fn delete_objects(&self, bucket: &str, keys: &[String]) -> Result<(), RemoteError> {
        let mut buckets = self
            .buckets
            .write()
            .map_err(|_| Self::poisoned("delete_objects"))?;
        let objects = buckets
            .get_mut(bucket)
            .ok_or_else(|| RemoteError::NoSuchBucket(bucket.to_string()))?;
        for key in keys {
            objects.remove(key);
        }
        Ok(())
    }
}
