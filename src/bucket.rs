//! Bucket bootstrap.

use tracing::info;

use crate::errors::StorageError;
use crate::storage::backend::{RemoteError, RemoteStore};

/// What [`ensure_bucket`] found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BucketStatus {
    /// The bucket was already there.
    Existing,
    /// The bucket was created by this call.
    Created,
}

/// Make sure `bucket` exists, creating it when the probe says it is absent.
///
/// Idempotent.  Losing a creation race to another process counts as
/// success.
pub fn ensure_bucket(store: &dyn RemoteStore, bucket: &str) -> Result<BucketStatus, StorageError> {
    let exists = store
        .head_bucket(bucket)
        .map_err(|e| StorageError::from_remote("ensure_bucket", e))?;
    if exists {
        info!("Bucket {} already exists", bucket);
        return Ok(BucketStatus::Existing);
    }

    match store.create_bucket(bucket) {
        Ok(()) => {
            info!("Bucket {} created", bucket);
            Ok(BucketStatus::Created)
        }
        Err(RemoteError::BucketAlreadyExists(_)) => {
            info!("Bucket {} appeared while creating it", bucket);
            Ok(BucketStatus::Existing)
        }
        Err(e) => Err(StorageError::BucketCreate {
            bucket: bucket.to_string(),
            message: e.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::backend::{ListPage, ObjectMeta};
    use crate::storage::memory::MemoryStore;
    use bytes::Bytes;

    /// Probe always says "absent"; creation fails with a fixed error.
    struct CreateFails(fn(&str) -> RemoteError);

    impl RemoteStore for CreateFails {
        fn head_bucket(&self, _: &str) -> Result<bool, RemoteError> {
            Ok(false)
        }
        fn create_bucket(&self, bucket: &str) -> Result<(), RemoteError> {
            Err((self.0)(bucket))
        }
        fn list_page(&self, _: &str, _: &str, _: Option<&str>) -> Result<ListPage, RemoteError> {
            Ok(ListPage::default())
        }
        fn head_object(&self, _: &str, _: &str) -> Result<Option<ObjectMeta>, RemoteError> {
            Ok(None)
        }
        fn get_object(&self, _: &str, key: &str) -> Result<Bytes, RemoteError> {
            Err(RemoteError::NoSuchKey(key.to_string()))
        }
        fn put_object(&self, _: &str, _: &str, _: Bytes) -> Result<String, RemoteError> {
            Ok(String::new())
        }
        fn delete_object(&self, _: &str, _: &str) -> Result<(), RemoteError> {
            Ok(())
        }
        fn delete_objects(&self, _: &str, _: &[String]) -> Result<(), RemoteError> {
            Ok(())
        }
    }

    #[test]
    fn test_creates_missing_bucket_once() {
        let store = MemoryStore::new();
        assert_eq!(ensure_bucket(&store, "plotva").unwrap(), BucketStatus::Created);
        assert_eq!(ensure_bucket(&store, "plotva").unwrap(), BucketStatus::Existing);
        assert!(store.head_bucket("plotva").unwrap());
    }

    #[test]
    fn test_creation_race_is_benign() {
        let store = CreateFails(|b| RemoteError::BucketAlreadyExists(b.to_string()));
        assert_eq!(ensure_bucket(&store, "plotva").unwrap(), BucketStatus::Existing);
    }

    #[test]
    fn test_creation_failure_is_bucket_create_error() {
        let store = CreateFails(|_| RemoteError::service("create_bucket", "AccessDenied"));
        let err = ensure_bucket(&store, "plotva").unwrap_err();
        assert_eq!(err.code(), "BucketCreateError");
        assert!(err.to_string().contains("AccessDenied"));
    }
}
