//! Async storage facade.
//!
//! [`ObjectStorage`] is the surface the rest of a service talks to.  Every
//! operation is one unit of work on the [`WorkerPool`], so the blocking
//! [`RemoteStore`] never runs on the async scheduler.  Callers get plain
//! bytes, strings, key lists, and snapshots back; store-specific errors are
//! translated to [`StorageError`].

use bytes::Bytes;
use metrics::counter;
use std::sync::Arc;
use tracing::debug;

use crate::adapter::compile_pattern;
use crate::bucket::ensure_bucket;
use crate::config::{DebounceConfig, FacadeConfig};
use crate::debounce::settle;
use crate::errors::StorageError;
use crate::listing::DirectoryReader;
use crate::metrics::{BYTES_READ_TOTAL, BYTES_WRITTEN_TOTAL};
use crate::pool::WorkerPool;
use crate::snapshot::{capture, Snapshot};
use crate::storage::backend::{ObjectMeta, RemoteError, RemoteStore, MAX_DELETE_BATCH};

/// Non-blocking object storage over one bucket.
#[derive(Clone)]
pub struct ObjectStorage {
    reader: DirectoryReader,
    pool: WorkerPool,
    debounce: DebounceConfig,
}

impl ObjectStorage {
    /// Build the facade and make sure the bucket exists.
    pub async fn new(
        store: Arc<dyn RemoteStore>,
        bucket: impl Into<String>,
        config: FacadeConfig,
    ) -> Result<Self, StorageError> {
        let reader = DirectoryReader::new(store, bucket, config.max_list_pages);
        let pool = WorkerPool::new(config.worker_threads);

        let bootstrap = reader.clone();
        pool.run("ensure_bucket", move || {
            ensure_bucket(bootstrap.store().as_ref(), bootstrap.bucket())
        })
        .await?;

        Ok(Self {
            reader,
            pool,
            debounce: config.debounce,
        })
    }

    pub fn bucket(&self) -> &str {
        self.reader.bucket()
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Whether `key` exists right now.
    pub async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        let reader = self.reader.clone();
        let key = key.to_string();
        self.pool
            .run("exists", move || {
                reader
                    .store()
                    .head_object(reader.bucket(), &key)
                    .map(|meta| meta.is_some())
                    .map_err(|e| StorageError::from_remote("exists", e))
            })
            .await
    }

    /// Store `content` under `key`, replacing any previous body.
    pub async fn write_file(&self, key: &str, content: impl Into<Bytes>) -> Result<(), StorageError> {
        let reader = self.reader.clone();
        let key = key.to_string();
        let content = content.into();
        self.pool
            .run("write_file", move || {
                let len = content.len() as u64;
                let etag = reader
                    .store()
                    .put_object(reader.bucket(), &key, content)
                    .map_err(|e| StorageError::from_remote("write_file", e))?;
                counter!(BYTES_WRITTEN_TOTAL).increment(len);
                debug!(key = %key, etag = %etag, bytes = len, "object written");
                Ok(())
            })
            .await
    }

    /// Fetch the body of `key`, or `None` if it does not exist.
    pub async fn read_file(&self, key: &str) -> Result<Option<Bytes>, StorageError> {
        self.fetch("read_file", key).await
    }

    /// Fetch `key` and decode it as UTF-8.
    pub async fn read_text(&self, key: &str) -> Result<Option<String>, StorageError> {
        let Some(data) = self.fetch("read_text", key).await? else {
            return Ok(None);
        };
        String::from_utf8(data.to_vec())
            .map(Some)
            .map_err(|e| StorageError::unavailable("read_text", format!("{key} is not UTF-8: {e}")))
    }

    async fn fetch(&self, operation: &'static str, key: &str) -> Result<Option<Bytes>, StorageError> {
        let reader = self.reader.clone();
        let key = key.to_string();
        self.pool
            .run(operation, move || {
                match reader.store().get_object(reader.bucket(), &key) {
                    Ok(data) => {
                        counter!(BYTES_READ_TOTAL).increment(data.len() as u64);
                        Ok(Some(data))
                    }
                    Err(RemoteError::NoSuchKey(_)) => Ok(None),
                    Err(e) => Err(StorageError::from_remote(operation, e)),
                }
            })
            .await
    }

    /// Delete `key`.  Deleting a missing key succeeds.
    pub async fn remove_file(&self, key: &str) -> Result<(), StorageError> {
        let reader = self.reader.clone();
        let key = key.to_string();
        self.pool
            .run("remove_file", move || match reader.store().delete_object(reader.bucket(), &key) {
                Ok(()) | Err(RemoteError::NoSuchKey(_)) => Ok(()),
                Err(e) => Err(StorageError::from_remote("remove_file", e)),
            })
            .await
    }

    /// Delete every key whose full name matches the wildcard `pattern`.
    ///
    /// Returns the number of keys deleted.  Keys written while the listing
    /// runs may or may not be included.
    pub async fn remove_files_by_pattern(&self, pattern: &str) -> Result<usize, StorageError> {
        let compiled = compile_pattern(pattern)?;
        let reader = self.reader.clone();
        self.pool
            .run("remove_files_by_pattern", move || {
                let mut matched = Vec::new();
                for entry in reader.iter("") {
                    let meta = entry?;
                    if compiled.matches(&meta.key) {
                        matched.push(meta.key);
                    }
                }

                for chunk in matched.chunks(MAX_DELETE_BATCH) {
                    reader
                        .store()
                        .delete_objects(reader.bucket(), chunk)
                        .map_err(|e| StorageError::from_remote("remove_files_by_pattern", e))?;
                }
                debug!(pattern = %compiled, deleted = matched.len(), "pattern delete finished");
                Ok(matched.len())
            })
            .await
    }

    /// Every key in the bucket.
    pub async fn list_all_filenames(&self) -> Result<Vec<String>, StorageError> {
        let reader = self.reader.clone();
        self.pool
            .run("list_all_filenames", move || {
                reader.iter("").map(|entry| entry.map(|meta| meta.key)).collect()
            })
            .await
    }

    /// Every object in the bucket, with metadata.
    pub async fn list_all_objects(&self) -> Result<Vec<ObjectMeta>, StorageError> {
        let reader = self.reader.clone();
        self.pool
            .run("list_all_objects", move || reader.list(""))
            .await
    }

    /// Debounced snapshot of the whole bucket.
    pub async fn get_snapshot(&self) -> Result<Snapshot, StorageError> {
        let settled = settle(&self.debounce, || {
            let reader = self.reader.clone();
            let pool = self.pool.clone();
            async move { pool.run("capture_snapshot", move || capture(&reader, "")).await }
        })
        .await?;
        Ok(settled.snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::backend::ListPage;
    use crate::storage::memory::MemoryStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn quick_config() -> FacadeConfig {
        FacadeConfig {
            worker_threads: 4,
            max_list_pages: 1000,
            debounce: DebounceConfig {
                interval_ms: 1,
                max_rounds: 3,
                fail_on_churn: false,
            },
        }
    }

    /// Delegates to a memory store, recording bulk delete batch sizes and
    /// failing every read with a service error.
    struct Recording {
        inner: MemoryStore,
        batches: std::sync::Mutex<Vec<usize>>,
        reads: AtomicUsize,
    }

    impl RemoteStore for Recording {
        fn head_bucket(&self, bucket: &str) -> Result<bool, RemoteError> {
            self.inner.head_bucket(bucket)
        }
        fn create_bucket(&self, bucket: &str) -> Result<(), RemoteError> {
            self.inner.create_bucket(bucket)
        }
        fn list_page(&self, bucket: &str, prefix: &str, token: Option<&str>) -> Result<ListPage, RemoteError> {
            self.inner.list_page(bucket, prefix, token)
        }
        fn head_object(&self, bucket: &str, key: &str) -> Result<Option<ObjectMeta>, RemoteError> {
            self.inner.head_object(bucket, key)
        }
        fn get_object(&self, _: &str, _: &str) -> Result<Bytes, RemoteError> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            Err(RemoteError::service("get_object", "InvalidAccessKeyId"))
        }
        fn put_object(&self, bucket: &str, key: &str, data: Bytes) -> Result<String, RemoteError> {
            self.inner.put_object(bucket, key, data)
        }
        fn delete_object(&self, bucket: &str, key: &str) -> Result<(), RemoteError> {
            self.inner.delete_object(bucket, key)
        }
        fn delete_objects(&self, bucket: &str, keys: &[String]) -> Result<(), RemoteError> {
            self.batches.lock().unwrap().push(keys.len());
            self.inner.delete_objects(bucket, keys)
        }
    }

    fn recording() -> Arc<Recording> {
        Arc::new(Recording {
            inner: MemoryStore::with_page_size(250),
            batches: std::sync::Mutex::new(Vec::new()),
            reads: AtomicUsize::new(0),
        })
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_new_creates_bucket() {
        let store = Arc::new(MemoryStore::new());
        let storage = ObjectStorage::new(store.clone(), "plotva", quick_config())
            .await
            .unwrap();
        assert_eq!(storage.bucket(), "plotva");
        assert!(store.head_bucket("plotva").unwrap());

        // A second facade over the same bucket is fine.
        ObjectStorage::new(store, "plotva", quick_config()).await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_read_missing_is_none() {
        let storage = ObjectStorage::new(Arc::new(MemoryStore::new()), "b", quick_config())
            .await
            .unwrap();
        assert!(storage.read_file("nope").await.unwrap().is_none());
        assert!(storage.read_text("nope").await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_read_text_decodes_and_rejects_binary() {
        let storage = ObjectStorage::new(Arc::new(MemoryStore::new()), "b", quick_config())
            .await
            .unwrap();
        storage.write_file("hello.txt", "привет").await.unwrap();
        storage.write_file("blob.bin", vec![0xffu8, 0xfe]).await.unwrap();

        assert_eq!(storage.read_text("hello.txt").await.unwrap().as_deref(), Some("привет"));
        let err = storage.read_text("blob.bin").await.unwrap_err();
        assert_eq!(err.code(), "StorageUnavailable");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_read_service_error_is_unavailable() {
        let store = recording();
        let storage = ObjectStorage::new(store.clone(), "b", quick_config()).await.unwrap();
        storage.write_file("k", "v").await.unwrap();

        let err = storage.read_file("k").await.unwrap_err();
        assert_eq!(err.code(), "StorageUnavailable");
        assert!(err.to_string().contains("read_file"));
        assert_eq!(store.reads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_pattern_delete_is_batched() {
        let store = recording();
        let storage = ObjectStorage::new(store.clone(), "b", quick_config()).await.unwrap();
        for i in 0..2100 {
            store
                .put_object("b", &format!("tmp/{i:05}.tmp"), Bytes::from_static(b"x"))
                .unwrap();
        }
        store.put_object("b", "keep.log", Bytes::from_static(b"x")).unwrap();

        let deleted = storage.remove_files_by_pattern("*.tmp").await.unwrap();
        assert_eq!(deleted, 2100);
        assert_eq!(*store.batches.lock().unwrap(), vec![1000, 1000, 100]);
        assert_eq!(storage.list_all_filenames().await.unwrap(), vec!["keep.log"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_pattern_delete_without_matches_sends_nothing() {
        let store = recording();
        let storage = ObjectStorage::new(store.clone(), "b", quick_config()).await.unwrap();
        storage.write_file("a.log", "1").await.unwrap();

        assert_eq!(storage.remove_files_by_pattern("*.tmp").await.unwrap(), 0);
        assert!(store.batches.lock().unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_invalid_pattern_is_rejected() {
        let storage = ObjectStorage::new(Arc::new(MemoryStore::new()), "b", quick_config())
            .await
            .unwrap();
        let err = storage.remove_files_by_pattern("[a-").await.unwrap_err();
        assert_eq!(err.code(), "InvalidPattern");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_list_all_objects_reports_metadata() {
        let storage = ObjectStorage::new(Arc::new(MemoryStore::new()), "b", quick_config())
            .await
            .unwrap();
        storage.write_file("a", "abc").await.unwrap();

        let objects = storage.list_all_objects().await.unwrap();
        assert_eq!(objects.len(), 1);
        assert_eq!(objects[0].key, "a");
        assert_eq!(objects[0].size, 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_snapshot_fingerprints_follow_content() {
        let storage = ObjectStorage::new(Arc::new(MemoryStore::new()), "b", quick_config())
            .await
            .unwrap();
        storage.write_file("a", "one").await.unwrap();
        let before = storage.get_snapshot().await.unwrap();

        storage.write_file("a", "two").await.unwrap();
        let after = storage.get_snapshot().await.unwrap();

        assert_ne!(before.get("a"), after.get("a"));
        assert_eq!(after.keys(), vec!["a"]);
    }
}
