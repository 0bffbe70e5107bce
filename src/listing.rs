//! Paginated key enumeration.
//!
//! [`DirectoryReader`] walks every page of a bucket listing under a prefix
//! and hands back plain [`ObjectMeta`] values.  Continuation tokens stay
//! inside this module.  A store that keeps returning continuation tokens
//! forever is treated as inconsistent: after `max_pages` pages the walk
//! fails with [`StorageError::ExhaustedRetries`].

use std::sync::Arc;

use crate::errors::StorageError;
use crate::storage::backend::{ObjectMeta, RemoteStore};

/// Enumerates objects in one bucket.
#[derive(Clone)]
pub struct DirectoryReader {
    store: Arc<dyn RemoteStore>,
    bucket: String,
    max_pages: u32,
}

impl DirectoryReader {
    pub fn new(store: Arc<dyn RemoteStore>, bucket: impl Into<String>, max_pages: u32) -> Self {
        Self {
            store,
            bucket: bucket.into(),
            max_pages: max_pages.max(1),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn store(&self) -> &Arc<dyn RemoteStore> {
        &self.store
    }

    /// List every object under `prefix`, in store order.
    pub fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>, StorageError> {
        self.iter(prefix).collect()
    }

    /// Lazily walk the objects under `prefix`, fetching pages on demand.
    pub fn iter(&self, prefix: &str) -> ObjectIter {
        ObjectIter {
            reader: self.clone(),
            prefix: prefix.to_string(),
            buffer: Vec::new().into_iter(),
            continuation: None,
            pages: 0,
            done: false,
        }
    }
}

/// Iterator over listing entries.  Yields an error at most once, then stops.
pub struct ObjectIter {
    reader: DirectoryReader,
    prefix: String,
    buffer: std::vec::IntoIter<ObjectMeta>,
    continuation: Option<String>,
    pages: u32,
    done: bool,
}

impl ObjectIter {
    fn fetch_page(&mut self) -> Result<(), StorageError> {
        if self.pages >= self.reader.max_pages {
            return Err(StorageError::ExhaustedRetries {
                operation: "list_objects",
                attempts: self.pages,
            });
        }
        self.pages += 1;

        let page = self
            .reader
            .store
            .list_page(
                &self.reader.bucket,
                &self.prefix,
                self.continuation.as_deref(),
            )
            .map_err(|e| StorageError::from_remote("list_objects", e))?;

        tracing::trace!(
            bucket = %self.reader.bucket,
            prefix = %self.prefix,
            page = self.pages,
            objects = page.objects.len(),
            "fetched listing page"
        );

        self.done = page.next_continuation.is_none();
        self.continuation = page.next_continuation;
        self.buffer = page.objects.into_iter();
        Ok(())
    }
}

impl Iterator for ObjectIter {
    type Item = Result<ObjectMeta, StorageError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(meta) = self.buffer.next() {
                return Some(Ok(meta));
            }
            if self.done {
                return None;
            }
            // Empty pages with a continuation token are legal; keep going.
            if let Err(e) = self.fetch_page() {
                self.done = true;
                return Some(Err(e));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::backend::{ListPage, RemoteError};
    use crate::storage::memory::MemoryStore;
    use bytes::Bytes;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Store whose listing never ends: every page is empty and carries a
    /// fresh continuation token.
    struct EndlessStore {
        calls: AtomicU32,
    }

    impl RemoteStore for EndlessStore {
        fn head_bucket(&self, _: &str) -> Result<bool, RemoteError> {
            Ok(true)
        }
        fn create_bucket(&self, _: &str) -> Result<(), RemoteError> {
            Ok(())
        }
        fn list_page(&self, _: &str, _: &str, _: Option<&str>) -> Result<ListPage, RemoteError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(ListPage {
                objects: Vec::new(),
                next_continuation: Some(format!("token-{n}")),
            })
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

    /// Store whose first page is empty but carries a token; the second
    /// page holds the only object.
    struct GapStore {
        calls: AtomicU32,
    }

    impl RemoteStore for GapStore {
        fn head_bucket(&self, _: &str) -> Result<bool, RemoteError> {
            Ok(true)
        }
        fn create_bucket(&self, _: &str) -> Result<(), RemoteError> {
            Ok(())
        }
        fn list_page(&self, _: &str, _: &str, token: Option<&str>) -> Result<ListPage, RemoteError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match token {
                None => Ok(ListPage {
                    objects: Vec::new(),
                    next_continuation: Some("after-gap".to_string()),
                }),
                Some("after-gap") => Ok(ListPage {
                    objects: vec![ObjectMeta {
                        key: "a".to_string(),
                        etag: "\"1\"".to_string(),
                        last_modified: chrono::DateTime::<chrono::Utc>::UNIX_EPOCH,
                        size: 1,
                    }],
                    next_continuation: None,
                }),
                Some(other) => Err(RemoteError::service("list_page", format!("bad token {other}"))),
            }
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

    fn populated_store(page_size: usize, keys: &[&str]) -> Arc<dyn RemoteStore> {
        let store = MemoryStore::with_page_size(page_size);
        store.create_bucket("bucket").unwrap();
        for key in keys {
            store
                .put_object("bucket", key, Bytes::copy_from_slice(key.as_bytes()))
                .unwrap();
        }
        Arc::new(store)
    }

    #[test]
    fn test_list_walks_all_pages() {
        let keys = ["a", "b", "c", "d", "e"];
        let reader = DirectoryReader::new(populated_store(2, &keys), "bucket", 100);

        let listed: Vec<String> = reader.list("").unwrap().into_iter().map(|m| m.key).collect();
        assert_eq!(listed, keys);
    }

    #[test]
    fn test_list_respects_prefix() {
        let reader = DirectoryReader::new(
            populated_store(1, &["logs/1", "logs/2", "users/42/photo.jpg"]),
            "bucket",
            100,
        );
        let listed: Vec<String> = reader
            .list("logs/")
            .unwrap()
            .into_iter()
            .map(|m| m.key)
            .collect();
        assert_eq!(listed, vec!["logs/1", "logs/2"]);
    }

    #[test]
    fn test_list_empty_bucket() {
        let reader = DirectoryReader::new(populated_store(10, &[]), "bucket", 1);
        assert!(reader.list("").unwrap().is_empty());
    }

    #[test]
    fn test_non_terminating_pagination_is_bounded() {
        let store = Arc::new(EndlessStore {
            calls: AtomicU32::new(0),
        });
        let reader = DirectoryReader::new(store.clone(), "bucket", 5);

        let err = reader.list("").unwrap_err();
        assert!(matches!(
            err,
            StorageError::ExhaustedRetries { attempts: 5, .. }
        ));
        assert_eq!(store.calls.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn test_empty_page_with_token_keeps_paginating() {
        let store = Arc::new(GapStore {
            calls: AtomicU32::new(0),
        });
        let reader = DirectoryReader::new(store.clone(), "bucket", 10);

        let listed: Vec<String> = reader.list("").unwrap().into_iter().map(|m| m.key).collect();
        assert_eq!(listed, vec!["a"]);
        assert_eq!(store.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_missing_bucket_is_unavailable() {
        let reader = DirectoryReader::new(Arc::new(MemoryStore::new()), "ghost", 10);
        let err = reader.list("").unwrap_err();
        assert_eq!(err.code(), "StorageUnavailable");
    }

    #[test]
    fn test_iter_is_lazy() {
        let reader = DirectoryReader::new(populated_store(1, &["a", "b", "c"]), "bucket", 100);
        let first: Vec<_> = reader.iter("").take(1).collect::<Result<_, _>>().unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].key, "a");
    }
}
