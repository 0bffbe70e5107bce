//! Change-tracking storage adapter.
//!
//! [`StorageAdapter`] watches one key prefix.  At construction it records
//! the prefix's full listing as a baseline (every key "unchanged"); each
//! [`refresh`](StorageAdapter::refresh) lists again and reports what was
//! added, removed, or modified since the previous call.  Modification is
//! detected by last-modified stamps (microsecond epoch), not content.
//!
//! The adapter is blocking.  Use it from a dedicated thread or inside
//! `spawn_blocking`.  `refresh` takes `&mut self`, so one instance cannot
//! be refreshed from two places at once; callers that need parallel
//! refreshes create one adapter each.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use glob::Pattern;
use std::sync::Arc;
use tracing::debug;

use crate::errors::StorageError;
use crate::listing::{DirectoryReader, ObjectIter};
use crate::snapshot::{diff, Snapshot, SnapshotDiff};
use crate::storage::backend::{ObjectMeta, RemoteStore};

/// Last-known `key -> last-modified microseconds` for the watched prefix.
pub type AdapterDiffState = Snapshot<i64>;

/// How a [`FileHandle`] decodes the object body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OpenMode {
    /// Decode as UTF-8 text.
    #[default]
    Text,
    /// Raw bytes.
    Binary,
}

/// Body returned by [`FileHandle::read`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileBody {
    Text(String),
    Binary(Bytes),
}

impl FileBody {
    pub fn into_bytes(self) -> Bytes {
        match self {
            FileBody::Text(s) => Bytes::from(s),
            FileBody::Binary(b) => b,
        }
    }
}

/// Lazily-read view of one object.
///
/// Creating a handle transfers no data; every [`read`](FileHandle::read)
/// fetches the current body.
#[derive(Clone)]
pub struct FileHandle {
    store: Arc<dyn RemoteStore>,
    bucket: String,
    path: String,
    last_modified: DateTime<Utc>,
    mode: OpenMode,
}

impl std::fmt::Debug for FileHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileHandle")
            .field("bucket", &self.bucket)
            .field("path", &self.path)
            .field("last_modified", &self.last_modified)
            .field("mode", &self.mode)
            .finish()
    }
}

impl FileHandle {
    fn from_meta(store: Arc<dyn RemoteStore>, bucket: &str, meta: ObjectMeta, mode: OpenMode) -> Self {
        Self {
            store,
            bucket: bucket.to_string(),
            path: meta.key,
            last_modified: meta.last_modified,
            mode,
        }
    }

    /// Full object key.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn last_modified(&self) -> DateTime<Utc> {
        self.last_modified
    }

    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    /// Fetch the object body.
    ///
    /// Fails with [`StorageError::FileNotFound`] if the object was removed
    /// after the handle was created.
    pub fn read(&self) -> Result<FileBody, StorageError> {
        let data = self
            .store
            .get_object(&self.bucket, &self.path)
            .map_err(|e| StorageError::from_remote("read", e))?;
        match self.mode {
            OpenMode::Binary => Ok(FileBody::Binary(data)),
            OpenMode::Text => String::from_utf8(data.to_vec())
                .map(FileBody::Text)
                .map_err(|e| StorageError::unavailable("read", format!("{} is not UTF-8: {e}", self.path))),
        }
    }
}

/// Watches a prefix and reports changes between refreshes.
pub struct StorageAdapter {
    reader: DirectoryReader,
    prefix: String,
    state: AdapterDiffState,
    last_diff: SnapshotDiff,
}

impl StorageAdapter {
    /// Create an adapter over `prefix`, capturing the baseline listing.
    pub fn new(
        store: Arc<dyn RemoteStore>,
        bucket: impl Into<String>,
        prefix: impl Into<String>,
        max_pages: u32,
    ) -> Result<Self, StorageError> {
        let reader = DirectoryReader::new(store, bucket, max_pages);
        let prefix = prefix.into();
        let state = Self::list_state(&reader, &prefix)?;
        debug!(
            bucket = reader.bucket(),
            prefix = %prefix,
            keys = state.len(),
            "adapter baseline captured"
        );
        Ok(Self {
            last_diff: SnapshotDiff::baseline(&state),
            reader,
            prefix,
            state,
        })
    }

    fn list_state(reader: &DirectoryReader, prefix: &str) -> Result<AdapterDiffState, StorageError> {
        reader
            .iter(prefix)
            .map(|entry| entry.map(|meta| (meta.key.clone(), meta.modified_micros())))
            .collect()
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn bucket(&self) -> &str {
        self.reader.bucket()
    }

    /// Current diff state (the listing as of the last refresh).
    pub fn state(&self) -> &AdapterDiffState {
        &self.state
    }

    /// Diff returned by the last refresh, or the baseline before any.
    pub fn last_diff(&self) -> &SnapshotDiff {
        &self.last_diff
    }

    /// Re-list the prefix and return what changed since the last call.
    ///
    /// On error the stored state is left untouched.
    pub fn refresh(&mut self) -> Result<SnapshotDiff, StorageError> {
        let current = Self::list_state(&self.reader, &self.prefix)?;
        let changes = diff(&self.state, &current);
        debug!(
            prefix = %self.prefix,
            new = changes.new.len(),
            removed = changes.removed.len(),
            modified = changes.modified.len(),
            "adapter refreshed"
        );
        self.state = current;
        self.last_diff = changes.clone();
        Ok(changes)
    }

    /// Open `key` for reading.  Existence is checked now, not at read time.
    pub fn open(&self, key: &str, mode: OpenMode) -> Result<FileHandle, StorageError> {
        let meta = self
            .reader
            .store()
            .head_object(self.reader.bucket(), key)
            .map_err(|e| StorageError::from_remote("open", e))?
            .ok_or_else(|| StorageError::FileNotFound {
                key: key.to_string(),
            })?;
        Ok(FileHandle::from_meta(
            Arc::clone(self.reader.store()),
            self.reader.bucket(),
            meta,
            mode,
        ))
    }

    /// Lazily yield a handle for every key under the prefix matching
    /// `pattern`.
    ///
    /// Shell-style wildcards are matched against the full key, and `*`
    /// also matches `/`.  Every call starts a fresh listing.
    pub fn glob(&self, pattern: &str) -> Result<Glob, StorageError> {
        let pattern = compile_pattern(pattern)?;
        Ok(Glob {
            entries: self.reader.iter(&self.prefix),
            pattern,
            store: Arc::clone(self.reader.store()),
            bucket: self.reader.bucket().to_string(),
        })
    }

    /// Metadata-only probe for `path` relative to the prefix.
    pub fn path_exists(&self, path: &str) -> Result<bool, StorageError> {
        let key = join_key(&self.prefix, path);
        let found = self
            .reader
            .store()
            .head_object(self.reader.bucket(), &key)
            .map_err(|e| StorageError::from_remote("path_exists", e))?;
        Ok(found.is_some())
    }
}

/// Iterator returned by [`StorageAdapter::glob`].
pub struct Glob {
    entries: ObjectIter,
    pattern: Pattern,
    store: Arc<dyn RemoteStore>,
    bucket: String,
}

impl std::fmt::Debug for Glob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Glob")
            .field("bucket", &self.bucket)
            .field("pattern", &self.pattern.as_str())
            .finish()
    }
}

impl Iterator for Glob {
    type Item = Result<FileHandle, StorageError>;

    fn next(&mut self) -> Option<Self::Item> {
        for entry in self.entries.by_ref() {
            match entry {
                Ok(meta) if self.pattern.matches(&meta.key) => {
                    return Some(Ok(FileHandle::from_meta(
                        Arc::clone(&self.store),
                        &self.bucket,
                        meta,
                        OpenMode::default(),
                    )));
                }
                Ok(_) => continue,
                Err(e) => return Some(Err(e)),
            }
        }
        None
    }
}

/// Compile a shell-style wildcard pattern.
///
/// Runs of `*` collapse to one, since a single `*` already crosses `/`.
pub(crate) fn compile_pattern(pattern: &str) -> Result<Pattern, StorageError> {
    let mut collapsed = String::with_capacity(pattern.len());
    for c in pattern.chars() {
        if c == '*' && collapsed.ends_with('*') {
            continue;
        }
        collapsed.push(c);
    }
    Pattern::new(&collapsed).map_err(|e| StorageError::InvalidPattern {
        pattern: pattern.to_string(),
        message: e.to_string(),
    })
}

/// Join a prefix and a relative path with exactly one `/` between them.
fn join_key(prefix: &str, path: &str) -> String {
    if prefix.is_empty() {
        return path.to_string();
    }
    format!(
        "{}/{}",
        prefix.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}
