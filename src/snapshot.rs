//! Bucket snapshots and snapshot diffs.
//!
//! A [`Snapshot`] is an immutable `key -> fingerprint` map captured by one
//! full listing.  [`diff`] classifies every key of two snapshots into
//! exactly one of new, removed, modified, or unchanged.
//!
//! The fingerprint type is generic: facade snapshots use ETags, the
//! change-tracking adapter uses last-modified stamps in microseconds.

use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fmt;

use crate::errors::StorageError;
use crate::listing::DirectoryReader;

/// Opaque content fingerprint (an ETag).
pub type Fingerprint = String;

/// Immutable point-in-time mapping from object key to fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Snapshot<F = Fingerprint> {
    entries: HashMap<String, F>,
}

impl<F> Default for Snapshot<F> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<F> Snapshot<F> {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&F> {
        self.entries.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Keys in lexicographic order.
    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &F)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl<F> FromIterator<(String, F)> for Snapshot<F> {
    fn from_iter<I: IntoIterator<Item = (String, F)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

impl<F> fmt::Display for Snapshot<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Snapshot({})", self.keys().join(", "))
    }
}

/// Classification of keys between an older and a newer snapshot.
///
/// The four sets are pairwise disjoint and together cover every key of
/// both snapshots.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SnapshotDiff {
    /// In the newer snapshot only.
    pub new: HashSet<String>,
    /// In the older snapshot only.
    pub removed: HashSet<String>,
    /// In both, with different fingerprints.
    pub modified: HashSet<String>,
    /// In both, with equal fingerprints.
    pub unchanged: HashSet<String>,
}

impl SnapshotDiff {
    /// A diff that reports every key of `snapshot` as unchanged.
    pub fn baseline<F>(snapshot: &Snapshot<F>) -> Self {
        Self {
            unchanged: snapshot.entries.keys().cloned().collect(),
            ..Self::default()
        }
    }

    /// True when nothing was added, removed, or modified.
    pub fn is_empty(&self) -> bool {
        self.new.is_empty() && self.removed.is_empty() && self.modified.is_empty()
    }

    /// Number of keys that changed in any way.
    pub fn changed(&self) -> usize {
        self.new.len() + self.removed.len() + self.modified.len()
    }
}

/// Compute the difference between `old` and `new`.
///
/// Pure: the same inputs always produce the same output.
pub fn diff<F: PartialEq>(old: &Snapshot<F>, new: &Snapshot<F>) -> SnapshotDiff {
    let mut out = SnapshotDiff::default();

    for (key, fingerprint) in &new.entries {
        match old.entries.get(key) {
            None => {
                out.new.insert(key.clone());
            }
            Some(previous) if previous != fingerprint => {
                out.modified.insert(key.clone());
            }
            Some(_) => {
                out.unchanged.insert(key.clone());
            }
        }
    }

    for key in old.entries.keys() {
        if !new.entries.contains_key(key) {
            out.removed.insert(key.clone());
        }
    }

    out
}

/// Capture an ETag snapshot of everything under `prefix` with one listing.
pub fn capture(reader: &DirectoryReader, prefix: &str) -> Result<Snapshot, StorageError> {
    reader
        .iter(prefix)
        .map(|entry| entry.map(|meta| (meta.key, meta.etag)))
        .collect()
}
