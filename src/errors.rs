//! Storage error taxonomy.
//!
//! Every facade and adapter operation returns [`StorageError`].  Errors
//! raised by a [`RemoteStore`](crate::storage::backend::RemoteStore)
//! implementation are never passed through as-is; they are translated
//! with [`StorageError::from_remote`] so callers only ever see the kinds
//! below.

use thiserror::Error;

use crate::storage::backend::RemoteError;

/// Failure kinds surfaced by the storage layer.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The requested key does not exist in the bucket.
    #[error("object {key} does not exist")]
    FileNotFound { key: String },

    /// Transport, authentication, or remote service failure.  Not retried
    /// internally; callers pick their own retry policy.
    #[error("storage unavailable during {operation}: {message}")]
    StorageUnavailable {
        operation: &'static str,
        message: String,
    },

    /// Bucket bootstrap failed for a reason other than pre-existence.
    #[error("failed to create bucket {bucket}: {message}")]
    BucketCreate { bucket: String, message: String },

    /// A pagination or debounce loop exceeded its bound.
    #[error("{operation} did not settle after {attempts} attempts")]
    ExhaustedRetries {
        operation: &'static str,
        attempts: u32,
    },

    /// A wildcard pattern could not be compiled.
    #[error("invalid pattern {pattern:?}: {message}")]
    InvalidPattern { pattern: String, message: String },
}

impl StorageError {
    /// Translate a remote store error raised while running `operation`.
    ///
    /// `NoSuchKey` becomes [`StorageError::FileNotFound`]; everything else
    /// is reported as [`StorageError::StorageUnavailable`].
    pub fn from_remote(operation: &'static str, err: RemoteError) -> Self {
        match err {
            RemoteError::NoSuchKey(key) => StorageError::FileNotFound { key },
            other => StorageError::StorageUnavailable {
                operation,
                message: other.to_string(),
            },
        }
    }

    /// Shorthand for an unavailability error with a free-form message.
    pub fn unavailable(operation: &'static str, message: impl Into<String>) -> Self {
        StorageError::StorageUnavailable {
            operation,
            message: message.into(),
        }
    }

    /// Stable machine-readable code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            StorageError::FileNotFound { .. } => "FileNotFound",
            StorageError::StorageUnavailable { .. } => "StorageUnavailable",
            StorageError::BucketCreate { .. } => "BucketCreateError",
            StorageError::ExhaustedRetries { .. } => "ExhaustedRetries",
            StorageError::InvalidPattern { .. } => "InvalidPattern",
        }
    }

    /// Whether retrying the whole operation later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StorageError::StorageUnavailable { .. } | StorageError::ExhaustedRetries { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_such_key_maps_to_file_not_found() {
        let err = StorageError::from_remote("read_file", RemoteError::NoSuchKey("a.txt".into()));
        assert!(matches!(err, StorageError::FileNotFound { ref key } if key == "a.txt"));
        assert_eq!(err.code(), "FileNotFound");
        assert!(!err.is_transient());
    }

    #[test]
    fn test_service_error_maps_to_unavailable() {
        let err = StorageError::from_remote(
            "write_file",
            RemoteError::Service {
                operation: "put_object",
                message: "connection refused".into(),
            },
        );
        assert_eq!(err.code(), "StorageUnavailable");
        assert!(err.is_transient());
        assert!(err.to_string().contains("write_file"));
        assert!(err.to_string().contains("connection refused"));
    }

    #[test]
    fn test_missing_bucket_maps_to_unavailable() {
        let err = StorageError::from_remote("exists", RemoteError::NoSuchBucket("photos".into()));
        assert_eq!(err.code(), "StorageUnavailable");
    }

    #[test]
    fn test_codes() {
        let err = StorageError::BucketCreate {
            bucket: "b".into(),
            message: "denied".into(),
        };
        assert_eq!(err.code(), "BucketCreateError");
        assert!(!err.is_transient());

        let err = StorageError::ExhaustedRetries {
            operation: "list_objects",
            attempts: 3,
        };
        assert_eq!(err.code(), "ExhaustedRetries");
        assert!(err.is_transient());
        assert_eq!(err.to_string(), "list_objects did not settle after 3 attempts");
    }
}
