//! S3-compatible remote store.
//!
//! Wraps the async AWS SDK behind the blocking [`RemoteStore`] trait.  The
//! store owns a small multi-thread Tokio runtime; each trait call spawns
//! the SDK future onto it and parks the calling thread until the result
//! comes back over a channel.  This works from plain threads and from
//! `spawn_blocking` workers alike, and never touches the caller's runtime.
//!
//! Works against AWS S3 and S3-compatible services (Ceph RGW, MinIO).
//! Path-style addressing is the default since most self-hosted gateways
//! need it.

use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{
    BucketLocationConstraint, CreateBucketConfiguration, Delete, ObjectIdentifier,
};
use aws_sdk_s3::Client;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::mpsc;
use std::time::Duration;
use tokio::runtime::{Builder as TokioBuilder, Handle, Runtime};
use tracing::{debug, info};

use super::backend::{ListPage, ObjectMeta, RemoteError, RemoteStore, MAX_DELETE_BATCH};
use crate::config::S3Settings;

/// Blocking S3 client.
pub struct S3Store {
    client: Client,
    /// Sent with `CreateBucket` only when configured.
    location_constraint: Option<String>,
    handle: Handle,
    /// Held so the runtime lives as long as the store.  Taken on drop.
    runtime: Option<Runtime>,
}

impl S3Store {
    /// Build the SDK client from `settings`.
    ///
    /// Blocks the calling thread while the SDK configuration loads.  Call
    /// it once at startup and share the result.
    pub fn connect(settings: &S3Settings) -> anyhow::Result<Self> {
        let runtime = TokioBuilder::new_multi_thread()
            .worker_threads(settings.runtime_threads.max(1))
            .thread_name("stowage-s3")
            .enable_all()
            .build()?;
        let handle = runtime.handle().clone();

        let endpoint = settings.endpoint_url.trim().trim_end_matches('/').to_string();
        let region = settings.region.clone();

        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(region.clone()))
            .retry_config(
                aws_config::retry::RetryConfig::standard()
                    .with_max_attempts(settings.max_attempts.max(1)),
            )
            .timeout_config(
                aws_config::timeout::TimeoutConfig::builder()
                    .connect_timeout(Duration::from_secs(5))
                    .operation_timeout(Duration::from_secs(settings.operation_timeout_secs))
                    .build(),
            );

        if !endpoint.is_empty() {
            loader = loader.endpoint_url(&endpoint);
        }

        // Explicit credentials win over the default provider chain.
        if !settings.access_key.is_empty() && !settings.secret_key.is_empty() {
            let creds = aws_sdk_s3::config::Credentials::new(
                &settings.access_key,
                &settings.secret_key,
                None,
                None,
                "stowage-config",
            );
            loader = loader.credentials_provider(creds);
        }

        let sdk_config = run_on(&handle, async move { Ok(loader.load().await) })
            .map_err(|e| anyhow::anyhow!("loading S3 configuration: {e}"))?;

        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(settings.use_path_style)
            .build();

        info!(
            "S3 store initialized: endpoint='{}' region={} path_style={}",
            endpoint, region, settings.use_path_style
        );

        Ok(Self {
            client: Client::from_conf(s3_config),
            location_constraint: settings
                .location_constraint
                .as_deref()
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(str::to_string),
            handle,
            runtime: Some(runtime),
        })
    }

    /// Run an SDK future on the store's runtime and wait for it.
    fn block_on<F, T>(&self, fut: F) -> Result<T, RemoteError>
    where
        F: Future<Output = Result<T, RemoteError>> + Send + 'static,
        T: Send + 'static,
    {
        run_on(&self.handle, fut)
    }
}

impl Drop for S3Store {
    fn drop(&mut self) {
        // `shutdown_background` does not block, so dropping the store from
        // inside an async context is fine.
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

/// Spawn `fut` on `handle` and block the current thread until it finishes.
fn run_on<F, T>(handle: &Handle, fut: F) -> Result<T, RemoteError>
where
    F: Future<Output = Result<T, RemoteError>> + Send + 'static,
    T: Send + 'static,
{
    let (tx, rx) = mpsc::sync_channel(1);
    handle.spawn(async move {
        let _ = tx.send(fut.await);
    });
    rx.recv()
        .map_err(|_| RemoteError::service("runtime", "S3 runtime task was dropped"))?
}

/// Map an SDK error to a [`RemoteError`] with the full error chain.
fn sdk_error<E>(operation: &'static str, err: E) -> RemoteError
where
    E: std::error::Error,
{
    RemoteError::service(operation, DisplayErrorContext(&err))
}

/// `CreateBucket` body for an explicit location constraint.  Without one
/// the request carries no body and the service picks its default
/// placement, which is what Ceph RGW zonegroups expect.
fn bucket_configuration(constraint: Option<&str>) -> Option<CreateBucketConfiguration> {
    constraint.map(|c| {
        CreateBucketConfiguration::builder()
            .location_constraint(BucketLocationConstraint::from(c))
            .build()
    })
}

fn to_chrono(ts: Option<&aws_sdk_s3::primitives::DateTime>) -> DateTime<Utc> {
    ts.and_then(|t| DateTime::from_timestamp(t.secs(), t.subsec_nanos()))
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

impl RemoteStore for S3Store {
    fn head_bucket(&self, bucket: &str) -> Result<bool, RemoteError> {
        let client = self.client.clone();
        let bucket = bucket.to_string();
        self.block_on(async move {
            debug!("S3 head_bucket: bucket={}", bucket);
            match client.head_bucket().bucket(&bucket).send().await {
                Ok(_) => Ok(true),
                Err(e) => {
                    let service_err = e.into_service_error();
                    if service_err.is_not_found() {
                        Ok(false)
                    } else {
                        Err(sdk_error("head_bucket", service_err))
                    }
                }
            }
        })
    }

    fn create_bucket(&self, bucket: &str) -> Result<(), RemoteError> {
        let client = self.client.clone();
        let bucket = bucket.to_string();
        let configuration = bucket_configuration(self.location_constraint.as_deref());
        self.block_on(async move {
            debug!(
                "S3 create_bucket: bucket={} configuration={:?}",
                bucket, configuration
            );
            match client
                .create_bucket()
                .bucket(&bucket)
                .set_create_bucket_configuration(configuration)
                .send()
                .await
            {
                Ok(_) => Ok(()),
                Err(e) => {
                    let service_err = e.into_service_error();
                    if service_err.is_bucket_already_exists()
                        || service_err.is_bucket_already_owned_by_you()
                    {
                        Err(RemoteError::BucketAlreadyExists(bucket))
                    } else {
                        Err(sdk_error("create_bucket", service_err))
                    }
                }
            }
        })
    }

    fn list_page(
        &self,
        bucket: &str,
        prefix: &str,
        continuation: Option<&str>,
    ) -> Result<ListPage, RemoteError> {
        let client = self.client.clone();
        let bucket = bucket.to_string();
        let prefix = prefix.to_string();
        let continuation = continuation.map(str::to_string);
        self.block_on(async move {
            debug!(
                "S3 list_objects_v2: bucket={} prefix='{}' token={:?}",
                bucket, prefix, continuation
            );
            let mut req = client.list_objects_v2().bucket(&bucket);
            if !prefix.is_empty() {
                req = req.prefix(&prefix);
            }
            let resp = req
                .set_continuation_token(continuation)
                .send()
                .await
                .map_err(|e| {
                    let service_err = e.into_service_error();
                    if service_err.is_no_such_bucket() {
                        RemoteError::NoSuchBucket(bucket.clone())
                    } else {
                        sdk_error("list_objects_v2", service_err)
                    }
                })?;

            let objects = resp
                .contents()
                .iter()
                .filter_map(|obj| {
                    obj.key().map(|key| ObjectMeta {
                        key: key.to_string(),
                        etag: obj.e_tag().unwrap_or_default().to_string(),
                        last_modified: to_chrono(obj.last_modified()),
                        size: obj.size().unwrap_or(0).max(0) as u64,
                    })
                })
                .collect();

            let next_continuation = if resp.is_truncated() == Some(true) {
                resp.next_continuation_token().map(str::to_string)
            } else {
                None
            };

            Ok(ListPage {
                objects,
                next_continuation,
            })
        })
    }

    fn head_object(&self, bucket: &str, key: &str) -> Result<Option<ObjectMeta>, RemoteError> {
        let client = self.client.clone();
        let bucket = bucket.to_string();
        let key = key.to_string();
        self.block_on(async move {
            debug!("S3 head_object: bucket={} key={}", bucket, key);
            match client.head_object().bucket(&bucket).key(&key).send().await {
                Ok(resp) => Ok(Some(ObjectMeta {
                    etag: resp.e_tag().unwrap_or_default().to_string(),
                    last_modified: to_chrono(resp.last_modified()),
                    size: resp.content_length().unwrap_or(0).max(0) as u64,
                    key,
                })),
                Err(e) => {
                    let service_err = e.into_service_error();
                    if service_err.is_not_found() {
                        Ok(None)
                    } else {
                        Err(sdk_error("head_object", service_err))
                    }
                }
            }
        })
    }

    fn get_object(&self, bucket: &str, key: &str) -> Result<Bytes, RemoteError> {
        let client = self.client.clone();
        let bucket = bucket.to_string();
        let key = key.to_string();
        self.block_on(async move {
            debug!("S3 get_object: bucket={} key={}", bucket, key);
            let resp = client
                .get_object()
                .bucket(&bucket)
                .key(&key)
                .send()
                .await
                .map_err(|e| {
                    let service_err = e.into_service_error();
                    if service_err.is_no_such_key() {
                        RemoteError::NoSuchKey(key.clone())
                    } else {
                        sdk_error("get_object", service_err)
                    }
                })?;

            let body = resp
                .body
                .collect()
                .await
                .map_err(|e| sdk_error("get_object body", e))?;
            Ok(body.into_bytes())
        })
    }

    fn put_object(&self, bucket: &str, key: &str, data: Bytes) -> Result<String, RemoteError> {
        let client = self.client.clone();
        let bucket = bucket.to_string();
        let key = key.to_string();
        self.block_on(async move {
            debug!(
                "S3 put_object: bucket={} key={} bytes={}",
                bucket,
                key,
                data.len()
            );
            let resp = client
                .put_object()
                .bucket(&bucket)
                .key(&key)
                .body(ByteStream::from(data))
                .send()
                .await
                .map_err(|e| sdk_error("put_object", e.into_service_error()))?;
            Ok(resp.e_tag().unwrap_or_default().to_string())
        })
    }

    fn delete_object(&self, bucket: &str, key: &str) -> Result<(), RemoteError> {
        let client = self.client.clone();
        let bucket = bucket.to_string();
        let key = key.to_string();
        self.block_on(async move {
            debug!("S3 delete_object: bucket={} key={}", bucket, key);
            // S3 delete_object is idempotent -- no error for missing keys.
            client
                .delete_object()
                .bucket(&bucket)
                .key(&key)
                .send()
                .await
                .map_err(|e| sdk_error("delete_object", e.into_service_error()))?;
            Ok(())
        })
    }

    fn delete_objects(&self, bucket: &str, keys: &[String]) -> Result<(), RemoteError> {
        if keys.is_empty() {
            return Ok(());
        }
        if keys.len() > MAX_DELETE_BATCH {
            return Err(RemoteError::service(
                "delete_objects",
                format!("batch of {} exceeds {MAX_DELETE_BATCH} keys", keys.len()),
            ));
        }

        let client = self.client.clone();
        let bucket = bucket.to_string();
        let keys = keys.to_vec();
        self.block_on(async move {
            debug!("S3 delete_objects: bucket={} keys={}", bucket, keys.len());
            let objects = keys
                .iter()
                .map(|k| ObjectIdentifier::builder().key(k).build())
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| sdk_error("delete_objects build", e))?;

            let delete = Delete::builder()
                .set_objects(Some(objects))
                .quiet(true)
                .build()
                .map_err(|e| sdk_error("delete_objects build", e))?;

            let resp = client
                .delete_objects()
                .bucket(&bucket)
                .delete(delete)
                .send()
                .await
                .map_err(|e| sdk_error("delete_objects", e.into_service_error()))?;

            // Quiet mode only reports failures.
            if let Some(first) = resp.errors().first() {
                return Err(RemoteError::service(
                    "delete_objects",
                    format!(
                        "{} of {} keys failed, first {}: {}",
                        resp.errors().len(),
                        keys.len(),
                        first.key().unwrap_or_default(),
                        first.message().unwrap_or_default()
                    ),
                ));
            }
            Ok(())
        })
    }
}

// -- Tests -------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_chrono_converts_seconds_and_nanos() {
        let ts = aws_sdk_s3::primitives::DateTime::from_secs_and_nanos(1_700_000_000, 123_456_000);
        let converted = to_chrono(Some(&ts));
        assert_eq!(converted.timestamp(), 1_700_000_000);
        assert_eq!(converted.timestamp_subsec_micros(), 123_456);
    }

    #[test]
    fn test_bucket_configuration_only_when_constrained() {
        assert!(bucket_configuration(None).is_none());

        let configuration = bucket_configuration(Some("eu-west-1")).unwrap();
        assert_eq!(
            configuration.location_constraint().map(|c| c.as_str()),
            Some("eu-west-1")
        );
    }

    #[test]
    fn test_to_chrono_missing_timestamp() {
        assert_eq!(to_chrono(None), DateTime::<Utc>::UNIX_EPOCH);
    }

    #[test]
    fn test_run_on_returns_result_from_plain_thread() {
        let runtime = TokioBuilder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .unwrap();
        let value = run_on(runtime.handle(), async { Ok::<_, RemoteError>(42) }).unwrap();
        assert_eq!(value, 42);
        runtime.shutdown_background();
    }

    #[test]
    fn test_run_on_propagates_errors() {
        let runtime = TokioBuilder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .unwrap();
        let err = run_on(runtime.handle(), async {
            Err::<(), _>(RemoteError::NoSuchKey("k".into()))
        })
        .unwrap_err();
        assert!(matches!(err, RemoteError::NoSuchKey(_)));
        runtime.shutdown_background();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_run_on_from_blocking_worker() {
        let runtime = TokioBuilder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .unwrap();
        let handle = runtime.handle().clone();
        let value = tokio::task::spawn_blocking(move || {
            run_on(&handle, async {
                tokio::time::sleep(Duration::from_millis(5)).await;
                Ok::<_, RemoteError>("done")
            })
        })
        .await
        .unwrap()
        .unwrap();
        assert_eq!(value, "done");
        runtime.shutdown_background();
    }
}
