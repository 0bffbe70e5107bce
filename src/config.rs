//! Configuration loading and types for stowage.
//!
//! Configuration is read from a YAML file and deserialized into the
//! [`Config`] struct.  Each subsection governs a different part of the
//! system: the remote store connection, the storage facade, the change
//! tracking adapter, logging, and metrics.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// Remote store connection settings.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Storage facade settings (worker pool, snapshots, listings).
    #[serde(default)]
    pub facade: FacadeConfig,

    /// Change-tracking adapter settings.
    #[serde(default)]
    pub adapter: AdapterConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Observability settings.
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// Remote store configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Backend type: `s3` or `memory`.
    #[serde(default = "default_storage_backend")]
    pub backend: String,

    /// Bucket every facade operation works against.
    #[serde(default = "default_bucket")]
    pub bucket: String,

    /// S3 connection settings, used when `backend` is `s3`.
    #[serde(default)]
    pub s3: S3Settings,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_storage_backend(),
            bucket: default_bucket(),
            s3: S3Settings::default(),
        }
    }
}

/// S3-compatible endpoint configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct S3Settings {
    /// Endpoint URL (e.g. a Ceph RGW or MinIO gateway).  Empty means AWS.
    #[serde(default)]
    pub endpoint_url: String,

    /// Region to sign requests for.
    #[serde(default = "default_region")]
    pub region: String,

    /// Access key (also accepts `access_key_id`).
    #[serde(alias = "access_key_id", default)]
    pub access_key: String,

    /// Secret key (also accepts `secret_access_key`).
    #[serde(alias = "secret_access_key", default)]
    pub secret_key: String,

    /// Force path-style URL addressing.
    #[serde(default = "default_true")]
    pub use_path_style: bool,

    /// SDK-level attempts per request, including the first one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Per-operation timeout in seconds.
    #[serde(default = "default_operation_timeout")]
    pub operation_timeout_secs: u64,

    /// Threads driving the SDK's async I/O.
    #[serde(default = "default_runtime_threads")]
    pub runtime_threads: usize,

    /// `LocationConstraint` sent when creating the bucket.  Unset sends
    /// none, independent of `region`.
    #[serde(default)]
    pub location_constraint: Option<String>,
}

impl Default for S3Settings {
    fn default() -> Self {
        Self {
            endpoint_url: String::new(),
            region: default_region(),
            access_key: String::new(),
            secret_key: String::new(),
            use_path_style: true,
            max_attempts: default_max_attempts(),
            operation_timeout_secs: default_operation_timeout(),
            runtime_threads: default_runtime_threads(),
            location_constraint: None,
        }
    }
}

/// Storage facade configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct FacadeConfig {
    /// Number of blocking remote calls allowed in flight at once.
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,

    /// Upper bound on pages fetched by a single listing.
    #[serde(default = "default_max_list_pages")]
    pub max_list_pages: u32,

    /// Snapshot debounce settings.
    #[serde(default)]
    pub debounce: DebounceConfig,
}

impl Default for FacadeConfig {
    fn default() -> Self {
        Self {
            worker_threads: default_worker_threads(),
            max_list_pages: default_max_list_pages(),
            debounce: DebounceConfig::default(),
        }
    }
}

/// Debounced snapshot settings.
#[derive(Debug, Clone, Deserialize)]
pub struct DebounceConfig {
    /// Wait between two listings, in milliseconds.
    #[serde(default = "default_debounce_interval_ms")]
    pub interval_ms: u64,

    /// Maximum wait-and-compare rounds before giving up on convergence.
    #[serde(default = "default_debounce_max_rounds")]
    pub max_rounds: u32,

    /// Fail with `ExhaustedRetries` instead of returning the latest
    /// snapshot when the bucket keeps changing.
    #[serde(default)]
    pub fail_on_churn: bool,
}

impl DebounceConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl Default for DebounceConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_debounce_interval_ms(),
            max_rounds: default_debounce_max_rounds(),
            fail_on_churn: false,
        }
    }
}

/// Change-tracking adapter configuration.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AdapterConfig {
    /// Key prefix the adapter watches.  Empty watches the whole bucket.
    #[serde(default)]
    pub prefix: String,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: text or json.
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Observability settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilityConfig {
    /// Enable Prometheus metrics collection.
    #[serde(default = "default_true")]
    pub metrics: bool,

    /// Serve `/metrics` on this address (e.g. `0.0.0.0:9102`).
    #[serde(default)]
    pub metrics_listen: Option<String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            metrics: true,
            metrics_listen: None,
        }
    }
}

// -- Defaults ----------------------------------------------------------------

fn default_true() -> bool {
    true
}

fn default_storage_backend() -> String {
    "s3".to_string()
}

fn default_bucket() -> String {
    "stowage".to_string()
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_max_attempts() -> u32 {
    3
}

fn default_operation_timeout() -> u64 {
    60
}

fn default_runtime_threads() -> usize {
    2
}

fn default_worker_threads() -> usize {
    8
}

fn default_max_list_pages() -> u32 {
    10_000
}

fn default_debounce_interval_ms() -> u64 {
    2_000
}

fn default_debounce_max_rounds() -> u32 {
    5
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

// -- Loader ------------------------------------------------------------------

/// Load and parse configuration from a YAML file at `path`.
pub fn load_config<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    let contents = std::fs::read_to_string(path.as_ref())?;
    let config: Config = serde_yaml::from_str(&contents)?;
    Ok(config)
}
