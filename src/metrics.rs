//! Prometheus metrics for stowage.
//!
//! Installs a global Prometheus recorder using `metrics-exporter-prometheus`
//! and defines the metric name constants recorded by the worker pool, the
//! facade, and the snapshot debouncer.  Without an installed recorder the
//! `metrics` macros are no-ops, which is what library users and tests get.

use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::sync::OnceLock;

// -- Metric name constants ----------------------------------------------------

/// Total storage operations (counter). Labels: operation, status.
pub const STORAGE_OPERATIONS_TOTAL: &str = "stowage_storage_operations_total";

/// Storage operation duration in seconds (histogram). Labels: operation.
pub const STORAGE_OPERATION_DURATION_SECONDS: &str = "stowage_storage_operation_duration_seconds";

/// Blocking calls currently running on the worker pool (gauge).
pub const WORKER_POOL_IN_FLIGHT: &str = "stowage_worker_pool_in_flight";

/// Wait-and-compare rounds needed per debounced snapshot (histogram).
pub const SNAPSHOT_DEBOUNCE_ROUNDS: &str = "stowage_snapshot_debounce_rounds";

/// Total bytes written through the facade (counter).
pub const BYTES_WRITTEN_TOTAL: &str = "stowage_bytes_written_total";

/// Total bytes read through the facade (counter).
pub const BYTES_READ_TOTAL: &str = "stowage_bytes_read_total";

// -- Global recorder installation ---------------------------------------------

/// Singleton handle to the Prometheus recorder.
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the global Prometheus metrics recorder. Idempotent -- safe to call
/// multiple times. Returns a reference to the global handle.
pub fn init_metrics() -> &'static PrometheusHandle {
    PROMETHEUS_HANDLE.get_or_init(|| {
        PrometheusBuilder::new()
            .install_recorder()
            .expect("failed to install Prometheus recorder")
    })
}

/// Install the recorder and serve `/metrics` on `addr`.
///
/// Must be called from within a Tokio runtime.
pub fn serve_metrics(addr: SocketAddr) -> anyhow::Result<()> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| anyhow::anyhow!("failed to start metrics listener on {addr}: {e}"))
}

/// Register metric descriptions with the global recorder. Call once after
/// installing a recorder.
pub fn describe_metrics() {
    describe_counter!(STORAGE_OPERATIONS_TOTAL, "Total storage operations by type");
    describe_histogram!(
        STORAGE_OPERATION_DURATION_SECONDS,
        "Storage operation duration in seconds"
    );
    describe_gauge!(WORKER_POOL_IN_FLIGHT, "Blocking storage calls in flight");
    describe_histogram!(
        SNAPSHOT_DEBOUNCE_ROUNDS,
        "Wait-and-compare rounds per debounced snapshot"
    );
    describe_counter!(BYTES_WRITTEN_TOTAL, "Total bytes written to object storage");
    describe_counter!(BYTES_READ_TOTAL, "Total bytes read from object storage");
}

// -- Tests --------------------------------------------------------------------
