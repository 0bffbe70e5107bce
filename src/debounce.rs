//! Debounced snapshot acquisition.
//!
//! Listings of an eventually-consistent store can catch writes half-way.
//! [`settle`] captures a snapshot, waits, captures again, and only trusts
//! the result once two consecutive captures agree.  The loop is bounded
//! by `max_rounds`: a bucket that never stops changing yields the latest
//! capture (logged as a warning), or `ExhaustedRetries` when
//! `fail_on_churn` is set.

use std::future::Future;

use metrics::histogram;
use tracing::{debug, warn};

use crate::config::DebounceConfig;
use crate::errors::StorageError;
use crate::metrics::SNAPSHOT_DEBOUNCE_ROUNDS;
use crate::snapshot::{diff, Snapshot};

/// Outcome of a debounced capture.
#[derive(Debug, Clone)]
pub struct Settled {
    /// The last snapshot captured.
    pub snapshot: Snapshot,
    /// Wait-and-compare rounds performed.
    pub rounds: u32,
    /// Whether the last two captures agreed.
    pub converged: bool,
}

/// Capture snapshots with `capture` until two consecutive ones agree.
pub async fn settle<C, Fut>(config: &DebounceConfig, mut capture: C) -> Result<Settled, StorageError>
where
    C: FnMut() -> Fut,
    Fut: Future<Output = Result<Snapshot, StorageError>>,
{
    let max_rounds = config.max_rounds.max(1);
    let mut current = capture().await?;

    for round in 1..=max_rounds {
        tokio::time::sleep(config.interval()).await;
        let next = capture().await?;
        let changes = diff(&current, &next);
        current = next;

        if changes.is_empty() {
            debug!(round, keys = current.len(), "snapshot settled");
            histogram!(SNAPSHOT_DEBOUNCE_ROUNDS).record(round as f64);
            return Ok(Settled {
                snapshot: current,
                rounds: round,
                converged: true,
            });
        }

        debug!(
            round,
            new = changes.new.len(),
            removed = changes.removed.len(),
            modified = changes.modified.len(),
            "bucket changed during debounce window"
        );
    }

    histogram!(SNAPSHOT_DEBOUNCE_ROUNDS).record(max_rounds as f64);

    if config.fail_on_churn {
        return Err(StorageError::ExhaustedRetries {
            operation: "get_snapshot",
            attempts: max_rounds,
        });
    }

    warn!(
        rounds = max_rounds,
        keys = current.len(),
        "bucket kept changing; returning latest snapshot"
    );
    Ok(Settled {
        snapshot: current,
        rounds: max_rounds,
        converged: false,
    })
}
