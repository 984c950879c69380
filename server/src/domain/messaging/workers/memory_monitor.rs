//! Memory Monitor: polls technical-stream backlog and raises warning/
//! critical alerts against the configured memory budget (§4.5 C7)
//!
//! The original design polls the stream backend's own memory usage
//! directly; `StreamBackend` doesn't expose that (it would tie every
//! implementor, including the in-memory test backend, to a Redis-specific
//! `INFO memory` call). Instead this estimates pressure from the combined
//! backlog of the technical streams, which is what actually grows
//! unbounded when the primary store is degraded — the scenario this
//! monitor exists to catch.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::core::constants::{
    MEMORY_CRITICAL_FRACTION, MEMORY_MONITOR_INTERVAL_MS, MEMORY_WARNING_FRACTION, STREAM_DLQ,
    STREAM_FALLBACK, STREAM_RETRY, STREAM_WAL,
};
use crate::data::streams::StreamFabric;

/// Rough per-entry size used to turn a backlog entry count into an
/// estimated byte figure comparable against `MemoryConfig.budget_bytes`.
const ASSUMED_BYTES_PER_ENTRY: u64 = 1024;

/// Spawns the task that polls technical-stream backlog every
/// `MEMORY_MONITOR_INTERVAL_MS` and logs a warning/critical alert once the
/// estimated backlog size crosses the configured budget fractions.
pub fn spawn_memory_monitor(
    streams: Arc<StreamFabric>,
    budget_bytes: u64,
    mut shutdown_rx: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let group = streams.manager().consumer_group().to_string();
        let mut interval = tokio::time::interval(Duration::from_millis(MEMORY_MONITOR_INTERVAL_MS));
        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        tracing::debug!("memory monitor shutting down");
                        break;
                    }
                }
                _ = interval.tick() => {
                    let mut backlog = 0u64;
                    for stream in [STREAM_WAL, STREAM_RETRY, STREAM_FALLBACK, STREAM_DLQ] {
                        match streams.manager().backend().pending_summary(stream, &group).await {
                            Ok(summary) => backlog += summary.length,
                            Err(e) => tracing::debug!(stream, error = %e, "pending_summary failed"),
                        }
                    }

                    let estimated_bytes = backlog.saturating_mul(ASSUMED_BYTES_PER_ENTRY);
                    let warning_bytes = (budget_bytes as f64 * MEMORY_WARNING_FRACTION) as u64;
                    let critical_bytes = (budget_bytes as f64 * MEMORY_CRITICAL_FRACTION) as u64;

                    if estimated_bytes >= critical_bytes {
                        tracing::error!(estimated_bytes, budget_bytes, backlog, "memory budget critical");
                    } else if estimated_bytes >= warning_bytes {
                        tracing::warn!(estimated_bytes, budget_bytes, backlog, "memory budget warning");
                    }
                }
            }
        }
    })
}
