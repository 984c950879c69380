//! Retry Worker: scans `STREAM_RETRY` on a fixed interval (§4.5 C5)

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::core::constants::{DEFAULT_WORKER_BATCH_SIZE, STREAM_RETRY};
use crate::data::streams::StreamFabric;
use crate::data::traits::MessageRepository;

use super::super::circuit_breaker::CircuitBreaker;
use super::process::{Outcome, process_entry};

const RETRY_CONSUMER: &str = "retry-worker";

/// Spawns the task that scans `STREAM_RETRY` every `scan_interval_ms`,
/// re-attempting entries whose `nextRetryAt` has elapsed and leaving the
/// rest leased-but-unacked for the next pass.
pub fn spawn_retry_worker(
    streams: Arc<StreamFabric>,
    messages: Arc<dyn MessageRepository>,
    breaker: Arc<CircuitBreaker>,
    max_retries: u32,
    base_delay_ms: u64,
    scan_interval_ms: u64,
    mut shutdown_rx: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let group = streams.manager().consumer_group().to_string();
        let mut interval = tokio::time::interval(Duration::from_millis(scan_interval_ms));
        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        tracing::debug!("retry worker shutting down");
                        break;
                    }
                }
                _ = interval.tick() => {
                    let leased = streams
                        .manager()
                        .backend()
                        .read_group(STREAM_RETRY, &group, RETRY_CONSUMER, DEFAULT_WORKER_BATCH_SIZE, 0)
                        .await;

                    match leased {
                        Ok(entries) => {
                            for entry in &entries {
                                let outcome = process_entry(
                                    entry, STREAM_RETRY, &messages, &breaker, &streams, max_retries, base_delay_ms,
                                ).await;
                                if matches!(outcome, Outcome::NotDue) {
                                    continue;
                                }
                                if let Err(e) = streams.manager().backend().ack(STREAM_RETRY, &group, &entry.id).await {
                                    tracing::warn!(error = %e, id = %entry.id, "failed to ack retry entry");
                                }
                                if let Err(e) = streams.manager().backend().del(STREAM_RETRY, &entry.id).await {
                                    tracing::warn!(error = %e, id = %entry.id, "failed to delete retry entry");
                                }
                            }
                        }
                        Err(e) => tracing::warn!(error = %e, "retry scan failed"),
                    }
                }
            }
        }
    })
}
