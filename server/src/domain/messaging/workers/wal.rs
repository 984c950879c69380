//! WAL Worker: continuously drains `STREAM_WAL` (§4.5 C4)

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::core::constants::{DEADLINE_STREAM_READ_MS, DEFAULT_WORKER_BATCH_SIZE, STREAM_WAL};
use crate::data::streams::StreamFabric;
use crate::data::traits::MessageRepository;

use super::super::circuit_breaker::CircuitBreaker;
use super::process::{Outcome, process_entry};

const WAL_CONSUMER: &str = "wal-worker";

/// Spawns the task that leases `STREAM_WAL` entries as they arrive and
/// processes them through the shared WAL/Retry contract, escalating
/// failures to Retry or DLQ. Runs continuously rather than on a timer: the
/// WAL is only fed by publish-time failures, so a blocking read is enough
/// to stay idle between bursts.
pub fn spawn_wal_worker(
    streams: Arc<StreamFabric>,
    messages: Arc<dyn MessageRepository>,
    breaker: Arc<CircuitBreaker>,
    max_retries: u32,
    base_delay_ms: u64,
    mut shutdown_rx: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let group = streams.manager().consumer_group().to_string();
        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        tracing::debug!("WAL worker shutting down");
                        break;
                    }
                }
                leased = streams.manager().backend().read_group(
                    STREAM_WAL, &group, WAL_CONSUMER, DEFAULT_WORKER_BATCH_SIZE, DEADLINE_STREAM_READ_MS,
                ) => {
                    match leased {
                        Ok(entries) => {
                            for entry in &entries {
                                let outcome = process_entry(
                                    entry, STREAM_WAL, &messages, &breaker, &streams, max_retries, base_delay_ms,
                                ).await;
                                if matches!(outcome, Outcome::NotDue) {
                                    continue;
                                }
                                if let Err(e) = streams.manager().backend().ack(STREAM_WAL, &group, &entry.id).await {
                                    tracing::warn!(error = %e, id = %entry.id, "failed to ack WAL entry");
                                }
                                if let Err(e) = streams.manager().backend().del(STREAM_WAL, &entry.id).await {
                                    tracing::warn!(error = %e, id = %entry.id, "failed to delete WAL entry");
                                }
                            }
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "WAL read_group failed, backing off");
                            tokio::time::sleep(Duration::from_millis(base_delay_ms)).await;
                        }
                    }
                }
            }
        }
    })
}
