//! Fallback Worker: replays `STREAM_FALLBACK` once the breaker has been
//! stably `Closed` for `FALLBACK_REPLAY_STABLE_MS` (§4.5 C6)

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::core::constants::{DEFAULT_WORKER_BATCH_SIZE, FALLBACK_REPLAY_STABLE_MS, STREAM_FALLBACK};
use crate::data::streams::StreamFabric;
use crate::data::traits::MessageRepository;

use super::super::circuit_breaker::CircuitBreaker;
use super::process::{Outcome, process_entry};

const FALLBACK_CONSUMER: &str = "fallback-worker";
const FALLBACK_SCAN_INTERVAL_MS: u64 = 1_000;

/// Fallback entries are the same intents already staged on the WAL; this
/// worker exists purely as a second chance in case the WAL copy was lost
/// (e.g. it was trimmed under load before the WAL Worker reached it). It
/// stays idle whenever the breaker hasn't been healthy for long enough to
/// trust a burst of re-attempts won't immediately retrip it.
pub fn spawn_fallback_worker(
    streams: Arc<StreamFabric>,
    messages: Arc<dyn MessageRepository>,
    breaker: Arc<CircuitBreaker>,
    max_retries: u32,
    base_delay_ms: u64,
    mut shutdown_rx: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let group = streams.manager().consumer_group().to_string();
        let mut interval = tokio::time::interval(Duration::from_millis(FALLBACK_SCAN_INTERVAL_MS));
        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        tracing::debug!("fallback worker shutting down");
                        break;
                    }
                }
                _ = interval.tick() => {
                    let stable = breaker
                        .closed_stable_for()
                        .is_some_and(|d| d.as_millis() as u64 >= FALLBACK_REPLAY_STABLE_MS);
                    if !stable {
                        continue;
                    }

                    let leased = streams
                        .manager()
                        .backend()
                        .read_group(STREAM_FALLBACK, &group, FALLBACK_CONSUMER, DEFAULT_WORKER_BATCH_SIZE, 0)
                        .await;

                    match leased {
                        Ok(entries) => {
                            for entry in &entries {
                                let outcome = process_entry(
                                    entry, STREAM_FALLBACK, &messages, &breaker, &streams, max_retries, base_delay_ms,
                                ).await;
                                if matches!(outcome, Outcome::NotDue) {
                                    continue;
                                }
                                if let Err(e) = streams.manager().backend().ack(STREAM_FALLBACK, &group, &entry.id).await {
                                    tracing::warn!(error = %e, id = %entry.id, "failed to ack fallback entry");
                                }
                                if let Err(e) = streams.manager().backend().del(STREAM_FALLBACK, &entry.id).await {
                                    tracing::warn!(error = %e, id = %entry.id, "failed to delete fallback entry");
                                }
                            }
                        }
                        Err(e) => tracing::warn!(error = %e, "fallback scan failed"),
                    }
                }
            }
        }
    })
}
