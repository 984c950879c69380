//! DLQ Reader: terminal storage for exhausted entries, surfaced to
//! operators rather than retried automatically (§4.5 C7)

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::core::constants::{DEFAULT_WORKER_BATCH_SIZE, STREAM_DLQ};
use crate::data::streams::StreamFabric;

use super::super::wal_entry::DlqEntry;

const DLQ_POLL_INTERVAL_MS: u64 = 30_000;

/// Spawns the task that periodically summarises `STREAM_DLQ` depth and logs
/// the most recent entries' reasons. Entries are never acked or deleted
/// here — the DLQ is terminal storage; clearing it is an operator action.
pub fn spawn_dlq_reader(streams: Arc<StreamFabric>, mut shutdown_rx: watch::Receiver<bool>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let group = streams.manager().consumer_group().to_string();
        let mut interval = tokio::time::interval(Duration::from_millis(DLQ_POLL_INTERVAL_MS));
        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        tracing::debug!("DLQ reader shutting down");
                        break;
                    }
                }
                _ = interval.tick() => {
                    match streams.manager().backend().pending_summary(STREAM_DLQ, &group).await {
                        Ok(summary) if summary.length > 0 => {
                            tracing::warn!(
                                length = summary.length,
                                "dead-letter queue has entries awaiting operator review"
                            );
                            if let Ok(entries) = streams
                                .manager()
                                .backend()
                                .read_range(STREAM_DLQ, "-", "+", DEFAULT_WORKER_BATCH_SIZE)
                                .await
                            {
                                for entry in entries.iter().rev().take(5) {
                                    if let Ok(dlq) = DlqEntry::from_entry(entry) {
                                        tracing::warn!(
                                            message_id = %dlq.data.message_id,
                                            attempt = dlq.attempt,
                                            reason = %dlq.reason,
                                            "DLQ entry"
                                        );
                                    }
                                }
                            }
                        }
                        Ok(_) => {}
                        Err(e) => tracing::warn!(error = %e, "failed to read DLQ summary"),
                    }
                }
            }
        }
    })
}
