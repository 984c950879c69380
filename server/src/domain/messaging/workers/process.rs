//! Shared per-entry contract for the WAL and Retry workers (§4.5)

use std::sync::Arc;

use crate::core::constants::{STREAM_DLQ, STREAM_RETRY};
use crate::data::streams::{StreamEntry, StreamFabric};
use crate::data::traits::MessageRepository;
use crate::utils::crypto::sha256_hex;

use crate::domain::messaging::circuit_breaker::{CircuitBreaker, CircuitResult};
use crate::domain::messaging::envelope::NewMessageEnvelope;
use crate::domain::messaging::wal_entry::{DlqEntry, WalEntry};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Re-persisted (or found already persisted) and the derived event published.
    Persisted,
    /// Skipped: `nextRetryAt` has not elapsed yet. Left unacked.
    NotDue,
    /// Escalated to a new Retry entry; source entry removed.
    Retried,
    /// Exhausted `maxRetries`; moved to DLQ; source entry removed.
    DeadLettered,
    /// `data` failed to parse; source entry removed, never retried (§7 PoisonMessage).
    Malformed,
}

/// Processes one WAL/Retry entry per the shared contract: parse, check due,
/// attempt persistence (deduped via `findByContentHash` so a retried entry
/// that already landed never produces a second stored side-effect, §8 inv. 3),
/// then escalate or publish. The caller is responsible for XACK/XDEL against
/// `source_stream` based on the returned `Outcome` (never acked on `NotDue`).
pub async fn process_entry(
    entry: &StreamEntry,
    source_stream: &'static str,
    messages: &Arc<dyn MessageRepository>,
    breaker: &CircuitBreaker,
    streams: &StreamFabric,
    max_retries: u32,
    base_delay_ms: u64,
) -> Outcome {
    let wal_entry = match WalEntry::from_entry(entry) {
        Ok(e) => e,
        Err(e) => {
            tracing::warn!(stream = source_stream, id = %entry.id, error = %e, "malformed WAL/Retry entry, dropping");
            return Outcome::Malformed;
        }
    };

    let now = chrono::Utc::now().timestamp_millis();
    if !wal_entry.is_due(now) {
        return Outcome::NotDue;
    }

    let content_hash = sha256_hex(&wal_entry.data.content);
    let conversation_id = wal_entry.data.conversation_id.clone();
    let dedup = messages.find_by_content_hash(&conversation_id, &content_hash).await;

    let stored = match dedup {
        Ok(Some(existing)) => Ok(existing),
        Ok(None) => {
            let messages = Arc::clone(messages);
            let to_save = wal_entry.data.clone();
            match breaker.execute(|| async move { messages.save(&to_save).await }).await {
                Ok(stored) => Ok(stored),
                Err(CircuitResult::Open(open)) => Err(format!("circuit open, retry after {}ms", open.retry_after_ms)),
                Err(CircuitResult::Failed(e)) => Err(e.to_string()),
            }
        }
        Err(e) => Err(e.to_string()),
    };

    match stored {
        Ok(stored) => {
            let envelope = NewMessageEnvelope::from_message(&stored, wal_entry.sender_name.clone(), wal_entry.participants.clone());
            match envelope.into_fields() {
                Ok(fields) => {
                    if let Err(e) = streams.manager().append(&wal_entry.target_stream, fields).await {
                        tracing::warn!(error = %e, "failed to publish NEW_MESSAGE after WAL/Retry persistence");
                    }
                }
                Err(e) => tracing::warn!(error = %e, "failed to encode NEW_MESSAGE envelope"),
            }
            Outcome::Persisted
        }
        Err(reason) => {
            if wal_entry.attempt < max_retries {
                let next = wal_entry.next_attempt(base_delay_ms);
                match next.into_fields() {
                    Ok(fields) => {
                        if let Err(e) = streams.manager().append(STREAM_RETRY, fields).await {
                            tracing::error!(error = %e, "failed to append retry entry");
                        }
                    }
                    Err(e) => tracing::error!(error = %e, "failed to encode retry entry"),
                }
                tracing::debug!(attempt = next.attempt, reason, "message persistence failed, escalated to retry");
                Outcome::Retried
            } else {
                let dlq = DlqEntry::from_wal(wal_entry, reason);
                match dlq.into_fields() {
                    Ok(fields) => {
                        if let Err(e) = streams.manager().append(STREAM_DLQ, fields).await {
                            tracing::error!(error = %e, "failed to append DLQ entry");
                        }
                    }
                    Err(e) => tracing::error!(error = %e, "failed to encode DLQ entry"),
                }
                tracing::warn!("message persistence exhausted retries, moved to DLQ");
                Outcome::DeadLettered
            }
        }
    }
}
