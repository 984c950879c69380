//! Shared WAL/Retry/DLQ/Fallback entry shape (§4.4, §4.5)
//!
//! Every technical stream carries the same envelope: the original intent as
//! JSON, an attempt counter, and the due time for its next retry. Workers
//! only differ in which stream they scan and what they do on success/failure.

use chrono::Utc;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::core::constants::{RETRY_JITTER_FRACTION, DLQ_ERROR_TRUNCATE_BYTES};
use crate::data::streams::{StreamEntry, StreamError, StreamFields, normalize_fields};
use crate::data::types::Message;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalEntry {
    pub data: Message,
    pub attempt: u32,
    pub timestamp: i64,
    pub next_retry_at: i64,
    /// Content stream the derived `NEW_MESSAGE` event must land on once the
    /// message is persisted (private/group/channel).
    pub target_stream: String,
    pub sender_name: String,
    pub participants: Option<Vec<String>>,
}

impl WalEntry {
    pub fn first_attempt(message: Message, target_stream: &str, sender_name: String, participants: Option<Vec<String>>) -> Self {
        let now = Utc::now().timestamp_millis();
        Self {
            data: message,
            attempt: 1,
            timestamp: now,
            next_retry_at: now,
            target_stream: target_stream.to_string(),
            sender_name,
            participants,
        }
    }

    /// Builds the entry for the next retry round, applying
    /// `nextRetryAt = now + base * 2^attempt`, jittered by ±`RETRY_JITTER_FRACTION` (§4.5 point 5).
    pub fn next_attempt(&self, base_delay_ms: u64) -> Self {
        let attempt = self.attempt + 1;
        let base = base_delay_ms as f64 * 2f64.powi(self.attempt as i32);
        let jitter = base * RETRY_JITTER_FRACTION;
        let delay = rand::thread_rng().gen_range((base - jitter)..=(base + jitter));
        let now = Utc::now().timestamp_millis();
        Self {
            data: self.data.clone(),
            attempt,
            timestamp: now,
            next_retry_at: now + delay.max(0.0) as i64,
            target_stream: self.target_stream.clone(),
            sender_name: self.sender_name.clone(),
            participants: self.participants.clone(),
        }
    }

    pub fn is_due(&self, now_ms: i64) -> bool {
        self.next_retry_at <= now_ms
    }

    pub fn into_fields(&self) -> Result<StreamFields, StreamError> {
        let data = serde_json::to_string(self).map_err(|e| StreamError::Serialization(e.to_string()))?;
        Ok(normalize_fields([
            ("data".to_string(), data),
            ("attempt".to_string(), self.attempt.to_string()),
            ("timestamp".to_string(), self.timestamp.to_string()),
            ("nextRetryAt".to_string(), self.next_retry_at.to_string()),
        ]))
    }

    pub fn from_entry(entry: &StreamEntry) -> Result<Self, StreamError> {
        entry.data()
    }
}

/// Terminal DLQ record: the staged intent plus the reason it exhausted retries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DlqEntry {
    pub data: Message,
    pub attempt: u32,
    pub reason: String,
    pub timestamp: i64,
}

impl DlqEntry {
    pub fn from_wal(entry: WalEntry, error: impl std::fmt::Display) -> Self {
        let mut reason = error.to_string();
        if reason.len() > DLQ_ERROR_TRUNCATE_BYTES {
            reason.truncate(DLQ_ERROR_TRUNCATE_BYTES);
        }
        Self {
            data: entry.data,
            attempt: entry.attempt,
            reason,
            timestamp: Utc::now().timestamp_millis(),
        }
    }

    pub fn into_fields(&self) -> Result<StreamFields, StreamError> {
        let data = serde_json::to_string(self).map_err(|e| StreamError::Serialization(e.to_string()))?;
        Ok(normalize_fields([
            ("data".to_string(), data),
            ("reason".to_string(), self.reason.clone()),
            ("attempt".to_string(), self.attempt.to_string()),
            ("timestamp".to_string(), self.timestamp.to_string()),
        ]))
    }

    pub fn from_entry(entry: &StreamEntry) -> Result<Self, StreamError> {
        entry.data()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::types::{MessageStatus, MessageType};

    fn sample_message() -> Message {
        Message {
            message_id: "m1".into(),
            conversation_id: "c1".into(),
            sender_id: "alice".into(),
            receiver_id: Some("bob".into()),
            content: "hi".into(),
            kind: MessageType::Text,
            status: MessageStatus::Pending,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            edited_at: None,
            deleted_at: None,
            reply_to: None,
            reactions: Default::default(),
            metadata: serde_json::Value::Null,
        }
    }

    #[test]
    fn test_next_attempt_increments_and_backs_off() {
        let entry = WalEntry::first_attempt(sample_message(), "messages:private", "Alice".to_string(), None);
        let next = entry.next_attempt(100);
        assert_eq!(next.attempt, 2);
        assert!(next.next_retry_at >= entry.next_retry_at);
    }

    #[test]
    fn test_is_due_respects_next_retry_at() {
        let mut entry = WalEntry::first_attempt(sample_message(), "messages:private", "Alice".to_string(), None);
        entry.next_retry_at = Utc::now().timestamp_millis() + 60_000;
        assert!(!entry.is_due(Utc::now().timestamp_millis()));
        assert!(entry.is_due(entry.next_retry_at + 1));
    }

    #[test]
    fn test_dlq_entry_truncates_long_reason() {
        let entry = WalEntry::first_attempt(sample_message(), "messages:private", "Alice".to_string(), None);
        let long_reason = "x".repeat(DLQ_ERROR_TRUNCATE_BYTES + 50);
        let dlq = DlqEntry::from_wal(entry, long_reason);
        assert_eq!(dlq.reason.len(), DLQ_ERROR_TRUNCATE_BYTES);
    }

    #[test]
    fn test_wal_entry_round_trips_through_fields() {
        let entry = WalEntry::first_attempt(sample_message(), "messages:private", "Alice".to_string(), None);
        let fields = entry.into_fields().unwrap();
        let stream_entry = StreamEntry { id: "1-0".into(), fields };
        let decoded = WalEntry::from_entry(&stream_entry).unwrap();
        assert_eq!(decoded.data.message_id, "m1");
        assert_eq!(decoded.attempt, 1);
    }
}
