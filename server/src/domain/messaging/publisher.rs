//! Public write API fronting the primary store (§4.4 ResilientPublisher)

use std::sync::Arc;

use chrono::Utc;

use crate::core::constants::{STREAM_EVENTS_CONVERSATIONS, STREAM_FALLBACK, STREAM_STATUS_DELETED,
    STREAM_STATUS_DELIVERED, STREAM_STATUS_EDITED, STREAM_STATUS_READ, STREAM_WAL};
use crate::data::streams::StreamFabric;
use crate::data::traits::{ConversationRepository, MessageRepository};
use crate::data::types::{Message, MessageStatus};

use super::circuit_breaker::{CircuitBreaker, CircuitResult};
use super::envelope::{ConversationEvent, NewMessageEnvelope, StatusEnvelope};
use super::errors::MessagingError;
use super::overflow::OverflowQueue;
use super::wal_entry::WalEntry;

/// Result of a publish call: either the entity made it to the primary store,
/// or it was accepted and staged in the WAL for later retry (§7 propagation
/// policy: `Ok(entity)` vs `Accepted(pending entity)`).
pub enum PublishOutcome {
    Stored(Message),
    Accepted(Message),
}

impl PublishOutcome {
    pub fn into_message(self) -> Message {
        match self {
            Self::Stored(m) | Self::Accepted(m) => m,
        }
    }
}

fn status_stream(status: MessageStatus) -> Option<&'static str> {
    match status {
        MessageStatus::Delivered => Some(STREAM_STATUS_DELIVERED),
        MessageStatus::Read => Some(STREAM_STATUS_READ),
        MessageStatus::Edited => Some(STREAM_STATUS_EDITED),
        MessageStatus::Deleted => Some(STREAM_STATUS_DELETED),
        _ => None,
    }
}

pub struct ResilientPublisher {
    messages: Arc<dyn MessageRepository>,
    conversations: Arc<dyn ConversationRepository>,
    streams: Arc<StreamFabric>,
    breaker: Arc<CircuitBreaker>,
    overflow: Arc<OverflowQueue>,
}

impl ResilientPublisher {
    pub fn new(
        messages: Arc<dyn MessageRepository>,
        conversations: Arc<dyn ConversationRepository>,
        streams: Arc<StreamFabric>,
        breaker: Arc<CircuitBreaker>,
        overflow: Arc<OverflowQueue>,
    ) -> Self {
        Self { messages, conversations, streams, breaker, overflow }
    }

    pub fn conversations(&self) -> &Arc<dyn ConversationRepository> {
        &self.conversations
    }

    async fn append_or_overflow(&self, stream: &'static str, fields: crate::data::streams::StreamFields) -> Result<(), MessagingError> {
        if let Err(e) = self.streams.manager().append(stream, fields.clone()).await {
            tracing::warn!(stream, error = %e, "stream append failed, buffering in overflow queue");
            if !self.overflow.push(stream, fields).await {
                return Err(MessagingError::Overflow);
            }
        }
        Ok(())
    }

    /// Writes `message` to the primary store under the circuit breaker; on
    /// success publishes `NEW_MESSAGE` to `stream` and returns the stored
    /// entity. On primary-store failure, stages the intent on WAL and
    /// Fallback and returns `Accepted` with a synthetic `PENDING` entity
    /// (§4.4 failure policy, S3).
    pub async fn publish_message(
        &self,
        message: Message,
        stream: &'static str,
        sender_name: String,
        participants: Option<Vec<String>>,
    ) -> Result<PublishOutcome, MessagingError> {
        let messages = Arc::clone(&self.messages);
        let to_save = message.clone();
        let result = self
            .breaker
            .execute(|| async move { messages.save(&to_save).await })
            .await;

        match result {
            Ok(stored) => {
                let envelope = NewMessageEnvelope::from_message(&stored, sender_name, participants);
                let fields = envelope.into_fields()?;
                self.append_or_overflow(stream, fields).await?;
                Ok(PublishOutcome::Stored(stored))
            }
            Err(CircuitResult::Open(open)) => {
                self.stage_pending(message.clone(), stream, sender_name, participants).await;
                tracing::warn!(retry_after_ms = open.retry_after_ms, "circuit open, message staged to WAL");
                Ok(PublishOutcome::Accepted(pending(message)))
            }
            Err(CircuitResult::Failed(e)) => {
                self.stage_pending(message.clone(), stream, sender_name, participants).await;
                tracing::warn!(error = %e, "primary store write failed, message staged to WAL");
                Ok(PublishOutcome::Accepted(pending(message)))
            }
        }
    }

    /// Best-effort dual-write of the intent to WAL and Fallback; failures to
    /// append here are logged, never surfaced — the caller already got its
    /// `Accepted` contract and the WAL Worker will pick the entry up on its
    /// next scan if the first append is lost.
    async fn stage_pending(&self, message: Message, stream: &str, sender_name: String, participants: Option<Vec<String>>) {
        let entry = WalEntry::first_attempt(message, stream, sender_name, participants);
        let fields = match entry.into_fields() {
            Ok(fields) => fields,
            Err(e) => {
                tracing::error!(error = %e, "failed to encode WAL entry");
                return;
            }
        };
        if let Err(e) = self.streams.manager().append(STREAM_WAL, fields.clone()).await {
            tracing::error!(error = %e, "failed to append to WAL stream");
        }
        if let Err(e) = self.streams.manager().append(STREAM_FALLBACK, fields).await {
            tracing::error!(error = %e, "failed to append to fallback stream");
        }
    }

    /// Appends `{messageId, userId, status, timestamp, ...}` to the status
    /// stream matching `status` (§4.4). Fire-and-forget: a failure here never
    /// surfaces to the caller (§7, `TransientStoreError` never blocks status updates).
    pub async fn publish_message_status(
        &self,
        message_id: String,
        user_id: String,
        status: MessageStatus,
        conversation_id: Option<String>,
        delete_type: Option<super::envelope::DeleteType>,
    ) -> Result<(), MessagingError> {
        let Some(stream) = status_stream(status) else {
            return Err(MessagingError::Validation(format!("{status:?} has no status stream")));
        };
        let envelope = StatusEnvelope {
            message_id,
            user_id,
            status,
            timestamp: Utc::now().timestamp_millis(),
            conversation_id,
            delete_type,
        };
        let fields = envelope.into_fields()?;
        self.append_or_overflow(stream, fields).await
    }

    pub async fn publish_conversation_event(&self, event: ConversationEvent) -> Result<(), MessagingError> {
        let fields = event.into_fields()?;
        self.append_or_overflow(STREAM_EVENTS_CONVERSATIONS, fields).await
    }

    /// Appends a raw `conversationId`/`userId` pass-through entry to one of
    /// the room-broadcast streams (`events:typing|reactions|replies`). These
    /// carry no fixed schema beyond the two required fields (§6, DESIGN.md
    /// open question #10), so callers supply whatever else belongs in `extra`.
    pub async fn publish_room_event(
        &self,
        stream: &'static str,
        conversation_id: &str,
        user_id: &str,
        extra: Vec<(String, String)>,
    ) -> Result<(), MessagingError> {
        let mut fields = vec![
            ("conversationId".to_string(), conversation_id.to_string()),
            ("userId".to_string(), user_id.to_string()),
        ];
        fields.extend(extra);
        self.append_or_overflow(stream, crate::data::streams::normalize_fields(fields)).await
    }

    /// Inserts a synthetic SYSTEM-type message (e.g. group-creation notice)
    /// and publishes it the same way as a user-authored message.
    pub async fn publish_system_message(
        &self,
        message: Message,
        stream: &'static str,
        participants: Option<Vec<String>>,
    ) -> Result<PublishOutcome, MessagingError> {
        self.publish_message(message, stream, "system".to_string(), participants).await
    }
}

fn pending(mut message: Message) -> Message {
    message.status = MessageStatus::Pending;
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::CircuitBreakerConfig;
    use crate::data::sqlite::SqliteStore;
    use crate::data::types::{ConversationType, MessageType};
    use sqlx::sqlite::SqlitePoolOptions;

    async fn test_store() -> Arc<SqliteStore> {
        let pool = SqlitePoolOptions::new().max_connections(1).connect("sqlite::memory:").await.unwrap();
        sqlx::query(crate::data::sqlite::schema::SCHEMA).execute(&pool).await.unwrap();
        Arc::new(SqliteStore::from_pool(pool))
    }

    fn sample_message() -> Message {
        Message {
            message_id: uuid::Uuid::new_v4().to_string(),
            conversation_id: "c1".into(),
            sender_id: "alice".into(),
            receiver_id: Some("bob".into()),
            content: "hello".into(),
            kind: MessageType::Text,
            status: MessageStatus::Sent,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            edited_at: None,
            deleted_at: None,
            reply_to: None,
            reactions: Default::default(),
            metadata: serde_json::Value::Null,
        }
    }

    async fn seed_conversation(store: &SqliteStore, conversation_id: &str) {
        use crate::data::types::Conversation;
        store
            .save(&Conversation {
                conversation_id: conversation_id.to_string(),
                kind: ConversationType::Private,
                participants: vec!["alice".into(), "bob".into()],
                admins: vec![],
                created_by: "alice".into(),
                created_at: Utc::now(),
                updated_at: Utc::now(),
                last_message: None,
                unread_counts: Default::default(),
                user_metadata: vec![],
                audit_log: None,
            })
            .await
            .unwrap();
    }

    fn publisher(store: Arc<SqliteStore>) -> ResilientPublisher {
        let breaker = Arc::new(CircuitBreaker::new(&CircuitBreakerConfig { failure_threshold: 5, reset_timeout_ms: 30_000 }));
        let streams = Arc::new(StreamFabric::in_memory());
        let overflow = Arc::new(OverflowQueue::new(10));
        ResilientPublisher::new(store.clone(), store, streams, breaker, overflow)
    }

    #[tokio::test]
    async fn test_publish_message_stores_and_publishes_new_message_event() {
        let store = test_store().await;
        seed_conversation(&store, "c1").await;
        let publisher = publisher(store);

        let outcome = publisher
            .publish_message(sample_message(), crate::core::constants::STREAM_MESSAGES_PRIVATE, "Alice".into(), None)
            .await
            .unwrap();

        assert!(matches!(outcome, PublishOutcome::Stored(_)));
    }

    #[tokio::test]
    async fn test_publish_message_status_rejects_statuses_without_a_stream() {
        let store = test_store().await;
        let publisher = publisher(store);

        let result = publisher
            .publish_message_status("m1".into(), "bob".into(), MessageStatus::Pending, None, None)
            .await;
        assert!(result.is_err());
    }
}
