//! Typed stream payload envelopes (§6 external interfaces, §9 design notes)
//!
//! Stream entries are flat string maps; this module is the single place that
//! knows how to turn one into a typed `StreamEvent` and back. Representing
//! the dynamically-shaped payloads of the original system as a tagged sum
//! type means every consumer matches on a closed set of variants instead of
//! probing an untyped map.

use serde::{Deserialize, Serialize};

use crate::data::streams::{StreamEntry, StreamError, StreamFields, normalize_fields};
use crate::data::types::{Message, MessageStatus, MessageType};

/// A message-content envelope (`messages:{private,group,channel}`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewMessageEnvelope {
    pub event: String,
    pub message_id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub sender_name: String,
    pub content: String,
    #[serde(rename = "type")]
    pub kind: MessageType,
    pub status: MessageStatus,
    pub timestamp: i64,
    pub metadata: serde_json::Value,
    /// GROUP/BROADCAST/CHANNEL dispatch list; absent for PRIVATE (resolved
    /// from the conversation's two participants instead).
    pub participants: Option<Vec<String>>,
}

impl NewMessageEnvelope {
    pub fn from_message(message: &Message, sender_name: String, participants: Option<Vec<String>>) -> Self {
        Self {
            event: "NEW_MESSAGE".to_string(),
            message_id: message.message_id.clone(),
            conversation_id: message.conversation_id.clone(),
            sender_id: message.sender_id.clone(),
            sender_name,
            content: message.content.clone(),
            kind: message.kind,
            status: message.status,
            timestamp: message.created_at.timestamp_millis(),
            metadata: message.metadata.clone(),
            participants,
        }
    }

    pub fn into_fields(self) -> Result<StreamFields, StreamError> {
        let data = serde_json::to_string(&self)
            .map_err(|e| StreamError::Serialization(e.to_string()))?;
        Ok(normalize_fields([
            ("event", self.event.clone()),
            ("messageId", self.message_id.clone()),
            ("conversationId", self.conversation_id.clone()),
            ("senderId", self.sender_id.clone()),
            ("senderName", self.sender_name.clone()),
            ("content", self.content.clone()),
            ("type", format!("{:?}", self.kind).to_uppercase()),
            ("status", format!("{:?}", self.status).to_uppercase()),
            ("timestamp", self.timestamp.to_string()),
            ("data", data),
        ]))
    }

    pub fn from_entry(entry: &StreamEntry) -> Result<Self, StreamError> {
        entry.data()
    }
}

/// A status-family envelope (`status:{delivered,read,edited,deleted}`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusEnvelope {
    pub message_id: String,
    pub user_id: String,
    pub status: MessageStatus,
    pub timestamp: i64,
    pub conversation_id: Option<String>,
    pub delete_type: Option<DeleteType>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeleteType {
    ForMe,
    ForEveryone,
}

impl StatusEnvelope {
    pub fn into_fields(self) -> Result<StreamFields, StreamError> {
        let data = serde_json::to_string(&self)
            .map_err(|e| StreamError::Serialization(e.to_string()))?;
        let mut fields = vec![
            ("messageId".to_string(), self.message_id.clone()),
            ("userId".to_string(), self.user_id.clone()),
            ("status".to_string(), format!("{:?}", self.status).to_uppercase()),
            ("timestamp".to_string(), self.timestamp.to_string()),
            ("data".to_string(), data),
        ];
        if let Some(conversation_id) = self.conversation_id {
            fields.push(("conversationId".to_string(), conversation_id));
        }
        if let Some(delete_type) = self.delete_type {
            let s = match delete_type {
                DeleteType::ForMe => "FOR_ME",
                DeleteType::ForEveryone => "FOR_EVERYONE",
            };
            fields.push(("deleteType".to_string(), s.to_string()));
        }
        Ok(normalize_fields(fields))
    }

    pub fn from_entry(entry: &StreamEntry) -> Result<Self, StreamError> {
        entry.data()
    }
}

/// `events:conversations` envelope kinds (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ConversationEvent {
    #[serde(rename = "conversation.created")]
    Created { conversation_id: String, created_by: String, participants: Vec<String> },
    #[serde(rename = "conversation.participant.added")]
    ParticipantAdded {
        conversation_id: String,
        user_id: String,
        added_at: i64,
        total_participants: u32,
    },
    #[serde(rename = "conversation.participant.removed")]
    ParticipantRemoved {
        conversation_id: String,
        user_id: String,
        removed_at: i64,
        total_participants: u32,
    },
}

impl ConversationEvent {
    pub fn conversation_id(&self) -> &str {
        match self {
            Self::Created { conversation_id, .. }
            | Self::ParticipantAdded { conversation_id, .. }
            | Self::ParticipantRemoved { conversation_id, .. } => conversation_id,
        }
    }

    pub fn into_fields(self) -> Result<StreamFields, StreamError> {
        let event_name = match &self {
            Self::Created { .. } => "conversation.created",
            Self::ParticipantAdded { .. } => "conversation.participant.added",
            Self::ParticipantRemoved { .. } => "conversation.participant.removed",
        };
        let data = serde_json::to_string(&self)
            .map_err(|e| StreamError::Serialization(e.to_string()))?;
        Ok(normalize_fields([
            ("event", event_name.to_string()),
            ("conversationId", self.conversation_id().to_string()),
            ("data", data),
        ]))
    }
}

/// `events:users` envelope kinds (§6, §4.9).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserEventKind {
    Created,
    Updated,
    Deleted,
    Synced,
}

impl UserEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "user.profile.created",
            Self::Updated => "user.profile.updated",
            Self::Deleted => "user.profile.deleted",
            Self::Synced => "user.profile.synced",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user.profile.created" => Some(Self::Created),
            "user.profile.updated" => Some(Self::Updated),
            "user.profile.deleted" => Some(Self::Deleted),
            "user.profile.synced" => Some(Self::Synced),
            _ => None,
        }
    }
}

/// `events:users` envelope (§6: `event`, `userId`, `data` JSON snapshot).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfileEvent {
    pub event: String,
    pub user_id: String,
    pub data: serde_json::Value,
}

impl UserProfileEvent {
    pub fn new(kind: UserEventKind, user_id: String, data: serde_json::Value) -> Self {
        Self { event: kind.as_str().to_string(), user_id, data }
    }

    pub fn kind(&self) -> Option<UserEventKind> {
        UserEventKind::parse(&self.event)
    }

    pub fn into_fields(self) -> Result<StreamFields, StreamError> {
        let data = serde_json::to_string(&self).map_err(|e| StreamError::Serialization(e.to_string()))?;
        Ok(normalize_fields([
            ("event".to_string(), self.event.clone()),
            ("userId".to_string(), self.user_id.clone()),
            ("data".to_string(), data),
        ]))
    }

    pub fn from_entry(entry: &StreamEntry) -> Result<Self, StreamError> {
        entry.data()
    }
}

/// Everything the DeliveryEngine/WAL path might read back off a stream,
/// classified by stream family (§9: "represent as tagged variants per
/// `event` field"). `Malformed` is consumed only by the DLQ path.
pub enum StreamEvent {
    NewMessage(NewMessageEnvelope),
    StatusUpdate(StatusEnvelope),
    Conversation(ConversationEvent),
    Malformed { reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sample_message() -> Message {
        Message {
            message_id: "m1".into(),
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

    #[test]
    fn test_new_message_envelope_round_trips_through_fields() {
        let envelope = NewMessageEnvelope::from_message(&sample_message(), "Alice".into(), None);
        let fields = envelope.into_fields().unwrap();
        let entry = StreamEntry { id: "1-0".into(), fields };
        let decoded = NewMessageEnvelope::from_entry(&entry).unwrap();
        assert_eq!(decoded.sender_name, "Alice");
        assert_eq!(decoded.message_id, "m1");
    }

    #[test]
    fn test_status_envelope_carries_delete_fields_when_present() {
        let envelope = StatusEnvelope {
            message_id: "m1".into(),
            user_id: "alice".into(),
            status: MessageStatus::Deleted,
            timestamp: 1000,
            conversation_id: Some("c1".into()),
            delete_type: Some(DeleteType::ForEveryone),
        };
        let fields = envelope.into_fields().unwrap();
        assert_eq!(fields.get("deleteType").unwrap(), "FOR_EVERYONE");
        assert_eq!(fields.get("conversationId").unwrap(), "c1");
    }

    #[test]
    fn test_user_event_kind_parse_round_trips() {
        for kind in [UserEventKind::Created, UserEventKind::Updated, UserEventKind::Deleted, UserEventKind::Synced] {
            assert_eq!(UserEventKind::parse(kind.as_str()), Some(kind));
        }
    }

    #[test]
    fn test_user_profile_event_round_trips_through_fields() {
        let event = UserProfileEvent::new(UserEventKind::Updated, "u1".into(), serde_json::json!({"fullName": "Alice A"}));
        let fields = event.into_fields().unwrap();
        let entry = StreamEntry { id: "1-0".into(), fields };
        let decoded = UserProfileEvent::from_entry(&entry).unwrap();
        assert_eq!(decoded.kind(), Some(UserEventKind::Updated));
        assert_eq!(decoded.user_id, "u1");
    }
}
