//! Repository contract (§6) consumed by the messaging core
//!
//! One trait per aggregate; `SqliteStore` is the only implementation, but the
//! core (ResilientPublisher, DeliveryEngine, workers) only ever depends on
//! these traits so the primary store stays swappable.

use async_trait::async_trait;

use crate::data::error::DataError;
use crate::data::types::{Conversation, Message, UserProfile};

/// Cursor direction for `findByConversation` pagination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorDirection {
    Forward,
    Backward,
}

#[async_trait]
pub trait MessageRepository: Send + Sync {
    async fn find_by_id(&self, message_id: &str) -> Result<Option<Message>, DataError>;

    async fn save(&self, message: &Message) -> Result<Message, DataError>;

    async fn update(&self, message: &Message) -> Result<Message, DataError>;

    /// Paginated history for a conversation, ordered by `createdAt`.
    async fn find_by_conversation(
        &self,
        conversation_id: &str,
        cursor: Option<&str>,
        limit: u32,
        direction: CursorDirection,
    ) -> Result<Vec<Message>, DataError>;

    /// Dedup lookup used by the WAL/Retry path to detect an entry that was
    /// already persisted before a retry landed (idempotent delivery, §8 inv. 3).
    async fn find_by_content_hash(
        &self,
        conversation_id: &str,
        content_hash: &str,
    ) -> Result<Option<Message>, DataError>;
}

#[async_trait]
pub trait ConversationRepository: Send + Sync {
    async fn find_by_id(&self, conversation_id: &str) -> Result<Option<Conversation>, DataError>;

    async fn save(&self, conversation: &Conversation) -> Result<Conversation, DataError>;

    async fn update(&self, conversation: &Conversation) -> Result<Conversation, DataError>;

    async fn count_unread(&self, conversation_id: &str, user_id: &str) -> Result<u32, DataError>;

    async fn increment_unread(&self, conversation_id: &str, user_id: &str) -> Result<(), DataError>;

    async fn set_last_message(
        &self,
        conversation_id: &str,
        message_id: &str,
    ) -> Result<(), DataError>;
}

#[async_trait]
pub trait UserProfileRepository: Send + Sync {
    async fn find_by_matricule(&self, matricule: &str) -> Result<Option<UserProfile>, DataError>;

    async fn save(&self, profile: &UserProfile) -> Result<UserProfile, DataError>;

    async fn list_all(&self, limit: u32) -> Result<Vec<UserProfile>, DataError>;
}
