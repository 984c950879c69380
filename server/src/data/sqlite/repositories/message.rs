//! SQLite-backed `MessageRepository` (§3 Message, §6 repository contract)

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;

use crate::data::error::DataError;
use crate::data::traits::{CursorDirection, MessageRepository};
use crate::data::types::{Message, MessageStatus, MessageType};
use crate::utils::crypto::sha256_hex;

use super::super::SqliteStore;

fn message_type_str(kind: MessageType) -> &'static str {
    match kind {
        MessageType::Text => "TEXT",
        MessageType::Image => "IMAGE",
        MessageType::Video => "VIDEO",
        MessageType::Audio => "AUDIO",
        MessageType::File => "FILE",
        MessageType::Location => "LOCATION",
        MessageType::Contact => "CONTACT",
        MessageType::System => "SYSTEM",
    }
}

fn parse_message_type(s: &str) -> MessageType {
    match s {
        "IMAGE" => MessageType::Image,
        "VIDEO" => MessageType::Video,
        "AUDIO" => MessageType::Audio,
        "FILE" => MessageType::File,
        "LOCATION" => MessageType::Location,
        "CONTACT" => MessageType::Contact,
        "SYSTEM" => MessageType::System,
        _ => MessageType::Text,
    }
}

fn status_str(status: MessageStatus) -> &'static str {
    match status {
        MessageStatus::Pending => "PENDING",
        MessageStatus::Sent => "SENT",
        MessageStatus::Delivered => "DELIVERED",
        MessageStatus::Read => "READ",
        MessageStatus::Edited => "EDITED",
        MessageStatus::Deleted => "DELETED",
        MessageStatus::Failed => "FAILED",
    }
}

fn parse_status(s: &str) -> MessageStatus {
    match s {
        "SENT" => MessageStatus::Sent,
        "DELIVERED" => MessageStatus::Delivered,
        "READ" => MessageStatus::Read,
        "EDITED" => MessageStatus::Edited,
        "DELETED" => MessageStatus::Deleted,
        "FAILED" => MessageStatus::Failed,
        _ => MessageStatus::Pending,
    }
}

fn nanos(dt: DateTime<Utc>) -> i64 {
    dt.timestamp_nanos_opt().unwrap_or(0)
}

fn from_nanos(n: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_nanos(n)
}

#[async_trait]
impl MessageRepository for SqliteStore {
    async fn find_by_id(&self, message_id: &str) -> Result<Option<Message>, DataError> {
        let row = sqlx::query(
            "SELECT message_id, conversation_id, sender_id, receiver_id, content, type, status, \
             created_at, updated_at, edited_at, deleted_at, reply_to, metadata \
             FROM messages WHERE message_id = ?",
        )
        .bind(message_id)
        .fetch_optional(self.pool())
        .await
        .map_err(DataError::Sqlite)?;

        let Some(row) = row else { return Ok(None) };
        let reactions = self.load_reactions(message_id).await?;
        Ok(Some(row_to_message(row, reactions)))
    }

    async fn save(&self, message: &Message) -> Result<Message, DataError> {
        let content_hash = sha256_hex(&message.content);
        sqlx::query(
            "INSERT INTO messages (message_id, conversation_id, sender_id, receiver_id, content, \
             content_hash, type, status, created_at, updated_at, edited_at, deleted_at, reply_to, metadata) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&message.message_id)
        .bind(&message.conversation_id)
        .bind(&message.sender_id)
        .bind(&message.receiver_id)
        .bind(&message.content)
        .bind(&content_hash)
        .bind(message_type_str(message.kind))
        .bind(status_str(message.status))
        .bind(nanos(message.created_at))
        .bind(nanos(message.updated_at))
        .bind(message.edited_at.map(nanos))
        .bind(message.deleted_at.map(nanos))
        .bind(&message.reply_to)
        .bind(message.metadata.to_string())
        .execute(self.pool())
        .await
        .map_err(DataError::Sqlite)?;

        Ok(message.clone())
    }

    async fn update(&self, message: &Message) -> Result<Message, DataError> {
        let result = sqlx::query(
            "UPDATE messages SET status = ?, updated_at = ?, edited_at = ?, deleted_at = ?, \
             content = ?, metadata = ? WHERE message_id = ?",
        )
        .bind(status_str(message.status))
        .bind(nanos(message.updated_at))
        .bind(message.edited_at.map(nanos))
        .bind(message.deleted_at.map(nanos))
        .bind(&message.content)
        .bind(message.metadata.to_string())
        .bind(&message.message_id)
        .execute(self.pool())
        .await
        .map_err(DataError::Sqlite)?;

        if result.rows_affected() == 0 {
            return Err(DataError::NotFound(message.message_id.clone()));
        }
        Ok(message.clone())
    }

    async fn find_by_conversation(
        &self,
        conversation_id: &str,
        cursor: Option<&str>,
        limit: u32,
        direction: CursorDirection,
    ) -> Result<Vec<Message>, DataError> {
        let cursor_created_at = match cursor {
            Some(id) => {
                let row = sqlx::query("SELECT created_at FROM messages WHERE message_id = ?")
                    .bind(id)
                    .fetch_optional(self.pool())
                    .await
                    .map_err(DataError::Sqlite)?;
                row.map(|r| r.get::<i64, _>("created_at"))
            }
            None => None,
        };

        let rows = match (cursor_created_at, direction) {
            (Some(ts), CursorDirection::Backward) => {
                sqlx::query(
                    "SELECT message_id, conversation_id, sender_id, receiver_id, content, type, status, \
                     created_at, updated_at, edited_at, deleted_at, reply_to, metadata \
                     FROM messages WHERE conversation_id = ? AND created_at < ? \
                     ORDER BY created_at DESC LIMIT ?",
                )
                .bind(conversation_id)
                .bind(ts)
                .bind(limit as i64)
                .fetch_all(self.pool())
                .await
            }
            (Some(ts), CursorDirection::Forward) => {
                sqlx::query(
                    "SELECT message_id, conversation_id, sender_id, receiver_id, content, type, status, \
                     created_at, updated_at, edited_at, deleted_at, reply_to, metadata \
                     FROM messages WHERE conversation_id = ? AND created_at > ? \
                     ORDER BY created_at ASC LIMIT ?",
                )
                .bind(conversation_id)
                .bind(ts)
                .bind(limit as i64)
                .fetch_all(self.pool())
                .await
            }
            (None, _) => {
                sqlx::query(
                    "SELECT message_id, conversation_id, sender_id, receiver_id, content, type, status, \
                     created_at, updated_at, edited_at, deleted_at, reply_to, metadata \
                     FROM messages WHERE conversation_id = ? ORDER BY created_at DESC LIMIT ?",
                )
                .bind(conversation_id)
                .bind(limit as i64)
                .fetch_all(self.pool())
                .await
            }
        }
        .map_err(DataError::Sqlite)?;

        let mut messages = Vec::with_capacity(rows.len());
        for row in rows {
            let message_id: String = row.get("message_id");
            let reactions = self.load_reactions(&message_id).await?;
            messages.push(row_to_message(row, reactions));
        }
        Ok(messages)
    }

    async fn find_by_content_hash(
        &self,
        conversation_id: &str,
        content_hash: &str,
    ) -> Result<Option<Message>, DataError> {
        let row = sqlx::query(
            "SELECT message_id, conversation_id, sender_id, receiver_id, content, type, status, \
             created_at, updated_at, edited_at, deleted_at, reply_to, metadata \
             FROM messages WHERE conversation_id = ? AND content_hash = ? \
             ORDER BY created_at DESC LIMIT 1",
        )
        .bind(conversation_id)
        .bind(content_hash)
        .fetch_optional(self.pool())
        .await
        .map_err(DataError::Sqlite)?;

        let Some(row) = row else { return Ok(None) };
        let message_id: String = row.get("message_id");
        let reactions = self.load_reactions(&message_id).await?;
        Ok(Some(row_to_message(row, reactions)))
    }
}

impl SqliteStore {
    async fn load_reactions(
        &self,
        message_id: &str,
    ) -> Result<std::collections::BTreeSet<(String, String, i64)>, DataError> {
        let rows = sqlx::query("SELECT user_id, emoji, ts FROM message_reactions WHERE message_id = ?")
            .bind(message_id)
            .fetch_all(self.pool())
            .await
            .map_err(DataError::Sqlite)?;
        Ok(rows
            .into_iter()
            .map(|r| (r.get::<String, _>("user_id"), r.get::<String, _>("emoji"), r.get::<i64, _>("ts")))
            .collect())
    }
}

fn row_to_message(
    row: sqlx::sqlite::SqliteRow,
    reactions: std::collections::BTreeSet<(String, String, i64)>,
) -> Message {
    Message {
        message_id: row.get("message_id"),
        conversation_id: row.get("conversation_id"),
        sender_id: row.get("sender_id"),
        receiver_id: row.get("receiver_id"),
        content: row.get("content"),
        kind: parse_message_type(&row.get::<String, _>("type")),
        status: parse_status(&row.get::<String, _>("status")),
        created_at: from_nanos(row.get("created_at")),
        updated_at: from_nanos(row.get("updated_at")),
        edited_at: row.get::<Option<i64>, _>("edited_at").map(from_nanos),
        deleted_at: row.get::<Option<i64>, _>("deleted_at").map(from_nanos),
        reply_to: row.get("reply_to"),
        reactions,
        metadata: serde_json::from_str(&row.get::<String, _>("metadata"))
            .unwrap_or(serde_json::Value::Null),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn test_store() -> SqliteStore {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::query(crate::data::sqlite::schema::SCHEMA)
            .execute(&pool)
            .await
            .unwrap();
        SqliteStore::from_pool(pool)
    }

    fn sample_message(conversation_id: &str) -> Message {
        let now = Utc::now();
        Message {
            message_id: uuid::Uuid::new_v4().to_string(),
            conversation_id: conversation_id.to_string(),
            sender_id: "alice".to_string(),
            receiver_id: Some("bob".to_string()),
            content: "hello".to_string(),
            kind: MessageType::Text,
            status: MessageStatus::Sent,
            created_at: now,
            updated_at: now,
            edited_at: None,
            deleted_at: None,
            reply_to: None,
            reactions: Default::default(),
            metadata: serde_json::json!({}),
        }
    }

    async fn seed_conversation(store: &SqliteStore, conversation_id: &str) {
        sqlx::query(
            "INSERT INTO conversations (conversation_id, type, created_by, created_at, updated_at) \
             VALUES (?, 'PRIVATE', 'alice', 0, 0)",
        )
        .bind(conversation_id)
        .execute(store.pool())
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_save_and_find_by_id() {
        let store = test_store().await;
        seed_conversation(&store, "c1").await;
        let message = sample_message("c1");
        store.save(&message).await.unwrap();

        let found = store.find_by_id(&message.message_id).await.unwrap().unwrap();
        assert_eq!(found.content, "hello");
        assert_eq!(found.status, MessageStatus::Sent);
    }

    #[tokio::test]
    async fn test_find_by_content_hash_dedups() {
        let store = test_store().await;
        seed_conversation(&store, "c1").await;
        let message = sample_message("c1");
        store.save(&message).await.unwrap();

        let hash = sha256_hex(&message.content);
        let found = store.find_by_content_hash("c1", &hash).await.unwrap();
        assert!(found.is_some());
    }

    #[tokio::test]
    async fn test_find_by_conversation_orders_newest_first_without_cursor() {
        let store = test_store().await;
        seed_conversation(&store, "c1").await;
        let mut m1 = sample_message("c1");
        m1.created_at = Utc::now() - chrono::Duration::seconds(10);
        let mut m2 = sample_message("c1");
        m2.created_at = Utc::now();
        store.save(&m1).await.unwrap();
        store.save(&m2).await.unwrap();

        let page = store
            .find_by_conversation("c1", None, 10, CursorDirection::Backward)
            .await
            .unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].message_id, m2.message_id);
    }
}
