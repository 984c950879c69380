//! SQLite-backed `ConversationRepository` (§3 Conversation, §6 repository contract)

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;

use crate::data::error::DataError;
use crate::data::traits::ConversationRepository;
use crate::data::types::{AuditEntry, Conversation, ConversationType, UserMetadata};

use super::super::SqliteStore;

fn conversation_type_str(kind: ConversationType) -> &'static str {
    match kind {
        ConversationType::Private => "PRIVATE",
        ConversationType::Group => "GROUP",
        ConversationType::Broadcast => "BROADCAST",
        ConversationType::Channel => "CHANNEL",
    }
}

fn parse_conversation_type(s: &str) -> ConversationType {
    match s {
        "GROUP" => ConversationType::Group,
        "BROADCAST" => ConversationType::Broadcast,
        "CHANNEL" => ConversationType::Channel,
        _ => ConversationType::Private,
    }
}

fn nanos(dt: DateTime<Utc>) -> i64 {
    dt.timestamp_nanos_opt().unwrap_or(0)
}

fn from_nanos(n: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_nanos(n)
}

#[async_trait]
impl ConversationRepository for SqliteStore {
    async fn find_by_id(&self, conversation_id: &str) -> Result<Option<Conversation>, DataError> {
        let row = sqlx::query(
            "SELECT conversation_id, type, created_by, created_at, updated_at, last_message \
             FROM conversations WHERE conversation_id = ?",
        )
        .bind(conversation_id)
        .fetch_optional(self.pool())
        .await
        .map_err(DataError::Sqlite)?;

        let Some(row) = row else { return Ok(None) };
        let (admins, participants, unread_counts, user_metadata) =
            self.load_participants(conversation_id).await?;
        let audit_log = self.load_audit_log(conversation_id).await?;

        Ok(Some(Conversation {
            conversation_id: row.get("conversation_id"),
            kind: parse_conversation_type(&row.get::<String, _>("type")),
            participants,
            admins,
            created_by: row.get("created_by"),
            created_at: from_nanos(row.get("created_at")),
            updated_at: from_nanos(row.get("updated_at")),
            last_message: row.get("last_message"),
            unread_counts,
            user_metadata,
            audit_log: Some(audit_log),
        }))
    }

    async fn save(&self, conversation: &Conversation) -> Result<Conversation, DataError> {
        let private_key = if conversation.kind == ConversationType::Private
            && conversation.participants.len() == 2
        {
            Some(Conversation::private_key(
                &conversation.participants[0],
                &conversation.participants[1],
            ))
        } else {
            None
        };

        let mut tx = self.pool().begin().await.map_err(DataError::Sqlite)?;

        sqlx::query(
            "INSERT INTO conversations (conversation_id, type, created_by, created_at, updated_at, \
             last_message, private_key) VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&conversation.conversation_id)
        .bind(conversation_type_str(conversation.kind))
        .bind(&conversation.created_by)
        .bind(nanos(conversation.created_at))
        .bind(nanos(conversation.updated_at))
        .bind(&conversation.last_message)
        .bind(&private_key)
        .execute(&mut *tx)
        .await
        .map_err(DataError::Sqlite)?;

        for user_id in &conversation.participants {
            let is_admin = conversation.admins.contains(user_id);
            sqlx::query(
                "INSERT INTO conversation_participants (conversation_id, user_id, is_admin) \
                 VALUES (?, ?, ?)",
            )
            .bind(&conversation.conversation_id)
            .bind(user_id)
            .bind(is_admin)
            .execute(&mut *tx)
            .await
            .map_err(DataError::Sqlite)?;
        }

        tx.commit().await.map_err(DataError::Sqlite)?;
        Ok(conversation.clone())
    }

    async fn update(&self, conversation: &Conversation) -> Result<Conversation, DataError> {
        let result = sqlx::query(
            "UPDATE conversations SET updated_at = ?, last_message = ? WHERE conversation_id = ?",
        )
        .bind(nanos(conversation.updated_at))
        .bind(&conversation.last_message)
        .bind(&conversation.conversation_id)
        .execute(self.pool())
        .await
        .map_err(DataError::Sqlite)?;

        if result.rows_affected() == 0 {
            return Err(DataError::NotFound(conversation.conversation_id.clone()));
        }
        Ok(conversation.clone())
    }

    async fn count_unread(&self, conversation_id: &str, user_id: &str) -> Result<u32, DataError> {
        let count: Option<i64> = sqlx::query_scalar(
            "SELECT unread_count FROM conversation_participants \
             WHERE conversation_id = ? AND user_id = ?",
        )
        .bind(conversation_id)
        .bind(user_id)
        .fetch_optional(self.pool())
        .await
        .map_err(DataError::Sqlite)?;

        Ok(count.unwrap_or(0) as u32)
    }

    async fn increment_unread(&self, conversation_id: &str, user_id: &str) -> Result<(), DataError> {
        sqlx::query(
            "UPDATE conversation_participants SET unread_count = unread_count + 1 \
             WHERE conversation_id = ? AND user_id = ?",
        )
        .bind(conversation_id)
        .bind(user_id)
        .execute(self.pool())
        .await
        .map_err(DataError::Sqlite)?;
        Ok(())
    }

    async fn set_last_message(
        &self,
        conversation_id: &str,
        message_id: &str,
    ) -> Result<(), DataError> {
        sqlx::query("UPDATE conversations SET last_message = ? WHERE conversation_id = ?")
            .bind(message_id)
            .bind(conversation_id)
            .execute(self.pool())
            .await
            .map_err(DataError::Sqlite)?;
        Ok(())
    }
}

type ParticipantData = (Vec<String>, Vec<String>, std::collections::BTreeMap<String, u32>, Vec<UserMetadata>);

impl SqliteStore {
    async fn load_participants(&self, conversation_id: &str) -> Result<ParticipantData, DataError> {
        let rows = sqlx::query(
            "SELECT user_id, is_admin, unread_count, last_read_at, is_muted, is_pinned, \
             notification_settings, display_name, avatar \
             FROM conversation_participants WHERE conversation_id = ?",
        )
        .bind(conversation_id)
        .fetch_all(self.pool())
        .await
        .map_err(DataError::Sqlite)?;

        let mut admins = Vec::new();
        let mut participants = Vec::new();
        let mut unread_counts = std::collections::BTreeMap::new();
        let mut user_metadata = Vec::new();

        for row in rows {
            let user_id: String = row.get("user_id");
            let is_admin: bool = row.get("is_admin");
            let unread_count: i64 = row.get("unread_count");
            if is_admin {
                admins.push(user_id.clone());
            }
            unread_counts.insert(user_id.clone(), unread_count as u32);
            let notification_settings: String = row.get("notification_settings");
            user_metadata.push(UserMetadata {
                user_id: user_id.clone(),
                unread_count: unread_count as u32,
                last_read_at: row.get::<Option<i64>, _>("last_read_at").map(from_nanos),
                is_muted: row.get("is_muted"),
                is_pinned: row.get("is_pinned"),
                notification_settings: serde_json::from_str(&notification_settings)
                    .unwrap_or(serde_json::Value::Null),
                display_name: row.get("display_name"),
                avatar: row.get("avatar"),
            });
            participants.push(user_id);
        }

        Ok((admins, participants, unread_counts, user_metadata))
    }

    async fn load_audit_log(&self, conversation_id: &str) -> Result<Vec<AuditEntry>, DataError> {
        let rows = sqlx::query(
            "SELECT actor_id, action, at, detail FROM conversation_audit_log \
             WHERE conversation_id = ? ORDER BY at ASC",
        )
        .bind(conversation_id)
        .fetch_all(self.pool())
        .await
        .map_err(DataError::Sqlite)?;

        Ok(rows
            .into_iter()
            .map(|row| {
                let detail: String = row.get("detail");
                AuditEntry {
                    actor_id: row.get("actor_id"),
                    action: row.get("action"),
                    at: from_nanos(row.get("at")),
                    detail: serde_json::from_str(&detail).unwrap_or(serde_json::Value::Null),
                }
            })
            .collect())
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

    fn sample_conversation() -> Conversation {
        let now = Utc::now();
        Conversation {
            conversation_id: uuid::Uuid::new_v4().to_string(),
            kind: ConversationType::Private,
            participants: vec!["alice".to_string(), "bob".to_string()],
            admins: vec![],
            created_by: "alice".to_string(),
            created_at: now,
            updated_at: now,
            last_message: None,
            unread_counts: Default::default(),
            user_metadata: vec![],
            audit_log: None,
        }
    }

    #[tokio::test]
    async fn test_save_and_find_by_id_round_trips_participants() {
        let store = test_store().await;
        let convo = sample_conversation();
        store.save(&convo).await.unwrap();

        let found = store.find_by_id(&convo.conversation_id).await.unwrap().unwrap();
        assert_eq!(found.participants.len(), 2);
        assert!(found.participants.contains(&"alice".to_string()));
    }

    #[tokio::test]
    async fn test_increment_and_count_unread() {
        let store = test_store().await;
        let convo = sample_conversation();
        store.save(&convo).await.unwrap();

        store.increment_unread(&convo.conversation_id, "bob").await.unwrap();
        store.increment_unread(&convo.conversation_id, "bob").await.unwrap();

        let count = store.count_unread(&convo.conversation_id, "bob").await.unwrap();
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn test_set_last_message() {
        let store = test_store().await;
        let convo = sample_conversation();
        store.save(&convo).await.unwrap();

        store.set_last_message(&convo.conversation_id, "m1").await.unwrap();
        let found = store.find_by_id(&convo.conversation_id).await.unwrap().unwrap();
        assert_eq!(found.last_message, Some("m1".to_string()));
    }
}
