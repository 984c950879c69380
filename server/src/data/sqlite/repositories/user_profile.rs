//! SQLite-backed `UserProfileRepository` (§3 UserProfile, §6 repository contract)

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;

use crate::data::error::DataError;
use crate::data::traits::UserProfileRepository;
use crate::data::types::UserProfile;

use super::super::SqliteStore;

fn nanos(dt: DateTime<Utc>) -> i64 {
    dt.timestamp_nanos_opt().unwrap_or(0)
}

fn from_nanos(n: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_nanos(n)
}

fn row_to_profile(row: sqlx::sqlite::SqliteRow) -> UserProfile {
    UserProfile {
        id: row.get("id"),
        matricule: row.get("matricule"),
        nom: row.get("nom"),
        prenom: row.get("prenom"),
        full_name: row.get("full_name"),
        avatar: row.get("avatar"),
        ministere: row.get("ministere"),
        sexe: row.get("sexe"),
        updated_at: from_nanos(row.get("updated_at")),
    }
}

#[async_trait]
impl UserProfileRepository for SqliteStore {
    async fn find_by_matricule(&self, matricule: &str) -> Result<Option<UserProfile>, DataError> {
        let row = sqlx::query(
            "SELECT id, matricule, nom, prenom, full_name, avatar, ministere, sexe, updated_at \
             FROM user_profiles WHERE matricule = ?",
        )
        .bind(matricule)
        .fetch_optional(self.pool())
        .await
        .map_err(DataError::Sqlite)?;

        Ok(row.map(row_to_profile))
    }

    async fn save(&self, profile: &UserProfile) -> Result<UserProfile, DataError> {
        sqlx::query(
            "INSERT INTO user_profiles (id, matricule, nom, prenom, full_name, avatar, ministere, sexe, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(matricule) DO UPDATE SET \
             nom = excluded.nom, prenom = excluded.prenom, full_name = excluded.full_name, \
             avatar = excluded.avatar, ministere = excluded.ministere, sexe = excluded.sexe, \
             updated_at = excluded.updated_at",
        )
        .bind(&profile.id)
        .bind(&profile.matricule)
        .bind(&profile.nom)
        .bind(&profile.prenom)
        .bind(&profile.full_name)
        .bind(&profile.avatar)
        .bind(&profile.ministere)
        .bind(&profile.sexe)
        .bind(nanos(profile.updated_at))
        .execute(self.pool())
        .await
        .map_err(DataError::Sqlite)?;

        Ok(profile.clone())
    }

    async fn list_all(&self, limit: u32) -> Result<Vec<UserProfile>, DataError> {
        let rows = sqlx::query(
            "SELECT id, matricule, nom, prenom, full_name, avatar, ministere, sexe, updated_at \
             FROM user_profiles ORDER BY updated_at DESC LIMIT ?",
        )
        .bind(limit as i64)
        .fetch_all(self.pool())
        .await
        .map_err(DataError::Sqlite)?;

        Ok(rows.into_iter().map(row_to_profile).collect())
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

    fn sample_profile() -> UserProfile {
        UserProfile {
            id: uuid::Uuid::new_v4().to_string(),
            matricule: "M123".to_string(),
            nom: "Dupont".to_string(),
            prenom: "Jean".to_string(),
            full_name: "Jean Dupont".to_string(),
            avatar: None,
            ministere: Some("Finances".to_string()),
            sexe: Some("M".to_string()),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_save_and_find_by_matricule() {
        let store = test_store().await;
        let profile = sample_profile();
        store.save(&profile).await.unwrap();

        let found = store.find_by_matricule("M123").await.unwrap().unwrap();
        assert_eq!(found.full_name, "Jean Dupont");
    }

    #[tokio::test]
    async fn test_save_upserts_on_matricule_conflict() {
        let store = test_store().await;
        let mut profile = sample_profile();
        store.save(&profile).await.unwrap();

        profile.nom = "Martin".to_string();
        profile.full_name = "Jean Martin".to_string();
        store.save(&profile).await.unwrap();

        let all = store.list_all(10).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].nom, "Martin");
    }
}
