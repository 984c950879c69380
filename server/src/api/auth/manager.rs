//! Authentication manager
//!
//! The core only validates signed bearer tokens against the shared HS256
//! secret (§1: the service that issues them is an external collaborator).
//! `mint_session` exists so local tooling and tests can produce a token
//! against the same secret without a second signing path.

use anyhow::Result;

use super::jwt::{JwtError, SessionClaims, create_session_token, validate_session_token};
use crate::core::SecretManager;

/// Validates session tokens against the shared HS256 signing secret.
#[derive(Debug)]
pub struct AuthManager {
    signing_key: Vec<u8>,
    enabled: bool,
}

impl AuthManager {
    pub async fn init(secrets: &SecretManager, enabled: bool) -> Result<Self> {
        let signing_key = secrets.get_jwt_signing_key().await?;

        if enabled {
            tracing::debug!("Authentication enabled");
        } else {
            tracing::warn!("Authentication DISABLED");
        }

        Ok(Self { signing_key, enabled })
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Mint a token for `user_id`, signed with the shared secret.
    pub fn mint_session(&self, user_id: &str, auth_method: &str) -> Result<String> {
        create_session_token(&self.signing_key, user_id, auth_method)
    }

    /// Validate a JWT session token
    pub fn validate_session(&self, jwt: &str) -> Result<SessionClaims, JwtError> {
        validate_session_token(jwt, &self.signing_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::storage::AppStorage;

    async fn test_manager(enabled: bool) -> AuthManager {
        let dir = tempfile::tempdir().unwrap();
        let storage = AppStorage::init_for_test(dir.path().to_path_buf());
        let secrets = SecretManager::init(&storage).await.unwrap();
        AuthManager::init(&secrets, enabled).await.unwrap()
    }

    #[tokio::test]
    async fn test_mint_and_validate_round_trips_user_id() {
        let manager = test_manager(true).await;
        let token = manager.mint_session("alice", "test").unwrap();
        let claims = manager.validate_session(&token).unwrap();
        assert_eq!(claims.user_id(), "alice");
    }

    #[tokio::test]
    async fn test_validate_rejects_garbage_token() {
        let manager = test_manager(true).await;
        assert!(manager.validate_session("not-a-jwt").is_err());
    }
}
