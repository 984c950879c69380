//! Secret storage for the shared HS256 JWT signing key.
//!
//! All secrets live in a single JSON vault to minimize I/O. Two backends are
//! supported:
//!
//! | Backend | Use |
//! |---------|-----|
//! | File    | default — JSON vault under the data directory |
//! | Env     | reads the key straight from an environment variable, no vault |

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use super::constants::{ENV_SECRETS_BACKEND, JWT_SIGNING_KEY_LENGTH, SECRET_KEY_JWT_SIGNING};
use super::storage::AppStorage;
use crate::utils::crypto;

const FILE_SECRETS_FILENAME: &str = "secrets.json";

/// Secret storage backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecretBackend {
    /// JSON vault on disk (default)
    File(PathBuf),
    /// Read directly from an environment variable, never persisted
    Env,
}

impl SecretBackend {
    pub fn name(&self) -> &'static str {
        match self {
            Self::File(_) => "file",
            Self::Env => "env",
        }
    }

    pub fn is_file(&self) -> bool {
        matches!(self, Self::File(_))
    }
}

/// Metadata associated with a stored secret
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretMetadata {
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SecretMetadata {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            created_at: now,
            updated_at: now,
        }
    }
}

impl Default for SecretMetadata {
    fn default() -> Self {
        Self::new()
    }
}

/// A secret with its value and metadata
#[derive(Clone, Serialize, Deserialize)]
pub struct Secret {
    pub value: String,
    pub metadata: SecretMetadata,
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Secret")
            .field("value", &"[REDACTED]")
            .field("metadata", &self.metadata)
            .finish()
    }
}

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            metadata: SecretMetadata::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct SecretVault {
    secrets: HashMap<String, Secret>,
}

/// Manages the shared HS256 signing key, auto-generating it on first run.
#[derive(Debug, Clone)]
pub struct SecretManager {
    backend: SecretBackend,
    vault: Arc<RwLock<SecretVault>>,
    save_mutex: Arc<tokio::sync::Mutex<()>>,
}

impl SecretManager {
    pub async fn init(storage: &AppStorage) -> Result<Self> {
        let backend = Self::detect_backend(storage);
        let vault = Self::load_vault(&backend).await?;

        let manager = Self {
            backend,
            vault: Arc::new(RwLock::new(vault)),
            save_mutex: Arc::new(tokio::sync::Mutex::new(())),
        };

        tracing::debug!(
            backend = manager.backend.name(),
            "Secret manager initialized"
        );
        manager.ensure_jwt_signing_key().await?;
        Ok(manager)
    }

    pub fn backend(&self) -> &SecretBackend {
        &self.backend
    }

    pub async fn set(&self, name: &str, mut secret: Secret) -> Result<()> {
        {
            let mut vault = self.vault.write().await;
            if let Some(existing) = vault.secrets.get(name) {
                secret.metadata.created_at = existing.metadata.created_at;
            }
            secret.metadata.updated_at = Utc::now();
            vault.secrets.insert(name.to_string(), secret);
        }
        self.save_vault().await?;
        tracing::debug!(name, "Stored secret");
        Ok(())
    }

    pub async fn get(&self, name: &str) -> Result<Option<Secret>> {
        if self.backend == SecretBackend::Env {
            let env_name = format!("CHAT_CORE_SECRET_{}", name.to_uppercase());
            return Ok(std::env::var(&env_name).ok().map(Secret::new));
        }
        let vault = self.vault.read().await;
        Ok(vault.secrets.get(name).cloned())
    }

    pub async fn exists(&self, name: &str) -> bool {
        self.get(name).await.ok().flatten().is_some()
    }

    pub async fn get_value(&self, name: &str) -> Result<Option<String>> {
        Ok(self.get(name).await?.map(|s| s.value))
    }

    /// Get the JWT signing key, creating and persisting it if it doesn't exist.
    pub async fn get_jwt_signing_key(&self) -> Result<Vec<u8>> {
        match self.get_value(SECRET_KEY_JWT_SIGNING).await {
            Ok(Some(key_hex)) => {
                if let Ok(key) = crypto::decode_hex(&key_hex)
                    && key.len() == JWT_SIGNING_KEY_LENGTH
                {
                    return Ok(key);
                }
                tracing::warn!("Stored JWT signing key has invalid format, regenerating");
                self.create_jwt_signing_key().await
            }
            Ok(None) => self.create_jwt_signing_key().await,
            Err(e) => {
                tracing::warn!("Failed to read JWT signing key: {}, regenerating", e);
                self.create_jwt_signing_key().await
            }
        }
    }

    async fn ensure_jwt_signing_key(&self) -> Result<()> {
        if self.backend == SecretBackend::Env {
            // Env backend is not writable; caller must supply the variable.
            return Ok(());
        }
        if self.exists(SECRET_KEY_JWT_SIGNING).await {
            tracing::debug!("JWT signing key exists");
            return Ok(());
        }
        self.create_jwt_signing_key().await?;
        Ok(())
    }

    async fn create_jwt_signing_key(&self) -> Result<Vec<u8>> {
        let key = crypto::generate_signing_key();
        let key_hex = crypto::encode_hex(&key);
        self.set(SECRET_KEY_JWT_SIGNING, Secret::new(key_hex)).await?;
        tracing::debug!("Created new JWT signing key");
        Ok(key)
    }

    // === Internal ===

    async fn load_vault(backend: &SecretBackend) -> Result<SecretVault> {
        match backend {
            SecretBackend::File(path) => Self::load_vault_from_file(path).await,
            SecretBackend::Env => Ok(SecretVault::default()),
        }
    }

    async fn load_vault_from_file(path: &PathBuf) -> Result<SecretVault> {
        match tokio::fs::read_to_string(path).await {
            Ok(json) => {
                let vault: SecretVault =
                    serde_json::from_str(&json).context("Failed to parse secrets file")?;
                tracing::debug!(count = vault.secrets.len(), "Loaded secrets from file");
                Ok(vault)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("No existing secrets file, creating new vault");
                Ok(SecretVault::default())
            }
            Err(e) => Err(anyhow!("Failed to load secrets file: {}", e)),
        }
    }

    async fn save_vault(&self) -> Result<()> {
        let _guard = self.save_mutex.lock().await;
        match &self.backend {
            SecretBackend::File(path) => self.save_vault_to_file(path).await,
            SecretBackend::Env => Ok(()),
        }
    }

    async fn save_vault_to_file(&self, path: &PathBuf) -> Result<()> {
        let vault = self.vault.read().await;
        let json = serde_json::to_string_pretty(&*vault).context("Failed to serialize vault")?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .context("Failed to create secrets directory")?;
        }

        tokio::fs::write(path, json)
            .await
            .context("Failed to write secrets file")?;
        Ok(())
    }

    fn detect_backend(storage: &AppStorage) -> SecretBackend {
        match std::env::var(ENV_SECRETS_BACKEND) {
            Ok(v) if v.eq_ignore_ascii_case("env") => SecretBackend::Env,
            _ => SecretBackend::File(storage.data_dir().join(FILE_SECRETS_FILENAME)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_debug_redacts_value() {
        let secret = Secret::new("super-secret-key");
        let debug = format!("{:?}", secret);
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("super-secret-key"));
    }

    #[test]
    fn test_backend_is_file() {
        assert!(!SecretBackend::Env.is_file());
        assert!(SecretBackend::File(PathBuf::from("/tmp/secrets.json")).is_file());
    }

    #[test]
    fn test_vault_serialization() {
        let mut vault = SecretVault::default();
        vault
            .secrets
            .insert("key1".to_string(), Secret::new("value1"));

        let json = serde_json::to_string(&vault).unwrap();
        let deserialized: SecretVault = serde_json::from_str(&json).unwrap();

        assert_eq!(deserialized.secrets.len(), 1);
        assert_eq!(deserialized.secrets.get("key1").unwrap().value, "value1");
    }

    #[tokio::test]
    async fn test_env_backend_reads_var() {
        // SAFETY: test-only, no concurrent env mutation in this test binary target.
        unsafe {
            std::env::set_var("CHAT_CORE_SECRET_FOO", "bar");
        }
        let backend = SecretBackend::Env;
        let manager = SecretManager {
            backend,
            vault: Arc::new(RwLock::new(SecretVault::default())),
            save_mutex: Arc::new(tokio::sync::Mutex::new(())),
        };
        let value = manager.get_value("foo").await.unwrap();
        assert_eq!(value, Some("bar".to_string()));
        unsafe {
            std::env::remove_var("CHAT_CORE_SECRET_FOO");
        }
    }
}
