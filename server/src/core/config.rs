use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::utils::file::expand_path;

use super::cli::CliConfig;
use super::constants::{
    APP_DOT_FOLDER, CONFIG_FILE_NAME, DEFAULT_CACHE_MAX_ENTRIES, DEFAULT_CB_FAILURE_THRESHOLD,
    DEFAULT_CB_RESET_TIMEOUT_MS, DEFAULT_DELIVERY_WORKER_POOL_SIZE, DEFAULT_HOST,
    DEFAULT_MAX_PENDING, DEFAULT_MEMORY_BUDGET_BYTES, DEFAULT_OVERFLOW_QUEUE_CAPACITY,
    DEFAULT_PORT, DEFAULT_RETRY_BASE_DELAY_MS, DEFAULT_RETRY_SCAN_INTERVAL_MS, DEFAULT_STREAM_URL,
    ENV_SECRETS_ENV_PREFIX, SECRETS_DEFAULT_ENV_PREFIX, SHUTDOWN_TIMEOUT_SECS, SQLITE_DB_FILENAME,
};

// =============================================================================
// Cache Backend Enum
// =============================================================================

/// Cache backend type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackendType {
    #[default]
    Memory,
    Redis,
}

impl fmt::Display for CacheBackendType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheBackendType::Memory => write!(f, "memory"),
            CacheBackendType::Redis => write!(f, "redis"),
        }
    }
}

// =============================================================================
// Eviction Policy Enum
// =============================================================================

/// Cache eviction policy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EvictionPolicy {
    #[default]
    Lru,
    Lfu,
}

impl fmt::Display for EvictionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvictionPolicy::Lru => write!(f, "lru"),
            EvictionPolicy::Lfu => write!(f, "lfu"),
        }
    }
}

// =============================================================================
// Secrets Backend Enum (trimmed — see DESIGN.md)
// =============================================================================

/// Secrets backend for the shared HS256 signing key
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SecretsBackend {
    #[default]
    File,
    Env,
}

impl fmt::Display for SecretsBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SecretsBackend::File => write!(f, "file"),
            SecretsBackend::Env => write!(f, "env"),
        }
    }
}

// =============================================================================
// File-backed config (every field optional; merges CLI-path file over profile)
// =============================================================================

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ServerFileConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AuthFileConfig {
    pub enabled: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct StreamFileConfig {
    pub url: Option<String>,
    pub consumer_group: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct CacheFileConfig {
    pub backend: Option<CacheBackendType>,
    pub max_entries: Option<u64>,
    pub eviction_policy: Option<EvictionPolicy>,
    pub redis_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct CircuitBreakerFileConfig {
    pub failure_threshold: Option<u32>,
    pub reset_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RetryFileConfig {
    pub max_retries: Option<u32>,
    pub base_delay_ms: Option<u64>,
    pub scan_interval_ms: Option<u64>,
    pub overflow_queue_capacity: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DeliveryFileConfig {
    pub worker_pool_size: Option<usize>,
    pub max_pending: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SecretsFileConfig {
    pub backend: Option<SecretsBackend>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct UpdateFileConfig {
    pub enabled: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ShutdownFileConfig {
    pub grace_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct MemoryFileConfig {
    pub budget_bytes: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct FileConfig {
    pub server: Option<ServerFileConfig>,
    pub auth: Option<AuthFileConfig>,
    pub stream: Option<StreamFileConfig>,
    pub cache: Option<CacheFileConfig>,
    pub circuit_breaker: Option<CircuitBreakerFileConfig>,
    pub retry: Option<RetryFileConfig>,
    pub delivery: Option<DeliveryFileConfig>,
    pub secrets: Option<SecretsFileConfig>,
    pub update: Option<UpdateFileConfig>,
    pub shutdown: Option<ShutdownFileConfig>,
    pub memory: Option<MemoryFileConfig>,
    pub debug: Option<bool>,
    #[serde(flatten)]
    pub extra: serde_json::Value,
}

impl FileConfig {
    /// Merge `overlay` on top of `self`, preferring overlay's `Some` values field-by-field.
    pub fn merge(&mut self, overlay: FileConfig) {
        self.server = merge_opt(self.server.take(), overlay.server, |mut b, t| {
            if t.host.is_some() {
                b.host = t.host;
            }
            if t.port.is_some() {
                b.port = t.port;
            }
            b
        });
        self.auth = merge_opt(self.auth.take(), overlay.auth, |mut b, t| {
            if t.enabled.is_some() {
                b.enabled = t.enabled;
            }
            b
        });
        self.stream = merge_opt(self.stream.take(), overlay.stream, |mut b, t| {
            if t.url.is_some() {
                b.url = t.url;
            }
            if t.consumer_group.is_some() {
                b.consumer_group = t.consumer_group;
            }
            b
        });
        self.cache = merge_opt(self.cache.take(), overlay.cache, |mut b, t| {
            if t.backend.is_some() {
                b.backend = t.backend;
            }
            if t.max_entries.is_some() {
                b.max_entries = t.max_entries;
            }
            if t.eviction_policy.is_some() {
                b.eviction_policy = t.eviction_policy;
            }
            if t.redis_url.is_some() {
                b.redis_url = t.redis_url;
            }
            b
        });
        self.circuit_breaker = merge_opt(
            self.circuit_breaker.take(),
            overlay.circuit_breaker,
            |mut b, t| {
                if t.failure_threshold.is_some() {
                    b.failure_threshold = t.failure_threshold;
                }
                if t.reset_timeout_ms.is_some() {
                    b.reset_timeout_ms = t.reset_timeout_ms;
                }
                b
            },
        );
        self.retry = merge_opt(self.retry.take(), overlay.retry, |mut b, t| {
            if t.max_retries.is_some() {
                b.max_retries = t.max_retries;
            }
            if t.base_delay_ms.is_some() {
                b.base_delay_ms = t.base_delay_ms;
            }
            if t.scan_interval_ms.is_some() {
                b.scan_interval_ms = t.scan_interval_ms;
            }
            if t.overflow_queue_capacity.is_some() {
                b.overflow_queue_capacity = t.overflow_queue_capacity;
            }
            b
        });
        self.delivery = merge_opt(self.delivery.take(), overlay.delivery, |mut b, t| {
            if t.worker_pool_size.is_some() {
                b.worker_pool_size = t.worker_pool_size;
            }
            if t.max_pending.is_some() {
                b.max_pending = t.max_pending;
            }
            b
        });
        self.secrets = merge_opt(self.secrets.take(), overlay.secrets, |mut b, t| {
            if t.backend.is_some() {
                b.backend = t.backend;
            }
            b
        });
        self.update = merge_opt(self.update.take(), overlay.update, |mut b, t| {
            if t.enabled.is_some() {
                b.enabled = t.enabled;
            }
            b
        });
        self.shutdown = merge_opt(self.shutdown.take(), overlay.shutdown, |mut b, t| {
            if t.grace_secs.is_some() {
                b.grace_secs = t.grace_secs;
            }
            b
        });
        self.memory = merge_opt(self.memory.take(), overlay.memory, |mut b, t| {
            if t.budget_bytes.is_some() {
                b.budget_bytes = t.budget_bytes;
            }
            b
        });
        if overlay.debug.is_some() {
            self.debug = overlay.debug;
        }
    }
}

fn merge_opt<T>(base: Option<T>, top: Option<T>, f: impl FnOnce(T, T) -> T) -> Option<T>
where
    T: Default,
{
    match (base, top) {
        (Some(b), Some(t)) => Some(f(b, t)),
        (None, Some(t)) => Some(t),
        (b, None) => b,
    }
}

// =============================================================================
// Runtime configuration (fully resolved, no Options)
// =============================================================================

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub enabled: bool,
}

#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub url: String,
    pub consumer_group: String,
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub backend: CacheBackendType,
    pub max_entries: u64,
    pub eviction_policy: EvictionPolicy,
    pub redis_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub reset_timeout_ms: u64,
}

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub scan_interval_ms: u64,
    pub overflow_queue_capacity: usize,
}

#[derive(Debug, Clone)]
pub struct DeliveryConfig {
    pub worker_pool_size: usize,
    pub max_pending: usize,
}

#[derive(Debug, Clone)]
pub struct SecretsConfig {
    pub backend: SecretsBackend,
    pub env_prefix: String,
}

#[derive(Debug, Clone)]
pub struct UpdateConfig {
    pub enabled: bool,
}

#[derive(Debug, Clone)]
pub struct ShutdownConfig {
    pub grace_secs: u64,
}

#[derive(Debug, Clone)]
pub struct MemoryConfig {
    pub budget_bytes: u64,
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub sqlite_path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub stream: StreamConfig,
    pub cache: CacheConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub retry: RetryConfig,
    pub delivery: DeliveryConfig,
    pub secrets: SecretsConfig,
    pub update: UpdateConfig,
    pub shutdown: ShutdownConfig,
    pub memory: MemoryConfig,
    pub store: StoreConfig,
    pub debug: bool,
}

impl AppConfig {
    /// Load configuration in the order: profile file < CLI/local file < CLI flags < env vars.
    pub fn load(cli: &CliConfig) -> Result<Self> {
        let mut file_config = Self::read_file_config(get_profile_config_path().as_deref())?;

        let explicit_path = cli.config.as_deref();
        let overlay_path = match explicit_path {
            Some(p) => Some(p.to_path_buf()),
            None => {
                let local = PathBuf::from(CONFIG_FILE_NAME);
                local.exists().then_some(local)
            }
        };
        if let Some(path) = overlay_path {
            let overlay = Self::read_file_config(Some(&path))?;
            file_config.merge(overlay);
        }

        let data_dir = resolve_data_dir();

        let server = ServerConfig {
            host: cli
                .host
                .clone()
                .or_else(|| file_config.server.as_ref().and_then(|s| s.host.clone()))
                .unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: cli
                .port
                .or_else(|| file_config.server.as_ref().and_then(|s| s.port))
                .unwrap_or(DEFAULT_PORT),
        };

        let auth = AuthConfig {
            enabled: if cli.no_auth {
                false
            } else {
                file_config
                    .auth
                    .as_ref()
                    .and_then(|a| a.enabled)
                    .unwrap_or(true)
            },
        };

        let stream = StreamConfig {
            url: cli
                .stream_url
                .clone()
                .or_else(|| file_config.stream.as_ref().and_then(|s| s.url.clone()))
                .unwrap_or_else(|| DEFAULT_STREAM_URL.to_string()),
            consumer_group: file_config
                .stream
                .as_ref()
                .and_then(|s| s.consumer_group.clone())
                .unwrap_or_else(|| super::constants::DEFAULT_CONSUMER_GROUP.to_string()),
        };

        let cache = CacheConfig {
            backend: cli
                .cache_backend
                .or_else(|| file_config.cache.as_ref().and_then(|c| c.backend))
                .unwrap_or_default(),
            max_entries: cli
                .cache_max_entries
                .or_else(|| file_config.cache.as_ref().and_then(|c| c.max_entries))
                .unwrap_or(DEFAULT_CACHE_MAX_ENTRIES),
            eviction_policy: cli
                .cache_eviction_policy
                .or_else(|| file_config.cache.as_ref().and_then(|c| c.eviction_policy))
                .unwrap_or_default(),
            redis_url: cli
                .cache_redis_url
                .clone()
                .or_else(|| file_config.cache.as_ref().and_then(|c| c.redis_url.clone())),
        };

        let circuit_breaker = CircuitBreakerConfig {
            failure_threshold: cli
                .cb_failure_threshold
                .or_else(|| {
                    file_config
                        .circuit_breaker
                        .as_ref()
                        .and_then(|c| c.failure_threshold)
                })
                .unwrap_or(DEFAULT_CB_FAILURE_THRESHOLD),
            reset_timeout_ms: cli
                .cb_reset_timeout_ms
                .or_else(|| {
                    file_config
                        .circuit_breaker
                        .as_ref()
                        .and_then(|c| c.reset_timeout_ms)
                })
                .unwrap_or(DEFAULT_CB_RESET_TIMEOUT_MS),
        };

        let retry = RetryConfig {
            max_retries: cli
                .max_retries
                .or_else(|| file_config.retry.as_ref().and_then(|r| r.max_retries))
                .unwrap_or(super::constants::DEFAULT_MAX_RETRIES),
            base_delay_ms: file_config
                .retry
                .as_ref()
                .and_then(|r| r.base_delay_ms)
                .unwrap_or(DEFAULT_RETRY_BASE_DELAY_MS),
            scan_interval_ms: file_config
                .retry
                .as_ref()
                .and_then(|r| r.scan_interval_ms)
                .unwrap_or(DEFAULT_RETRY_SCAN_INTERVAL_MS),
            overflow_queue_capacity: cli
                .overflow_queue_capacity
                .or_else(|| {
                    file_config
                        .retry
                        .as_ref()
                        .and_then(|r| r.overflow_queue_capacity)
                })
                .unwrap_or(DEFAULT_OVERFLOW_QUEUE_CAPACITY),
        };

        let delivery = DeliveryConfig {
            worker_pool_size: file_config
                .delivery
                .as_ref()
                .and_then(|d| d.worker_pool_size)
                .unwrap_or(DEFAULT_DELIVERY_WORKER_POOL_SIZE),
            max_pending: cli
                .max_pending
                .or_else(|| file_config.delivery.as_ref().and_then(|d| d.max_pending))
                .unwrap_or(DEFAULT_MAX_PENDING),
        };

        let secrets = SecretsConfig {
            backend: cli
                .secrets_backend
                .or_else(|| file_config.secrets.as_ref().and_then(|s| s.backend))
                .unwrap_or_default(),
            env_prefix: std::env::var(ENV_SECRETS_ENV_PREFIX)
                .unwrap_or_else(|_| SECRETS_DEFAULT_ENV_PREFIX.to_string()),
        };

        let update = UpdateConfig {
            enabled: if cli.no_update_check {
                false
            } else {
                file_config
                    .update
                    .as_ref()
                    .and_then(|u| u.enabled)
                    .unwrap_or(true)
            },
        };

        let shutdown = ShutdownConfig {
            grace_secs: file_config
                .shutdown
                .as_ref()
                .and_then(|s| s.grace_secs)
                .unwrap_or(SHUTDOWN_TIMEOUT_SECS),
        };

        let memory = MemoryConfig {
            budget_bytes: file_config
                .memory
                .as_ref()
                .and_then(|m| m.budget_bytes)
                .unwrap_or(DEFAULT_MEMORY_BUDGET_BYTES),
        };

        let store = StoreConfig {
            sqlite_path: cli
                .store_path
                .clone()
                .unwrap_or_else(|| data_dir.join(SQLITE_DB_FILENAME)),
        };

        let debug = cli.debug || file_config.debug.unwrap_or(false);

        let config = Self {
            server,
            auth,
            stream,
            cache,
            circuit_breaker,
            retry,
            delivery,
            secrets,
            update,
            shutdown,
            memory,
            store,
            debug,
        };

        config.validate()?;
        Ok(config)
    }

    fn read_file_config(path: Option<&Path>) -> Result<FileConfig> {
        let Some(path) = path else {
            return Ok(FileConfig::default());
        };
        match fs::read_to_string(path) {
            Ok(contents) => {
                serde_json::from_str(&contents).context("Failed to parse configuration file")
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(FileConfig::default()),
            Err(e) => Err(e).context("Failed to read configuration file"),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.server.host.is_empty() {
            anyhow::bail!("Configuration error: server.host must not be empty");
        }
        if self.server.port == 0 {
            anyhow::bail!("Configuration error: server.port must be greater than 0");
        }
        if self.cache.backend == CacheBackendType::Redis && self.cache.redis_url.is_none() {
            anyhow::bail!(
                "Configuration error: cache.redis_url is required when cache.backend is 'redis'"
            );
        }
        if self.circuit_breaker.failure_threshold == 0 {
            anyhow::bail!(
                "Configuration error: circuit_breaker.failure_threshold must be greater than 0"
            );
        }
        if self.delivery.max_pending == 0 {
            anyhow::bail!("Configuration error: delivery.max_pending must be greater than 0");
        }
        if !self.auth.enabled && is_all_interfaces(&self.server.host) {
            tracing::warn!(
                host = %self.server.host,
                "Authentication is disabled while binding to all network interfaces. \
                 This exposes an unauthenticated server to your network."
            );
        }
        Ok(())
    }
}

fn get_profile_config_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|dirs| dirs.home_dir().join(APP_DOT_FOLDER).join(CONFIG_FILE_NAME))
}

fn resolve_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var(super::constants::ENV_DATA_DIR) {
        return expand_path(&dir);
    }
    directories::ProjectDirs::from("", "", super::constants::APP_NAME)
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(format!("./{}", APP_DOT_FOLDER)))
}

pub fn is_all_interfaces(host: &str) -> bool {
    matches!(host, "0.0.0.0" | "::" | "[::]")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_config_parse_full() {
        let json = r#"{
            "server": { "host": "0.0.0.0", "port": 8080 },
            "auth": { "enabled": false }
        }"#;
        let config: FileConfig = serde_json::from_str(json).unwrap();

        assert_eq!(
            config.server.as_ref().unwrap().host,
            Some("0.0.0.0".to_string())
        );
        assert_eq!(config.server.as_ref().unwrap().port, Some(8080));
        assert_eq!(config.auth.as_ref().unwrap().enabled, Some(false));
    }

    #[test]
    fn test_file_config_parse_partial() {
        let json = r#"{ "server": { "port": 9000 } }"#;
        let config: FileConfig = serde_json::from_str(json).unwrap();

        assert!(config.server.as_ref().unwrap().host.is_none());
        assert_eq!(config.server.as_ref().unwrap().port, Some(9000));
        assert!(config.auth.is_none());
    }

    #[test]
    fn test_file_config_merge() {
        let mut base = FileConfig {
            server: Some(ServerFileConfig {
                host: Some("base.host".to_string()),
                port: Some(1000),
            }),
            auth: Some(AuthFileConfig {
                enabled: Some(true),
            }),
            debug: Some(false),
            ..Default::default()
        };

        let overlay = FileConfig {
            server: Some(ServerFileConfig {
                host: None,
                port: Some(2000),
            }),
            auth: Some(AuthFileConfig {
                enabled: Some(false),
            }),
            debug: Some(true),
            ..Default::default()
        };

        base.merge(overlay);

        assert_eq!(
            base.server.as_ref().unwrap().host,
            Some("base.host".to_string())
        );
        assert_eq!(base.server.as_ref().unwrap().port, Some(2000));
        assert_eq!(base.auth.as_ref().unwrap().enabled, Some(false));
        assert_eq!(base.debug, Some(true));
    }

    #[test]
    fn test_app_config_defaults() {
        let cli = CliConfig::default();
        let config = AppConfig::load(&cli).unwrap();

        assert_eq!(config.server.host, DEFAULT_HOST);
        assert_eq!(config.server.port, DEFAULT_PORT);
        assert!(config.auth.enabled);
        assert!(!config.debug);
    }

    #[test]
    fn test_app_config_cli_override() {
        let cli = CliConfig {
            host: Some("cli.host".to_string()),
            port: Some(3000),
            no_auth: true,
            debug: true,
            ..Default::default()
        };
        let config = AppConfig::load(&cli).unwrap();

        assert_eq!(config.server.host, "cli.host");
        assert_eq!(config.server.port, 3000);
        assert!(!config.auth.enabled);
        assert!(config.debug);
    }

    #[test]
    fn test_app_config_validation_empty_host() {
        let cli = CliConfig {
            host: Some(String::new()),
            ..Default::default()
        };
        let result = AppConfig::load(&cli);
        assert!(result.is_err());
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("server.host must not be empty")
        );
    }

    #[test]
    fn test_app_config_validation_port_zero() {
        let cli = CliConfig {
            port: Some(0),
            ..Default::default()
        };
        let result = AppConfig::load(&cli);
        assert!(result.is_err());
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("server.port must be greater than 0")
        );
    }

    #[test]
    fn test_app_config_validation_redis_url_required() {
        let cli = CliConfig {
            cache_backend: Some(CacheBackendType::Redis),
            ..Default::default()
        };
        let result = AppConfig::load(&cli);
        assert!(result.is_err());
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("cache.redis_url is required")
        );
    }

    #[test]
    fn test_app_config_update_defaults() {
        let cli = CliConfig::default();
        let config = AppConfig::load(&cli).unwrap();
        assert!(config.update.enabled);
    }

    #[test]
    fn test_app_config_update_cli_override() {
        let cli = CliConfig {
            no_update_check: true,
            ..Default::default()
        };
        let config = AppConfig::load(&cli).unwrap();
        assert!(!config.update.enabled);
    }

    #[test]
    fn test_is_all_interfaces() {
        assert!(is_all_interfaces("0.0.0.0"));
        assert!(is_all_interfaces("::"));
        assert!(is_all_interfaces("[::]"));
        assert!(!is_all_interfaces("127.0.0.1"));
        assert!(!is_all_interfaces("localhost"));
    }
}
