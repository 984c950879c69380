use clap::{Parser, Subcommand};

use std::path::PathBuf;

use super::config::{CacheBackendType, EvictionPolicy, SecretsBackend};
use super::constants::{
    ENV_CACHE_BACKEND, ENV_CACHE_EVICTION_POLICY, ENV_CACHE_MAX_ENTRIES, ENV_CACHE_REDIS_URL,
    ENV_CB_FAILURE_THRESHOLD, ENV_CB_RESET_TIMEOUT_MS, ENV_CONFIG, ENV_DEBUG, ENV_HOST,
    ENV_MAX_PENDING, ENV_MAX_RETRIES, ENV_NO_UPDATE_CHECK, ENV_OVERFLOW_QUEUE_CAPACITY, ENV_PORT,
    ENV_SECRETS_BACKEND, ENV_STREAM_URL,
};

#[derive(Parser)]
#[command(name = "chat-core")]
#[command(version, about = "Resilient messaging core for the chat platform", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Server host address
    #[arg(long, short = 'H', global = true, env = ENV_HOST)]
    pub host: Option<String>,

    /// Server port
    #[arg(long, short = 'p', global = true, env = ENV_PORT)]
    pub port: Option<u16>,

    /// Disable authentication (for development)
    #[arg(long, global = true)]
    pub no_auth: bool,

    /// Enable debug logging
    #[arg(long, global = true, env = ENV_DEBUG)]
    pub debug: bool,

    /// Path to config file
    #[arg(long, short = 'c', global = true, env = ENV_CONFIG)]
    pub config: Option<PathBuf>,

    /// Redis-compatible stream endpoint URL
    #[arg(long, global = true, env = ENV_STREAM_URL)]
    pub stream_url: Option<String>,

    /// Path to the primary SQLite store
    #[arg(long, global = true)]
    pub store_path: Option<PathBuf>,

    /// CircuitBreaker consecutive-failure threshold before opening
    #[arg(long, global = true, env = ENV_CB_FAILURE_THRESHOLD)]
    pub cb_failure_threshold: Option<u32>,

    /// CircuitBreaker reset timeout in milliseconds
    #[arg(long, global = true, env = ENV_CB_RESET_TIMEOUT_MS)]
    pub cb_reset_timeout_ms: Option<u64>,

    /// Maximum retry attempts before escalating an entry to the DLQ
    #[arg(long, global = true, env = ENV_MAX_RETRIES)]
    pub max_retries: Option<u32>,

    /// Capacity of the in-process overflow queue
    #[arg(long, global = true, env = ENV_OVERFLOW_QUEUE_CAPACITY)]
    pub overflow_queue_capacity: Option<usize>,

    /// Maximum pending outbound events per socket session
    #[arg(long, global = true, env = ENV_MAX_PENDING)]
    pub max_pending: Option<usize>,

    /// Cache backend (memory or redis)
    #[arg(long, global = true, env = ENV_CACHE_BACKEND, value_parser = parse_cache_backend_type)]
    pub cache_backend: Option<CacheBackendType>,

    /// Cache max entries
    #[arg(long, global = true, env = ENV_CACHE_MAX_ENTRIES)]
    pub cache_max_entries: Option<u64>,

    /// Cache eviction policy (lru or lfu)
    #[arg(long, global = true, env = ENV_CACHE_EVICTION_POLICY, value_parser = parse_eviction_policy)]
    pub cache_eviction_policy: Option<EvictionPolicy>,

    /// Redis URL for the cache backend, if distinct from the stream URL
    #[arg(long, global = true, env = ENV_CACHE_REDIS_URL)]
    pub cache_redis_url: Option<String>,

    /// Secrets backend (file or env)
    #[arg(long, global = true, env = ENV_SECRETS_BACKEND, value_parser = parse_secrets_backend)]
    pub secrets_backend: Option<SecretsBackend>,

    /// Disable the startup update check
    #[arg(long, global = true, env = ENV_NO_UPDATE_CHECK)]
    pub no_update_check: bool,
}

fn parse_cache_backend_type(s: &str) -> Result<CacheBackendType, String> {
    match s.to_lowercase().as_str() {
        "memory" => Ok(CacheBackendType::Memory),
        "redis" => Ok(CacheBackendType::Redis),
        _ => Err(format!(
            "Invalid cache backend '{}'. Valid options: memory, redis",
            s
        )),
    }
}

fn parse_eviction_policy(s: &str) -> Result<EvictionPolicy, String> {
    match s.to_lowercase().as_str() {
        "lru" => Ok(EvictionPolicy::Lru),
        "lfu" => Ok(EvictionPolicy::Lfu),
        _ => Err(format!(
            "Invalid eviction policy '{}'. Valid options: lru, lfu",
            s
        )),
    }
}

fn parse_secrets_backend(s: &str) -> Result<SecretsBackend, String> {
    match s.to_lowercase().as_str() {
        "file" => Ok(SecretsBackend::File),
        "env" => Ok(SecretsBackend::Env),
        _ => Err(format!(
            "Invalid secrets backend '{}'. Valid options: file, env",
            s
        )),
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the messaging core (default if no subcommand given)
    Start,
    /// Administrative subcommands
    #[command(subcommand)]
    System(SystemCommands),
    /// Prune expired technical-stream entries and cache rows
    Prune {
        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Subcommand)]
pub enum SystemCommands {
    /// Print resolved configuration and exit
    Config,
    /// Print stream/consumer group health and exit
    Status,
}

/// Plain mirror of the parsed CLI flags, independent of `clap` so it can be
/// constructed directly in tests.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub no_auth: bool,
    pub debug: bool,
    pub config: Option<PathBuf>,
    pub stream_url: Option<String>,
    pub store_path: Option<PathBuf>,
    pub cb_failure_threshold: Option<u32>,
    pub cb_reset_timeout_ms: Option<u64>,
    pub max_retries: Option<u32>,
    pub overflow_queue_capacity: Option<usize>,
    pub max_pending: Option<usize>,
    pub cache_backend: Option<CacheBackendType>,
    pub cache_max_entries: Option<u64>,
    pub cache_eviction_policy: Option<EvictionPolicy>,
    pub cache_redis_url: Option<String>,
    pub secrets_backend: Option<SecretsBackend>,
    pub no_update_check: bool,
}

/// Parse CLI args, returning the plain config plus any subcommand requested.
pub fn parse() -> (CliConfig, Option<Commands>) {
    let cli = Cli::parse();
    let config = CliConfig {
        host: cli.host,
        port: cli.port,
        no_auth: cli.no_auth,
        debug: cli.debug,
        config: cli.config,
        stream_url: cli.stream_url,
        store_path: cli.store_path,
        cb_failure_threshold: cli.cb_failure_threshold,
        cb_reset_timeout_ms: cli.cb_reset_timeout_ms,
        max_retries: cli.max_retries,
        overflow_queue_capacity: cli.overflow_queue_capacity,
        max_pending: cli.max_pending,
        cache_backend: cli.cache_backend,
        cache_max_entries: cli.cache_max_entries,
        cache_eviction_policy: cli.cache_eviction_policy,
        cache_redis_url: cli.cache_redis_url,
        secrets_backend: cli.secrets_backend,
        no_update_check: cli.no_update_check,
    };
    (config, cli.command)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cache_backend_type() {
        assert_eq!(
            parse_cache_backend_type("redis").unwrap(),
            CacheBackendType::Redis
        );
        assert_eq!(
            parse_cache_backend_type("MEMORY").unwrap(),
            CacheBackendType::Memory
        );
        assert!(parse_cache_backend_type("bogus").is_err());
    }

    #[test]
    fn test_parse_eviction_policy() {
        assert_eq!(parse_eviction_policy("lru").unwrap(), EvictionPolicy::Lru);
        assert_eq!(parse_eviction_policy("LFU").unwrap(), EvictionPolicy::Lfu);
        assert!(parse_eviction_policy("bogus").is_err());
    }

    #[test]
    fn test_parse_secrets_backend() {
        assert_eq!(parse_secrets_backend("file").unwrap(), SecretsBackend::File);
        assert_eq!(parse_secrets_backend("ENV").unwrap(), SecretsBackend::Env);
        assert!(parse_secrets_backend("bogus").is_err());
    }

    #[test]
    fn test_cli_config_default() {
        let config = CliConfig::default();
        assert!(config.host.is_none());
        assert!(!config.no_auth);
        assert!(!config.debug);
    }
}
