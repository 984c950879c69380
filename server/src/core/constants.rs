// =============================================================================
// Application Identity
// =============================================================================

/// Application name in title case (for display and platform directories)
pub const APP_NAME: &str = "ChatCore";

/// Application name in lowercase (for paths and identifiers)
pub const APP_NAME_LOWER: &str = "chat-core";

/// Unix-style dotfile folder name
pub const APP_DOT_FOLDER: &str = ".chat-core";

// =============================================================================
// Configuration Files
// =============================================================================

/// Config file name
pub const CONFIG_FILE_NAME: &str = "chat-core.json";

/// Environment variable for config file path
pub const ENV_CONFIG: &str = "CHAT_CORE_CONFIG";

// =============================================================================
// Environment Variables - Debug
// =============================================================================

/// Environment variable for debug mode
pub const ENV_DEBUG: &str = "CHAT_CORE_DEBUG";

// =============================================================================
// Environment Variables - Server
// =============================================================================

/// Environment variable for server host
pub const ENV_HOST: &str = "CHAT_CORE_HOST";

/// Environment variable for server port
pub const ENV_PORT: &str = "CHAT_CORE_PORT";

/// Environment variable for log level/filter
pub const ENV_LOG: &str = "CHAT_CORE_LOG";

// =============================================================================
// Server Defaults
// =============================================================================

/// Default server host
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Default server port
pub const DEFAULT_PORT: u16 = 7745;

/// Max accepted HTTP request body size (health checks only need a few bytes;
/// this just keeps the body-limit layer from being unbounded)
pub const DEFAULT_BODY_LIMIT_BYTES: usize = 64 * 1024;

// =============================================================================
// Environment Variables - Storage
// =============================================================================

/// Environment variable to override data directory
pub const ENV_DATA_DIR: &str = "CHAT_CORE_DATA_DIR";

// =============================================================================
// Environment Variables - Secrets
// =============================================================================

/// Environment variable to force a specific secrets backend.
///
/// Platform-specific values:
/// - macOS: `keychain` (default)
/// - Windows: `credential-manager`
/// - Linux: `file` (default — no system keychain dependency assumed)
/// - All platforms: `file`, `env`
pub const ENV_SECRETS_BACKEND: &str = "CHAT_CORE_SECRETS_BACKEND";

/// Service name for keychain/credential manager entries
pub const SECRET_SERVICE_NAME: &str = "chat-core";

/// Secret key name for the shared HS256 signing key
pub const SECRET_KEY_JWT_SIGNING: &str = "jwt_signing_key";

/// Length of the generated HS256 signing key in bytes (256 bits)
pub const JWT_SIGNING_KEY_LENGTH: usize = 32;

pub const ENV_SECRETS_ENV_PREFIX: &str = "CHAT_CORE_SECRETS_ENV_PREFIX";
pub const SECRETS_DEFAULT_ENV_PREFIX: &str = "CHAT_CORE_SECRET_";

// =============================================================================
// Authentication / Sessions
// =============================================================================

/// Default session TTL in days, used when minting bearer tokens for tests/tools
pub const DEFAULT_SESSION_TTL_DAYS: u32 = 30;

// =============================================================================
// Primary Store (SQLite)
// =============================================================================

/// SQLite database filename
pub const SQLITE_DB_FILENAME: &str = "chat-core.db";

/// SQLite connection pool max connections
pub const SQLITE_MAX_CONNECTIONS: u32 = 10;

/// SQLite busy timeout in seconds
pub const SQLITE_BUSY_TIMEOUT_SECS: u64 = 30;

/// SQLite cache size (negative = KB, so -64000 = 64MB)
pub const SQLITE_CACHE_SIZE: &str = "-64000";

/// SQLite WAL auto-checkpoint threshold (pages, ~4MB at 1000)
pub const SQLITE_WAL_AUTOCHECKPOINT: &str = "1000";

/// WAL checkpoint interval in seconds (5 minutes)
pub const SQLITE_CHECKPOINT_INTERVAL_SECS: u64 = 300;

// =============================================================================
// Deadlines (§5 CONCURRENCY & RESOURCE MODEL)
// =============================================================================

/// Default repository call deadline in milliseconds
pub const DEADLINE_REPOSITORY_MS: u64 = 5_000;

/// Default cache call deadline in milliseconds
pub const DEADLINE_CACHE_MS: u64 = 2_000;

/// Default blocking stream-read deadline in milliseconds
pub const DEADLINE_STREAM_READ_MS: u64 = 30_000;

/// Graceful shutdown grace period in seconds
pub const SHUTDOWN_TIMEOUT_SECS: u64 = 30;

// =============================================================================
// Environment Variables - Streams (Redis Streams fabric)
// =============================================================================

/// Environment variable for the Redis-compatible stream endpoint URL
pub const ENV_STREAM_URL: &str = "CHAT_CORE_STREAM_URL";

/// Default stream endpoint URL (works with Redis, Valkey, Dragonfly)
pub const DEFAULT_STREAM_URL: &str = "redis://127.0.0.1:6379/0";

/// Key prefix for every stream name this core owns
pub const STREAM_KEY_PREFIX: &str = "chat:stream:";

/// Consumer group name used by this core's DeliveryEngine/workers
pub const DEFAULT_CONSUMER_GROUP: &str = "chat-core";

// Canonical stream names (§4.3 StreamManager)
pub const STREAM_WAL: &str = "WAL";
pub const STREAM_RETRY: &str = "RETRY";
pub const STREAM_DLQ: &str = "DLQ";
pub const STREAM_FALLBACK: &str = "FALLBACK";
pub const STREAM_METRICS: &str = "METRICS";
pub const STREAM_MESSAGES_PRIVATE: &str = "messages:private";
pub const STREAM_MESSAGES_GROUP: &str = "messages:group";
pub const STREAM_MESSAGES_CHANNEL: &str = "messages:channel";
pub const STREAM_STATUS_DELIVERED: &str = "status:delivered";
pub const STREAM_STATUS_READ: &str = "status:read";
pub const STREAM_STATUS_EDITED: &str = "status:edited";
pub const STREAM_STATUS_DELETED: &str = "status:deleted";
pub const STREAM_EVENTS_TYPING: &str = "events:typing";
pub const STREAM_EVENTS_REACTIONS: &str = "events:reactions";
pub const STREAM_EVENTS_REPLIES: &str = "events:replies";
pub const STREAM_EVENTS_CONVERSATIONS: &str = "events:conversations";
pub const STREAM_EVENTS_USERS: &str = "events:users";
pub const STREAM_EVENTS_FILES: &str = "events:files";
pub const STREAM_EVENTS_NOTIFICATIONS: &str = "events:notifications";

/// Default MAXLEN for the technical (WAL/Retry/DLQ/Fallback) streams
pub const DEFAULT_MAXLEN_TECHNICAL: u64 = 200_000;

/// Default MAXLEN for the message content streams
pub const DEFAULT_MAXLEN_MESSAGES: u64 = 1_000_000;

/// Default MAXLEN for status/event streams
pub const DEFAULT_MAXLEN_EVENTS: u64 = 500_000;

// =============================================================================
// Resilient Publication Pipeline (§4.2, §4.4, §4.5)
// =============================================================================

/// CircuitBreaker consecutive-failure threshold before opening
pub const ENV_CB_FAILURE_THRESHOLD: &str = "CHAT_CORE_CB_FAILURE_THRESHOLD";
pub const DEFAULT_CB_FAILURE_THRESHOLD: u32 = 5;

/// CircuitBreaker reset timeout (ms) before a Half-Open probe is allowed
pub const ENV_CB_RESET_TIMEOUT_MS: &str = "CHAT_CORE_CB_RESET_TIMEOUT_MS";
pub const DEFAULT_CB_RESET_TIMEOUT_MS: u64 = 30_000;

/// Maximum retry attempts before an entry is escalated to the DLQ
pub const ENV_MAX_RETRIES: &str = "CHAT_CORE_MAX_RETRIES";
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Base backoff delay in milliseconds (exponential, base * 2^attempt)
pub const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 100;

/// Jitter applied to computed backoff delays, as a fraction (±10%)
pub const RETRY_JITTER_FRACTION: f64 = 0.10;

/// Retry Worker scan interval in milliseconds
pub const ENV_RETRY_SCAN_INTERVAL_MS: &str = "CHAT_CORE_RETRY_SCAN_INTERVAL_MS";
pub const DEFAULT_RETRY_SCAN_INTERVAL_MS: u64 = 1_000;

/// Number of entries leased per worker batch (WAL/Retry/Fallback/DLQ scan)
pub const DEFAULT_WORKER_BATCH_SIZE: usize = 64;

/// Maximum length of a DLQ error message, in bytes
pub const DLQ_ERROR_TRUNCATE_BYTES: usize = 300;

/// Required stable duration the CircuitBreaker must remain Closed before the
/// Fallback Worker starts replaying staged entries, in milliseconds
pub const FALLBACK_REPLAY_STABLE_MS: u64 = 5_000;

/// Capacity of the in-process overflow queue absorbing publishes when the
/// stream append itself fails (§4.4)
pub const ENV_OVERFLOW_QUEUE_CAPACITY: &str = "CHAT_CORE_OVERFLOW_QUEUE_CAPACITY";
pub const DEFAULT_OVERFLOW_QUEUE_CAPACITY: usize = 10_000;

// =============================================================================
// Memory Monitor (§4.5, C7)
// =============================================================================

/// Memory Monitor poll interval in milliseconds
pub const MEMORY_MONITOR_INTERVAL_MS: u64 = 10_000;

/// Memory budget in bytes used to compute warning/critical percentages
pub const ENV_MEMORY_BUDGET_BYTES: &str = "CHAT_CORE_MEMORY_BUDGET_BYTES";
pub const DEFAULT_MEMORY_BUDGET_BYTES: u64 = 512 * 1024 * 1024;

/// Warning threshold as a fraction of the memory budget
pub const MEMORY_WARNING_FRACTION: f64 = 0.75;

/// Critical threshold as a fraction of the memory budget
pub const MEMORY_CRITICAL_FRACTION: f64 = 0.90;

// =============================================================================
// DeliveryEngine / Worker Pool (§4.6, §5, §9)
// =============================================================================

/// Number of per-conversation delivery workers in the fixed hashing pool
pub const ENV_DELIVERY_WORKER_POOL_SIZE: &str = "CHAT_CORE_DELIVERY_WORKER_POOL_SIZE";
pub const DEFAULT_DELIVERY_WORKER_POOL_SIZE: usize = 16;

/// TTL for a queued offline pending event, in seconds
pub const PENDING_EVENT_TTL_SECS: u64 = 7 * 24 * 60 * 60;

// =============================================================================
// SocketGateway (§4.8, §5)
// =============================================================================

/// Ping/pong keepalive interval in milliseconds
pub const SOCKET_PING_INTERVAL_MS: u64 = 30_000;

/// Number of consecutive missed pongs before the session is closed
pub const SOCKET_MAX_MISSED_PONGS: u32 = 2;

/// Maximum pending outbound events per session before the gateway closes it
pub const ENV_MAX_PENDING: &str = "CHAT_CORE_MAX_PENDING";
pub const DEFAULT_MAX_PENDING: usize = 1_000;

// =============================================================================
// UserCache (§4.9, C9)
// =============================================================================

/// Cache TTL for a user profile, in seconds (7 days)
pub const CACHE_TTL_USER_PROFILE_SECS: u64 = 7 * 24 * 60 * 60;

/// Cache key version (bump on schema changes to invalidate all cached data)
pub const CACHE_KEY_VERSION: &str = "v1";

/// Environment variable for cache backend (memory or redis)
pub const ENV_CACHE_BACKEND: &str = "CHAT_CORE_CACHE_BACKEND";

/// Environment variable for cache max entries
pub const ENV_CACHE_MAX_ENTRIES: &str = "CHAT_CORE_CACHE_MAX_ENTRIES";

/// Environment variable for cache eviction policy
pub const ENV_CACHE_EVICTION_POLICY: &str = "CHAT_CORE_CACHE_EVICTION_POLICY";

/// Environment variable for the Redis-compatible cache URL (if distinct from the stream URL)
pub const ENV_CACHE_REDIS_URL: &str = "CHAT_CORE_CACHE_REDIS_URL";

/// Default cache max entries
pub const DEFAULT_CACHE_MAX_ENTRIES: u64 = 100_000;

/// Number of most-recent `events:users` entries consumed to eagerly prewarm
/// the UserCache on startup (see DESIGN.md open question #1)
pub const USER_CACHE_PREWARM_COUNT: u64 = 5_000;

// =============================================================================
// PresenceRegistry (§4.7)
// =============================================================================

/// Per-node presence heartbeat interval, refreshing the Redis-mirrored TTL
pub const PRESENCE_HEARTBEAT_INTERVAL_SECS: u64 = 30;

/// TTL applied to mirrored presence records in Redis, in seconds
pub const PRESENCE_TTL_SECS: u64 = 90;

// =============================================================================
// Persisted Key Namespace (§6)
// =============================================================================

pub const KEY_PREFIX_PRESENCE: &str = "chat:cache:presence:";
pub const KEY_PREFIX_USER_DATA: &str = "chat:cache:user_data:";
pub const KEY_PREFIX_ROOMS: &str = "chat:cache:rooms:";

// =============================================================================
// Data Model Limits (§3)
// =============================================================================

/// Maximum message content length after trimming, in bytes
pub const MESSAGE_CONTENT_MAX_BYTES: usize = 10_000;

/// Maximum participants in a GROUP conversation
pub const GROUP_MAX_PARTICIPANTS: usize = 200;

/// Exact participant count for a PRIVATE conversation
pub const PRIVATE_PARTICIPANT_COUNT: usize = 2;

// =============================================================================
// Update Check
// =============================================================================

/// Environment variable to disable the startup update check
pub const ENV_NO_UPDATE_CHECK: &str = "CHAT_CORE_NO_UPDATE_CHECK";
