//! Resilient messaging core: circuit breaker, resilient publisher, and the
//! background workers draining its technical streams (§2, §9)

pub mod circuit_breaker;
pub mod delivery;
pub mod envelope;
pub mod errors;
pub mod overflow;
pub mod presence;
pub mod publisher;
pub mod user_cache;
pub mod wal_entry;
pub mod workers;

pub use circuit_breaker::CircuitBreaker;
pub use delivery::{DeliveryEngine, OutboundEvent, SessionSinks};
pub use errors::MessagingError;
pub use presence::PresenceRegistry;
pub use publisher::{PublishOutcome, ResilientPublisher};
pub use user_cache::{CachedUserProfile, UserCache};

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::core::config::AppConfig;
use crate::data::cache::CacheService;
use crate::data::sqlite::SqliteStore;
use crate::data::streams::StreamFabric;
use crate::data::traits::{ConversationRepository, MessageRepository, UserProfileRepository};

use overflow::OverflowQueue;
use presence::spawn_presence_heartbeat;
use user_cache::spawn_user_stream_consumer;

/// Bundles the publisher, circuit breaker, caches, presence registry and
/// delivery engine shared across the background workers and the socket
/// gateway. `new` spawns every background worker and hands back their
/// join handles for the caller to register with `ShutdownService`.
pub struct MessagingCore {
    pub publisher: Arc<ResilientPublisher>,
    pub breaker: Arc<CircuitBreaker>,
    pub user_cache: Arc<UserCache>,
    pub presence: Arc<PresenceRegistry>,
    pub delivery: Arc<DeliveryEngine>,
    pub session_sinks: Arc<SessionSinks>,
}

impl MessagingCore {
    /// Builds the publisher/breaker/caches and spawns the WAL, Retry,
    /// Fallback, DLQ, Memory Monitor, UserCache consumer, presence
    /// heartbeat and delivery engine workers. `shutdown_rx` must already be
    /// live (subscribed from `ShutdownService` before this is called).
    pub fn new(
        config: &AppConfig,
        streams: Arc<StreamFabric>,
        store: Arc<SqliteStore>,
        cache: Arc<CacheService>,
        shutdown_rx: &watch::Receiver<bool>,
    ) -> (Self, Vec<JoinHandle<()>>) {
        let breaker = Arc::new(CircuitBreaker::new(&config.circuit_breaker));
        let overflow = Arc::new(OverflowQueue::new(config.retry.overflow_queue_capacity));
        let messages: Arc<dyn MessageRepository> = store.clone();
        let conversations: Arc<dyn ConversationRepository> = store.clone();
        let users: Arc<dyn UserProfileRepository> = store.clone();
        let publisher = Arc::new(ResilientPublisher::new(
            Arc::clone(&messages),
            Arc::clone(&conversations),
            Arc::clone(&streams),
            Arc::clone(&breaker),
            overflow,
        ));
        let user_cache = Arc::new(UserCache::new(Arc::clone(&cache)));
        let presence = Arc::new(PresenceRegistry::new(cache));
        let session_sinks = Arc::new(SessionSinks::new());

        let mut handles = vec![
            workers::spawn_wal_worker(
                Arc::clone(&streams),
                Arc::clone(&messages),
                Arc::clone(&breaker),
                config.retry.max_retries,
                config.retry.base_delay_ms,
                shutdown_rx.clone(),
            ),
            workers::spawn_retry_worker(
                Arc::clone(&streams),
                Arc::clone(&messages),
                Arc::clone(&breaker),
                config.retry.max_retries,
                config.retry.base_delay_ms,
                config.retry.scan_interval_ms,
                shutdown_rx.clone(),
            ),
            workers::spawn_fallback_worker(
                Arc::clone(&streams),
                Arc::clone(&messages),
                Arc::clone(&breaker),
                config.retry.max_retries,
                config.retry.base_delay_ms,
                shutdown_rx.clone(),
            ),
            workers::spawn_dlq_reader(Arc::clone(&streams), shutdown_rx.clone()),
            workers::spawn_memory_monitor(Arc::clone(&streams), config.memory.budget_bytes, shutdown_rx.clone()),
            spawn_user_stream_consumer(Arc::clone(&streams), users, Arc::clone(&user_cache), shutdown_rx.clone()),
            spawn_presence_heartbeat(Arc::clone(&presence), shutdown_rx.clone()),
        ];

        let (delivery, delivery_handles) = DeliveryEngine::spawn(
            streams,
            conversations,
            Arc::clone(&presence),
            Arc::clone(&session_sinks),
            config.delivery.worker_pool_size,
            shutdown_rx.clone(),
        );
        handles.extend(delivery_handles);

        (Self { publisher, breaker, user_cache, presence, delivery, session_sinks }, handles)
    }
}
