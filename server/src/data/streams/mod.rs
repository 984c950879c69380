//! Stream Fabric (§2 C1/C3, §4.1, §4.3)
//!
//! An append-only log service (Redis Streams, or an in-memory stand-in for
//! tests) organised into per-concern streams with capped length, consumer
//! groups, and typed field-map payloads. `StreamFabric` is the single handle
//! threaded through the messaging core: it owns the backend connection and
//! the canonical `StreamManager` registry.

pub mod backend;
pub mod error;
pub mod manager;
pub mod memory;
pub mod redis;

pub use backend::{PendingSummary, StreamBackend, StreamEntry, StreamFields, normalize_fields};
pub use error::StreamError;
pub use manager::{StreamDescriptor, StreamManager};
pub use memory::MemoryStreamBackend;
pub use redis::RedisStreamBackend;

use std::sync::Arc;

use crate::core::config::StreamConfig;
use crate::core::constants::DEFAULT_CONSUMER_GROUP;

/// Owns the connected `StreamBackend` and the canonical `StreamManager`.
pub struct StreamFabric {
    manager: StreamManager,
}

impl StreamFabric {
    /// Connects to the configured Redis-compatible endpoint and bootstraps
    /// consumer groups for every stream this core consumes.
    pub async fn connect(config: &StreamConfig) -> Result<Self, StreamError> {
        let backend: Arc<dyn StreamBackend> = Arc::new(RedisStreamBackend::new(&config.url).await?);
        let manager = StreamManager::new(backend, config.consumer_group.clone());
        manager.bootstrap().await?;
        Ok(Self { manager })
    }

    /// In-memory fabric for tests and local runs without a Redis endpoint.
    pub fn in_memory() -> Self {
        let backend: Arc<dyn StreamBackend> = Arc::new(MemoryStreamBackend::new());
        let manager = StreamManager::new(backend, DEFAULT_CONSUMER_GROUP.to_string());
        Self { manager }
    }

    pub fn manager(&self) -> &StreamManager {
        &self.manager
    }

    /// Best-effort liveness probe performed during graceful shutdown; never
    /// fails the shutdown sequence on a backend that is already unreachable.
    pub async fn shutdown(&self) {
        if let Err(e) = self.manager.backend().health_check().await {
            tracing::debug!(error = %e, "stream backend unreachable during shutdown");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_fabric_roundtrip() {
        let fabric = StreamFabric::in_memory();
        let mut fields = StreamFields::new();
        fields.insert("event".to_string(), "NEW_MESSAGE".to_string());
        fabric
            .manager()
            .append(crate::core::constants::STREAM_MESSAGES_PRIVATE, fields)
            .await
            .unwrap();

        let entries = fabric
            .manager()
            .backend()
            .read_range(crate::core::constants::STREAM_MESSAGES_PRIVATE, "-", "+", 10)
            .await
            .unwrap();
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_does_not_panic() {
        let fabric = StreamFabric::in_memory();
        fabric.shutdown().await;
    }
}
