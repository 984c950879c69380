//! Canonical stream registry and consumer-group bootstrap (§4.3)

use std::sync::Arc;

use serde::de::DeserializeOwned;

use super::backend::{StreamBackend, StreamEntry, StreamFields};
use super::error::StreamError;
use crate::core::constants::{
    DEFAULT_MAXLEN_EVENTS, DEFAULT_MAXLEN_MESSAGES, DEFAULT_MAXLEN_TECHNICAL, STREAM_DLQ,
    STREAM_EVENTS_CONVERSATIONS, STREAM_EVENTS_FILES, STREAM_EVENTS_NOTIFICATIONS,
    STREAM_EVENTS_REACTIONS, STREAM_EVENTS_REPLIES, STREAM_EVENTS_TYPING, STREAM_EVENTS_USERS,
    STREAM_FALLBACK, STREAM_MESSAGES_CHANNEL, STREAM_MESSAGES_GROUP, STREAM_MESSAGES_PRIVATE,
    STREAM_METRICS, STREAM_RETRY, STREAM_STATUS_DELETED, STREAM_STATUS_DELIVERED,
    STREAM_STATUS_EDITED, STREAM_STATUS_READ, STREAM_WAL,
};

/// A stream name paired with its declared capacity cap (§4.3).
#[derive(Debug, Clone, Copy)]
pub struct StreamDescriptor {
    pub name: &'static str,
    pub maxlen: u64,
}

const TECHNICAL: &[StreamDescriptor] = &[
    StreamDescriptor { name: STREAM_WAL, maxlen: DEFAULT_MAXLEN_TECHNICAL },
    StreamDescriptor { name: STREAM_RETRY, maxlen: DEFAULT_MAXLEN_TECHNICAL },
    StreamDescriptor { name: STREAM_DLQ, maxlen: DEFAULT_MAXLEN_TECHNICAL },
    StreamDescriptor { name: STREAM_FALLBACK, maxlen: DEFAULT_MAXLEN_TECHNICAL },
    StreamDescriptor { name: STREAM_METRICS, maxlen: DEFAULT_MAXLEN_TECHNICAL },
];

const MESSAGES: &[StreamDescriptor] = &[
    StreamDescriptor { name: STREAM_MESSAGES_PRIVATE, maxlen: DEFAULT_MAXLEN_MESSAGES },
    StreamDescriptor { name: STREAM_MESSAGES_GROUP, maxlen: DEFAULT_MAXLEN_MESSAGES },
    StreamDescriptor { name: STREAM_MESSAGES_CHANNEL, maxlen: DEFAULT_MAXLEN_MESSAGES },
];

const STATUS: &[StreamDescriptor] = &[
    StreamDescriptor { name: STREAM_STATUS_DELIVERED, maxlen: DEFAULT_MAXLEN_EVENTS },
    StreamDescriptor { name: STREAM_STATUS_READ, maxlen: DEFAULT_MAXLEN_EVENTS },
    StreamDescriptor { name: STREAM_STATUS_EDITED, maxlen: DEFAULT_MAXLEN_EVENTS },
    StreamDescriptor { name: STREAM_STATUS_DELETED, maxlen: DEFAULT_MAXLEN_EVENTS },
];

const EVENTS: &[StreamDescriptor] = &[
    StreamDescriptor { name: STREAM_EVENTS_TYPING, maxlen: DEFAULT_MAXLEN_EVENTS },
    StreamDescriptor { name: STREAM_EVENTS_REACTIONS, maxlen: DEFAULT_MAXLEN_EVENTS },
    StreamDescriptor { name: STREAM_EVENTS_REPLIES, maxlen: DEFAULT_MAXLEN_EVENTS },
    StreamDescriptor { name: STREAM_EVENTS_CONVERSATIONS, maxlen: DEFAULT_MAXLEN_EVENTS },
    StreamDescriptor { name: STREAM_EVENTS_USERS, maxlen: DEFAULT_MAXLEN_EVENTS },
    StreamDescriptor { name: STREAM_EVENTS_FILES, maxlen: DEFAULT_MAXLEN_EVENTS },
    StreamDescriptor { name: STREAM_EVENTS_NOTIFICATIONS, maxlen: DEFAULT_MAXLEN_EVENTS },
];

/// Owns the canonical stream name table, bootstraps consumer groups for every
/// consumed stream on start, and centralises the `MAXLEN`/parse conventions
/// so producers never hand-roll a stream name or trim threshold.
pub struct StreamManager {
    backend: Arc<dyn StreamBackend>,
    consumer_group: String,
}

impl StreamManager {
    pub fn new(backend: Arc<dyn StreamBackend>, consumer_group: String) -> Self {
        Self { backend, consumer_group }
    }

    pub fn consumer_group(&self) -> &str {
        &self.consumer_group
    }

    pub fn technical_streams() -> &'static [StreamDescriptor] {
        TECHNICAL
    }

    pub fn message_streams() -> &'static [StreamDescriptor] {
        MESSAGES
    }

    pub fn status_streams() -> &'static [StreamDescriptor] {
        STATUS
    }

    pub fn event_streams() -> &'static [StreamDescriptor] {
        EVENTS
    }

    pub fn all_streams() -> impl Iterator<Item = &'static StreamDescriptor> {
        TECHNICAL.iter().chain(MESSAGES).chain(STATUS).chain(EVENTS)
    }

    pub fn maxlen_for(stream: &str) -> u64 {
        Self::all_streams()
            .find(|d| d.name == stream)
            .map(|d| d.maxlen)
            .unwrap_or(DEFAULT_MAXLEN_EVENTS)
    }

    /// Idempotently creates a consumer group (from `0`, `MKSTREAM`) for every
    /// stream this core consumes. Safe to call on every startup.
    pub async fn bootstrap(&self) -> Result<(), StreamError> {
        for descriptor in Self::all_streams() {
            self.backend
                .create_group(descriptor.name, &self.consumer_group, "0")
                .await?;
        }
        Ok(())
    }

    /// Appends a field map to `stream`, trimming to its declared `MAXLEN`.
    pub async fn append(&self, stream: &str, fields: StreamFields) -> Result<String, StreamError> {
        self.backend.append(stream, fields, Self::maxlen_for(stream)).await
    }

    pub fn backend(&self) -> &Arc<dyn StreamBackend> {
        &self.backend
    }

    /// `parse(entry) -> (id, fields)` per §4.3.
    pub fn parse(entry: &StreamEntry) -> (&str, &StreamFields) {
        (&entry.id, &entry.fields)
    }

    /// JSON-decodes the `data` field carried on WAL/Retry/Fallback entries.
    pub fn parse_data<T: DeserializeOwned>(entry: &StreamEntry) -> Result<T, StreamError> {
        entry.data()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::streams::memory::MemoryStreamBackend;

    #[test]
    fn test_maxlen_for_known_streams() {
        assert_eq!(StreamManager::maxlen_for(STREAM_WAL), DEFAULT_MAXLEN_TECHNICAL);
        assert_eq!(StreamManager::maxlen_for(STREAM_MESSAGES_PRIVATE), DEFAULT_MAXLEN_MESSAGES);
        assert_eq!(StreamManager::maxlen_for(STREAM_STATUS_READ), DEFAULT_MAXLEN_EVENTS);
    }

    #[tokio::test]
    async fn test_bootstrap_creates_all_groups() {
        let backend: Arc<dyn StreamBackend> = Arc::new(MemoryStreamBackend::new());
        let manager = StreamManager::new(Arc::clone(&backend), "chat-core".to_string());
        manager.bootstrap().await.unwrap();

        let summary = backend.pending_summary(STREAM_WAL, "chat-core").await.unwrap();
        assert_eq!(summary.pending, 0);
    }

    #[tokio::test]
    async fn test_append_uses_declared_maxlen() {
        let backend: Arc<dyn StreamBackend> = Arc::new(MemoryStreamBackend::new());
        let manager = StreamManager::new(Arc::clone(&backend), "chat-core".to_string());
        for _ in 0..5 {
            manager.append(STREAM_MESSAGES_PRIVATE, StreamFields::new()).await.unwrap();
        }
        let entries = backend.read_range(STREAM_MESSAGES_PRIVATE, "-", "+", 10_000).await.unwrap();
        assert_eq!(entries.len(), 5);
    }
}
