//! In-memory stream backend
//!
//! Local-only stand-in for the Redis backend: a `VecDeque` per stream with
//! pending-entry tracking simulating consumer groups. Suitable for tests and
//! single-process runs; a process crash loses everything, and there is no
//! cross-process coordination. Used by `StreamFabric::in_memory()`.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::Notify;

use super::backend::{PendingSummary, StreamBackend, StreamEntry, StreamFields};
use super::error::StreamError;

#[derive(Clone)]
struct StoredEntry {
    id: u64,
    fields: StreamFields,
}

#[derive(Default)]
struct ConsumerGroup {
    /// every id ever delivered to this group, so acked entries are never re-read via `>`
    delivered: std::collections::HashSet<u64>,
    /// message id -> (consumer, delivered_at), cleared on ack
    pending: HashMap<u64, (String, Instant)>,
}

#[derive(Default)]
struct StreamState {
    messages: VecDeque<StoredEntry>,
    groups: HashMap<String, ConsumerGroup>,
    next_id: u64,
}

/// In-memory implementation of `StreamBackend`.
pub struct MemoryStreamBackend {
    streams: RwLock<HashMap<String, StreamState>>,
    notify: Notify,
}

impl Default for MemoryStreamBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStreamBackend {
    pub fn new() -> Self {
        Self {
            streams: RwLock::new(HashMap::new()),
            notify: Notify::new(),
        }
    }

    fn format_id(id: u64) -> String {
        format!("{id}-0")
    }

    fn parse_id(id: &str) -> Option<u64> {
        id.split('-').next()?.parse().ok()
    }
}

#[async_trait]
impl StreamBackend for MemoryStreamBackend {
    async fn append(
        &self,
        stream: &str,
        fields: StreamFields,
        maxlen: u64,
    ) -> Result<String, StreamError> {
        let id = {
            let mut streams = self.streams.write();
            let state = streams.entry(stream.to_string()).or_default();
            state.next_id += 1;
            let id = state.next_id;
            state.messages.push_back(StoredEntry { id, fields });
            while state.messages.len() as u64 > maxlen {
                state.messages.pop_front();
            }
            id
        };
        self.notify.notify_waiters();
        Ok(Self::format_id(id))
    }

    async fn create_group(&self, stream: &str, group: &str, _start_id: &str) -> Result<(), StreamError> {
        let mut streams = self.streams.write();
        let state = streams.entry(stream.to_string()).or_default();
        state.groups.entry(group.to_string()).or_default();
        Ok(())
    }

    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block_ms: u64,
    ) -> Result<Vec<StreamEntry>, StreamError> {
        let deadline = Instant::now() + Duration::from_millis(block_ms);
        loop {
            {
                let mut streams = self.streams.write();
                let state = streams.entry(stream.to_string()).or_default();
                let group_state = state.groups.entry(group.to_string()).or_default();

                let candidates: Vec<StoredEntry> = state
                    .messages
                    .iter()
                    .filter(|m| !group_state.delivered.contains(&m.id))
                    .take(count)
                    .cloned()
                    .collect();

                if !candidates.is_empty() {
                    let now = Instant::now();
                    for entry in &candidates {
                        group_state.delivered.insert(entry.id);
                        group_state
                            .pending
                            .insert(entry.id, (consumer.to_string(), now));
                    }
                    return Ok(candidates
                        .into_iter()
                        .map(|e| StreamEntry {
                            id: Self::format_id(e.id),
                            fields: e.fields,
                        })
                        .collect());
                }
            }

            if Instant::now() >= deadline {
                return Ok(vec![]);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            tokio::select! {
                _ = self.notify.notified() => {}
                _ = tokio::time::sleep(remaining.min(Duration::from_millis(100))) => {}
            }
        }
    }

    async fn read_range(
        &self,
        stream: &str,
        from: &str,
        to: &str,
        count: usize,
    ) -> Result<Vec<StreamEntry>, StreamError> {
        let streams = self.streams.read();
        let Some(state) = streams.get(stream) else {
            return Ok(vec![]);
        };
        let from_id = if from == "-" { 0 } else { Self::parse_id(from).unwrap_or(0) };
        let to_id = if to == "+" { u64::MAX } else { Self::parse_id(to).unwrap_or(u64::MAX) };

        Ok(state
            .messages
            .iter()
            .filter(|m| m.id >= from_id && m.id <= to_id)
            .take(count)
            .map(|e| StreamEntry {
                id: Self::format_id(e.id),
                fields: e.fields.clone(),
            })
            .collect())
    }

    async fn ack(&self, stream: &str, group: &str, id: &str) -> Result<(), StreamError> {
        let Some(id) = Self::parse_id(id) else {
            return Ok(());
        };
        let mut streams = self.streams.write();
        if let Some(state) = streams.get_mut(stream)
            && let Some(g) = state.groups.get_mut(group)
        {
            g.pending.remove(&id);
        }
        Ok(())
    }

    async fn del(&self, stream: &str, id: &str) -> Result<(), StreamError> {
        let Some(id) = Self::parse_id(id) else {
            return Ok(());
        };
        let mut streams = self.streams.write();
        if let Some(state) = streams.get_mut(stream) {
            state.messages.retain(|m| m.id != id);
            for g in state.groups.values_mut() {
                g.pending.remove(&id);
            }
        }
        Ok(())
    }

    async fn claim(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle_ms: u64,
        count: usize,
    ) -> Result<Vec<StreamEntry>, StreamError> {
        let mut streams = self.streams.write();
        let Some(state) = streams.get_mut(stream) else {
            return Ok(vec![]);
        };
        let now = Instant::now();
        let by_id: HashMap<u64, StreamFields> =
            state.messages.iter().map(|m| (m.id, m.fields.clone())).collect();

        let Some(g) = state.groups.get_mut(group) else {
            return Ok(vec![]);
        };

        let idle_ids: Vec<u64> = g
            .pending
            .iter()
            .filter(|(_, (_, delivered_at))| now.duration_since(*delivered_at).as_millis() as u64 >= min_idle_ms)
            .map(|(id, _)| *id)
            .take(count)
            .collect();

        let mut claimed = Vec::new();
        for id in idle_ids {
            g.pending.insert(id, (consumer.to_string(), now));
            if let Some(fields) = by_id.get(&id) {
                claimed.push(StreamEntry {
                    id: Self::format_id(id),
                    fields: fields.clone(),
                });
            }
        }
        Ok(claimed)
    }

    async fn pending_summary(&self, stream: &str, group: &str) -> Result<PendingSummary, StreamError> {
        let streams = self.streams.read();
        let Some(state) = streams.get(stream) else {
            return Ok(PendingSummary::default());
        };
        let length = state.messages.len() as u64;
        let Some(g) = state.groups.get(group) else {
            return Ok(PendingSummary {
                length,
                ..Default::default()
            });
        };

        let pending = g.pending.len() as u64;
        let consumers = g
            .pending
            .values()
            .map(|(c, _)| c.as_str())
            .collect::<std::collections::HashSet<_>>()
            .len() as u64;
        let oldest_pending_ms = g
            .pending
            .values()
            .map(|(_, at)| Instant::now().duration_since(*at).as_millis() as u64)
            .max();

        Ok(PendingSummary {
            length,
            pending,
            consumers,
            oldest_pending_ms,
        })
    }

    async fn health_check(&self) -> Result<(), StreamError> {
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_append_and_read_group() {
        let backend = MemoryStreamBackend::new();
        backend.create_group("s1", "g1", "0").await.unwrap();
        let mut fields = StreamFields::new();
        fields.insert("event".to_string(), "NEW_MESSAGE".to_string());
        backend.append("s1", fields, 1000).await.unwrap();

        let entries = backend.read_group("s1", "g1", "c1", 10, 10).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].field("event"), Some("NEW_MESSAGE"));
    }

    #[tokio::test]
    async fn test_ack_clears_pending() {
        let backend = MemoryStreamBackend::new();
        backend.create_group("s1", "g1", "0").await.unwrap();
        backend.append("s1", StreamFields::new(), 1000).await.unwrap();
        let entries = backend.read_group("s1", "g1", "c1", 10, 10).await.unwrap();
        let id = entries[0].id.clone();

        backend.ack("s1", "g1", &id).await.unwrap();
        let summary = backend.pending_summary("s1", "g1").await.unwrap();
        assert_eq!(summary.pending, 0);
    }

    #[tokio::test]
    async fn test_maxlen_trims() {
        let backend = MemoryStreamBackend::new();
        for i in 0..5 {
            let mut fields = StreamFields::new();
            fields.insert("n".to_string(), i.to_string());
            backend.append("s1", fields, 3).await.unwrap();
        }
        let entries = backend.read_range("s1", "-", "+", 100).await.unwrap();
        assert_eq!(entries.len(), 3);
    }

    #[tokio::test]
    async fn test_claim_after_idle() {
        let backend = MemoryStreamBackend::new();
        backend.create_group("s1", "g1", "0").await.unwrap();
        backend.append("s1", StreamFields::new(), 1000).await.unwrap();
        backend.read_group("s1", "g1", "c1", 10, 10).await.unwrap();

        let claimed = backend.claim("s1", "g1", "c2", 0, 10).await.unwrap();
        assert_eq!(claimed.len(), 1);
    }
}
