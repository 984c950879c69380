//! PresenceRegistry (§4.7 C10)
//!
//! Three in-memory mappings are authoritative for the current node;
//! Redis mirroring is best-effort and only used so another node (or an
//! operator) can answer "is this user online anywhere" without reaching
//! into this process. A lock-free `DashMap`/`DashSet` shard per key avoids
//! holding a lock across the mirror write, which is a suspension point.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::{DashMap, DashSet};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::core::constants::{PRESENCE_HEARTBEAT_INTERVAL_SECS, PRESENCE_TTL_SECS};
use crate::data::cache::{CacheKey, CacheService};

/// Mirrored per-user presence record (§6 persisted key layout).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceRecord {
    pub user_id: String,
    pub last_seen_ms: i64,
}

pub struct PresenceRegistry {
    sessions_by_user: DashMap<String, DashSet<String>>,
    user_by_session: DashMap<String, String>,
    rooms: DashMap<String, DashSet<String>>,
    cache: Arc<CacheService>,
}

impl PresenceRegistry {
    pub fn new(cache: Arc<CacheService>) -> Self {
        Self {
            sessions_by_user: DashMap::new(),
            user_by_session: DashMap::new(),
            rooms: DashMap::new(),
            cache,
        }
    }

    /// Binds `session_id` to `user_id` and mirrors the presence record.
    pub async fn on_connect(&self, session_id: String, user_id: String) {
        self.sessions_by_user.entry(user_id.clone()).or_default().insert(session_id.clone());
        self.user_by_session.insert(session_id, user_id.clone());
        self.mirror(&user_id).await;
    }

    /// Unbinds a session. Leaves the user's room memberships untouched —
    /// those are cleared explicitly via `leave`.
    pub async fn on_disconnect(&self, session_id: &str) {
        let Some((_, user_id)) = self.user_by_session.remove(session_id) else { return };
        if let Some(sessions) = self.sessions_by_user.get(&user_id) {
            sessions.remove(session_id);
        }
        self.mirror(&user_id).await;
    }

    pub fn join(&self, user_id: &str, conversation_id: &str) {
        self.rooms.entry(conversation_id.to_string()).or_default().insert(user_id.to_string());
    }

    pub fn leave(&self, user_id: &str, conversation_id: &str) {
        if let Some(set) = self.rooms.get(conversation_id) {
            set.remove(user_id);
        }
    }

    pub fn sessions_for(&self, user_id: &str) -> HashSet<String> {
        self.sessions_by_user
            .get(user_id)
            .map(|set| set.iter().map(|s| s.clone()).collect())
            .unwrap_or_default()
    }

    pub fn online_participants(&self, conversation_id: &str) -> HashSet<String> {
        let members: Vec<String> = match self.rooms.get(conversation_id) {
            Some(set) => set.iter().map(|u| u.clone()).collect(),
            None => return HashSet::new(),
        };
        members.into_iter().filter(|u| !self.sessions_for(u).is_empty()).collect()
    }

    /// Best-effort write of the mirrored presence record; failures are
    /// logged and never surfaced (§4.7: "mutating operations are
    /// best-effort against Redis and authoritative in memory").
    async fn mirror(&self, user_id: &str) {
        let key = CacheKey::presence(user_id);
        let record = PresenceRecord { user_id: user_id.to_string(), last_seen_ms: Utc::now().timestamp_millis() };
        if let Err(e) = self.cache.set(&key, &record, Some(Duration::from_secs(PRESENCE_TTL_SECS))).await {
            tracing::debug!(user_id, error = %e, "failed to mirror presence record");
        }
    }
}

/// Refreshes the mirrored TTL for every user with at least one open
/// session, every `PRESENCE_HEARTBEAT_INTERVAL_SECS`.
pub fn spawn_presence_heartbeat(registry: Arc<PresenceRegistry>, mut shutdown_rx: watch::Receiver<bool>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(PRESENCE_HEARTBEAT_INTERVAL_SECS));
        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        tracing::debug!("presence heartbeat shutting down");
                        break;
                    }
                }
                _ = interval.tick() => {
                    let online: Vec<String> = registry.sessions_by_user.iter()
                        .filter(|entry| !entry.value().is_empty())
                        .map(|entry| entry.key().clone())
                        .collect();
                    for user_id in online {
                        registry.mirror(&user_id).await;
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::{CacheBackendType, CacheConfig, EvictionPolicy};

    async fn registry() -> PresenceRegistry {
        let cache = CacheService::new(&CacheConfig {
            backend: CacheBackendType::Memory,
            max_entries: 1000,
            eviction_policy: EvictionPolicy::Lfu,
            redis_url: None,
        })
        .await
        .unwrap();
        PresenceRegistry::new(Arc::new(cache))
    }

    #[tokio::test]
    async fn test_connect_then_sessions_for_reports_session() {
        let registry = registry().await;
        registry.on_connect("s1".into(), "alice".into()).await;
        assert_eq!(registry.sessions_for("alice"), HashSet::from(["s1".to_string()]));
    }

    #[tokio::test]
    async fn test_disconnect_clears_session() {
        let registry = registry().await;
        registry.on_connect("s1".into(), "alice".into()).await;
        registry.on_disconnect("s1").await;
        assert!(registry.sessions_for("alice").is_empty());
    }

    #[tokio::test]
    async fn test_online_participants_excludes_offline_members() {
        let registry = registry().await;
        registry.on_connect("s1".into(), "alice".into()).await;
        registry.join("alice", "c1");
        registry.join("bob", "c1");

        let online = registry.online_participants("c1");
        assert!(online.contains("alice"));
        assert!(!online.contains("bob"));
    }
}
