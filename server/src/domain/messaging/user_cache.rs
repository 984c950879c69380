//! UserCache + UserStreamConsumer (§4.9 C9)
//!
//! Keeps denormalised profile fields warm so the socket path never has to
//! fall back to an HTTP round trip to look up a sender's display name. The
//! cache is kept current by a dedicated consumer on `events:users` rather
//! than by invalidating on every profile write, so a degraded primary store
//! doesn't also take display-name lookups down with it.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashSet;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::core::constants::{
    CACHE_TTL_USER_PROFILE_SECS, DEADLINE_STREAM_READ_MS, DEFAULT_WORKER_BATCH_SIZE, STREAM_EVENTS_USERS,
    USER_CACHE_PREWARM_COUNT,
};
use crate::data::cache::{CacheKey, CacheService};
use crate::data::streams::{StreamEntry, StreamFabric};
use crate::data::traits::UserProfileRepository;
use crate::data::types::UserProfile;

use super::envelope::{UserEventKind, UserProfileEvent};

/// Denormalised snapshot kept in the cache (§3 UserProfile, §4.9).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedUserProfile {
    pub id: String,
    pub matricule: String,
    pub full_name: String,
    pub avatar: Option<String>,
    pub ministere: Option<String>,
}

impl From<&UserProfile> for CachedUserProfile {
    fn from(profile: &UserProfile) -> Self {
        Self {
            id: profile.id.clone(),
            matricule: profile.matricule.clone(),
            full_name: profile.full_name.clone(),
            avatar: profile.avatar.clone(),
            ministere: profile.ministere.clone(),
        }
    }
}

/// `set`, `get`, `batchGet`, `invalidate`, `exists`, `count` over the
/// `user:profile:{matricule}` cache key (§4.9).
pub struct UserCache {
    cache: Arc<CacheService>,
    /// Tracks cached matricules for `count()`; the cache backend itself has
    /// no "count keys under prefix" operation.
    known: DashSet<String>,
}

impl UserCache {
    pub fn new(cache: Arc<CacheService>) -> Self {
        Self { cache, known: DashSet::new() }
    }

    pub async fn set(&self, profile: &CachedUserProfile) -> Result<(), super::errors::MessagingError> {
        let key = CacheKey::user_profile(&profile.matricule);
        self.cache.set(&key, profile, Some(Duration::from_secs(CACHE_TTL_USER_PROFILE_SECS))).await?;
        self.known.insert(profile.matricule.clone());
        Ok(())
    }

    pub async fn get(&self, matricule: &str) -> Result<Option<CachedUserProfile>, super::errors::MessagingError> {
        let key = CacheKey::user_profile(matricule);
        Ok(self.cache.get(&key).await?)
    }

    /// Pipelined lookup for a batch of matricules (§4.9).
    pub async fn batch_get(&self, matricules: &[String]) -> Vec<Option<CachedUserProfile>> {
        let futures = matricules.iter().map(|m| self.get(m));
        join_all(futures).await.into_iter().map(Result::unwrap_or_default).collect()
    }

    pub async fn invalidate(&self, matricule: &str) -> Result<(), super::errors::MessagingError> {
        let key = CacheKey::user_profile(matricule);
        self.cache.invalidate_key(&key).await;
        self.known.remove(matricule);
        Ok(())
    }

    pub async fn exists(&self, matricule: &str) -> Result<bool, super::errors::MessagingError> {
        let key = CacheKey::user_profile(matricule);
        Ok(self.cache.exists(&key).await?)
    }

    pub fn count(&self) -> usize {
        self.known.len()
    }
}

/// Applies `user.profile.created|updated|deleted` entries read off
/// `events:users` to the cache, and republishes a full snapshot of the
/// repository on startup after draining any entries already on the stream
/// (bootstrap prewarm, §4.9, DESIGN.md open question #1).
pub fn spawn_user_stream_consumer(
    streams: Arc<StreamFabric>,
    users: Arc<dyn UserProfileRepository>,
    cache: Arc<UserCache>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(e) = prewarm(&streams, &users, &cache).await {
            tracing::warn!(error = %e, "user cache prewarm failed");
        }

        let group = streams.manager().consumer_group().to_string();
        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        tracing::debug!("user stream consumer shutting down");
                        break;
                    }
                }
                leased = streams.manager().backend().read_group(
                    STREAM_EVENTS_USERS, &group, "user-cache-consumer", DEFAULT_WORKER_BATCH_SIZE, DEADLINE_STREAM_READ_MS,
                ) => {
                    match leased {
                        Ok(entries) => {
                            for entry in &entries {
                                apply_entry(entry, &cache).await;
                                if let Err(e) = streams.manager().backend().ack(STREAM_EVENTS_USERS, &group, &entry.id).await {
                                    tracing::warn!(error = %e, id = %entry.id, "failed to ack user event");
                                }
                            }
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "events:users read_group failed, backing off");
                            tokio::time::sleep(Duration::from_millis(500)).await;
                        }
                    }
                }
            }
        }
    })
}

async fn apply_entry(entry: &StreamEntry, cache: &UserCache) {
    let event = match UserProfileEvent::from_entry(entry) {
        Ok(e) => e,
        Err(e) => {
            tracing::warn!(id = %entry.id, error = %e, "malformed events:users entry, dropping");
            return;
        }
    };

    match event.kind() {
        Some(UserEventKind::Created) | Some(UserEventKind::Updated) | Some(UserEventKind::Synced) => {
            match serde_json::from_value::<CachedUserProfile>(event.data) {
                Ok(profile) => {
                    if let Err(e) = cache.set(&profile).await {
                        tracing::warn!(error = %e, "failed to apply user profile event to cache");
                    }
                }
                Err(e) => tracing::warn!(error = %e, "invalid user profile snapshot"),
            }
        }
        Some(UserEventKind::Deleted) => {
            if let Err(e) = cache.invalidate(&event.user_id).await {
                tracing::warn!(error = %e, "failed to invalidate deleted user profile");
            }
        }
        None => tracing::warn!(event = %event.event, "unknown events:users event kind"),
    }
}

/// Iterates the repository and republishes a full snapshot onto
/// `events:users` so the consumer loop above picks it up the same way it
/// would a live update, after first draining whatever is already queued.
async fn prewarm(
    streams: &Arc<StreamFabric>,
    users: &Arc<dyn UserProfileRepository>,
    cache: &Arc<UserCache>,
) -> Result<(), super::errors::MessagingError> {
    let group = streams.manager().consumer_group().to_string();
    loop {
        let drained = streams
            .manager()
            .backend()
            .read_group(STREAM_EVENTS_USERS, &group, "user-cache-consumer", DEFAULT_WORKER_BATCH_SIZE, 0)
            .await?;
        if drained.is_empty() {
            break;
        }
        for entry in &drained {
            apply_entry(entry, cache).await;
            streams.manager().backend().ack(STREAM_EVENTS_USERS, &group, &entry.id).await?;
        }
    }

    let profiles = users.list_all(USER_CACHE_PREWARM_COUNT as u32).await?;
    for profile in &profiles {
        let cached = CachedUserProfile::from(profile);
        let event = UserProfileEvent::new(UserEventKind::Synced, profile.id.clone(), serde_json::to_value(&cached).unwrap_or_default());
        let fields = event.into_fields()?;
        streams.manager().append(STREAM_EVENTS_USERS, fields).await?;
    }
    tracing::debug!(count = profiles.len(), "user cache prewarm snapshot published");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::{CacheBackendType, CacheConfig, EvictionPolicy};

    fn profile() -> CachedUserProfile {
        CachedUserProfile {
            id: "u1".into(),
            matricule: "M1".into(),
            full_name: "Alice A".into(),
            avatar: None,
            ministere: None,
        }
    }

    async fn cache() -> UserCache {
        let service = CacheService::new(&CacheConfig {
            backend: CacheBackendType::Memory,
            max_entries: 1000,
            eviction_policy: EvictionPolicy::Lfu,
            redis_url: None,
        })
        .await
        .unwrap();
        UserCache::new(Arc::new(service))
    }

    #[tokio::test]
    async fn test_set_then_get_round_trips() {
        let cache = cache().await;
        cache.set(&profile()).await.unwrap();
        let fetched = cache.get("M1").await.unwrap();
        assert_eq!(fetched, Some(profile()));
        assert_eq!(cache.count(), 1);
    }

    #[tokio::test]
    async fn test_invalidate_removes_entry() {
        let cache = cache().await;
        cache.set(&profile()).await.unwrap();
        cache.invalidate("M1").await.unwrap();
        assert_eq!(cache.get("M1").await.unwrap(), None);
        assert_eq!(cache.count(), 0);
    }

    #[tokio::test]
    async fn test_batch_get_returns_positional_results() {
        let cache = cache().await;
        cache.set(&profile()).await.unwrap();
        let results = cache.batch_get(&["M1".to_string(), "missing".to_string()]).await;
        assert_eq!(results, vec![Some(profile()), None]);
    }
}
