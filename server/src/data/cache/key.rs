//! Type-safe cache key builder with versioning

use crate::core::constants::{CACHE_KEY_VERSION, KEY_PREFIX_PRESENCE, KEY_PREFIX_ROOMS, KEY_PREFIX_USER_DATA};

/// Type-safe cache key builder
///
/// All keys are prefixed with a version (e.g., "v1:") to allow
/// invalidating all cached data on schema changes.
pub struct CacheKey;

impl CacheKey {
    // =========================================================================
    // UserCache (§4.9) — `user:profile:{matricule}`
    // =========================================================================

    /// Cache key for a user profile, keyed by matricule (§3 UserProfile).
    pub fn user_profile(matricule: &str) -> String {
        format!("{CACHE_KEY_VERSION}:user:profile:{matricule}")
    }

    // =========================================================================
    // PresenceRegistry mirror (§4.7, §6 persisted state layout)
    // =========================================================================

    /// Mirrored presence record for a user.
    pub fn presence(user_id: &str) -> String {
        format!("{KEY_PREFIX_PRESENCE}{user_id}")
    }

    /// Mirrored per-user denormalised data (sessions, last seen).
    pub fn user_data(user_id: &str) -> String {
        format!("{KEY_PREFIX_USER_DATA}{user_id}")
    }

    /// Mirrored room (conversation) membership set.
    pub fn room(conversation_id: &str) -> String {
        format!("{KEY_PREFIX_ROOMS}{conversation_id}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_profile_key() {
        assert_eq!(CacheKey::user_profile("M123"), "v1:user:profile:M123");
    }

    #[test]
    fn test_presence_key_namespace() {
        assert_eq!(CacheKey::presence("u1"), "chat:cache:presence:u1");
        assert_eq!(CacheKey::user_data("u1"), "chat:cache:user_data:u1");
        assert_eq!(CacheKey::room("c1"), "chat:cache:rooms:c1");
    }
}
