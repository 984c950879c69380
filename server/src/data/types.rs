//! Chat domain data model (§3)
//!
//! Shared entity types persisted by the primary store and carried,
//! denormalised, on the stream fabric.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::constants::{
    GROUP_MAX_PARTICIPANTS, MESSAGE_CONTENT_MAX_BYTES, PRIVATE_PARTICIPANT_COUNT,
};

// =============================================================================
// Message
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MessageType {
    Text,
    Image,
    Video,
    Audio,
    File,
    Location,
    Contact,
    System,
}

/// Delivery/lifecycle status. Ordered: `Sent < Delivered < Read`; `Edited`/`Deleted`
/// are orthogonal flags layered over that chain (§3, invariant 4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MessageStatus {
    Pending,
    Sent,
    Delivered,
    Read,
    Edited,
    Deleted,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reaction {
    pub user_id: String,
    pub emoji: String,
    pub ts: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub message_id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub receiver_id: Option<String>,
    pub content: String,
    #[serde(rename = "type")]
    pub kind: MessageType,
    pub status: MessageStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub edited_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub reply_to: Option<String>,
    pub reactions: BTreeSet<(String, String, i64)>,
    pub metadata: serde_json::Value,
}

impl Message {
    /// Validates the invariants a `Message` must hold before it may be
    /// persisted: trimmed content within budget and a monotonic timestamp pair.
    pub fn validate_content(content: &str) -> Result<String, String> {
        let trimmed = content.trim();
        if trimmed.is_empty() {
            return Err("content must not be empty after trim".to_string());
        }
        if trimmed.len() > MESSAGE_CONTENT_MAX_BYTES {
            return Err(format!(
                "content exceeds {MESSAGE_CONTENT_MAX_BYTES} bytes after trim"
            ));
        }
        Ok(trimmed.to_string())
    }

    pub fn is_well_formed(&self) -> bool {
        self.created_at <= self.updated_at
    }
}

// =============================================================================
// Conversation
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ConversationType {
    Private,
    Group,
    Broadcast,
    Channel,
}

impl ConversationType {
    /// Maximum participant count allowed for this conversation kind (§3).
    pub fn max_participants(&self) -> usize {
        match self {
            Self::Private => PRIVATE_PARTICIPANT_COUNT,
            Self::Group => GROUP_MAX_PARTICIPANTS,
            Self::Broadcast | Self::Channel => usize::MAX,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserMetadata {
    pub user_id: String,
    pub unread_count: u32,
    pub last_read_at: Option<DateTime<Utc>>,
    pub is_muted: bool,
    pub is_pinned: bool,
    pub notification_settings: serde_json::Value,
    pub display_name: Option<String>,
    pub avatar: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub actor_id: String,
    pub action: String,
    pub at: DateTime<Utc>,
    pub detail: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub conversation_id: String,
    #[serde(rename = "type")]
    pub kind: ConversationType,
    pub participants: Vec<String>,
    pub admins: Vec<String>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_message: Option<String>,
    pub unread_counts: std::collections::BTreeMap<String, u32>,
    pub user_metadata: Vec<UserMetadata>,
    pub audit_log: Option<Vec<AuditEntry>>,
}

impl Conversation {
    /// Checks the participant-count and ownership invariants (§3).
    pub fn validate(&self) -> Result<(), String> {
        if !self.participants.contains(&self.created_by) {
            return Err("createdBy must be one of the participants".to_string());
        }
        if self.kind == ConversationType::Private && self.participants.len() != PRIVATE_PARTICIPANT_COUNT
        {
            return Err(format!(
                "PRIVATE conversations must have exactly {PRIVATE_PARTICIPANT_COUNT} participants"
            ));
        }
        if self.participants.len() > self.kind.max_participants() {
            return Err(format!(
                "{:?} conversation exceeds {} participants",
                self.kind,
                self.kind.max_participants()
            ));
        }
        if self.kind == ConversationType::Broadcast {
            let overlap = self.admins.iter().any(|a| self.participants.contains(a));
            if overlap {
                return Err("BROADCAST admins and recipients must be disjoint".to_string());
            }
        }
        Ok(())
    }

    /// Canonical key for a PRIVATE conversation: the unordered participant pair.
    pub fn private_key(user_a: &str, user_b: &str) -> String {
        if user_a <= user_b {
            format!("{user_a}:{user_b}")
        } else {
            format!("{user_b}:{user_a}")
        }
    }
}

// =============================================================================
// UserProfile
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    pub matricule: String,
    pub nom: String,
    pub prenom: String,
    pub full_name: String,
    pub avatar: Option<String>,
    pub ministere: Option<String>,
    pub sexe: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl UserProfile {
    /// `fullName` is derived when absent (§3 invariant).
    pub fn derive_full_name(prenom: &str, nom: &str) -> String {
        format!("{prenom} {nom}").trim().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_status_ordering() {
        assert!(MessageStatus::Sent < MessageStatus::Delivered);
        assert!(MessageStatus::Delivered < MessageStatus::Read);
    }

    #[test]
    fn test_validate_content_trims_and_bounds() {
        assert_eq!(
            Message::validate_content("  hello  ").unwrap(),
            "hello".to_string()
        );
        assert!(Message::validate_content("   ").is_err());
        let oversized = "x".repeat(MESSAGE_CONTENT_MAX_BYTES + 1);
        assert!(Message::validate_content(&oversized).is_err());
    }

    #[test]
    fn test_conversation_private_key_is_order_independent() {
        assert_eq!(
            Conversation::private_key("alice", "bob"),
            Conversation::private_key("bob", "alice")
        );
    }

    #[test]
    fn test_conversation_validate_requires_creator_in_participants() {
        let convo = Conversation {
            conversation_id: "c1".into(),
            kind: ConversationType::Private,
            participants: vec!["alice".into(), "bob".into()],
            admins: vec![],
            created_by: "carol".into(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            last_message: None,
            unread_counts: Default::default(),
            user_metadata: vec![],
            audit_log: None,
        };
        assert!(convo.validate().is_err());
    }

    #[test]
    fn test_derive_full_name() {
        assert_eq!(UserProfile::derive_full_name("Jean", "Dupont"), "Jean Dupont");
    }
}
