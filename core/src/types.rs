//! Shared types for the messaging sync engine
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Prefix of client-assigned placeholder ids for not-yet-committed sends
pub const TEMP_ID_PREFIX: &str = "temp-";

/// One row of the persistent message table. Immutable once committed except
/// for `read_at`, which the receiver's thread-open side effect sets once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub read_at: Option<DateTime<Utc>>,
}

impl Message {
    /// True while the row is a local placeholder awaiting its server record
    pub fn is_pending(&self) -> bool {
        self.id.starts_with(TEMP_ID_PREFIX)
    }

    /// True when the row belongs to the thread between `a` and `b`
    pub fn in_thread(&self, a: &str, b: &str) -> bool {
        (self.sender_id == a && self.receiver_id == b)
            || (self.sender_id == b && self.receiver_id == a)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantType {
    Client,
    Coach,
    Admin,
}

/// Declared role of the authenticated account (not a participant id)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountRole {
    Client,
    Coach,
    Admin,
    SuperAdmin,
}

impl AccountRole {
    /// Administrative roles all resolve through the admin partition
    pub fn is_administrative(&self) -> bool {
        matches!(self, AccountRole::Admin | AccountRole::SuperAdmin)
    }
}

/// Resolved display identity of one conversation partner
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartnerIdentity {
    pub name: String,
    pub participant_type: ParticipantType,
    pub avatar: Option<String>,
    pub location: Option<String>,
}

impl PartnerIdentity {
    /// Placeholder identity when no partition knows the participant
    pub fn unknown() -> Self {
        Self {
            name: "Unknown".to_string(),
            participant_type: ParticipantType::Client,
            avatar: None,
            location: None,
        }
    }
}

/// Summary of one conversation (for the cross-conversation list view).
/// Derived from the message log, never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    pub participant_id: String,
    pub participant_name: String,
    pub participant_type: ParticipantType,
    pub participant_avatar: Option<String>,
    pub participant_location: Option<String>,
    pub last_message: String,
    pub last_message_time: DateTime<Utc>,
    pub unread_count: u32,
}

/// One row-level notification from the change feed, already narrowed to the
/// messages table by the feed implementation
#[derive(Debug, Clone)]
pub enum ChangeEvent {
    Insert(Message),
    Update(Message),
}

/// Result of an optimistic send
#[derive(Debug, Clone)]
pub enum SendOutcome {
    /// Commit succeeded; the canonical server row
    Sent(Message),
    /// Blank input, nothing was sent
    Ignored,
}
