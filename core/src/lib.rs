//! Direct-messaging synchronization engine for the coaching marketplace.
//!
//! Keeps an open conversation's ordered thread and the cross-conversation
//! summary list consistent under optimistic sends, server-pushed row changes
//! and read-receipt propagation. The persistent message table, the identity
//! partitions and the push feed are external collaborators behind traits;
//! UI screens consume this crate directly.

pub mod aggregator;
pub mod backend;
pub mod config;
pub mod engine;
pub mod error;
pub mod identity;
pub mod outbox;
pub mod thread;
pub mod types;

pub use aggregator::{ConversationAggregator, Refresh};
pub use backend::{ChangeFeed, FeedSubscription, MessageRepository, NewMessage};
pub use config::SyncConfig;
pub use engine::SyncEngine;
pub use error::{Result, SyncError};
pub use identity::{IdentityDirectory, IdentityProvider};
pub use outbox::Outbox;
pub use thread::ThreadStore;
pub use types::{
    AccountRole, ChangeEvent, ConversationSummary, Message, ParticipantType, PartnerIdentity,
    SendOutcome, TEMP_ID_PREFIX,
};
