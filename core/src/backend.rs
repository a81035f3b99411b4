//! External collaborator traits: the persistent message table and the push
//! change feed. Real implementations live with the hosting app; tests supply
//! in-memory fakes.
use crate::error::Result;
use crate::types::{ChangeEvent, Message};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot};

/// Fields of a message insert; id and `created_at` are server-assigned
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub sender_id: String,
    pub receiver_id: String,
    pub content: String,
}

#[async_trait]
pub trait MessageRepository: Send + Sync {
    /// Commit one message; returns the canonical row
    async fn insert(&self, new: NewMessage) -> Result<Message>;

    /// Messages between `a` and `b` (either direction), ascending by
    /// `created_at`. `before` is an exclusive backfill cursor; `limit` bounds
    /// the page, counted from the newest qualifying row backward.
    async fn thread_between(
        &self,
        a: &str,
        b: &str,
        before: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<Message>>;

    /// Every message sent or received by `participant`, descending by `created_at`
    async fn all_touching(&self, participant: &str) -> Result<Vec<Message>>;

    /// Set `read_at` on all unread messages from `sender` to `receiver`;
    /// returns the number of rows touched
    async fn mark_thread_read(&self, receiver: &str, sender: &str) -> Result<u64>;

    /// Set `read_at` on a single unread message
    async fn mark_read(&self, message_id: &str) -> Result<()>;
}

#[async_trait]
pub trait ChangeFeed: Send + Sync {
    /// Open one logical channel for `principal`. The feed is not filtered
    /// server-side; rows belonging to other principals may arrive and are
    /// discarded by the subscriber.
    async fn subscribe(&self, principal: &str) -> Result<FeedSubscription>;
}

/// An owned, live feed subscription. Dropping it (or calling [`close`])
/// detaches the channel; the feed implementation observes the closure and
/// must stop delivering.
///
/// [`close`]: FeedSubscription::close
pub struct FeedSubscription {
    events: mpsc::Receiver<ChangeEvent>,
    closer: oneshot::Sender<()>,
}

impl FeedSubscription {
    pub fn new(events: mpsc::Receiver<ChangeEvent>, closer: oneshot::Sender<()>) -> Self {
        Self { events, closer }
    }

    /// Next event; `None` once the channel is closed
    pub async fn recv(&mut self) -> Option<ChangeEvent> {
        self.events.recv().await
    }

    /// Tear the subscription down
    pub fn close(self) {
        drop(self.closer);
    }
}
