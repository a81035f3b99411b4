//! Optimistic send pipeline: local placeholder first, remote commit second,
//! then promote or roll back
use crate::backend::{MessageRepository, NewMessage};
use crate::error::{Result, SyncError};
use crate::thread::ThreadStore;
use crate::types::{Message, SendOutcome, TEMP_ID_PREFIX};
use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Disambiguates placeholders minted within the same millisecond, so a
/// rollback by id can never take a sibling placeholder with it
static PENDING_SEQ: AtomicU64 = AtomicU64::new(0);

pub struct Outbox {
    principal_id: String,
    repo: Arc<dyn MessageRepository>,
    thread: ThreadStore,
}

impl Outbox {
    pub(crate) fn new(principal_id: String, repo: Arc<dyn MessageRepository>, thread: ThreadStore) -> Self {
        Self {
            principal_id,
            repo,
            thread,
        }
    }

    /// Send `text` to `partner_id`. The placeholder appears in the open
    /// thread before any network round trip completes; on commit failure it
    /// is rolled back unconditionally and the error surfaced exactly once.
    /// Blank input is a silent no-op.
    pub async fn send(&self, partner_id: &str, text: &str) -> Result<SendOutcome> {
        if partner_id.is_empty() {
            return Err(SyncError::NoRecipient);
        }
        let content = text.trim();
        if content.is_empty() {
            return Ok(SendOutcome::Ignored);
        }

        let temp_id = format!(
            "{}{}-{}",
            TEMP_ID_PREFIX,
            Utc::now().timestamp_millis(),
            PENDING_SEQ.fetch_add(1, Ordering::Relaxed),
        );
        let pending = Message {
            id: temp_id.clone(),
            sender_id: self.principal_id.clone(),
            receiver_id: partner_id.to_string(),
            content: content.to_string(),
            created_at: Utc::now(),
            read_at: None,
        };
        self.thread.append_pending(pending).await;

        let commit = self
            .repo
            .insert(NewMessage {
                sender_id: self.principal_id.clone(),
                receiver_id: partner_id.to_string(),
                content: content.to_string(),
            })
            .await;

        match commit {
            Ok(row) => {
                debug!("send to {} committed as {}", partner_id, row.id);
                self.thread.promote_pending(&temp_id, row.clone()).await;
                Ok(SendOutcome::Sent(row))
            }
            Err(e) => {
                self.thread.remove_pending(&temp_id).await;
                Err(SyncError::SendFailed(e.to_string()))
            }
        }
    }
}

impl Clone for Outbox {
    fn clone(&self) -> Self {
        Self {
            principal_id: self.principal_id.clone(),
            repo: self.repo.clone(),
            thread: self.thread.clone(),
        }
    }
}
