//! Open-conversation store: the ordered message log of the one currently
//! open thread, with cursor-based backfill and the read-receipt side effect
//! on open
use crate::backend::MessageRepository;
use crate::error::Result;
use crate::types::Message;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

#[derive(Debug)]
struct OpenThread {
    partner_id: String,
    messages: Vec<Message>,
    /// Backfill cursor: `created_at` of the oldest loaded row
    oldest_loaded: Option<DateTime<Utc>>,
    exhausted: bool,
}

#[derive(Default)]
struct ThreadState {
    open: Option<OpenThread>,
    /// Bumped on every open/close; in-flight work tagged with an older epoch
    /// must not install its result
    epoch: u64,
}

pub struct ThreadStore {
    principal_id: String,
    repo: Arc<dyn MessageRepository>,
    page_size: usize,
    state: Arc<RwLock<ThreadState>>,
}

impl ThreadStore {
    pub(crate) fn new(principal_id: String, repo: Arc<dyn MessageRepository>, page_size: usize) -> Self {
        Self {
            principal_id,
            repo,
            page_size,
            state: Arc::new(RwLock::new(ThreadState::default())),
        }
    }

    /// Open the conversation with `partner_id`: fetch the most recent page,
    /// install it, and fire the read-receipt side effect for the whole
    /// thread, including unread rows older than the fetched page. Receipt
    /// failure is logged, never surfaced, and never blocks the thread from
    /// displaying.
    pub async fn open(&self, partner_id: &str) -> Result<Vec<Message>> {
        let epoch = {
            let mut st = self.state.write().await;
            st.epoch += 1;
            st.open = None;
            st.epoch
        };

        let page = self
            .repo
            .thread_between(&self.principal_id, partner_id, None, self.page_size)
            .await?;

        // Stamp the locally visible copies; the durable update runs below.
        let now = Utc::now();
        let mut messages = page;
        for m in &mut messages {
            if m.receiver_id == self.principal_id && m.read_at.is_none() {
                m.read_at = Some(now);
            }
        }

        let oldest_loaded = messages.first().map(|m| m.created_at);
        let exhausted = messages.len() < self.page_size;

        {
            let mut st = self.state.write().await;
            if st.epoch != epoch {
                // A newer open/close superseded this fetch while it was in
                // flight; its result must not clobber the current thread.
                debug!("discarding superseded thread fetch for {}", partner_id);
                return Ok(messages);
            }
            st.open = Some(OpenThread {
                partner_id: partner_id.to_string(),
                messages: messages.clone(),
                oldest_loaded,
                exhausted,
            });
        }

        // Unconditional: unread rows may sit beyond the fetched page, and the
        // null-check update is a no-op when nothing is unread.
        let repo = self.repo.clone();
        let receiver = self.principal_id.clone();
        let sender = partner_id.to_string();
        tokio::spawn(async move {
            match repo.mark_thread_read(&receiver, &sender).await {
                Ok(n) => debug!("marked {} messages from {} as read", n, sender),
                Err(e) => warn!("read receipt for thread with {} failed: {}", sender, e),
            }
        });

        Ok(messages)
    }

    /// Extend the open thread backward by one page. Returns the full merged
    /// log; a no-op once the history is exhausted or no thread is open.
    pub async fn load_older(&self) -> Result<Vec<Message>> {
        let (partner_id, before, epoch) = {
            let st = self.state.read().await;
            match &st.open {
                Some(t) if !t.exhausted => (t.partner_id.clone(), t.oldest_loaded, st.epoch),
                Some(t) => return Ok(t.messages.clone()),
                None => return Ok(Vec::new()),
            }
        };

        let older = self
            .repo
            .thread_between(&self.principal_id, &partner_id, before, self.page_size)
            .await?;

        let mut st = self.state.write().await;
        if st.epoch != epoch {
            return Ok(Vec::new());
        }
        match st.open.as_mut() {
            Some(t) => {
                t.exhausted = older.len() < self.page_size;
                if let Some(first) = older.first() {
                    t.oldest_loaded = Some(first.created_at);
                }
                let mut merged = older;
                merged.append(&mut t.messages);
                t.messages = merged;
                Ok(t.messages.clone())
            }
            None => Ok(Vec::new()),
        }
    }

    /// Close the open thread; feed effects scoped to it stop applying
    pub async fn close(&self) {
        let mut st = self.state.write().await;
        st.epoch += 1;
        st.open = None;
    }

    /// Partner of the currently open thread, if any
    pub async fn open_partner(&self) -> Option<String> {
        self.state.read().await.open.as_ref().map(|t| t.partner_id.clone())
    }

    /// Snapshot of the open thread's messages (empty when none is open)
    pub async fn messages(&self) -> Vec<Message> {
        self.state
            .read()
            .await
            .open
            .as_ref()
            .map(|t| t.messages.clone())
            .unwrap_or_default()
    }

    /// Append a not-yet-committed placeholder, if its thread is the open one
    pub(crate) async fn append_pending(&self, msg: Message) {
        let mut st = self.state.write().await;
        if let Some(t) = st.open.as_mut() {
            if t.partner_id == msg.receiver_id {
                t.messages.push(msg);
            }
        }
    }

    /// Roll a failed send's placeholder back out of the thread
    pub(crate) async fn remove_pending(&self, temp_id: &str) {
        let mut st = self.state.write().await;
        if let Some(t) = st.open.as_mut() {
            t.messages.retain(|m| m.id != temp_id);
        }
    }

    /// Replace a placeholder with its canonical server row, in place, so the
    /// sender sees no reordering
    pub(crate) async fn promote_pending(&self, temp_id: &str, row: Message) {
        let mut st = self.state.write().await;
        if let Some(t) = st.open.as_mut() {
            if let Some(slot) = t.messages.iter_mut().find(|m| m.id == temp_id) {
                *slot = row;
            }
        }
    }

    /// Apply one feed-inserted row to the open thread: dedupe against a
    /// pending placeholder with the same content (self-echo), then append
    /// unless the final id is already present. Returns true when the row was
    /// appended and is addressed to the principal, in which case the caller
    /// owes it a single-row read receipt.
    pub(crate) async fn apply_insert(&self, row: &Message) -> bool {
        let mut st = self.state.write().await;
        let Some(t) = st.open.as_mut() else {
            return false;
        };
        if !row.in_thread(&self.principal_id, &t.partner_id) {
            return false;
        }

        t.messages
            .retain(|m| !(m.is_pending() && m.content == row.content));
        if t.messages.iter().any(|m| m.id == row.id) {
            return false;
        }

        let received = row.receiver_id == self.principal_id;
        t.messages.push(row.clone());
        received
    }

    /// Patch a sent message's `read_at` after the receiver's receipt lands
    pub(crate) async fn apply_read_receipt(&self, row: &Message) {
        let mut st = self.state.write().await;
        if let Some(t) = st.open.as_mut() {
            if let Some(m) = t.messages.iter_mut().find(|m| m.id == row.id) {
                m.read_at = row.read_at;
            }
        }
    }
}

impl Clone for ThreadStore {
    fn clone(&self) -> Self {
        Self {
            principal_id: self.principal_id.clone(),
            repo: self.repo.clone(),
            page_size: self.page_size,
            state: self.state.clone(),
        }
    }
}
