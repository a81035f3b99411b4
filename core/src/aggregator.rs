//! Cross-conversation summary list: derived from the principal's full
//! message set, kept sorted most-recently-active first, patched in place on
//! feed activity
use crate::backend::MessageRepository;
use crate::error::Result;
use crate::identity::IdentityDirectory;
use crate::types::{ConversationSummary, Message};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Whether a refresh may toggle the user-visible loading flag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Refresh {
    /// Initial load / explicit refetch; sets the loading flag
    Hard,
    /// Background re-aggregation; must stay invisible
    Soft,
}

#[derive(Default)]
struct AggregatorState {
    summaries: Vec<ConversationSummary>,
    loading: bool,
}

pub struct ConversationAggregator {
    principal_id: String,
    repo: Arc<dyn MessageRepository>,
    directory: IdentityDirectory,
    state: Arc<RwLock<AggregatorState>>,
}

impl ConversationAggregator {
    pub(crate) fn new(
        principal_id: String,
        repo: Arc<dyn MessageRepository>,
        directory: IdentityDirectory,
    ) -> Self {
        Self {
            principal_id,
            repo,
            directory,
            state: Arc::new(RwLock::new(AggregatorState::default())),
        }
    }

    /// Snapshot of the current summary list
    pub async fn summaries(&self) -> Vec<ConversationSummary> {
        self.state.read().await.summaries.clone()
    }

    /// True while a hard refresh is in flight
    pub async fn is_loading(&self) -> bool {
        self.state.read().await.loading
    }

    /// Re-derive the whole list from the message log. An empty log yields an
    /// empty list, not an error; a fetch failure leaves the previous list in
    /// place and surfaces the error.
    pub async fn refresh(&self, mode: Refresh) -> Result<Vec<ConversationSummary>> {
        if mode == Refresh::Hard {
            self.state.write().await.loading = true;
        }

        let result = self.rebuild().await;

        let mut st = self.state.write().await;
        if mode == Refresh::Hard {
            st.loading = false;
        }
        if let Ok(list) = &result {
            st.summaries = list.clone();
        }
        result
    }

    async fn rebuild(&self) -> Result<Vec<ConversationSummary>> {
        let messages = self.repo.all_touching(&self.principal_id).await?;

        // Group by partner. The input is descending, so the first message
        // seen per partner is that conversation's most recent one.
        let mut order: Vec<String> = Vec::new();
        let mut groups: HashMap<String, Vec<&Message>> = HashMap::new();
        for msg in &messages {
            let partner = if msg.sender_id == self.principal_id {
                &msg.receiver_id
            } else {
                &msg.sender_id
            };
            if !groups.contains_key(partner) {
                order.push(partner.clone());
            }
            groups.entry(partner.clone()).or_default().push(msg);
        }

        // One identity lookup per distinct partner, not per message
        let mut list = Vec::with_capacity(order.len());
        for partner in order {
            let identity = self.directory.lookup_partner(&partner).await;
            let group = &groups[&partner];
            let last = group[0];
            let unread = group
                .iter()
                .filter(|m| m.receiver_id == self.principal_id && m.read_at.is_none())
                .count() as u32;

            list.push(ConversationSummary {
                participant_id: partner.clone(),
                participant_name: identity.name,
                participant_type: identity.participant_type,
                participant_avatar: identity.avatar,
                participant_location: identity.location,
                last_message: last.content.clone(),
                last_message_time: last.created_at,
                unread_count: unread,
            });
        }

        list.sort_by(|a, b| b.last_message_time.cmp(&a.last_message_time));
        Ok(list)
    }

    /// Patch the list in place for one inserted row: update the partner's
    /// last-message fields, bump unread only when the row was received and
    /// that partner's thread is not open, and move the summary to the front.
    /// Returns false when the partner has no summary yet (first-ever
    /// contact); the caller falls back to a soft refresh, since the feed
    /// event carries none of the identity fields.
    pub(crate) async fn apply_insert(
        &self,
        row: &Message,
        partner: &str,
        received: bool,
        partner_thread_open: bool,
    ) -> bool {
        let mut st = self.state.write().await;
        let Some(pos) = st.summaries.iter().position(|s| s.participant_id == partner) else {
            return false;
        };

        let mut summary = st.summaries.remove(pos);
        summary.last_message = row.content.clone();
        summary.last_message_time = row.created_at;
        if received && !partner_thread_open {
            summary.unread_count += 1;
        }
        st.summaries.insert(0, summary);
        true
    }

    /// Zero a partner's badge when their thread opens
    pub(crate) async fn clear_unread(&self, partner: &str) {
        let mut st = self.state.write().await;
        if let Some(s) = st.summaries.iter_mut().find(|s| s.participant_id == partner) {
            s.unread_count = 0;
        }
    }
}

impl Clone for ConversationAggregator {
    fn clone(&self) -> Self {
        Self {
            principal_id: self.principal_id.clone(),
            repo: self.repo.clone(),
            directory: self.directory.clone(),
            state: self.state.clone(),
        }
    }
}
