//! Engine orchestration: binds the thread store, the aggregator and the
//! outbox to one resolved principal, and owns the change feed subscription
use crate::aggregator::{ConversationAggregator, Refresh};
use crate::backend::{ChangeFeed, FeedSubscription, MessageRepository};
use crate::config::SyncConfig;
use crate::error::Result;
use crate::identity::IdentityDirectory;
use crate::outbox::Outbox;
use crate::thread::ThreadStore;
use crate::types::{AccountRole, ChangeEvent, ConversationSummary, Message, SendOutcome};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const MAX_RESUBSCRIBE_BACKOFF: Duration = Duration::from_secs(30);

struct PumpHandle {
    task: JoinHandle<()>,
    stop: watch::Sender<bool>,
}

/// One messaging engine per authenticated principal. Switching principal
/// (logout/login) means dropping this engine and connecting a new one, which
/// tears the old feed subscription down.
pub struct SyncEngine {
    principal_id: String,
    repo: Arc<dyn MessageRepository>,
    feed: Arc<dyn ChangeFeed>,
    config: SyncConfig,
    thread: ThreadStore,
    aggregator: ConversationAggregator,
    outbox: Outbox,
    pump: Arc<RwLock<Option<PumpHandle>>>,
}

impl SyncEngine {
    /// Resolve the caller's durable participant id and build an engine bound
    /// to it. Nothing else runs until this succeeds; an unresolved profile is
    /// fatal to the whole subsystem until onboarding completes.
    pub async fn connect(
        account_id: &str,
        role: AccountRole,
        repo: Arc<dyn MessageRepository>,
        feed: Arc<dyn ChangeFeed>,
        directory: IdentityDirectory,
        config: SyncConfig,
    ) -> Result<Self> {
        let principal_id = directory.resolve_principal(account_id, role).await?;
        info!("messaging engine connected as participant {}", principal_id);

        let thread = ThreadStore::new(principal_id.clone(), repo.clone(), config.page_size());
        let aggregator =
            ConversationAggregator::new(principal_id.clone(), repo.clone(), directory);
        let outbox = Outbox::new(principal_id.clone(), repo.clone(), thread.clone());

        Ok(Self {
            principal_id,
            repo,
            feed,
            config,
            thread,
            aggregator,
            outbox,
            pump: Arc::new(RwLock::new(None)),
        })
    }

    pub fn principal_id(&self) -> &str {
        &self.principal_id
    }

    /// Cheap handle to the open-thread store (shared state)
    pub fn thread_store(&self) -> ThreadStore {
        self.thread.clone()
    }

    /// Cheap handle to the summary-list aggregator (shared state)
    pub fn aggregator(&self) -> ConversationAggregator {
        self.aggregator.clone()
    }

    /// Cheap handle to the send pipeline (shared state)
    pub fn outbox(&self) -> Outbox {
        self.outbox.clone()
    }

    /// Open the conversation with `partner_id`: most recent page plus the
    /// read-receipt side effect; the partner's badge clears locally as well
    pub async fn open_thread(&self, partner_id: &str) -> Result<Vec<Message>> {
        let messages = self.thread.open(partner_id).await?;
        self.aggregator.clear_unread(partner_id).await;
        Ok(messages)
    }

    /// Extend the open thread backward by one page
    pub async fn load_older_messages(&self) -> Result<Vec<Message>> {
        self.thread.load_older().await
    }

    /// Close the open thread; thread-scoped feed effects stop applying while
    /// summary-list patches continue
    pub async fn close_thread(&self) {
        self.thread.close().await;
    }

    /// Snapshot of the open thread (empty when none is open)
    pub async fn thread_messages(&self) -> Vec<Message> {
        self.thread.messages().await
    }

    /// Optimistic send into the open thread
    pub async fn send(&self, partner_id: &str, text: &str) -> Result<SendOutcome> {
        self.outbox.send(partner_id, text).await
    }

    /// Explicit refetch of the summary list (toggles the loading flag)
    pub async fn refresh_conversations(&self) -> Result<Vec<ConversationSummary>> {
        self.aggregator.refresh(Refresh::Hard).await
    }

    /// Snapshot of the summary list
    pub async fn conversations(&self) -> Vec<ConversationSummary> {
        self.aggregator.summaries().await
    }

    /// True while a hard conversation refresh is in flight
    pub async fn conversations_loading(&self) -> bool {
        self.aggregator.is_loading().await
    }

    /// Subscribe to the change feed and start applying pushed rows. At most
    /// one subscription is held; calling this again replaces the old one.
    pub async fn start(&self) -> Result<()> {
        self.shutdown().await;

        let sub = self.feed.subscribe(&self.principal_id).await?;
        debug!("change feed subscription opened for {}", self.principal_id);

        let (stop_tx, stop_rx) = watch::channel(false);
        let engine = self.clone();
        let task = tokio::spawn(async move { engine.pump(sub, stop_rx).await });
        *self.pump.write().await = Some(PumpHandle {
            task,
            stop: stop_tx,
        });
        Ok(())
    }

    /// Close the active subscription, if any, and wait for the pump to stop
    pub async fn shutdown(&self) {
        let handle = self.pump.write().await.take();
        if let Some(h) = handle {
            let _ = h.stop.send(true);
            let _ = h.task.await;
        }
    }

    async fn pump(&self, mut sub: FeedSubscription, mut stop: watch::Receiver<bool>) {
        let mut attempts = 0u32;
        let mut backoff = self.config.resubscribe_backoff;

        loop {
            tokio::select! {
                _ = stop.changed() => {
                    sub.close();
                    debug!("change feed subscription closed for {}", self.principal_id);
                    return;
                }
                event = sub.recv() => match event {
                    Some(event) => {
                        attempts = 0;
                        backoff = self.config.resubscribe_backoff;
                        self.apply_change(event).await;
                    }
                    None => {
                        // The channel died without a local close(); try to
                        // re-establish, bounded by configuration.
                        if attempts >= self.config.resubscribe_attempts {
                            error!(
                                "change feed lost for {}; resubscribe attempts exhausted",
                                self.principal_id
                            );
                            let _ = self.pump.write().await.take();
                            return;
                        }
                        attempts += 1;
                        warn!(
                            "change feed closed unexpectedly; resubscribing (attempt {}/{})",
                            attempts, self.config.resubscribe_attempts
                        );
                        tokio::select! {
                            _ = stop.changed() => return,
                            _ = tokio::time::sleep(backoff) => {}
                        }
                        backoff = (backoff * 2).min(MAX_RESUBSCRIBE_BACKOFF);
                        match self.feed.subscribe(&self.principal_id).await {
                            Ok(next) => sub = next,
                            Err(e) => warn!("resubscribe failed: {}", e),
                        }
                    }
                }
            }
        }
    }

    /// Classify and apply one pushed row change
    pub async fn apply_change(&self, event: ChangeEvent) {
        match event {
            ChangeEvent::Insert(row) => self.apply_insert(row).await,
            ChangeEvent::Update(row) => self.apply_update(row).await,
        }
    }

    async fn apply_insert(&self, row: Message) {
        let received = row.receiver_id == self.principal_id;
        let sent = row.sender_id == self.principal_id;
        if !received && !sent {
            // The feed is unfiltered; rows belonging to other principals'
            // conversations are dropped before touching any store.
            debug!("discarding feed row {} for another principal", row.id);
            return;
        }
        let partner = if sent {
            row.receiver_id.clone()
        } else {
            row.sender_id.clone()
        };

        let appended_received = self.thread.apply_insert(&row).await;
        if appended_received {
            // The receiver is looking at this thread right now: receipt for
            // this one row, fire-and-forget.
            let repo = self.repo.clone();
            let id = row.id.clone();
            tokio::spawn(async move {
                if let Err(e) = repo.mark_read(&id).await {
                    warn!("read receipt for message {} failed: {}", id, e);
                }
            });
        }

        let open_partner = self.thread.open_partner().await;
        let partner_thread_open = open_partner.as_deref() == Some(partner.as_str());
        let patched = self
            .aggregator
            .apply_insert(&row, &partner, received, partner_thread_open)
            .await;

        if !patched && open_partner.is_none() {
            // First-ever contact: the event carries none of the partner's
            // identity fields, so rebuild quietly instead of patching inline.
            if let Err(e) = self.aggregator.refresh(Refresh::Soft).await {
                warn!("background conversation refresh failed: {}", e);
            }
        }
    }

    async fn apply_update(&self, row: Message) {
        // Only read-receipt confirmations for the principal's own messages
        // are relevant; everything else is noise.
        if row.sender_id != self.principal_id {
            return;
        }
        self.thread.apply_read_receipt(&row).await;
    }
}

impl Clone for SyncEngine {
    fn clone(&self) -> Self {
        Self {
            principal_id: self.principal_id.clone(),
            repo: self.repo.clone(),
            feed: self.feed.clone(),
            config: self.config.clone(),
            thread: self.thread.clone(),
            aggregator: self.aggregator.clone(),
            outbox: self.outbox.clone(),
            pump: self.pump.clone(),
        }
    }
}
