//! In-memory collaborator fakes shared by the integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use coachsync_core::{
    AccountRole, ChangeEvent, ChangeFeed, FeedSubscription, IdentityDirectory, IdentityProvider,
    Message, MessageRepository, NewMessage, ParticipantType, PartnerIdentity, Result, SyncConfig,
    SyncEngine, SyncError,
};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

/// Message table fake with injectable failures and latency
pub struct MemoryRepository {
    rows: Mutex<Vec<Message>>,
    base: DateTime<Utc>,
    ticks: Mutex<i64>,
    pub fail_insert: AtomicBool,
    pub fail_fetch: AtomicBool,
    pub fail_receipts: AtomicBool,
    pub thread_fetches: AtomicUsize,
    insert_delays: Mutex<VecDeque<Duration>>,
    insert_failures: Mutex<VecDeque<bool>>,
    insert_hold: Mutex<Option<oneshot::Receiver<()>>>,
    fetch_hold: Mutex<Option<oneshot::Receiver<()>>>,
}

impl MemoryRepository {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            rows: Mutex::new(Vec::new()),
            base: Utc::now(),
            ticks: Mutex::new(0),
            fail_insert: AtomicBool::new(false),
            fail_fetch: AtomicBool::new(false),
            fail_receipts: AtomicBool::new(false),
            thread_fetches: AtomicUsize::new(0),
            insert_delays: Mutex::new(VecDeque::new()),
            insert_failures: Mutex::new(VecDeque::new()),
            insert_hold: Mutex::new(None),
            fetch_hold: Mutex::new(None),
        })
    }

    /// Fixed instant `offset_secs` after the repository's base time;
    /// negative offsets land in the past
    pub fn at(&self, offset_secs: i64) -> DateTime<Utc> {
        self.base + ChronoDuration::seconds(offset_secs)
    }

    fn next_timestamp(&self) -> DateTime<Utc> {
        let mut t = self.ticks.lock().unwrap();
        *t += 1;
        self.base + ChronoDuration::milliseconds(*t)
    }

    /// Pre-populate one committed row
    pub fn seed(
        &self,
        sender: &str,
        receiver: &str,
        content: &str,
        at: DateTime<Utc>,
        read: bool,
    ) -> Message {
        let row = Message {
            id: Uuid::new_v4().to_string(),
            sender_id: sender.to_string(),
            receiver_id: receiver.to_string(),
            content: content.to_string(),
            created_at: at,
            read_at: if read { Some(at) } else { None },
        };
        self.rows.lock().unwrap().push(row.clone());
        row
    }

    pub fn rows(&self) -> Vec<Message> {
        self.rows.lock().unwrap().clone()
    }

    pub fn row(&self, id: &str) -> Option<Message> {
        self.rows.lock().unwrap().iter().find(|m| m.id == id).cloned()
    }

    /// Queue per-insert latencies, consumed in call order
    pub fn delay_next_inserts(&self, delays: &[Duration]) {
        self.insert_delays.lock().unwrap().extend(delays.iter().copied());
    }

    /// Queue per-insert outcomes (true = fail after any queued delay),
    /// consumed in call order
    pub fn fail_inserts(&self, outcomes: &[bool]) {
        self.insert_failures.lock().unwrap().extend(outcomes.iter().copied());
    }

    /// Make the next insert commit but not return until the gate is released
    pub fn hold_next_insert(&self) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        *self.insert_hold.lock().unwrap() = Some(rx);
        tx
    }

    /// Park the next thread fetch until the gate is released
    pub fn hold_next_fetch(&self) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        *self.fetch_hold.lock().unwrap() = Some(rx);
        tx
    }
}

#[async_trait]
impl MessageRepository for MemoryRepository {
    async fn insert(&self, new: NewMessage) -> Result<Message> {
        if self.fail_insert.load(Ordering::SeqCst) {
            return Err(SyncError::SendFailed("injected commit failure".into()));
        }
        // Outcomes and delays are claimed in call order, applied after the
        // delay elapses, so tests can fail a slow insert behind a fast one.
        let planned_failure = self.insert_failures.lock().unwrap().pop_front().unwrap_or(false);
        let delay = self.insert_delays.lock().unwrap().pop_front();
        if let Some(d) = delay {
            tokio::time::sleep(d).await;
        }
        if planned_failure {
            return Err(SyncError::SendFailed("injected commit failure".into()));
        }
        let row = Message {
            id: Uuid::new_v4().to_string(),
            sender_id: new.sender_id,
            receiver_id: new.receiver_id,
            content: new.content,
            created_at: self.next_timestamp(),
            read_at: None,
        };
        self.rows.lock().unwrap().push(row.clone());

        let hold = self.insert_hold.lock().unwrap().take();
        if let Some(gate) = hold {
            let _ = gate.await;
        }
        Ok(row)
    }

    async fn thread_between(
        &self,
        a: &str,
        b: &str,
        before: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<Message>> {
        self.thread_fetches.fetch_add(1, Ordering::SeqCst);
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(SyncError::FetchFailed("injected fetch failure".into()));
        }
        let mut out: Vec<Message> = self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.in_thread(a, b))
            .filter(|m| before.map_or(true, |cut| m.created_at < cut))
            .cloned()
            .collect();
        out.sort_by_key(|m| m.created_at);
        if out.len() > limit {
            out = out.split_off(out.len() - limit);
        }
        let hold = self.fetch_hold.lock().unwrap().take();
        if let Some(gate) = hold {
            let _ = gate.await;
        }
        Ok(out)
    }

    async fn all_touching(&self, participant: &str) -> Result<Vec<Message>> {
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(SyncError::FetchFailed("injected fetch failure".into()));
        }
        let mut out: Vec<Message> = self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.sender_id == participant || m.receiver_id == participant)
            .cloned()
            .collect();
        out.sort_by(|x, y| y.created_at.cmp(&x.created_at));
        Ok(out)
    }

    async fn mark_thread_read(&self, receiver: &str, sender: &str) -> Result<u64> {
        if self.fail_receipts.load(Ordering::SeqCst) {
            return Err(SyncError::ReadReceiptFailed("injected receipt failure".into()));
        }
        let now = Utc::now();
        let mut touched = 0;
        for m in self.rows.lock().unwrap().iter_mut() {
            if m.receiver_id == receiver && m.sender_id == sender && m.read_at.is_none() {
                m.read_at = Some(now);
                touched += 1;
            }
        }
        Ok(touched)
    }

    async fn mark_read(&self, message_id: &str) -> Result<()> {
        if self.fail_receipts.load(Ordering::SeqCst) {
            return Err(SyncError::ReadReceiptFailed("injected receipt failure".into()));
        }
        let now = Utc::now();
        if let Some(m) = self
            .rows
            .lock()
            .unwrap()
            .iter_mut()
            .find(|m| m.id == message_id)
        {
            if m.read_at.is_none() {
                m.read_at = Some(now);
            }
        }
        Ok(())
    }
}

/// Change feed fake: one mpsc channel per subscription, no server-side
/// filtering (every subscriber gets every pushed row)
#[derive(Default)]
pub struct MemoryFeed {
    senders: Mutex<Vec<mpsc::Sender<ChangeEvent>>>,
    pub fail_subscribe: AtomicBool,
}

impl MemoryFeed {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Deliver one event to every live subscription; returns how many took it
    pub async fn push(&self, event: ChangeEvent) -> usize {
        let senders = self.senders.lock().unwrap().clone();
        let mut delivered = 0;
        for s in senders {
            if s.send(event.clone()).await.is_ok() {
                delivered += 1;
            }
        }
        self.senders.lock().unwrap().retain(|s| !s.is_closed());
        delivered
    }

    pub fn subscriber_count(&self) -> usize {
        self.senders.lock().unwrap().iter().filter(|s| !s.is_closed()).count()
    }

    /// Simulate the feed dying server-side
    pub fn drop_all(&self) {
        self.senders.lock().unwrap().clear();
    }
}

#[async_trait]
impl ChangeFeed for MemoryFeed {
    async fn subscribe(&self, _principal: &str) -> Result<FeedSubscription> {
        if self.fail_subscribe.load(Ordering::SeqCst) {
            return Err(SyncError::Subscription("injected subscribe failure".into()));
        }
        let (tx, rx) = mpsc::channel(64);
        let (close_tx, _close_rx) = oneshot::channel();
        self.senders.lock().unwrap().push(tx);
        Ok(FeedSubscription::new(rx, close_tx))
    }
}

/// One identity partition backed by fixed tables
pub struct TableProvider {
    ptype: ParticipantType,
    accounts: HashMap<String, String>,
    identities: HashMap<String, PartnerIdentity>,
}

impl TableProvider {
    pub fn new(ptype: ParticipantType) -> Self {
        Self {
            ptype,
            accounts: HashMap::new(),
            identities: HashMap::new(),
        }
    }

    pub fn with_account(mut self, account_id: &str, participant_id: &str) -> Self {
        self.accounts
            .insert(account_id.to_string(), participant_id.to_string());
        self
    }

    pub fn with_identity(
        mut self,
        participant_id: &str,
        name: &str,
        avatar: Option<&str>,
        location: Option<&str>,
    ) -> Self {
        self.identities.insert(
            participant_id.to_string(),
            PartnerIdentity {
                name: name.to_string(),
                participant_type: self.ptype,
                avatar: avatar.map(str::to_string),
                location: location.map(str::to_string),
            },
        );
        self
    }
}

#[async_trait]
impl IdentityProvider for TableProvider {
    fn participant_type(&self) -> ParticipantType {
        self.ptype
    }

    async fn resolve_account(&self, account_id: &str) -> Result<Option<String>> {
        Ok(self.accounts.get(account_id).cloned())
    }

    async fn lookup(&self, participant_id: &str) -> Result<Option<PartnerIdentity>> {
        Ok(self.identities.get(participant_id).cloned())
    }
}

/// Directory with one coach, two clients and one admin
pub fn marketplace_directory() -> IdentityDirectory {
    let coach = TableProvider::new(ParticipantType::Coach)
        .with_account("acct-coach-1", "coach-1")
        .with_identity("coach-1", "Sarah Bennett", Some("coach-1.png"), Some("Austin, TX"));
    let client = TableProvider::new(ParticipantType::Client)
        .with_account("acct-client-1", "client-1")
        .with_identity("client-1", "Riley Park", Some("client-1.png"), None)
        .with_identity("client-2", "Morgan Lee", None, None);
    let admin = TableProvider::new(ParticipantType::Admin)
        .with_account("acct-admin-1", "admin-1")
        .with_identity("admin-1", "Support", None, None);
    IdentityDirectory::new(Arc::new(coach), Arc::new(client), Arc::new(admin))
}

pub struct Harness {
    pub repo: Arc<MemoryRepository>,
    pub feed: Arc<MemoryFeed>,
    pub engine: SyncEngine,
}

pub async fn connect(account_id: &str, role: AccountRole) -> Harness {
    connect_with_config(account_id, role, SyncConfig::default()).await
}

pub async fn connect_with_config(
    account_id: &str,
    role: AccountRole,
    config: SyncConfig,
) -> Harness {
    init_tracing();
    let repo = MemoryRepository::new();
    let feed = MemoryFeed::new();
    let engine = SyncEngine::connect(
        account_id,
        role,
        repo.clone(),
        feed.clone(),
        marketplace_directory(),
        config,
    )
    .await
    .expect("engine connect");
    Harness { repo, feed, engine }
}

pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}

/// Poll `cond` until it holds or two seconds pass
pub async fn wait_for(what: &str, mut cond: impl FnMut() -> bool) {
    for _ in 0..400 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for {}", what);
}
