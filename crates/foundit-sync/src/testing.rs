//! Scripted in-memory store for unit tests: canned responses, injected
//! failures and a gate that parks queries until released.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Result, bail};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Notify, Semaphore, watch};
use uuid::Uuid;

use foundit_feed::{ChangeFeed, Subscription};
use foundit_types::api::{MessageQuery, NewMessage, ReadScope, SortOrder};
use foundit_types::events::{ChangeFilter, RowChange};
use foundit_types::models::{Message, Profile, Report, ReportKind};

use crate::client::MessageClient;
use crate::session::{CurrentUser, Session};
use crate::store::MessageStore;

pub(crate) struct FakeStore {
    feed: ChangeFeed,
    messages: Mutex<Vec<Message>>,
    profiles: Mutex<HashMap<Uuid, Profile>>,
    reports: Mutex<HashMap<Uuid, Report>>,
    canned: Mutex<VecDeque<Vec<Message>>>,
    clock: Mutex<DateTime<Utc>>,
    gate: Mutex<Option<Arc<Semaphore>>>,
    parked: Notify,
    fail_inserts: AtomicBool,
    fail_queries: AtomicBool,
    fail_mark_read: AtomicBool,
    insert_calls: AtomicUsize,
    query_calls: AtomicUsize,
    profile_calls: AtomicUsize,
}

impl FakeStore {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            feed: ChangeFeed::new(),
            messages: Mutex::new(Vec::new()),
            profiles: Mutex::new(HashMap::new()),
            reports: Mutex::new(HashMap::new()),
            canned: Mutex::new(VecDeque::new()),
            clock: Mutex::new(Utc::now()),
            gate: Mutex::new(None),
            parked: Notify::new(),
            fail_inserts: AtomicBool::new(false),
            fail_queries: AtomicBool::new(false),
            fail_mark_read: AtomicBool::new(false),
            insert_calls: AtomicUsize::new(0),
            query_calls: AtomicUsize::new(0),
            profile_calls: AtomicUsize::new(0),
        })
    }

    pub(crate) fn client(self: &Arc<Self>, session: &Session) -> MessageClient {
        MessageClient::new(self.clone(), session.clone())
    }

    pub(crate) fn session_for(&self, user_id: Uuid) -> Session {
        let profile = self.profiles.lock().unwrap().get(&user_id).cloned();
        Session::signed_in(CurrentUser {
            id: user_id,
            email: profile.and_then(|p| p.email).unwrap_or_default(),
            full_name: None,
        })
    }

    pub(crate) fn feed(&self) -> &ChangeFeed {
        &self.feed
    }

    pub(crate) fn add_profile(&self, name: &str) -> Uuid {
        let id = Uuid::new_v4();
        self.profiles.lock().unwrap().insert(
            id,
            Profile {
                id,
                full_name: Some(name.to_string()),
                email: Some(format!("{}@school.edu", name.to_lowercase())),
            },
        );
        id
    }

    pub(crate) fn add_report(&self, owner: Uuid, name: &str) -> Uuid {
        let id = Uuid::new_v4();
        self.reports.lock().unwrap().insert(
            id,
            Report {
                id,
                kind: ReportKind::Found,
                name: name.to_string(),
                user_id: owner,
                created_at: Utc::now(),
            },
        );
        id
    }

    /// (me, them, someone else, a report owned by me)
    pub(crate) fn seed_users_and_report(&self) -> (Uuid, Uuid, Uuid, Uuid) {
        let me = self.add_profile("Ana");
        let them = self.add_profile("Ben");
        let other = self.add_profile("Cleo");
        let report = self.add_report(me, "Blue backpack");
        (me, them, other, report)
    }

    fn tick(&self) -> DateTime<Utc> {
        let mut clock = self.clock.lock().unwrap();
        *clock += chrono::Duration::milliseconds(1);
        *clock
    }

    /// A message with the next timestamp that is not stored anywhere.
    pub(crate) fn message(&self, report: Uuid, from: Uuid, to: Uuid, content: &str) -> Message {
        Message {
            id: Uuid::new_v4(),
            item_report_id: report,
            sender_id: from,
            receiver_id: to,
            content: content.to_string(),
            is_read: false,
            created_at: self.tick(),
        }
    }

    /// Store a message without publishing it.
    pub(crate) fn seed_message(
        &self,
        report: Uuid,
        from: Uuid,
        to: Uuid,
        content: &str,
    ) -> Message {
        let message = self.message(report, from, to, content);
        self.messages.lock().unwrap().push(message.clone());
        message
    }

    /// The next query returns `rows` as-is, ignoring its filters.
    pub(crate) fn respond_once_with(&self, rows: Vec<Message>) {
        self.canned.lock().unwrap().push_back(rows);
    }

    pub(crate) fn stored(&self, id: Uuid) -> Option<Message> {
        self.messages.lock().unwrap().iter().find(|m| m.id == id).cloned()
    }

    pub(crate) fn hold_queries(&self) {
        *self.gate.lock().unwrap() = Some(Arc::new(Semaphore::new(0)));
    }

    pub(crate) fn release_queries(&self) {
        if let Some(gate) = self.gate.lock().unwrap().take() {
            gate.add_permits(Semaphore::MAX_PERMITS / 2);
        }
    }

    pub(crate) async fn wait_for_held_query(&self) {
        tokio::time::timeout(Duration::from_secs(2), self.parked.notified())
            .await
            .expect("no query reached the gate");
    }

    pub(crate) fn fail_inserts(&self, fail: bool) {
        self.fail_inserts.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn fail_queries(&self, fail: bool) {
        self.fail_queries.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn fail_mark_read(&self, fail: bool) {
        self.fail_mark_read.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn insert_calls(&self) -> usize {
        self.insert_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn query_calls(&self) -> usize {
        self.query_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn profile_calls(&self) -> usize {
        self.profile_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MessageStore for FakeStore {
    async fn insert_message(&self, msg: NewMessage) -> Result<Message> {
        self.insert_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_inserts.load(Ordering::SeqCst) {
            bail!("connection reset");
        }

        let message = Message {
            id: Uuid::new_v4(),
            item_report_id: msg.item_report_id,
            sender_id: msg.sender_id,
            receiver_id: msg.receiver_id,
            content: msg.content,
            is_read: false,
            created_at: self.tick(),
        };
        self.messages.lock().unwrap().push(message.clone());
        self.feed.publish(RowChange::Insert(message.clone()));
        Ok(message)
    }

    async fn query_messages(&self, query: MessageQuery) -> Result<Vec<Message>> {
        self.query_calls.fetch_add(1, Ordering::SeqCst);

        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            self.parked.notify_one();
            let _permit = gate.acquire().await?;
        }

        if self.fail_queries.load(Ordering::SeqCst) {
            bail!("query timed out");
        }
        if let Some(rows) = self.canned.lock().unwrap().pop_front() {
            return Ok(rows);
        }

        let mut rows: Vec<Message> = self
            .messages
            .lock()
            .unwrap()
            .iter()
            .filter(|m| query.matches(m))
            .cloned()
            .collect();
        rows.sort_by_key(|m| m.created_at);
        if query.order == SortOrder::Descending {
            rows.reverse();
        }
        if let Some(limit) = query.limit {
            rows.truncate(limit);
        }
        Ok(rows)
    }

    async fn mark_read(&self, scope: ReadScope) -> Result<Vec<Message>> {
        if self.fail_mark_read.load(Ordering::SeqCst) {
            bail!("permission denied");
        }

        let changed: Vec<Message> = self
            .messages
            .lock()
            .unwrap()
            .iter_mut()
            .filter(|m| !m.is_read && scope.matches(m))
            .map(|m| {
                m.is_read = true;
                m.clone()
            })
            .collect();

        for message in &changed {
            self.feed.publish(RowChange::Update(message.clone()));
        }
        Ok(changed)
    }

    async fn profile(&self, id: Uuid) -> Result<Option<Profile>> {
        self.profile_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.profiles.lock().unwrap().get(&id).cloned())
    }

    async fn report(&self, id: Uuid) -> Result<Option<Report>> {
        Ok(self.reports.lock().unwrap().get(&id).cloned())
    }

    fn subscribe(&self, filter: ChangeFilter) -> Subscription {
        self.feed.subscribe(filter)
    }
}

/// Wait until `cond` holds, re-checking whenever the view reports a change.
pub(crate) async fn wait_until(changes: &watch::Receiver<u64>, mut cond: impl FnMut() -> bool) {
    let mut rx = changes.clone();
    tokio::time::timeout(Duration::from_secs(2), async {
        while !cond() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    })
    .await
    .expect("view never reached the expected state");
}
