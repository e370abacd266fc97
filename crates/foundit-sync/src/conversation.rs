use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

use foundit_types::api::ReadScope;
use foundit_types::events::{ChangeFilter, RowScope};
use foundit_types::models::Message;

use crate::client::MessageClient;
use crate::config::ViewOptions;
use crate::error::{Result, SyncError};
use crate::live::{LiveLoop, LiveTask, ViewCell, Wake};
use crate::session::Session;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Phase {
    #[default]
    Idle,
    Loading,
    Ready,
}

#[derive(Debug, Default)]
struct ConversationState {
    phase: Phase,
    me: Option<Uuid>,
    /// Oldest first.
    messages: Vec<Message>,
    draft: String,
    last_error: Option<String>,
    /// Ids this activation has marked read. A fetch that started before the
    /// mark landed still carries the old flag.
    read_ids: HashSet<Uuid>,
}

impl ConversationState {
    /// Place `message` by timestamp, after any equal timestamps. A message
    /// already present is not duplicated, only its read flag is refreshed.
    /// Returns true if the message was new.
    fn insert(&mut self, mut message: Message) -> bool {
        message.is_read |= self.read_ids.contains(&message.id);
        if let Some(existing) = self.messages.iter_mut().find(|m| m.id == message.id) {
            existing.is_read |= message.is_read;
            return false;
        }

        let at = self
            .messages
            .partition_point(|m| m.created_at <= message.created_at);
        self.messages.insert(at, message);
        true
    }

    fn merge(&mut self, fetched: Vec<Message>) {
        for message in fetched {
            self.insert(message);
        }
        self.phase = Phase::Ready;
    }

    fn mark_read_locally(&mut self, ids: impl IntoIterator<Item = Uuid>) {
        for id in ids {
            if let Some(m) = self.messages.iter_mut().find(|m| m.id == id) {
                m.is_read = true;
            }
            self.read_ids.insert(id);
        }
    }

    fn reset(&mut self) {
        self.messages.clear();
        self.read_ids.clear();
    }
}

/// One two-party thread about one report, seen from the signed-in user.
///
/// Nothing is cached across activations: `deactivate` discards the thread
/// and the next `activate` rebuilds it from the store.
pub struct ConversationView {
    client: MessageClient,
    item_report_id: Uuid,
    counterpart_id: Uuid,
    options: ViewOptions,
    cell: Arc<ViewCell<ConversationState>>,
    live: Option<LiveTask>,
}

impl ConversationView {
    pub fn new(
        client: MessageClient,
        item_report_id: Uuid,
        counterpart_id: Uuid,
        options: ViewOptions,
    ) -> Self {
        Self {
            client,
            item_report_id,
            counterpart_id,
            options,
            cell: Arc::new(ViewCell::new(ConversationState::default())),
            live: None,
        }
    }

    /// Idle → Loading. Opens the live subscription, starts the history fetch
    /// and marks the counterpart's messages as read. Must be called from
    /// within a Tokio runtime.
    pub fn activate(&mut self, session: &Session) -> Result<()> {
        let me = session.require_user_id()?;
        if me == self.counterpart_id {
            return Err(SyncError::Validation("cannot open a conversation with yourself".into()));
        }

        if let Some(live) = self.live.take() {
            live.stop();
        }

        // Subscribe before fetching so nothing persisted in between is missed;
        // duplicates from the overlap are dropped by id.
        let subscription = self
            .client
            .subscribe(ChangeFilter::inserts(RowScope::ItemReportId(self.item_report_id)));
        let handle = subscription.handle();

        let epoch = self.cell.next_epoch(|s| {
            s.phase = Phase::Loading;
            s.me = Some(me);
            s.reset();
            s.last_error = None;
        });

        let ctx = Thread {
            client: self.client.clone(),
            cell: self.cell.clone(),
            epoch,
            item_report_id: self.item_report_id,
            me,
            counterpart_id: self.counterpart_id,
        };

        // Fire and forget: a failure here must not hold up the history.
        tokio::spawn(ctx.clone().mark_conversation_read());

        let live = LiveLoop::new(subscription, self.options.reconcile_interval, session, me);
        let task = tokio::spawn(ctx.run(live));
        self.live = Some(LiveTask::new(task, handle));

        info!(
            "Conversation with {} about report {} activated",
            self.counterpart_id, self.item_report_id
        );
        Ok(())
    }

    /// Back to Idle. The subscription is released before this returns and any
    /// fetch still in flight is ignored when it completes.
    pub fn deactivate(&mut self) {
        if let Some(live) = self.live.take() {
            live.stop();
        }
        self.cell.next_epoch(|s| {
            s.phase = Phase::Idle;
            s.me = None;
            s.reset();
        });
    }

    pub fn is_active(&self) -> bool {
        self.live.is_some()
    }

    pub fn item_report_id(&self) -> Uuid {
        self.item_report_id
    }

    pub fn counterpart_id(&self) -> Uuid {
        self.counterpart_id
    }

    pub fn phase(&self) -> Phase {
        self.cell.read(|s| s.phase)
    }

    /// The thread, oldest first.
    pub fn messages(&self) -> Vec<Message> {
        self.cell.read(|s| s.messages.clone())
    }

    pub fn unread_count(&self) -> usize {
        self.cell.read(|s| match s.me {
            Some(me) => s.messages.iter().filter(|m| m.is_unread_for(me)).count(),
            None => 0,
        })
    }

    pub fn draft(&self) -> String {
        self.cell.read(|s| s.draft.clone())
    }

    pub fn set_draft(&self, text: impl Into<String>) {
        let text = text.into();
        self.cell.update(|s| s.draft = text);
    }

    pub fn last_error(&self) -> Option<String> {
        self.cell.read(|s| s.last_error.clone())
    }

    /// Version counter bumped on every state change.
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.cell.watch()
    }

    /// Send the current draft.
    ///
    /// The draft is cleared only once the store has persisted the message;
    /// on failure it is kept so the user can retry. The message is not added
    /// to the thread here: it shows up through the live subscription.
    pub async fn send(&self) -> Result<Message> {
        let (me, draft) = self.cell.read(|s| (s.me, s.draft.clone()));
        let Some(me) = me else {
            return Err(SyncError::Unauthenticated);
        };

        let result = self
            .client
            .send(self.item_report_id, me, self.counterpart_id, &draft)
            .await;

        self.cell.update(|s| match &result {
            Ok(_) => {
                // keep anything typed while the send was in flight
                if s.draft == draft {
                    s.draft.clear();
                }
                s.last_error = None;
            }
            Err(e) => s.last_error = Some(e.to_string()),
        });

        if let Err(e) = &result {
            warn!("Send to {} failed: {}", self.counterpart_id, e);
        }
        result
    }
}

impl Drop for ConversationView {
    fn drop(&mut self) {
        if let Some(live) = self.live.take() {
            live.stop();
        }
    }
}

/// Everything the background task needs for one activation.
#[derive(Clone)]
struct Thread {
    client: MessageClient,
    cell: Arc<ViewCell<ConversationState>>,
    epoch: u64,
    item_report_id: Uuid,
    me: Uuid,
    counterpart_id: Uuid,
}

impl Thread {
    async fn run(self, mut live: LiveLoop) {
        self.load().await;

        loop {
            match live.next().await {
                Wake::Changed(change) => self.receive(change.into_row()),
                Wake::Resync | Wake::Reconcile => self.load().await,
                Wake::SignedOut => {
                    self.cell.apply(self.epoch, |s| {
                        s.phase = Phase::Idle;
                        s.me = None;
                        s.reset();
                    });
                    debug!("Conversation closed after sign-out");
                    return;
                }
            }
        }
    }

    async fn load(&self) {
        let fetched = self
            .client
            .list_for_conversation(self.item_report_id, self.me, self.counterpart_id)
            .await;

        if !self.cell.is_current(self.epoch) {
            debug!("Discarding conversation fetch for a stale activation");
            return;
        }

        match fetched {
            Ok(messages) => {
                self.cell.apply(self.epoch, |s| {
                    s.merge(messages);
                    s.last_error = None;
                });
            }
            Err(e) => {
                warn!("Conversation fetch failed: {}", e);
                self.cell.apply(self.epoch, |s| {
                    if s.phase == Phase::Loading {
                        s.phase = Phase::Ready;
                    }
                    s.last_error = Some(e.to_string());
                });
            }
        }
    }

    fn receive(&self, message: Message) {
        // the subscription is scoped to the report only
        if !message.is_between(self.me, self.counterpart_id) {
            return;
        }

        let needs_read = message.receiver_id == self.me && !message.is_read;
        let id = message.id;
        let added = self.cell.apply(self.epoch, |s| {
            let added = s.insert(message);
            s.phase = Phase::Ready;
            added
        });

        if added == Some(true) && needs_read {
            tokio::spawn(self.clone().mark_read(id));
        }
    }

    async fn mark_conversation_read(self) {
        let scope = ReadScope::Conversation {
            item_report_id: self.item_report_id,
            receiver_id: self.me,
            sender_id: self.counterpart_id,
        };
        match self.client.read_rows(scope).await {
            Ok(rows) => {
                if !rows.is_empty() {
                    debug!("Marked {} messages read on open", rows.len());
                }
                self.cell
                    .apply(self.epoch, |s| s.mark_read_locally(rows.iter().map(|m| m.id)));
            }
            Err(e) => debug!("Mark conversation read failed: {}", e),
        }
    }

    /// Already read elsewhere counts too, so the local flag is set whenever
    /// the store accepts the call.
    async fn mark_read(self, id: Uuid) {
        match self.client.mark_read(id).await {
            Ok(_) => {
                self.cell.apply(self.epoch, |s| s.mark_read_locally([id]));
            }
            Err(e) => debug!("Mark read for {} failed: {}", id, e),
        }
    }
}
