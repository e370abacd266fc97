use std::sync::Arc;

use futures_util::future::join_all;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

use foundit_types::events::{ChangeFilter, RowScope};
use foundit_types::models::{Message, ReportSummary};

use crate::client::MessageClient;
use crate::config::ViewOptions;
use crate::conversation::Phase;
use crate::error::Result;
use crate::live::{LiveLoop, LiveTask, ViewCell, Wake};
use crate::session::Session;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboxEntry {
    pub message: Message,
    pub sender_name: String,
    pub receiver_name: String,
    pub report: Option<ReportSummary>,
}

#[derive(Debug, Default)]
struct InboxState {
    phase: Phase,
    me: Option<Uuid>,
    entries: Vec<InboxEntry>,
    last_error: Option<String>,
}

impl InboxState {
    fn unread_count(&self) -> usize {
        let Some(me) = self.me else {
            return 0;
        };
        self.entries
            .iter()
            .filter(|e| e.message.is_unread_for(me))
            .count()
    }
}

/// Everything the signed-in user sent or received, newest first.
pub struct InboxView {
    client: MessageClient,
    options: ViewOptions,
    cell: Arc<ViewCell<InboxState>>,
    pump: Option<Pump>,
    live: Option<LiveTask>,
}

impl InboxView {
    pub fn new(client: MessageClient, options: ViewOptions) -> Self {
        Self {
            client,
            options,
            cell: Arc::new(ViewCell::new(InboxState::default())),
            pump: None,
            live: None,
        }
    }

    /// Must be called from within a Tokio runtime.
    pub fn activate(&mut self, session: &Session) -> Result<()> {
        let me = session.require_user_id()?;

        if let Some(live) = self.live.take() {
            live.stop();
        }

        let subscription = self
            .client
            .subscribe(ChangeFilter::inserts_and_updates(RowScope::ReceiverId(me)));
        let handle = subscription.handle();

        let epoch = self.cell.next_epoch(|s| {
            if s.me != Some(me) {
                s.entries.clear();
                s.phase = Phase::Loading;
            }
            s.me = Some(me);
        });

        let pump = Pump {
            client: self.client.clone(),
            cell: self.cell.clone(),
            epoch,
            me,
        };
        let live = LiveLoop::new(subscription, self.options.reconcile_interval, session, me);
        self.live = Some(LiveTask::new(tokio::spawn(pump.clone().run(live)), handle));
        self.pump = Some(pump);

        info!("Inbox for {} activated", me);
        Ok(())
    }

    /// Stop listening. Entries are kept.
    pub fn deactivate(&mut self) {
        self.pump = None;
        if let Some(live) = self.live.take() {
            live.stop();
        }
        self.cell.next_epoch(|_| {});
    }

    pub fn is_active(&self) -> bool {
        self.live.is_some()
    }

    pub fn phase(&self) -> Phase {
        self.cell.read(|s| s.phase)
    }

    pub fn entries(&self) -> Vec<InboxEntry> {
        self.cell.read(|s| s.entries.clone())
    }

    /// Entries addressed to the user that are still unread.
    pub fn unread_count(&self) -> usize {
        self.cell.read(InboxState::unread_count)
    }

    pub fn last_error(&self) -> Option<String> {
        self.cell.read(|s| s.last_error.clone())
    }

    pub fn changes(&self) -> watch::Receiver<u64> {
        self.cell.watch()
    }

    /// Mark one entry read if it was received by the user and is unread.
    /// Returns false when there was nothing to mark.
    pub async fn open(&self, message_id: Uuid) -> bool {
        let flagged = self.cell.update(|s| {
            let me = s.me?;
            let entry = s
                .entries
                .iter_mut()
                .find(|e| e.message.id == message_id && e.message.is_unread_for(me))?;
            entry.message.is_read = true;
            Some(())
        });
        if flagged.is_none() {
            return false;
        }

        if let Err(e) = self.client.mark_read(message_id).await {
            warn!("Mark read for {} failed: {}", message_id, e);
        }

        if let Some(pump) = &self.pump {
            pump.refresh().await;
        }
        true
    }
}

impl Drop for InboxView {
    fn drop(&mut self) {
        if let Some(live) = self.live.take() {
            live.stop();
        }
    }
}

#[derive(Clone)]
struct Pump {
    client: MessageClient,
    cell: Arc<ViewCell<InboxState>>,
    epoch: u64,
    me: Uuid,
}

impl Pump {
    async fn run(self, mut live: LiveLoop) {
        self.refresh().await;

        loop {
            match live.next().await {
                Wake::Changed(_) | Wake::Resync | Wake::Reconcile => self.refresh().await,
                Wake::SignedOut => {
                    self.cell.apply(self.epoch, |s| {
                        s.entries.clear();
                        s.me = None;
                        s.phase = Phase::Idle;
                    });
                    debug!("Inbox cleared after sign-out");
                    return;
                }
            }
        }
    }

    async fn refresh(&self) {
        let history = match self.client.list_for_user(self.me).await {
            Ok(history) => history,
            Err(e) => {
                warn!("Inbox fetch for {} failed: {}", self.me, e);
                self.cell.apply(self.epoch, |s| {
                    s.last_error = Some(e.to_string());
                    s.phase = Phase::Ready;
                });
                return;
            }
        };

        let entries = join_all(history.into_iter().map(|message| self.resolve(message))).await;

        if self
            .cell
            .apply(self.epoch, |s| {
                s.entries = entries;
                s.last_error = None;
                s.phase = Phase::Ready;
            })
            .is_none()
        {
            debug!("Discarding inbox fetch for a stale activation");
        }
    }

    async fn resolve(&self, message: Message) -> InboxEntry {
        let (sender_name, receiver_name, report) = tokio::join!(
            self.client.display_name(message.sender_id),
            self.client.display_name(message.receiver_id),
            self.client.report_summary(message.item_report_id),
        );
        InboxEntry {
            message,
            sender_name,
            receiver_name,
            report,
        }
    }
}
