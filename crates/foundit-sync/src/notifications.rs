use std::sync::Arc;

use chrono::{DateTime, Utc};
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

/// An unread message with the labels the bell shows next to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub message: Message,
    pub sender_name: String,
    pub report: Option<ReportSummary>,
}

impl Notification {
    pub fn age_label(&self, now: DateTime<Utc>) -> String {
        age_label(self.message.created_at, now)
    }
}

#[derive(Debug, Default)]
struct BellState {
    phase: Phase,
    me: Option<Uuid>,
    /// Newest first.
    items: Vec<Notification>,
    last_error: Option<String>,
}

/// Badge text for `count` unread items: nothing for zero, the number up to
/// `ceiling`, `"<ceiling>+"` beyond.
pub fn badge_label(count: usize, ceiling: usize) -> Option<String> {
    match count {
        0 => None,
        n if n > ceiling => Some(format!("{}+", ceiling)),
        n => Some(n.to_string()),
    }
}

/// Compact age shown next to a notification: `"now"` under a minute, then
/// whole minutes (`"5m"`) and hours (`"3h"`), and a day-month date such as
/// `"7 Mar"` from one day on.
pub fn age_label(created_at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let age = now - created_at;
    if age.num_minutes() < 1 {
        "now".to_string()
    } else if age.num_minutes() < 60 {
        format!("{}m", age.num_minutes())
    } else if age.num_hours() < 24 {
        format!("{}h", age.num_hours())
    } else {
        created_at.format("%-d %b").to_string()
    }
}

/// The notification bell: the most recent unread messages addressed to the
/// signed-in user, across every conversation.
///
/// Any live insert or update addressed to the user triggers a full re-fetch
/// rather than an incremental patch. The list survives `deactivate` and is
/// only dropped with the aggregator or on sign-out.
pub struct NotificationAggregator {
    client: MessageClient,
    options: ViewOptions,
    cell: Arc<ViewCell<BellState>>,
    live: Option<LiveTask>,
}

impl NotificationAggregator {
    pub fn new(client: MessageClient, options: ViewOptions) -> Self {
        Self {
            client,
            options,
            cell: Arc::new(ViewCell::new(BellState::default())),
            live: None,
        }
    }

    /// Start following the signed-in user's unread messages. Must be called
    /// from within a Tokio runtime.
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
                s.items.clear();
                s.phase = Phase::Loading;
            }
            s.me = Some(me);
        });

        let bell = Bell {
            client: self.client.clone(),
            cell: self.cell.clone(),
            epoch,
            me,
            limit: self.options.notification_limit,
        };
        let live = LiveLoop::new(subscription, self.options.reconcile_interval, session, me);
        self.live = Some(LiveTask::new(tokio::spawn(bell.run(live)), handle));

        info!("Notifications for {} activated", me);
        Ok(())
    }

    /// Stop listening. The current list stays as it is.
    pub fn deactivate(&mut self) {
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

    /// Newest first.
    pub fn items(&self) -> Vec<Notification> {
        self.cell.read(|s| s.items.clone())
    }

    /// Uncapped count of listed unread messages.
    pub fn unread_count(&self) -> usize {
        self.cell.read(|s| s.items.len())
    }

    pub fn badge(&self) -> Option<String> {
        badge_label(self.unread_count(), self.options.badge_ceiling)
    }

    pub fn last_error(&self) -> Option<String> {
        self.cell.read(|s| s.last_error.clone())
    }

    pub fn changes(&self) -> watch::Receiver<u64> {
        self.cell.watch()
    }

    /// The user clicked a notification: mark it read and drop it from the
    /// list right away. Returns the removed entry.
    pub async fn open(&self, message_id: Uuid) -> Option<Notification> {
        if let Err(e) = self.client.mark_read(message_id).await {
            warn!("Mark read for {} failed: {}", message_id, e);
        }

        self.cell.update(|s| {
            let at = s.items.iter().position(|n| n.message.id == message_id)?;
            Some(s.items.remove(at))
        })
    }

    /// Mark everything addressed to the user as read and empty the list.
    pub async fn mark_all_read(&self) {
        let (me, empty) = self.cell.read(|s| (s.me, s.items.is_empty()));
        let Some(me) = me else {
            return;
        };
        if empty {
            return;
        }

        match self.client.mark_all_read(me).await {
            Ok(n) => debug!("Marked {} messages read for {}", n, me),
            Err(e) => warn!("Mark all read for {} failed: {}", me, e),
        }

        self.cell.update(|s| s.items.clear());
    }
}

impl Drop for NotificationAggregator {
    fn drop(&mut self) {
        if let Some(live) = self.live.take() {
            live.stop();
        }
    }
}

struct Bell {
    client: MessageClient,
    cell: Arc<ViewCell<BellState>>,
    epoch: u64,
    me: Uuid,
    limit: usize,
}

impl Bell {
    async fn run(self, mut live: LiveLoop) {
        self.refresh().await;

        loop {
            match live.next().await {
                Wake::Changed(_) | Wake::Resync | Wake::Reconcile => self.refresh().await,
                Wake::SignedOut => {
                    self.cell.apply(self.epoch, |s| {
                        s.items.clear();
                        s.me = None;
                        s.phase = Phase::Idle;
                    });
                    debug!("Notifications cleared after sign-out");
                    return;
                }
            }
        }
    }

    /// Re-fetch the unread list and resolve its labels. On failure the
    /// previous list stays on screen.
    async fn refresh(&self) {
        let unread = match self.client.list_unread_for_user(self.me, Some(self.limit)).await {
            Ok(unread) => unread,
            Err(e) => {
                warn!("Unread fetch for {} failed: {}", self.me, e);
                self.cell.apply(self.epoch, |s| {
                    s.last_error = Some(e.to_string());
                    s.phase = Phase::Ready;
                });
                return;
            }
        };

        // one lookup per message, duplicates included
        let items = join_all(unread.into_iter().map(|message| self.resolve(message))).await;

        let applied = self.cell.apply(self.epoch, |s| {
            s.items = items;
            s.last_error = None;
            s.phase = Phase::Ready;
        });
        if applied.is_none() {
            debug!("Discarding unread fetch for a stale activation");
        }
    }

    async fn resolve(&self, message: Message) -> Notification {
        let (sender_name, report) = tokio::join!(
            self.client.display_name(message.sender_id),
            self.client.report_summary(message.item_report_id),
        );
        Notification {
            message,
            sender_name,
            report,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeStore, wait_until};
    use chrono::TimeZone;

    fn options() -> ViewOptions {
        ViewOptions {
            reconcile_interval: None,
            ..ViewOptions::default()
        }
    }

    #[test]
    fn badge_caps_at_ceiling() {
        assert_eq!(badge_label(0, 9), None);
        assert_eq!(badge_label(1, 9).as_deref(), Some("1"));
        assert_eq!(badge_label(9, 9).as_deref(), Some("9"));
        assert_eq!(badge_label(10, 9).as_deref(), Some("9+"));
    }

    #[test]
    fn age_label_steps_through_units() {
        let sent = Utc.with_ymd_and_hms(2024, 3, 7, 12, 0, 0).unwrap();
        let after = |secs: i64| age_label(sent, sent + chrono::Duration::seconds(secs));

        assert_eq!(after(0), "now");
        assert_eq!(after(59), "now");
        assert_eq!(after(60), "1m");
        assert_eq!(after(59 * 60 + 59), "59m");
        assert_eq!(after(60 * 60), "1h");
        assert_eq!(after(24 * 3600 - 1), "23h");
        assert_eq!(after(24 * 3600), "7 Mar");
        assert_eq!(after(40 * 24 * 3600), "7 Mar");
        // clock skew puts the message slightly in the future
        assert_eq!(after(-5), "now");
    }

    #[tokio::test]
    async fn list_is_bounded_and_labelled() {
        let store = FakeStore::new();
        let (me, them, _, report) = store.seed_users_and_report();
        for i in 0..12 {
            store.seed_message(report, them, me, &format!("update {}", i));
        }
        let session = store.session_for(me);

        let mut bell = NotificationAggregator::new(store.client(&session), options());
        bell.activate(&session).unwrap();
        wait_until(&bell.changes(), || bell.phase() == Phase::Ready).await;

        let items = bell.items();
        assert_eq!(items.len(), 10);
        assert_eq!(items[0].message.content, "update 11");
        assert_eq!(items[0].sender_name, "Ben");
        assert_eq!(items[0].report.as_ref().map(|r| r.name.as_str()), Some("Blue backpack"));
        assert_eq!(items[0].age_label(items[0].message.created_at), "now");
        assert_eq!(bell.badge().as_deref(), Some("9+"));
        assert_eq!(bell.unread_count(), 10);
        // one profile lookup per message, no de-duplication
        assert_eq!(store.profile_calls(), 10);
    }

    #[tokio::test]
    async fn open_removes_without_waiting_for_the_feed() {
        let store = FakeStore::new();
        let (me, them, _, report) = store.seed_users_and_report();
        let first = store.seed_message(report, them, me, "first");
        store.seed_message(report, them, me, "second");
        let session = store.session_for(me);

        let mut bell = NotificationAggregator::new(store.client(&session), options());
        bell.activate(&session).unwrap();
        wait_until(&bell.changes(), || bell.unread_count() == 2).await;

        // stop live refreshes so only the optimistic removal can change the list
        bell.deactivate();
        let removed = bell.open(first.id).await.unwrap();

        assert_eq!(removed.message.id, first.id);
        assert_eq!(bell.unread_count(), 1);
        assert!(store.stored(first.id).unwrap().is_read);
    }

    #[tokio::test]
    async fn open_still_removes_when_mark_read_fails() {
        let store = FakeStore::new();
        let (me, them, _, report) = store.seed_users_and_report();
        let m = store.seed_message(report, them, me, "hello");
        let session = store.session_for(me);

        let mut bell = NotificationAggregator::new(store.client(&session), options());
        bell.activate(&session).unwrap();
        wait_until(&bell.changes(), || bell.unread_count() == 1).await;
        bell.deactivate();

        store.fail_mark_read(true);
        assert!(bell.open(m.id).await.is_some());
        assert_eq!(bell.badge(), None);
        assert!(!store.stored(m.id).unwrap().is_read);
    }

    #[tokio::test]
    async fn failed_refresh_keeps_the_previous_list() {
        let store = FakeStore::new();
        let (me, them, _, report) = store.seed_users_and_report();
        store.seed_message(report, them, me, "hello");
        let session = store.session_for(me);

        let mut bell = NotificationAggregator::new(store.client(&session), options());
        bell.activate(&session).unwrap();
        wait_until(&bell.changes(), || bell.unread_count() == 1).await;

        store.fail_queries(true);
        let calls = store.query_calls();
        let ben = store.session_for(them);
        store.client(&ben).send(report, them, me, "any time").await.unwrap();

        wait_until(&bell.changes(), || bell.last_error().is_some()).await;
        assert!(store.query_calls() > calls);
        assert_eq!(bell.unread_count(), 1);
        assert_eq!(bell.items()[0].message.content, "hello");
    }

    #[tokio::test]
    async fn deactivate_keeps_the_list() {
        let store = FakeStore::new();
        let (me, them, _, report) = store.seed_users_and_report();
        store.seed_message(report, them, me, "hello");
        let session = store.session_for(me);

        let mut bell = NotificationAggregator::new(store.client(&session), options());
        bell.activate(&session).unwrap();
        wait_until(&bell.changes(), || bell.unread_count() == 1).await;

        bell.deactivate();
        assert!(!bell.is_active());
        assert_eq!(bell.unread_count(), 1);
        assert_eq!(store.feed().active_subscriptions(), 0);
    }
}
