//! Plumbing shared by the views: epoch-guarded state and the live loop that
//! multiplexes feed events, reconciliation ticks and auth changes.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, warn};
use uuid::Uuid;

use foundit_feed::{FeedEvent, Subscription, SubscriptionHandle};
use foundit_types::events::RowChange;

use crate::session::{CurrentUser, Session};

/// View state behind a lock, tagged with an activation epoch.
///
/// Background work captures the epoch it was started under and goes through
/// [`ViewCell::apply`], which drops the update if the view has since been
/// deactivated or re-activated. Every mutation bumps a version counter that
/// callers can watch.
pub(crate) struct ViewCell<S> {
    inner: Mutex<Epoched<S>>,
    version: watch::Sender<u64>,
}

struct Epoched<S> {
    epoch: u64,
    state: S,
}

impl<S> ViewCell<S> {
    pub(crate) fn new(state: S) -> Self {
        let (version, _) = watch::channel(0);
        Self {
            inner: Mutex::new(Epoched { epoch: 0, state }),
            version,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Epoched<S>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn bump(&self) {
        self.version.send_modify(|v| *v += 1);
    }

    pub(crate) fn read<R>(&self, f: impl FnOnce(&S) -> R) -> R {
        f(&self.lock().state)
    }

    /// Mutate regardless of epoch. For user-driven operations.
    pub(crate) fn update<R>(&self, f: impl FnOnce(&mut S) -> R) -> R {
        let result = f(&mut self.lock().state);
        self.bump();
        result
    }

    /// Start a new epoch, invalidating anything in flight, and mutate.
    pub(crate) fn next_epoch(&self, f: impl FnOnce(&mut S)) -> u64 {
        let epoch = {
            let mut guard = self.lock();
            guard.epoch += 1;
            f(&mut guard.state);
            guard.epoch
        };
        self.bump();
        epoch
    }

    /// Mutate only if `epoch` is still current. Returns `None` otherwise.
    pub(crate) fn apply<R>(&self, epoch: u64, f: impl FnOnce(&mut S) -> R) -> Option<R> {
        let result = {
            let mut guard = self.lock();
            if guard.epoch != epoch {
                return None;
            }
            f(&mut guard.state)
        };
        self.bump();
        Some(result)
    }

    pub(crate) fn is_current(&self, epoch: u64) -> bool {
        self.lock().epoch == epoch
    }

    pub(crate) fn watch(&self) -> watch::Receiver<u64> {
        self.version.subscribe()
    }
}

/// Why a live loop woke up.
#[derive(Debug)]
pub(crate) enum Wake {
    Changed(RowChange),
    /// The subscription lagged; local state needs a full refresh.
    Resync,
    /// Periodic reconciliation tick.
    Reconcile,
    /// The session no longer belongs to the user the view was activated for.
    SignedOut,
}

pub(crate) struct LiveLoop {
    subscription: Option<Subscription>,
    reconcile: Option<Interval>,
    auth: watch::Receiver<Option<CurrentUser>>,
    me: Uuid,
}

impl LiveLoop {
    pub(crate) fn new(
        subscription: Subscription,
        reconcile_every: Option<Duration>,
        session: &Session,
        me: Uuid,
    ) -> Self {
        let reconcile = reconcile_every.filter(|d| !d.is_zero()).map(|period| {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });

        Self {
            subscription: Some(subscription),
            reconcile,
            auth: session.changes(),
            me,
        }
    }

    pub(crate) async fn next(&mut self) -> Wake {
        loop {
            tokio::select! {
                event = recv_or_park(&mut self.subscription) => match event {
                    Some(FeedEvent::Change(change)) => return Wake::Changed(change),
                    Some(FeedEvent::Lagged(_)) => return Wake::Resync,
                    None => {
                        if self.reconcile.is_some() {
                            warn!("Live updates for {} ended, falling back to polling", self.me);
                        } else {
                            warn!("Live updates for {} ended and polling is disabled", self.me);
                        }
                        self.subscription = None;
                    }
                },
                _ = tick_or_park(&mut self.reconcile) => return Wake::Reconcile,
                changed = self.auth.changed() => {
                    let still_me = self.auth.borrow().as_ref().map(|u| u.id) == Some(self.me);
                    if changed.is_err() || !still_me {
                        return Wake::SignedOut;
                    }
                }
            }
        }
    }
}

async fn recv_or_park(subscription: &mut Option<Subscription>) -> Option<FeedEvent> {
    match subscription {
        Some(sub) => sub.recv().await,
        None => std::future::pending().await,
    }
}

async fn tick_or_park(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// The background half of an active view: its task and a handle on its
/// subscription.
pub(crate) struct LiveTask {
    task: JoinHandle<()>,
    subscription: SubscriptionHandle,
}

impl LiveTask {
    pub(crate) fn new(task: JoinHandle<()>, subscription: SubscriptionHandle) -> Self {
        Self { task, subscription }
    }

    /// Synchronously release the subscription, then cancel the task.
    /// Dropping a `LiveTask` does the same.
    pub(crate) fn stop(self) {}
}

impl Drop for LiveTask {
    fn drop(&mut self) {
        self.subscription.unsubscribe();
        self.task.abort();
        debug!("Live task stopped");
    }
}
