use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use tokio::sync::{Notify, broadcast, watch};
use tracing::{debug, warn};

use foundit_types::events::{ChangeFilter, RowChange};

/// Default per-subscriber buffer. A subscriber more than this many changes
/// behind receives [`FeedEvent::Lagged`] instead of the skipped changes.
pub const DEFAULT_CAPACITY: usize = 1024;

/// What a subscriber sees.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedEvent {
    /// A change matching the subscription's filter.
    Change(RowChange),

    /// The subscriber fell behind and this many changes (matching or not)
    /// were dropped. Local state derived from the feed may be stale.
    Lagged(u64),
}

/// Live change feed for the `messages` relation. Every published change is
/// fanned out to all subscribers; each subscription then applies its own
/// filter.
#[derive(Clone)]
pub struct ChangeFeed {
    inner: Arc<FeedInner>,
}

struct FeedInner {
    /// Every subscription receives every change and filters on its own side.
    broadcast_tx: broadcast::Sender<RowChange>,

    /// Bumped by `drop_connections`; subscriptions opened under an older
    /// generation end.
    generation_tx: watch::Sender<u64>,

    next_id: AtomicU64,
    active: AtomicUsize,
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangeFeed {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (broadcast_tx, _) = broadcast::channel(capacity.max(1));
        let (generation_tx, _) = watch::channel(0);
        Self {
            inner: Arc::new(FeedInner {
                broadcast_tx,
                generation_tx,
                next_id: AtomicU64::new(1),
                active: AtomicUsize::new(0),
            }),
        }
    }

    /// Open a subscription. Only changes published after this call are
    /// delivered, in publish order.
    pub fn subscribe(&self, filter: ChangeFilter) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let generation_rx = self.inner.generation_tx.subscribe();
        let generation = *generation_rx.borrow();
        self.inner.active.fetch_add(1, Ordering::Relaxed);

        debug!("Subscription {} opened for {:?}", id, filter);

        Subscription {
            filter,
            rx: self.inner.broadcast_tx.subscribe(),
            generation,
            generation_rx,
            shared: Arc::new(SubscriptionShared {
                id,
                closed: AtomicBool::new(false),
                wake: Notify::new(),
                feed: self.inner.clone(),
            }),
            ended: false,
        }
    }

    /// Publish a change to every open subscription. Returns how many
    /// subscriptions were listening (before filtering).
    pub fn publish(&self, change: RowChange) -> usize {
        self.inner.broadcast_tx.send(change).unwrap_or(0)
    }

    /// Number of subscriptions that have not been torn down yet.
    pub fn active_subscriptions(&self) -> usize {
        self.inner.active.load(Ordering::Relaxed)
    }

    /// End every currently open subscription, as if the live connection had
    /// dropped. New subscriptions work normally.
    pub fn drop_connections(&self) {
        self.inner.generation_tx.send_modify(|g| *g += 1);
        warn!("Change feed connections dropped");
    }
}

/// One live subscription. Torn down by [`Subscription::unsubscribe`], by
/// dropping it, or from elsewhere through a [`SubscriptionHandle`].
pub struct Subscription {
    filter: ChangeFilter,
    rx: broadcast::Receiver<RowChange>,
    generation: u64,
    generation_rx: watch::Receiver<u64>,
    shared: Arc<SubscriptionShared>,
    ended: bool,
}

struct SubscriptionShared {
    id: u64,
    closed: AtomicBool,
    wake: Notify,
    feed: Arc<FeedInner>,
}

impl SubscriptionShared {
    fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.feed.active.fetch_sub(1, Ordering::Relaxed);
            // single consumer, so a stored permit is enough to wake recv
            self.wake.notify_one();
            debug!("Subscription {} closed", self.id);
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Tears a subscription down without owning it, e.g. while a background
/// task is parked in [`Subscription::recv`]. The feed slot is released
/// immediately and the pending `recv` returns `None`.
#[derive(Clone)]
pub struct SubscriptionHandle {
    shared: Arc<SubscriptionShared>,
}

impl SubscriptionHandle {
    pub fn unsubscribe(&self) {
        self.shared.close();
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.shared.id
    }

    pub fn filter(&self) -> &ChangeFilter {
        &self.filter
    }

    pub fn handle(&self) -> SubscriptionHandle {
        SubscriptionHandle {
            shared: self.shared.clone(),
        }
    }

    /// Next matching change. `None` once the subscription is closed or the
    /// connection has ended; after that it never yields again.
    ///
    /// Cancel safe: no change is lost if the future is dropped before it
    /// completes.
    pub async fn recv(&mut self) -> Option<FeedEvent> {
        if self.ended {
            return None;
        }

        loop {
            if self.shared.is_closed() {
                return self.end("unsubscribed");
            }
            if *self.generation_rx.borrow() != self.generation {
                return self.end("connection dropped");
            }

            tokio::select! {
                result = self.rx.recv() => match result {
                    Ok(change) if self.filter.matches(&change) => {
                        return Some(FeedEvent::Change(change));
                    }
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Subscription {} lagged, {} changes skipped", self.shared.id, n);
                        return Some(FeedEvent::Lagged(n));
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        return self.end("feed closed");
                    }
                },
                changed = self.generation_rx.changed() => {
                    if changed.is_err() {
                        return self.end("feed closed");
                    }
                }
                _ = self.shared.wake.notified() => {}
            }
        }
    }

    /// Explicit teardown. Equivalent to dropping the subscription.
    pub fn unsubscribe(self) {}

    fn end(&mut self, reason: &str) -> Option<FeedEvent> {
        if !self.ended {
            debug!("Subscription {} ended: {}", self.shared.id, reason);
            self.ended = true;
        }
        None
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.shared.close();
    }
}
