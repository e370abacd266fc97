use std::sync::Arc;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use tracing::{debug, error};
use uuid::Uuid;

use foundit_db::Database;
use foundit_feed::{ChangeFeed, Subscription};
use foundit_types::api::{MessageQuery, NewMessage, ReadScope};
use foundit_types::events::{ChangeFilter, RowChange};
use foundit_types::models::{Message, Profile, Report};

/// Backend seam: the remote relational store plus its live change feed.
///
/// Implementations do no business validation; that happens in
/// [`crate::client::MessageClient`] before anything reaches the store.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persist a message. The store assigns id, read flag and timestamp.
    async fn insert_message(&self, msg: NewMessage) -> Result<Message>;

    async fn query_messages(&self, query: MessageQuery) -> Result<Vec<Message>>;

    /// Mark every unread row in `scope` read. Returns the rows that changed.
    async fn mark_read(&self, scope: ReadScope) -> Result<Vec<Message>>;

    async fn profile(&self, id: Uuid) -> Result<Option<Profile>>;

    async fn report(&self, id: Uuid) -> Result<Option<Report>>;

    fn subscribe(&self, filter: ChangeFilter) -> Subscription;
}

/// SQLite-backed store that publishes every write to a [`ChangeFeed`].
#[derive(Clone)]
pub struct SqliteStore {
    db: Arc<Database>,
    feed: ChangeFeed,
}

impl SqliteStore {
    pub fn new(db: Arc<Database>, feed: ChangeFeed) -> Self {
        Self { db, feed }
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    pub fn feed(&self) -> &ChangeFeed {
        &self.feed
    }

    /// Run blocking DB work off the async runtime.
    async fn blocking<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Database) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| {
                error!("spawn_blocking join error: {}", e);
                anyhow!("store task failed: {}", e)
            })?
    }
}

#[async_trait]
impl MessageStore for SqliteStore {
    async fn insert_message(&self, msg: NewMessage) -> Result<Message> {
        let id = Uuid::new_v4();
        let message = self
            .blocking(move |db| db.insert_message(id, &msg, chrono::Utc::now()))
            .await?;

        let listeners = self.feed.publish(RowChange::Insert(message.clone()));
        debug!("Message {} inserted, {} listeners", message.id, listeners);

        Ok(message)
    }

    async fn query_messages(&self, query: MessageQuery) -> Result<Vec<Message>> {
        self.blocking(move |db| db.query_messages(&query)).await
    }

    async fn mark_read(&self, scope: ReadScope) -> Result<Vec<Message>> {
        let changed = self.blocking(move |db| db.mark_read(&scope)).await?;

        for message in &changed {
            self.feed.publish(RowChange::Update(message.clone()));
        }
        if !changed.is_empty() {
            debug!("Marked {} messages read for {:?}", changed.len(), scope);
        }

        Ok(changed)
    }

    async fn profile(&self, id: Uuid) -> Result<Option<Profile>> {
        self.blocking(move |db| db.get_profile(id)).await
    }

    async fn report(&self, id: Uuid) -> Result<Option<Report>> {
        self.blocking(move |db| db.get_report(id)).await
    }

    fn subscribe(&self, filter: ChangeFilter) -> Subscription {
        self.feed.subscribe(filter)
    }
}
