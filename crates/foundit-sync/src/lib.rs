//! Client-side message synchronization for the lost-and-found board.
//!
//! A [`MessageClient`] talks to the message store; three views build on it
//! and keep their own local copy of the same remote state live:
//! [`ConversationView`] for one two-party thread, [`NotificationAggregator`]
//! for the unread bell and [`InboxView`] for the full history.

pub mod client;
pub mod config;
pub mod conversation;
pub mod error;
pub mod inbox;
pub mod notifications;
pub mod session;
pub mod store;
pub mod telemetry;

mod live;

#[cfg(test)]
mod testing;

use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use foundit_db::Database;
use foundit_feed::ChangeFeed;

pub use client::MessageClient;
pub use config::{SyncConfig, ViewOptions};
pub use conversation::{ConversationView, Phase};
pub use error::{Result, SyncError};
pub use inbox::{InboxEntry, InboxView};
pub use notifications::{Notification, NotificationAggregator, age_label, badge_label};
pub use session::{CurrentUser, Session};
pub use store::{MessageStore, SqliteStore};

/// Open the configured database, start a change feed over it and return a
/// client bound to `session` along with the view options from `config`.
pub fn connect(
    config: &SyncConfig,
    session: Session,
) -> anyhow::Result<(MessageClient, ViewOptions)> {
    let db = Database::open(&config.db_path)
        .with_context(|| format!("opening {}", config.db_path.display()))?;
    let feed = ChangeFeed::with_capacity(config.feed_capacity);
    let store = SqliteStore::new(Arc::new(db), feed);

    info!("Message store ready at {}", config.db_path.display());
    Ok((MessageClient::new(Arc::new(store), session), config.views.clone()))
}
