//! Shared fixture: an in-memory SQLite board with three users and two
//! reports, plus helpers for waiting on view state.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use uuid::Uuid;

use foundit_db::Database;
use foundit_feed::ChangeFeed;
use foundit_sync::{CurrentUser, MessageClient, Session, SqliteStore, ViewOptions};
use foundit_types::models::{Profile, Report, ReportKind};

pub struct Board {
    pub store: Arc<SqliteStore>,
    pub ana: Uuid,
    pub ben: Uuid,
    pub cleo: Uuid,
    /// Found by Ana.
    pub backpack: Uuid,
    /// Lost by Ana.
    pub keys: Uuid,
}

impl Board {
    pub fn new() -> Self {
        Self::with_feed(ChangeFeed::new())
    }

    pub fn with_feed(feed: ChangeFeed) -> Self {
        let db = Database::open_in_memory().unwrap();
        let ana = add_profile(&db, "Ana");
        let ben = add_profile(&db, "Ben");
        let cleo = add_profile(&db, "Cleo");
        let backpack = add_report(&db, ana, ReportKind::Found, "Blue backpack");
        let keys = add_report(&db, ana, ReportKind::Lost, "Car keys");

        Self {
            store: Arc::new(SqliteStore::new(Arc::new(db), feed)),
            ana,
            ben,
            cleo,
            backpack,
            keys,
        }
    }

    pub fn session(&self, user_id: Uuid) -> Session {
        Session::signed_in(CurrentUser {
            id: user_id,
            email: format!("{}@school.edu", user_id.simple()),
            full_name: None,
        })
    }

    pub fn client(&self, session: &Session) -> MessageClient {
        MessageClient::new(self.store.clone(), session.clone())
    }

    pub fn feed(&self) -> &ChangeFeed {
        self.store.feed()
    }
}

pub fn add_profile(db: &Database, name: &str) -> Uuid {
    let id = Uuid::new_v4();
    db.create_profile(&Profile {
        id,
        full_name: Some(name.to_string()),
        email: Some(format!("{}@school.edu", name.to_lowercase())),
    })
    .unwrap();
    id
}

pub fn add_report(db: &Database, owner: Uuid, kind: ReportKind, name: &str) -> Uuid {
    let id = Uuid::new_v4();
    db.create_report(&Report {
        id,
        kind,
        name: name.to_string(),
        user_id: owner,
        created_at: Utc::now(),
    })
    .unwrap();
    id
}

/// View options with reconciliation polling off, so only live events and
/// explicit calls change state.
pub fn live_only() -> ViewOptions {
    ViewOptions {
        reconcile_interval: None,
        ..ViewOptions::default()
    }
}

pub async fn wait_until(changes: &watch::Receiver<u64>, mut cond: impl FnMut() -> bool) {
    let mut rx = changes.clone();
    tokio::time::timeout(Duration::from_secs(3), async {
        while !cond() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    })
    .await
    .expect("view never reached the expected state");
}
