use std::sync::Arc;

use tracing::{debug, warn};
use uuid::Uuid;

use foundit_feed::Subscription;
use foundit_types::api::{MessageQuery, NewMessage, ReadScope};
use foundit_types::events::ChangeFilter;
use foundit_types::models::{FALLBACK_DISPLAY_NAME, Message, ReportSummary};

use crate::error::{Result, SyncError};
use crate::session::Session;
use crate::store::MessageStore;

/// Access contract over the message store, shared by every view.
///
/// Holds no view state. Cloning is cheap and clones talk to the same store.
#[derive(Clone)]
pub struct MessageClient {
    store: Arc<dyn MessageStore>,
    session: Session,
}

impl MessageClient {
    pub fn new(store: Arc<dyn MessageStore>, session: Session) -> Self {
        Self { store, session }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Send `content` from `sender_id` to `receiver_id` about a report.
    ///
    /// The sender must be the signed-in user. Content is trimmed and must not
    /// be empty. The returned message carries the store's timestamp.
    pub async fn send(
        &self,
        item_report_id: Uuid,
        sender_id: Uuid,
        receiver_id: Uuid,
        content: &str,
    ) -> Result<Message> {
        let content = content.trim();
        if content.is_empty() {
            return Err(SyncError::Validation("message content is empty".into()));
        }
        if sender_id == receiver_id {
            return Err(SyncError::Validation("cannot message yourself".into()));
        }
        if self.session.current_user_id() != Some(sender_id) {
            return Err(SyncError::Unauthenticated);
        }

        let message = self
            .store
            .insert_message(NewMessage {
                item_report_id,
                sender_id,
                receiver_id,
                content: content.to_string(),
            })
            .await?;

        debug!("{} sent message {} about report {}", sender_id, message.id, item_report_id);
        Ok(message)
    }

    /// The two-party thread between `user_a` and `user_b` about a report,
    /// oldest first.
    ///
    /// The store can only narrow by report and by "involves `user_a`"; rows
    /// between `user_a` and a third party come back too and are dropped here.
    pub async fn list_for_conversation(
        &self,
        item_report_id: Uuid,
        user_a: Uuid,
        user_b: Uuid,
    ) -> Result<Vec<Message>> {
        let query = MessageQuery::new().item_report(item_report_id).involving(user_a);
        let rows = self.store.query_messages(query).await?;

        Ok(rows.into_iter().filter(|m| m.is_between(user_a, user_b)).collect())
    }

    /// Unread messages addressed to `user_id`, newest first.
    pub async fn list_unread_for_user(
        &self,
        user_id: Uuid,
        limit: Option<usize>,
    ) -> Result<Vec<Message>> {
        let mut query = MessageQuery::new().received_by(user_id).unread().newest_first();
        query.limit = limit;
        Ok(self.store.query_messages(query).await?)
    }

    /// Every message `user_id` sent or received, newest first.
    pub async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<Message>> {
        let query = MessageQuery::new().involving(user_id).newest_first();
        Ok(self.store.query_messages(query).await?)
    }

    /// Idempotent. Returns how many rows actually changed.
    pub async fn mark_read(&self, message_id: Uuid) -> Result<usize> {
        self.update_read(ReadScope::Message { id: message_id }).await
    }

    /// Mark everything addressed to `user_id` as read.
    pub async fn mark_all_read(&self, user_id: Uuid) -> Result<usize> {
        self.update_read(ReadScope::Receiver { receiver_id: user_id }).await
    }

    /// Mark what `sender_id` sent to `receiver_id` about one report as read.
    pub async fn mark_conversation_read(
        &self,
        item_report_id: Uuid,
        receiver_id: Uuid,
        sender_id: Uuid,
    ) -> Result<usize> {
        self.update_read(ReadScope::Conversation {
            item_report_id,
            receiver_id,
            sender_id,
        })
        .await
    }

    async fn update_read(&self, scope: ReadScope) -> Result<usize> {
        Ok(self.read_rows(scope).await?.len())
    }

    /// Mark `scope` read and return the rows that changed.
    pub(crate) async fn read_rows(&self, scope: ReadScope) -> Result<Vec<Message>> {
        Ok(self.store.mark_read(scope).await?)
    }

    pub fn subscribe(&self, filter: ChangeFilter) -> Subscription {
        self.store.subscribe(filter)
    }

    /// Display label for a user. Missing profiles and lookup failures fall
    /// back to a generic label.
    pub async fn display_name(&self, user_id: Uuid) -> String {
        match self.store.profile(user_id).await {
            Ok(Some(profile)) => profile.display_name(),
            Ok(None) => FALLBACK_DISPLAY_NAME.to_string(),
            Err(e) => {
                warn!("Profile lookup for {} failed: {:#}", user_id, e);
                FALLBACK_DISPLAY_NAME.to_string()
            }
        }
    }

    /// Name and kind of a report, if it can be found.
    pub async fn report_summary(&self, item_report_id: Uuid) -> Option<ReportSummary> {
        match self.store.report(item_report_id).await {
            Ok(report) => report.map(|r| r.summary()),
            Err(e) => {
                warn!("Report lookup for {} failed: {:#}", item_report_id, e);
                None
            }
        }
    }
}
