use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::Message;

// -- Session tokens --

/// Claims carried by the identity provider's session token. The sync core
/// only decodes these; issuing them is the provider's job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub email: String,
    #[serde(default)]
    pub full_name: Option<String>,
    pub exp: usize,
}

// -- Messages --

/// Input to a send. The store assigns `id`, `is_read` and `created_at`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NewMessage {
    pub item_report_id: Uuid,
    pub sender_id: Uuid,
    pub receiver_id: Uuid,
    pub content: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Ascending,
    Descending,
}

/// Store-level message filter. Every set field narrows the result (AND).
///
/// There is deliberately no way to express "between user A and user B"
/// here; callers that need the two-party pair filter apply
/// [`crate::models::Message::is_between`] to the result.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageQuery {
    pub item_report_id: Option<Uuid>,
    /// `sender_id = X OR receiver_id = X`
    pub involves: Option<Uuid>,
    pub receiver_id: Option<Uuid>,
    pub unread_only: bool,
    pub order: SortOrder,
    pub limit: Option<usize>,
}

impl MessageQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn item_report(mut self, id: Uuid) -> Self {
        self.item_report_id = Some(id);
        self
    }

    pub fn involving(mut self, user_id: Uuid) -> Self {
        self.involves = Some(user_id);
        self
    }

    pub fn received_by(mut self, user_id: Uuid) -> Self {
        self.receiver_id = Some(user_id);
        self
    }

    pub fn unread(mut self) -> Self {
        self.unread_only = true;
        self
    }

    pub fn newest_first(mut self) -> Self {
        self.order = SortOrder::Descending;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Row-level check of every filter except ordering and limit.
    pub fn matches(&self, m: &Message) -> bool {
        self.item_report_id.is_none_or(|id| m.item_report_id == id)
            && self.involves.is_none_or(|u| m.involves(u))
            && self.receiver_id.is_none_or(|u| m.receiver_id == u)
            && (!self.unread_only || !m.is_read)
    }
}

/// Which rows a mark-read update touches. Only rows that are currently
/// unread are changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scope", rename_all = "snake_case")]
pub enum ReadScope {
    Message { id: Uuid },
    Receiver { receiver_id: Uuid },
    Conversation {
        item_report_id: Uuid,
        receiver_id: Uuid,
        sender_id: Uuid,
    },
}

impl ReadScope {
    pub fn matches(&self, m: &Message) -> bool {
        match *self {
            Self::Message { id } => m.id == id,
            Self::Receiver { receiver_id } => m.receiver_id == receiver_id,
            Self::Conversation {
                item_report_id,
                receiver_id,
                sender_id,
            } => {
                m.item_report_id == item_report_id
                    && m.receiver_id == receiver_id
                    && m.sender_id == sender_id
            }
        }
    }
}
