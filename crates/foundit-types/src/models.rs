use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Reports can be edited by their owner only within this many hours of creation.
pub const EDIT_WINDOW_HOURS: i64 = 24;

/// Label shown when a profile has neither a full name nor an email.
pub const FALLBACK_DISPLAY_NAME: &str = "User";

/// A message about a report, exchanged between two users.
///
/// Everything except `is_read` is immutable once the store has persisted the
/// row, and `is_read` only ever moves from `false` to `true`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub item_report_id: Uuid,
    pub sender_id: Uuid,
    pub receiver_id: Uuid,
    pub content: String,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// True if `user_id` sent or received this message.
    pub fn involves(&self, user_id: Uuid) -> bool {
        self.sender_id == user_id || self.receiver_id == user_id
    }

    /// True if this message belongs to the two-party thread between `a` and
    /// `b`, in either direction.
    pub fn is_between(&self, a: Uuid, b: Uuid) -> bool {
        (self.sender_id == a && self.receiver_id == b)
            || (self.sender_id == b && self.receiver_id == a)
    }

    /// Unread only ever applies to the receiver; a sent message is never
    /// unread for its sender.
    pub fn is_unread_for(&self, user_id: Uuid) -> bool {
        self.receiver_id == user_id && !self.is_read
    }

    /// The other participant from `user_id`'s point of view.
    pub fn counterpart_of(&self, user_id: Uuid) -> Uuid {
        if self.sender_id == user_id {
            self.receiver_id
        } else {
            self.sender_id
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportKind {
    Lost,
    Found,
}

impl ReportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Lost => "lost",
            Self::Found => "found",
        }
    }
}

impl std::str::FromStr for ReportKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "lost" => Ok(Self::Lost),
            "found" => Ok(Self::Found),
            other => Err(format!("unknown report kind: {}", other)),
        }
    }
}

/// A lost or found item report. Messaging only uses it as a label and as the
/// scope of a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Report {
    pub id: Uuid,
    pub kind: ReportKind,
    pub name: String,
    pub user_id: Uuid,
    pub created_at: DateTime<Utc>,
}

impl Report {
    pub fn edit_deadline(&self) -> DateTime<Utc> {
        self.created_at + Duration::hours(EDIT_WINDOW_HOURS)
    }

    /// Time left in the edit window, zero once it has closed.
    pub fn edit_time_remaining(&self, now: DateTime<Utc>) -> Duration {
        (self.edit_deadline() - now).max(Duration::zero())
    }

    pub fn can_edit(&self, now: DateTime<Utc>) -> bool {
        self.edit_time_remaining(now) > Duration::zero()
    }

    pub fn summary(&self) -> ReportSummary {
        ReportSummary {
            name: self.name.clone(),
            kind: self.kind,
        }
    }
}

/// The part of a report shown next to a message ("Re: Blue backpack").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportSummary {
    pub name: String,
    pub kind: ReportKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub id: Uuid,
    pub full_name: Option<String>,
    pub email: Option<String>,
}

impl Profile {
    /// Full name if present, otherwise the email, otherwise a generic label.
    pub fn display_name(&self) -> String {
        [self.full_name.as_deref(), self.email.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .find(|s| !s.is_empty())
            .unwrap_or(FALLBACK_DISPLAY_NAME)
            .to_string()
    }
}
