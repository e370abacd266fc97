//! SQLite row types, one per table.
//! Distinct from foundit-types models to keep the DB layer independent;
//! conversion parses ids and timestamps and rejects corrupt rows.

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use uuid::Uuid;

use foundit_types::models::{Message, Profile, Report};

pub struct ProfileRow {
    pub id: String,
    pub full_name: Option<String>,
    pub email: Option<String>,
}

pub struct ReportRow {
    pub id: String,
    pub kind: String,
    pub name: String,
    pub user_id: String,
    pub created_at: i64,
}

pub struct MessageRow {
    pub id: String,
    pub item_report_id: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub content: String,
    pub is_read: bool,
    pub created_at: i64,
}

/// Column list shared by every query that produces a [`MessageRow`].
pub(crate) const MESSAGE_COLUMNS: &str =
    "id, item_report_id, sender_id, receiver_id, content, is_read, created_at";

impl MessageRow {
    pub(crate) fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            item_report_id: row.get(1)?,
            sender_id: row.get(2)?,
            receiver_id: row.get(3)?,
            content: row.get(4)?,
            is_read: row.get(5)?,
            created_at: row.get(6)?,
        })
    }
}

fn parse_id(value: &str, column: &str) -> Result<Uuid> {
    value
        .parse()
        .with_context(|| format!("Corrupt {} '{}'", column, value))
}

fn parse_micros(value: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_micros(value).ok_or_else(|| anyhow!("Corrupt created_at {}", value))
}

impl TryFrom<MessageRow> for Message {
    type Error = anyhow::Error;

    fn try_from(row: MessageRow) -> Result<Self> {
        Ok(Message {
            id: parse_id(&row.id, "message id")?,
            item_report_id: parse_id(&row.item_report_id, "item_report_id")?,
            sender_id: parse_id(&row.sender_id, "sender_id")?,
            receiver_id: parse_id(&row.receiver_id, "receiver_id")?,
            content: row.content,
            is_read: row.is_read,
            created_at: parse_micros(row.created_at)?,
        })
    }
}

impl TryFrom<ReportRow> for Report {
    type Error = anyhow::Error;

    fn try_from(row: ReportRow) -> Result<Self> {
        Ok(Report {
            id: parse_id(&row.id, "report id")?,
            kind: row.kind.parse().map_err(|e: String| anyhow!(e))?,
            name: row.name,
            user_id: parse_id(&row.user_id, "user_id")?,
            created_at: parse_micros(row.created_at)?,
        })
    }
}

impl TryFrom<ProfileRow> for Profile {
    type Error = anyhow::Error;

    fn try_from(row: ProfileRow) -> Result<Self> {
        Ok(Profile {
            id: parse_id(&row.id, "profile id")?,
            full_name: row.full_name,
            email: row.email,
        })
    }
}
