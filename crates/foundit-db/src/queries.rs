use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{Connection, params_from_iter};
use tracing::warn;
use uuid::Uuid;

use foundit_types::api::{MessageQuery, NewMessage, ReadScope, SortOrder};
use foundit_types::models::{Message, Profile, Report};

use crate::Database;
use crate::models::{MESSAGE_COLUMNS, MessageRow, ProfileRow, ReportRow};

impl Database {
    // -- Profiles --

    pub fn create_profile(&self, profile: &Profile) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO profiles (id, full_name, email) VALUES (?1, ?2, ?3)",
                (profile.id.to_string(), &profile.full_name, &profile.email),
            )?;
            Ok(())
        })
    }

    pub fn get_profile(&self, id: Uuid) -> Result<Option<Profile>> {
        self.with_conn(|conn| query_profile(conn, id))
    }

    // -- Reports --

    pub fn create_report(&self, report: &Report) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO item_reports (id, type, name, user_id, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                (
                    report.id.to_string(),
                    report.kind.as_str(),
                    &report.name,
                    report.user_id.to_string(),
                    report.created_at.timestamp_micros(),
                ),
            )?;
            Ok(())
        })
    }

    pub fn get_report(&self, id: Uuid) -> Result<Option<Report>> {
        self.with_conn(|conn| query_report(conn, id))
    }

    // -- Messages --

    /// Persist a message. `created_at` is `now`, bumped past the newest row if
    /// needed so that timestamps are strictly increasing across the table.
    pub fn insert_message(&self, id: Uuid, msg: &NewMessage, now: DateTime<Utc>) -> Result<Message> {
        self.with_conn_mut(|conn| {
            let sql = format!(
                "INSERT INTO messages (id, item_report_id, sender_id, receiver_id, content, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5,
                         MAX(?6, COALESCE((SELECT MAX(created_at) FROM messages) + 1, ?6)))
                 RETURNING {}",
                MESSAGE_COLUMNS
            );

            let row = conn.query_row(
                &sql,
                (
                    id.to_string(),
                    msg.item_report_id.to_string(),
                    msg.sender_id.to_string(),
                    msg.receiver_id.to_string(),
                    &msg.content,
                    now.timestamp_micros(),
                ),
                MessageRow::from_row,
            )?;

            row.try_into()
        })
    }

    pub fn query_messages(&self, query: &MessageQuery) -> Result<Vec<Message>> {
        self.with_conn(|conn| select_messages(conn, query))
    }

    /// Set `is_read` on every unread row in `scope`. Returns the rows that
    /// actually changed, so a repeated call returns nothing.
    pub fn mark_read(&self, scope: &ReadScope) -> Result<Vec<Message>> {
        self.with_conn_mut(|conn| {
            let (clause, params) = read_scope_clause(scope);
            let sql = format!(
                "UPDATE messages SET is_read = 1 WHERE is_read = 0 AND {} RETURNING {}",
                clause, MESSAGE_COLUMNS
            );

            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params_from_iter(params), MessageRow::from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(into_messages(rows))
        })
    }
}

fn query_profile(conn: &Connection, id: Uuid) -> Result<Option<Profile>> {
    let mut stmt = conn.prepare("SELECT id, full_name, email FROM profiles WHERE id = ?1")?;

    let row = stmt
        .query_row([id.to_string()], |row| {
            Ok(ProfileRow {
                id: row.get(0)?,
                full_name: row.get(1)?,
                email: row.get(2)?,
            })
        })
        .optional()?;

    row.map(Profile::try_from).transpose()
}

fn query_report(conn: &Connection, id: Uuid) -> Result<Option<Report>> {
    let mut stmt =
        conn.prepare("SELECT id, type, name, user_id, created_at FROM item_reports WHERE id = ?1")?;

    let row = stmt
        .query_row([id.to_string()], |row| {
            Ok(ReportRow {
                id: row.get(0)?,
                kind: row.get(1)?,
                name: row.get(2)?,
                user_id: row.get(3)?,
                created_at: row.get(4)?,
            })
        })
        .optional()?;

    row.map(Report::try_from).transpose()
}

fn select_messages(conn: &Connection, query: &MessageQuery) -> Result<Vec<Message>> {
    let mut clauses: Vec<String> = Vec::new();
    let mut params: Vec<Value> = Vec::new();

    if let Some(report_id) = query.item_report_id {
        params.push(Value::Text(report_id.to_string()));
        clauses.push(format!("item_report_id = ?{}", params.len()));
    }
    if let Some(user_id) = query.involves {
        params.push(Value::Text(user_id.to_string()));
        let n = params.len();
        clauses.push(format!("(sender_id = ?{n} OR receiver_id = ?{n})"));
    }
    if let Some(receiver_id) = query.receiver_id {
        params.push(Value::Text(receiver_id.to_string()));
        clauses.push(format!("receiver_id = ?{}", params.len()));
    }
    if query.unread_only {
        clauses.push("is_read = 0".to_string());
    }

    let where_clause = if clauses.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", clauses.join(" AND "))
    };

    // rowid breaks ties in insertion order
    let order = match query.order {
        SortOrder::Ascending => "ORDER BY created_at ASC, rowid ASC",
        SortOrder::Descending => "ORDER BY created_at DESC, rowid DESC",
    };

    let limit = match query.limit {
        Some(limit) => {
            params.push(Value::Integer(i64::try_from(limit).unwrap_or(i64::MAX)));
            format!("LIMIT ?{}", params.len())
        }
        None => String::new(),
    };

    let sql = format!(
        "SELECT {} FROM messages {} {} {}",
        MESSAGE_COLUMNS, where_clause, order, limit
    );

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(params), MessageRow::from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(into_messages(rows))
}

fn read_scope_clause(scope: &ReadScope) -> (&'static str, Vec<Value>) {
    match *scope {
        ReadScope::Message { id } => ("id = ?1", vec![Value::Text(id.to_string())]),
        ReadScope::Receiver { receiver_id } => {
            ("receiver_id = ?1", vec![Value::Text(receiver_id.to_string())])
        }
        ReadScope::Conversation {
            item_report_id,
            receiver_id,
            sender_id,
        } => (
            "item_report_id = ?1 AND receiver_id = ?2 AND sender_id = ?3",
            vec![
                Value::Text(item_report_id.to_string()),
                Value::Text(receiver_id.to_string()),
                Value::Text(sender_id.to_string()),
            ],
        ),
    }
}

/// Corrupt rows are logged and skipped rather than failing the whole list.
fn into_messages(rows: Vec<MessageRow>) -> Vec<Message> {
    rows.into_iter()
        .filter_map(|row| {
            let id = row.id.clone();
            Message::try_from(row)
                .map_err(|e| warn!("Skipping message '{}': {:#}", id, e))
                .ok()
        })
        .collect()
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
