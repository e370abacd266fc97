use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS profiles (
            id          TEXT PRIMARY KEY,
            full_name   TEXT,
            email       TEXT
        );

        CREATE TABLE IF NOT EXISTS item_reports (
            id          TEXT PRIMARY KEY,
            type        TEXT NOT NULL CHECK (type IN ('lost', 'found')),
            name        TEXT NOT NULL,
            user_id     TEXT NOT NULL REFERENCES profiles(id),
            created_at  INTEGER NOT NULL
        );

        -- created_at is microseconds since the Unix epoch, assigned by the
        -- insert statement and strictly increasing across the table.
        CREATE TABLE IF NOT EXISTS messages (
            id              TEXT PRIMARY KEY,
            item_report_id  TEXT NOT NULL REFERENCES item_reports(id),
            sender_id       TEXT NOT NULL REFERENCES profiles(id),
            receiver_id     TEXT NOT NULL REFERENCES profiles(id),
            content         TEXT NOT NULL CHECK (length(trim(content)) > 0),
            is_read         INTEGER NOT NULL DEFAULT 0,
            created_at      INTEGER NOT NULL,
            CHECK (sender_id <> receiver_id)
        );

        CREATE INDEX IF NOT EXISTS idx_messages_report
            ON messages(item_report_id, created_at);

        CREATE INDEX IF NOT EXISTS idx_messages_receiver_unread
            ON messages(receiver_id, is_read, created_at);

        CREATE INDEX IF NOT EXISTS idx_messages_sender
            ON messages(sender_id, created_at);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
