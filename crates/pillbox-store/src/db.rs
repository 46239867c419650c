use rusqlite::Connection;

use crate::error::Result;

/// Initialise the subjects and reminders tables.
///
/// Safe to call on every startup; it uses `IF NOT EXISTS` throughout. All
/// instants are stored as fixed-width RFC 3339 UTC text so that string
/// comparison in SQL matches chronological order.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS subjects (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            owner_id    INTEGER NOT NULL,
            kind        TEXT    NOT NULL,   -- medicine | analysis
            name        TEXT    NOT NULL,
            schedule    TEXT    NOT NULL,   -- JSON-encoded Schedule enum
            status      TEXT    NOT NULL DEFAULT 'active',
            pause_until TEXT,
            timezone    TEXT    NOT NULL,   -- IANA zone name
            notes       TEXT,
            created_at  TEXT    NOT NULL,
            updated_at  TEXT    NOT NULL
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_subjects_owner
            ON subjects (owner_id, status);

        -- Reminders are never deleted; terminal rows form the audit trail.
        CREATE TABLE IF NOT EXISTS reminders (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            owner_id        INTEGER NOT NULL,
            subject_kind    TEXT    NOT NULL,
            subject_id      INTEGER NOT NULL,
            scheduled_time  TEXT    NOT NULL,
            due_at          TEXT,
            timezone        TEXT    NOT NULL,
            status          TEXT    NOT NULL DEFAULT 'pending',
            retry_count     INTEGER NOT NULL DEFAULT 0,
            last_error      TEXT,
            postponed_until TEXT,
            postponed_days  INTEGER,
            created_at      TEXT    NOT NULL,
            updated_at      TEXT    NOT NULL
        ) STRICT;

        -- Sweep queries: WHERE status = ? AND scheduled_time < ?
        CREATE INDEX IF NOT EXISTS idx_reminders_status_time
            ON reminders (status, scheduled_time);
        CREATE INDEX IF NOT EXISTS idx_reminders_subject
            ON reminders (subject_id, scheduled_time);
        CREATE INDEX IF NOT EXISTS idx_reminders_owner
            ON reminders (owner_id, scheduled_time DESC);
        ",
    )?;
    Ok(())
}
