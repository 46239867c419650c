use rusqlite::Connection;

use crate::error::Result;

/// Initialise the scheduler schema in `conn`.
///
/// Creates the `jobs` table (idempotent) and an index on `run_at` so the
/// polling query stays cheap with thousands of queued reminders. Jobs are
/// one-shot: a row exists only until it fires or is cancelled.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS jobs (
            job_key      TEXT    NOT NULL PRIMARY KEY,   -- e.g. medicine_42
            subject_kind TEXT    NOT NULL,
            reminder_id  INTEGER NOT NULL,
            run_at       TEXT    NOT NULL,               -- RFC 3339 UTC
            payload      TEXT    NOT NULL,               -- opaque JSON
            created_at   TEXT    NOT NULL,
            updated_at   TEXT    NOT NULL
        ) STRICT;

        -- Efficient polling: SELECT … WHERE run_at <= ?  ORDER BY run_at
        CREATE INDEX IF NOT EXISTS idx_jobs_run_at ON jobs (run_at);
        ",
    )?;
    Ok(())
}
