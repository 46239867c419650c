use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, Utc};
use chrono_tz::Tz;
use pillbox_core::{
    time, NewSubject, Occurrence, OwnerId, Reminder, ReminderId, ReminderStatus, Schedule, Subject, SubjectId,
    SubjectStatus, SubjectUpdate,
};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::{debug, info, instrument};

use crate::db::init_db;
use crate::error::{Result, StoreError};

const SUBJECT_COLUMNS: &str = "id, owner_id, kind, name, schedule, status, pause_until, \
     timezone, notes, created_at, updated_at";

const REMINDER_COLUMNS: &str = "id, owner_id, subject_kind, subject_id, scheduled_time, \
     timezone, status, retry_count, last_error, postponed_until, postponed_days, \
     created_at, updated_at, due_at";

/// A requested status change for one reminder.
///
/// Fields left at `None` keep their stored value, except `postponed_until`
/// which is always overwritten (leaving `Pending` clears it).
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub to: ReminderStatus,
    pub last_error: Option<String>,
    /// Bump `retry_count` as part of the same write.
    pub count_attempt: bool,
    pub postponed_until: Option<DateTime<Utc>>,
    pub postponed_days: Option<u32>,
    /// Move the occurrence itself.
    pub scheduled_time: Option<DateTime<Utc>>,
}

impl Transition {
    pub fn to(status: ReminderStatus) -> Self {
        Self {
            to: status,
            last_error: None,
            count_attempt: false,
            postponed_until: None,
            postponed_days: None,
            scheduled_time: None,
        }
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.last_error = Some(error.into());
        self
    }

    pub fn counting_attempt(mut self) -> Self {
        self.count_attempt = true;
        self
    }

    /// Park the reminder until `until`; the occurrence moves there as well.
    pub fn postponed(mut self, until: DateTime<Utc>, days: Option<u32>) -> Self {
        self.postponed_until = Some(until);
        self.postponed_days = days;
        self.scheduled_time = Some(until);
        self
    }
}

/// Durable Subject and Reminder storage with atomic status transitions.
///
/// Wraps a single SQLite connection in a `Mutex`. Every status change is a
/// single compare-and-set `UPDATE … WHERE status = ?`, so two writers racing
/// on the same reminder cannot both win. Multi-row sweep steps run inside one
/// short transaction each.
pub struct ReminderStore {
    db: Mutex<Connection>,
}

impl ReminderStore {
    /// Wrap an open connection, creating the schema if needed.
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            db: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::new(Connection::open_in_memory()?)
    }

    pub(crate) fn conn(&self) -> MutexGuard<'_, Connection> {
        self.db.lock().unwrap_or_else(|e| e.into_inner())
    }

    // --- subjects ----------------------------------------------------------

    #[instrument(skip(self, new), fields(owner_id = %new.owner_id, kind = %new.kind))]
    pub fn insert_subject(&self, new: &NewSubject, now: DateTime<Utc>) -> Result<Subject> {
        let schedule = encode_schedule(&new.schedule)?;
        let db = self.conn();
        db.execute(
            "INSERT INTO subjects
             (owner_id, kind, name, schedule, status, pause_until, timezone, notes,
              created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, 'active', NULL, ?5, ?6, ?7, ?7)",
            params![
                new.owner_id.0,
                new.kind.as_str(),
                new.name,
                schedule,
                new.timezone.name(),
                new.notes,
                ts(now),
            ],
        )?;
        let id = SubjectId(db.last_insert_rowid());
        info!(subject_id = %id, name = %new.name, "subject created");
        Ok(Subject {
            id,
            owner_id: new.owner_id,
            kind: new.kind,
            name: new.name.clone(),
            schedule: new.schedule.clone(),
            status: SubjectStatus::Active,
            pause_until: None,
            timezone: new.timezone,
            notes: new.notes.clone(),
            created_at: now,
            updated_at: now,
        })
    }

    pub fn subject(&self, id: SubjectId) -> Result<Option<Subject>> {
        load_subject(&self.conn(), id)
    }

    /// Like [`subject`](Self::subject) but a missing row is an error.
    pub fn get_subject(&self, id: SubjectId) -> Result<Subject> {
        self.subject(id)?.ok_or(StoreError::SubjectNotFound(id))
    }

    /// Apply a partial update to name, schedule, timezone or notes.
    #[instrument(skip(self, update), fields(subject_id = %id))]
    pub fn update_subject(
        &self,
        id: SubjectId,
        update: &SubjectUpdate,
        now: DateTime<Utc>,
    ) -> Result<Subject> {
        let db = self.conn();
        let mut subject = load_subject(&db, id)?.ok_or(StoreError::SubjectNotFound(id))?;
        if let Some(name) = &update.name {
            subject.name = name.clone();
        }
        if let Some(schedule) = &update.schedule {
            subject.schedule = schedule.clone();
        }
        if let Some(zone) = update.timezone {
            subject.timezone = zone;
        }
        if let Some(notes) = &update.notes {
            subject.notes = (!notes.trim().is_empty()).then(|| notes.clone());
        }
        subject.updated_at = now;

        db.execute(
            "UPDATE subjects
             SET name = ?1, schedule = ?2, timezone = ?3, notes = ?4, updated_at = ?5
             WHERE id = ?6",
            params![
                subject.name,
                encode_schedule(&subject.schedule)?,
                subject.timezone.name(),
                subject.notes,
                ts(now),
                id.0,
            ],
        )?;
        debug!("subject updated");
        Ok(subject)
    }

    /// Set a subject's lifecycle status and pause expiry in one write.
    #[instrument(skip(self))]
    pub fn set_subject_status(
        &self,
        id: SubjectId,
        status: SubjectStatus,
        pause_until: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<Subject> {
        let db = self.conn();
        let n = db.execute(
            "UPDATE subjects SET status = ?1, pause_until = ?2, updated_at = ?3 WHERE id = ?4",
            params![status.as_str(), pause_until.map(ts), ts(now), id.0],
        )?;
        if n == 0 {
            return Err(StoreError::SubjectNotFound(id));
        }
        load_subject(&db, id)?.ok_or(StoreError::SubjectNotFound(id))
    }

    /// An owner's subjects, oldest first. Deleted subjects are never listed;
    /// cancelled and completed ones only when `include_finished` is set.
    pub fn list_subjects(&self, owner: OwnerId, include_finished: bool) -> Result<Vec<Subject>> {
        let sql = format!(
            "SELECT {SUBJECT_COLUMNS} FROM subjects
             WHERE owner_id = ?1
               AND status != 'deleted'
               AND (?2 OR status IN ('active', 'paused'))
             ORDER BY created_at, id"
        );
        query_all(&self.conn(), &sql, params![owner.0, include_finished], row_to_subject)
    }

    /// Active subjects with a recurring schedule; the sweep tops up their
    /// upcoming occurrences.
    pub fn active_recurring_subjects(&self) -> Result<Vec<Subject>> {
        let sql = format!("SELECT {SUBJECT_COLUMNS} FROM subjects WHERE status = 'active' ORDER BY id");
        let subjects = query_all(&self.conn(), &sql, [], row_to_subject)?;
        Ok(subjects
            .into_iter()
            .filter(|s| !s.schedule.is_date_bound())
            .collect())
    }

    /// Return every paused subject whose pause has elapsed to `active`.
    pub fn clear_expired_pauses(&self, now: DateTime<Utc>) -> Result<Vec<Subject>> {
        let mut db = self.conn();
        let tx = db.transaction()?;
        let sql = format!(
            "SELECT {SUBJECT_COLUMNS} FROM subjects
             WHERE status = 'paused' AND pause_until IS NOT NULL AND pause_until <= ?1"
        );
        let mut resumed = query_all(&tx, &sql, [ts(now)], row_to_subject)?;
        tx.execute(
            "UPDATE subjects SET status = 'active', pause_until = NULL, updated_at = ?1
             WHERE status = 'paused' AND pause_until IS NOT NULL AND pause_until <= ?1",
            [ts(now)],
        )?;
        tx.commit()?;
        for s in &mut resumed {
            s.status = SubjectStatus::Active;
            s.pause_until = None;
            s.updated_at = now;
        }
        Ok(resumed)
    }

    // --- reminders ---------------------------------------------------------

    /// Persist one `pending` reminder per instant.
    ///
    /// Idempotent on `(subject, scheduled_time)`: an instant that already has a
    /// non-cancelled reminder is skipped. Returns only the rows created.
    pub fn insert_reminders(
        &self,
        subject: &Subject,
        instants: &[DateTime<Utc>],
        now: DateTime<Utc>,
    ) -> Result<Vec<Reminder>> {
        let on_time: Vec<Occurrence> = instants.iter().copied().map(Occurrence::on_time).collect();
        self.insert_occurrences(subject, &on_time, now)
    }

    /// Like [`insert_reminders`](Self::insert_reminders), keeping each
    /// occurrence's advance target.
    #[instrument(skip(self, subject, occurrences), fields(subject_id = %subject.id, count = occurrences.len()))]
    pub fn insert_occurrences(
        &self,
        subject: &Subject,
        occurrences: &[Occurrence],
        now: DateTime<Utc>,
    ) -> Result<Vec<Reminder>> {
        let mut db = self.conn();
        let tx = db.transaction()?;
        let mut created = Vec::new();
        for &Occurrence { at, due_at } in occurrences {
            let exists: bool = tx.query_row(
                "SELECT EXISTS(
                    SELECT 1 FROM reminders
                    WHERE subject_id = ?1 AND scheduled_time = ?2 AND status != 'cancelled')",
                params![subject.id.0, ts(at)],
                |row| row.get(0),
            )?;
            if exists {
                continue;
            }
            tx.execute(
                "INSERT INTO reminders
                 (owner_id, subject_kind, subject_id, scheduled_time, due_at, timezone, status,
                  retry_count, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'pending', 0, ?7, ?7)",
                params![
                    subject.owner_id.0,
                    subject.kind.as_str(),
                    subject.id.0,
                    ts(at),
                    due_at.map(ts),
                    subject.timezone.name(),
                    ts(now),
                ],
            )?;
            created.push(Reminder {
                id: ReminderId(tx.last_insert_rowid()),
                owner_id: subject.owner_id,
                subject_kind: subject.kind,
                subject_id: subject.id,
                scheduled_time: at,
                due_at,
                timezone: subject.timezone,
                status: ReminderStatus::Pending,
                retry_count: 0,
                last_error: None,
                postponed_until: None,
                postponed_days: None,
                created_at: now,
                updated_at: now,
            });
        }
        tx.commit()?;
        if !created.is_empty() {
            debug!(created = created.len(), "reminders persisted");
        }
        Ok(created)
    }

    pub fn reminder(&self, id: ReminderId) -> Result<Option<Reminder>> {
        load_reminder(&self.conn(), id)
    }

    pub fn get_reminder(&self, id: ReminderId) -> Result<Reminder> {
        self.reminder(id)?.ok_or(StoreError::ReminderNotFound(id))
    }

    /// Atomically move a reminder from `from` to `change.to`.
    ///
    /// Fails with [`StoreError::InvalidTransition`] when the pair is not in
    /// the transition table or when the stored status is no longer `from`;
    /// in both cases nothing is written.
    #[instrument(skip(self, change), fields(to = %change.to))]
    pub fn transition(
        &self,
        id: ReminderId,
        from: ReminderStatus,
        change: Transition,
        now: DateTime<Utc>,
    ) -> Result<Reminder> {
        if !from.can_transition_to(change.to) {
            return Err(StoreError::InvalidTransition {
                id,
                from,
                to: change.to,
            });
        }
        let db = self.conn();
        let n = db.execute(
            "UPDATE reminders
             SET status          = ?1,
                 last_error      = COALESCE(?2, last_error),
                 retry_count     = retry_count + ?3,
                 postponed_until = ?4,
                 postponed_days  = COALESCE(?5, postponed_days),
                 scheduled_time  = COALESCE(?6, scheduled_time),
                 updated_at      = ?7
             WHERE id = ?8 AND status = ?9",
            params![
                change.to.as_str(),
                change.last_error,
                change.count_attempt as i64,
                change.postponed_until.map(ts),
                change.postponed_days,
                change.scheduled_time.map(ts),
                ts(now),
                id.0,
                from.as_str(),
            ],
        )?;
        match load_reminder(&db, id)? {
            None => Err(StoreError::ReminderNotFound(id)),
            Some(current) if n == 0 => Err(StoreError::InvalidTransition {
                id,
                from: current.status,
                to: change.to,
            }),
            Some(current) => {
                debug!("reminder transitioned");
                Ok(current)
            }
        }
    }

    /// Record a failed delivery attempt on a still-pending reminder.
    ///
    /// Returns `false` when the reminder has left `pending` in the meantime.
    pub fn record_attempt(&self, id: ReminderId, error: &str, now: DateTime<Utc>) -> Result<bool> {
        let db = self.conn();
        let n = db.execute(
            "UPDATE reminders
             SET retry_count = retry_count + 1, last_error = ?1, updated_at = ?2
             WHERE id = ?3 AND status = 'pending'",
            params![error, ts(now), id.0],
        )?;
        Ok(n == 1)
    }

    /// Cancel every pending reminder of a subject. Returns the cancelled rows.
    #[instrument(skip(self))]
    pub fn cancel_pending_for_subject(
        &self,
        subject_id: SubjectId,
        now: DateTime<Utc>,
    ) -> Result<Vec<Reminder>> {
        let mut db = self.conn();
        let tx = db.transaction()?;
        let sql = format!(
            "SELECT {REMINDER_COLUMNS} FROM reminders WHERE subject_id = ?1 AND status = 'pending'"
        );
        let mut cancelled = query_all(&tx, &sql, [subject_id.0], row_to_reminder)?;
        tx.execute(
            "UPDATE reminders SET status = 'cancelled', updated_at = ?1
             WHERE subject_id = ?2 AND status = 'pending'",
            params![ts(now), subject_id.0],
        )?;
        tx.commit()?;
        for r in &mut cancelled {
            r.status = ReminderStatus::Cancelled;
            r.updated_at = now;
        }
        if !cancelled.is_empty() {
            info!(count = cancelled.len(), "pending reminders cancelled");
        }
        Ok(cancelled)
    }

    /// Return postponed reminders whose postponement has elapsed to `pending`.
    pub fn restore_postponed(&self, now: DateTime<Utc>) -> Result<Vec<Reminder>> {
        let mut db = self.conn();
        let tx = db.transaction()?;
        let sql = format!(
            "SELECT {REMINDER_COLUMNS} FROM reminders
             WHERE status = 'postponed' AND postponed_until IS NOT NULL AND postponed_until <= ?1
             ORDER BY scheduled_time"
        );
        let mut restored = query_all(&tx, &sql, [ts(now)], row_to_reminder)?;
        tx.execute(
            "UPDATE reminders SET status = 'pending', postponed_until = NULL, updated_at = ?1
             WHERE status = 'postponed' AND postponed_until IS NOT NULL AND postponed_until <= ?1",
            [ts(now)],
        )?;
        tx.commit()?;
        for r in &mut restored {
            r.status = ReminderStatus::Pending;
            r.postponed_until = None;
            r.updated_at = now;
        }
        Ok(restored)
    }

    /// Pending reminders scheduled at or after `cutoff`, soonest first.
    pub fn pending_from(&self, cutoff: DateTime<Utc>) -> Result<Vec<Reminder>> {
        let sql = format!(
            "SELECT {REMINDER_COLUMNS} FROM reminders
             WHERE status = 'pending' AND scheduled_time >= ?1
             ORDER BY scheduled_time"
        );
        query_all(&self.conn(), &sql, [ts(cutoff)], row_to_reminder)
    }

    /// Fail every pending reminder scheduled before `cutoff` with
    /// `last_error = "overdue"`. They are never delivered late.
    pub fn fail_overdue(&self, cutoff: DateTime<Utc>, now: DateTime<Utc>) -> Result<Vec<Reminder>> {
        let mut db = self.conn();
        let tx = db.transaction()?;
        let sql = format!(
            "SELECT {REMINDER_COLUMNS} FROM reminders
             WHERE status = 'pending' AND scheduled_time < ?1"
        );
        let mut failed = query_all(&tx, &sql, [ts(cutoff)], row_to_reminder)?;
        tx.execute(
            "UPDATE reminders SET status = 'failed', last_error = ?1, updated_at = ?2
             WHERE status = 'pending' AND scheduled_time < ?3",
            params![OVERDUE, ts(now), ts(cutoff)],
        )?;
        tx.commit()?;
        for r in &mut failed {
            r.status = ReminderStatus::Failed;
            r.last_error = Some(OVERDUE.to_string());
            r.updated_at = now;
        }
        Ok(failed)
    }

    /// An owner's reminders, latest scheduled first.
    pub fn list_reminders(
        &self,
        owner: OwnerId,
        status: Option<ReminderStatus>,
        limit: usize,
    ) -> Result<Vec<Reminder>> {
        let sql = format!(
            "SELECT {REMINDER_COLUMNS} FROM reminders
             WHERE owner_id = ?1 AND (?2 IS NULL OR status = ?2)
             ORDER BY scheduled_time DESC, id DESC
             LIMIT ?3"
        );
        query_all(
            &self.conn(),
            &sql,
            params![owner.0, status.map(|s| s.as_str()), limit as i64],
            row_to_reminder,
        )
    }

    /// All reminders of one subject in schedule order.
    pub fn reminders_for_subject(&self, subject_id: SubjectId) -> Result<Vec<Reminder>> {
        let sql = format!(
            "SELECT {REMINDER_COLUMNS} FROM reminders WHERE subject_id = ?1
             ORDER BY scheduled_time, id"
        );
        query_all(&self.conn(), &sql, [subject_id.0], row_to_reminder)
    }
}

/// `last_error` written by the sweep for reminders that were never delivered.
pub const OVERDUE: &str = "overdue";

/// Fixed-width UTC text form used for every stored instant.
pub(crate) fn ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn encode_schedule(schedule: &Schedule) -> Result<String> {
    serde_json::to_string(schedule).map_err(|e| StoreError::Corrupt(e.to_string()))
}

fn load_subject(db: &Connection, id: SubjectId) -> Result<Option<Subject>> {
    let sql = format!("SELECT {SUBJECT_COLUMNS} FROM subjects WHERE id = ?1");
    db.query_row(&sql, [id.0], row_to_subject)
        .optional()
        .map_err(read_err)
}

fn load_reminder(db: &Connection, id: ReminderId) -> Result<Option<Reminder>> {
    let sql = format!("SELECT {REMINDER_COLUMNS} FROM reminders WHERE id = ?1");
    db.query_row(&sql, [id.0], row_to_reminder)
        .optional()
        .map_err(read_err)
}

fn query_all<T, P: rusqlite::Params>(
    db: &Connection,
    sql: &str,
    params: P,
    map: fn(&Row<'_>) -> rusqlite::Result<T>,
) -> Result<Vec<T>> {
    let mut stmt = db.prepare_cached(sql)?;
    let rows = stmt.query_map(params, map)?;
    rows.collect::<rusqlite::Result<Vec<_>>>().map_err(read_err)
}

/// Decoding failures surface as `Corrupt`, everything else as `Database`.
fn read_err(e: rusqlite::Error) -> StoreError {
    match e {
        rusqlite::Error::FromSqlConversionFailure(idx, _, inner) => {
            StoreError::Corrupt(format!("column {idx}: {inner}"))
        }
        other => StoreError::Database(other),
    }
}

fn conversion<E>(idx: usize, e: E) -> rusqlite::Error
where
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, e.into())
}

fn parsed<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let raw: String = row.get(idx)?;
    raw.parse().map_err(|e| conversion(idx, e))
}

fn instant(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion(idx, e))
}

fn opt_instant(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    match row.get::<_, Option<String>>(idx)? {
        None => Ok(None),
        Some(_) => instant(row, idx).map(Some),
    }
}

fn zone(row: &Row<'_>, idx: usize) -> rusqlite::Result<Tz> {
    let raw: String = row.get(idx)?;
    time::parse_zone(&raw).map_err(|e| conversion(idx, e))
}

fn row_to_subject(row: &Row<'_>) -> rusqlite::Result<Subject> {
    let schedule_json: String = row.get(4)?;
    let schedule: Schedule =
        serde_json::from_str(&schedule_json).map_err(|e| conversion(4, e))?;
    Ok(Subject {
        id: SubjectId(row.get(0)?),
        owner_id: OwnerId(row.get(1)?),
        kind: parsed(row, 2)?,
        name: row.get(3)?,
        schedule,
        status: parsed(row, 5)?,
        pause_until: opt_instant(row, 6)?,
        timezone: zone(row, 7)?,
        notes: row.get(8)?,
        created_at: instant(row, 9)?,
        updated_at: instant(row, 10)?,
    })
}

fn row_to_reminder(row: &Row<'_>) -> rusqlite::Result<Reminder> {
    Ok(Reminder {
        id: ReminderId(row.get(0)?),
        owner_id: OwnerId(row.get(1)?),
        subject_kind: parsed(row, 2)?,
        subject_id: SubjectId(row.get(3)?),
        scheduled_time: instant(row, 4)?,
        due_at: opt_instant(row, 13)?,
        timezone: zone(row, 5)?,
        status: parsed(row, 6)?,
        retry_count: row.get(7)?,
        last_error: row.get(8)?,
        postponed_until: opt_instant(row, 9)?,
        postponed_days: row.get(10)?,
        created_at: instant(row, 11)?,
        updated_at: instant(row, 12)?,
    })
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};
    use pillbox_core::{LocalTime, SubjectKind};

    use super::*;

    fn at(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, h, 0, 0).unwrap()
    }

    fn medicine(store: &ReminderStore) -> Subject {
        let new = NewSubject::new(
            OwnerId(42),
            SubjectKind::Medicine,
            "Aspirin",
            Schedule::daily(vec!["08:00".parse::<LocalTime>().unwrap()]),
            "UTC",
        )
        .unwrap();
        store.insert_subject(&new, at(0)).unwrap()
    }

    #[test]
    fn subject_round_trips_through_sqlite() {
        let store = ReminderStore::open_in_memory().unwrap();
        let created = medicine(&store);
        let loaded = store.get_subject(created.id).unwrap();
        assert_eq!(loaded, created);
        assert!(matches!(
            store.get_subject(SubjectId(999)),
            Err(StoreError::SubjectNotFound(SubjectId(999)))
        ));
    }

    #[test]
    fn insert_reminders_is_idempotent_per_instant() {
        let store = ReminderStore::open_in_memory().unwrap();
        let s = medicine(&store);
        let first = store.insert_reminders(&s, &[at(8), at(20)], at(0)).unwrap();
        assert_eq!(first.len(), 2);
        let again = store.insert_reminders(&s, &[at(8), at(20)], at(1)).unwrap();
        assert!(again.is_empty());

        // A cancelled row no longer blocks re-creation.
        store.cancel_pending_for_subject(s.id, at(2)).unwrap();
        let recreated = store.insert_reminders(&s, &[at(8)], at(3)).unwrap();
        assert_eq!(recreated.len(), 1);
        assert_eq!(store.reminders_for_subject(s.id).unwrap().len(), 3);
    }

    #[test]
    fn advance_target_is_persisted() {
        let store = ReminderStore::open_in_memory().unwrap();
        let s = medicine(&store);
        let advance = Occurrence::advance(at(7), at(8));
        let created = store
            .insert_occurrences(&s, &[advance, Occurrence::on_time(at(8))], at(0))
            .unwrap();
        assert_eq!(created[0].due_at, Some(at(8)));
        assert_eq!(created[1].due_at, None);

        let loaded = store.get_reminder(created[0].id).unwrap();
        assert_eq!(loaded, created[0]);
    }

    #[test]
    fn transition_is_compare_and_set() {
        let store = ReminderStore::open_in_memory().unwrap();
        let s = medicine(&store);
        let r = store.insert_reminders(&s, &[at(8)], at(0)).unwrap().remove(0);

        let sent = store
            .transition(
                r.id,
                ReminderStatus::Pending,
                Transition::to(ReminderStatus::Sent).counting_attempt(),
                at(8),
            )
            .unwrap();
        assert_eq!(sent.status, ReminderStatus::Sent);
        assert_eq!(sent.retry_count, 1);

        // Second writer expecting pending loses.
        let err = store
            .transition(
                r.id,
                ReminderStatus::Pending,
                Transition::to(ReminderStatus::Sent),
                at(8),
            )
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::InvalidTransition {
                from: ReminderStatus::Sent,
                ..
            }
        ));

        // Pairs outside the table are rejected before touching the row.
        let err = store
            .transition(
                r.id,
                ReminderStatus::Sent,
                Transition::to(ReminderStatus::Pending),
                at(9),
            )
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition { .. }));
        assert_eq!(
            store.get_reminder(r.id).unwrap().status,
            ReminderStatus::Sent
        );
    }

    #[test]
    fn postpone_moves_occurrence_and_restore_clears_it() {
        let store = ReminderStore::open_in_memory().unwrap();
        let s = medicine(&store);
        let r = store.insert_reminders(&s, &[at(8)], at(0)).unwrap().remove(0);
        let until = at(8) + Duration::days(2);
        let parked = store
            .transition(
                r.id,
                ReminderStatus::Pending,
                Transition::to(ReminderStatus::Postponed).postponed(until, Some(2)),
                at(8),
            )
            .unwrap();
        assert_eq!(parked.postponed_until, Some(until));
        assert_eq!(parked.postponed_days, Some(2));
        assert_eq!(parked.scheduled_time, until);

        assert!(store.restore_postponed(at(9)).unwrap().is_empty());
        let restored = store.restore_postponed(until).unwrap();
        assert_eq!(restored.len(), 1);
        let stored = store.get_reminder(r.id).unwrap();
        assert_eq!(stored.status, ReminderStatus::Pending);
        assert_eq!(stored.postponed_until, None);
        assert_eq!(stored.postponed_days, Some(2));
    }

    #[test]
    fn record_attempt_only_touches_pending() {
        let store = ReminderStore::open_in_memory().unwrap();
        let s = medicine(&store);
        let r = store.insert_reminders(&s, &[at(8)], at(0)).unwrap().remove(0);
        assert!(store.record_attempt(r.id, "timeout", at(8)).unwrap());
        let stored = store.get_reminder(r.id).unwrap();
        assert_eq!(stored.retry_count, 1);
        assert_eq!(stored.last_error.as_deref(), Some("timeout"));

        store
            .transition(
                r.id,
                ReminderStatus::Pending,
                Transition::to(ReminderStatus::Cancelled),
                at(8),
            )
            .unwrap();
        assert!(!store.record_attempt(r.id, "timeout", at(8)).unwrap());
    }

    #[test]
    fn overdue_and_pause_sweeps() {
        let store = ReminderStore::open_in_memory().unwrap();
        let s = medicine(&store);
        store.insert_reminders(&s, &[at(2), at(8)], at(0)).unwrap();

        let failed = store.fail_overdue(at(5), at(5)).unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].scheduled_time, at(2));
        assert_eq!(failed[0].last_error.as_deref(), Some(OVERDUE));
        assert_eq!(store.pending_from(at(5)).unwrap().len(), 1);

        store
            .set_subject_status(s.id, SubjectStatus::Paused, Some(at(6)), at(5))
            .unwrap();
        assert!(store.clear_expired_pauses(at(5)).unwrap().is_empty());
        let resumed = store.clear_expired_pauses(at(6)).unwrap();
        assert_eq!(resumed.len(), 1);
        assert_eq!(store.get_subject(s.id).unwrap().status, SubjectStatus::Active);
    }

    #[test]
    fn listings_hide_deleted_subjects() {
        let store = ReminderStore::open_in_memory().unwrap();
        let a = medicine(&store);
        let b = medicine(&store);
        store
            .set_subject_status(a.id, SubjectStatus::Deleted, None, at(1))
            .unwrap();
        store
            .set_subject_status(b.id, SubjectStatus::Completed, None, at(1))
            .unwrap();
        assert!(store.list_subjects(OwnerId(42), false).unwrap().is_empty());
        let all = store.list_subjects(OwnerId(42), true).unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, b.id);
        assert!(store.active_recurring_subjects().unwrap().is_empty());
    }
}
