use chrono::{DateTime, Utc};
use pillbox_core::{OwnerId, ReminderStatus, SubjectKind};
use rusqlite::params;
use serde::Serialize;
use tracing::instrument;

use crate::error::Result;
use crate::store::{ts, ReminderStore, OVERDUE};

/// Per-status reminder counts for one owner.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReminderCounts {
    pub pending: u64,
    pub sent: u64,
    pub completed: u64,
    pub skipped: u64,
    pub postponed: u64,
    pub cancelled: u64,
    pub failed: u64,
}

impl ReminderCounts {
    fn slot(&mut self, status: ReminderStatus) -> &mut u64 {
        match status {
            ReminderStatus::Pending => &mut self.pending,
            ReminderStatus::Sent => &mut self.sent,
            ReminderStatus::Completed => &mut self.completed,
            ReminderStatus::Skipped => &mut self.skipped,
            ReminderStatus::Postponed => &mut self.postponed,
            ReminderStatus::Cancelled => &mut self.cancelled,
            ReminderStatus::Failed => &mut self.failed,
        }
    }

    pub fn total(&self) -> u64 {
        self.pending
            + self.sent
            + self.completed
            + self.skipped
            + self.postponed
            + self.cancelled
            + self.failed
    }
}

/// Read-only aggregates over an owner's subjects and reminders.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OwnerStats {
    pub reminders: ReminderCounts,
    /// Non-deleted medicines.
    pub medicines: u64,
    /// Non-deleted analyses.
    pub analyses: u64,
    /// `completed / (completed + skipped)`; `None` before any feedback.
    pub adherence_rate: Option<f64>,
    /// Mean send attempts over reminders that reached delivery
    /// (sent, completed, skipped, failed other than overdue).
    pub average_attempts: Option<f64>,
    /// Reminders failed by the sweep without ever being delivered.
    pub overdue: u64,
}

impl ReminderStore {
    /// Aggregate an owner's history, optionally only reminders scheduled at or
    /// after `since`. Subject counts ignore `since`.
    #[instrument(skip(self))]
    pub fn stats(&self, owner: OwnerId, since: Option<DateTime<Utc>>) -> Result<OwnerStats> {
        let db = self.conn();
        let since = since.map(ts);
        let mut stats = OwnerStats::default();

        // status, count, attempts summed over non-overdue rows, overdue count
        let mut stmt = db.prepare_cached(
            "SELECT status,
                    COUNT(*),
                    COALESCE(SUM(CASE WHEN last_error IS ?3 THEN 0 ELSE retry_count END), 0),
                    SUM(CASE WHEN last_error IS ?3 THEN 1 ELSE 0 END)
             FROM reminders
             WHERE owner_id = ?1 AND (?2 IS NULL OR scheduled_time >= ?2)
             GROUP BY status",
        )?;
        let rows = stmt
            .query_map(params![owner.0, since, OVERDUE], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, i64>(3)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut attempts = 0i64;
        let mut delivered = 0i64;
        for (status, count, retries, overdue) in rows {
            let Ok(status) = status.parse::<ReminderStatus>() else {
                continue;
            };
            *stats.reminders.slot(status) = count as u64;
            match status {
                ReminderStatus::Sent | ReminderStatus::Completed | ReminderStatus::Skipped => {
                    attempts += retries;
                    delivered += count;
                }
                ReminderStatus::Failed => {
                    stats.overdue = overdue as u64;
                    attempts += retries;
                    delivered += count - overdue;
                }
                _ => {}
            }
        }

        let answered = stats.reminders.completed + stats.reminders.skipped;
        stats.adherence_rate =
            (answered > 0).then(|| stats.reminders.completed as f64 / answered as f64);
        stats.average_attempts = (delivered > 0).then(|| attempts as f64 / delivered as f64);

        let mut stmt = db.prepare_cached(
            "SELECT kind, COUNT(*) FROM subjects
             WHERE owner_id = ?1 AND status != 'deleted'
             GROUP BY kind",
        )?;
        let kinds = stmt
            .query_map([owner.0], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        for (kind, count) in kinds {
            match kind.parse::<SubjectKind>() {
                Ok(SubjectKind::Medicine) => stats.medicines = count as u64,
                Ok(SubjectKind::Analysis) => stats.analyses = count as u64,
                Err(_) => {}
            }
        }
        Ok(stats)
    }
}
