//! Periodic reconciliation between the reminder store and the job queue.
//!
//! Runs, in order:
//!
//! | Step | Action                                                              |
//! |------|---------------------------------------------------------------------|
//! | a    | clear pauses whose expiry has passed                                |
//! | b    | return elapsed postponements to `pending` and re-register them      |
//! | c    | diff live pending reminders against queued jobs; add missing, drop orphans |
//! | d    | fail pending reminders older than the grace window as `overdue`     |
//! | e    | top up upcoming occurrences of active recurring subjects            |
//!
//! Drift found along the way is logged and reported, never raised.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use pillbox_core::ReminderId;
use pillbox_scheduler::JobKey;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::error::Result;
use crate::service::{job_key, ReminderService};

/// A mismatch between persisted intent and the live queue, repaired in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SchedulingDrift {
    /// A pending reminder had no job; one was registered.
    MissingJob { key: String },
    /// A job had no pending reminder behind it; it was removed.
    OrphanJob { key: String },
    /// A pending reminder was past the grace window; it was failed.
    Overdue { reminder_id: ReminderId },
}

impl fmt::Display for SchedulingDrift {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedulingDrift::MissingJob { key } => write!(f, "missing job {key}"),
            SchedulingDrift::OrphanJob { key } => write!(f, "orphan job {key}"),
            SchedulingDrift::Overdue { reminder_id } => write!(f, "overdue reminder {reminder_id}"),
        }
    }
}

/// Counters for one sweep pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub pauses_cleared: usize,
    pub postponed_restored: usize,
    pub jobs_added: usize,
    pub jobs_removed: usize,
    pub overdue: usize,
    pub replenished: usize,
    pub drift: Vec<SchedulingDrift>,
}

impl SweepReport {
    pub fn is_clean(&self) -> bool {
        self.drift.is_empty()
    }
}

pub struct ReconciliationSweep {
    service: Arc<ReminderService>,
}

impl ReconciliationSweep {
    pub fn new(service: Arc<ReminderService>) -> Self {
        Self { service }
    }

    /// One full pass. Each step commits on its own; a failing step aborts the
    /// rest of the pass and the next interval starts over.
    pub fn run_once(&self) -> Result<SweepReport> {
        let svc = &self.service;
        let store = svc.store();
        let now = svc.now();
        let cutoff = now - svc.settings().misfire_grace;
        let mut report = SweepReport::default();

        // a. expired pauses
        let resumed = store.clear_expired_pauses(now)?;
        for s in &resumed {
            info!(subject_id = %s.id, "pause expired, subject active");
        }
        report.pauses_cleared = resumed.len();

        // b. elapsed postponements
        let restored = store.restore_postponed(now)?;
        for r in &restored {
            if r.scheduled_time >= cutoff {
                if let Err(e) = svc.register(r) {
                    warn!(reminder_id = %r.id, error = %e, "re-register after postpone failed");
                }
            }
            info!(reminder_id = %r.id, scheduled = %r.scheduled_time, "postponed reminder restored");
        }
        report.postponed_restored = restored.len();

        // c. job diff. Queue first: a reminder row always exists before its
        // job, so a job registered after this snapshot cannot look orphaned.
        let queued: HashSet<JobKey> = svc.scheduler().list_keys()?.into_iter().collect();
        let live = store.pending_from(cutoff)?;
        let live_keys: HashSet<JobKey> = live.iter().map(job_key).collect();

        for r in live.iter().filter(|r| !queued.contains(&job_key(r))) {
            let drift = SchedulingDrift::MissingJob {
                key: job_key(r).to_string(),
            };
            warn!(%drift, "scheduling drift");
            svc.register(r)?;
            report.jobs_added += 1;
            report.drift.push(drift);
        }
        for key in queued.difference(&live_keys) {
            let drift = SchedulingDrift::OrphanJob {
                key: key.to_string(),
            };
            warn!(%drift, "scheduling drift");
            svc.scheduler().cancel(*key)?;
            report.jobs_removed += 1;
            report.drift.push(drift);
        }

        // d. overdue
        for r in store.fail_overdue(cutoff, now)? {
            let drift = SchedulingDrift::Overdue { reminder_id: r.id };
            warn!(%drift, scheduled = %r.scheduled_time, "scheduling drift");
            svc.unregister(&r);
            report.overdue += 1;
            report.drift.push(drift);
        }

        // e. replenish recurring subjects
        for subject in store.active_recurring_subjects()? {
            match svc.ensure_occurrences(&subject) {
                Ok(created) => report.replenished += created.len(),
                Err(e) => {
                    error!(subject_id = %subject.id, error = %e, "occurrence replenish failed")
                }
            }
        }

        if report.is_clean() {
            info!(
                restored = report.postponed_restored,
                replenished = report.replenished,
                "sweep complete"
            );
        } else {
            warn!(
                drift = report.drift.len(),
                added = report.jobs_added,
                removed = report.jobs_removed,
                overdue = report.overdue,
                "sweep repaired drift"
            );
        }
        Ok(report)
    }

    /// Sweep every `interval` until `shutdown` broadcasts `true`. The first
    /// pass runs one interval after start; run [`run_once`](Self::run_once)
    /// directly for a startup pass.
    pub async fn run(self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = interval.as_secs(), "reconciliation sweep started");
        let mut ticker =
            tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.run_once() {
                        error!("sweep failed: {e}");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("reconciliation sweep shutting down");
                        break;
                    }
                }
            }
        }
    }
}
