use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use pillbox_core::Clock;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::{
    db::init_db,
    error::{Result, SchedulerError},
    types::{DueJobs, FiredJob, Job, JobKey},
};

/// Shared handle for job management while the engine loop runs.
///
/// Cloning is cheap; every clone talks to the same connection, which makes the
/// handle the single scheduling authority that all callers serialize through.
/// Row timestamps and due checks both read the handle's clock.
#[derive(Clone)]
pub struct SchedulerHandle {
    conn: Arc<Mutex<Connection>>,
    clock: Arc<dyn Clock>,
}

impl SchedulerHandle {
    pub fn new(conn: Connection, clock: Arc<dyn Clock>) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            clock,
        })
    }

    pub fn open_in_memory(clock: Arc<dyn Clock>) -> Result<Self> {
        Self::new(Connection::open_in_memory()?, clock)
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register (or replace) the one-shot trigger for `key`.
    pub fn schedule(
        &self,
        key: JobKey,
        run_at: DateTime<Utc>,
        payload: &serde_json::Value,
    ) -> Result<()> {
        let now = ts(self.now());
        let payload = serde_json::to_string(payload)?;
        self.conn().execute(
            "INSERT INTO jobs
             (job_key, subject_kind, reminder_id, run_at, payload, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
             ON CONFLICT (job_key) DO UPDATE
             SET run_at = excluded.run_at,
                 payload = excluded.payload,
                 updated_at = excluded.updated_at",
            params![
                key.to_string(),
                key.kind.as_str(),
                key.reminder_id.0,
                ts(run_at),
                payload,
                now,
            ],
        )?;
        debug!(job_key = %key, run_at = %run_at, "job scheduled");
        Ok(())
    }

    /// Remove the trigger for `key`. An absent key is not an error; returns
    /// whether a job was actually removed.
    pub fn cancel(&self, key: JobKey) -> Result<bool> {
        let n = self
            .conn()
            .execute("DELETE FROM jobs WHERE job_key = ?1", [key.to_string()])?;
        if n > 0 {
            debug!(job_key = %key, "job cancelled");
        }
        Ok(n > 0)
    }

    /// Keys of every queued job.
    pub fn list_keys(&self) -> Result<Vec<JobKey>> {
        let conn = self.conn();
        let mut stmt = conn.prepare_cached("SELECT job_key FROM jobs ORDER BY run_at")?;
        let raw = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        raw.iter().map(|k| k.parse()).collect()
    }

    /// Every queued job, soonest first.
    pub fn list_jobs(&self) -> Result<Vec<Job>> {
        let conn = self.conn();
        let mut stmt = conn.prepare_cached(
            "SELECT job_key, run_at, payload, created_at, updated_at FROM jobs ORDER BY run_at",
        )?;
        let rows = stmt
            .query_map([], raw_job)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(RawJob::decode).collect()
    }

    pub fn get(&self, key: JobKey) -> Result<Option<Job>> {
        let raw = self
            .conn()
            .query_row(
                "SELECT job_key, run_at, payload, created_at, updated_at
                 FROM jobs WHERE job_key = ?1",
                [key.to_string()],
                raw_job,
            )
            .optional()?;
        raw.map(RawJob::decode).transpose()
    }

    /// Claim every job due at `now`, removing it from the queue.
    ///
    /// Jobs due within `grace` are returned as fired; older ones are
    /// misfires and are dropped. Claim and removal share one transaction, so
    /// a job is handed out at most once.
    pub fn take_due(&self, now: DateTime<Utc>, grace: chrono::Duration) -> Result<DueJobs> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let due = {
            let mut stmt = tx.prepare_cached(
                "SELECT job_key, run_at, payload, created_at, updated_at FROM jobs
                 WHERE run_at <= ?1 ORDER BY run_at",
            )?;
            let rows = stmt
                .query_map([ts(now)], raw_job)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows
        };
        tx.execute("DELETE FROM jobs WHERE run_at <= ?1", [ts(now)])?;
        tx.commit()?;

        let cutoff = now - grace;
        let mut out = DueJobs::default();
        for raw in due {
            let job = match raw.decode() {
                Ok(job) => job,
                Err(e) => {
                    error!("dropping undecodable job: {e}");
                    continue;
                }
            };
            if job.run_at >= cutoff {
                out.fired.push(FiredJob {
                    key: job.key,
                    run_at: job.run_at,
                    fired_at: now,
                    payload: job.payload,
                });
            } else {
                out.misfired.push(job);
            }
        }
        Ok(out)
    }
}

/// Drives the job queue: polls for due jobs and forwards them to the
/// dispatcher over an mpsc channel.
pub struct SchedulerEngine {
    handle: SchedulerHandle,
    fired_tx: mpsc::Sender<FiredJob>,
    poll_interval: Duration,
    grace: chrono::Duration,
}

impl SchedulerEngine {
    pub fn new(
        handle: SchedulerHandle,
        fired_tx: mpsc::Sender<FiredJob>,
        poll_interval: Duration,
        misfire_grace: Duration,
    ) -> Self {
        Self {
            handle,
            fired_tx,
            poll_interval,
            grace: chrono::Duration::from_std(misfire_grace)
                .unwrap_or_else(|_| chrono::Duration::hours(1)),
        }
    }

    /// Main event loop. Polls until `shutdown` broadcasts `true`.
    ///
    /// The first tick runs immediately, so jobs that came due while the
    /// process was down are fired (within grace) or dropped right away.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            poll_ms = self.poll_interval.as_millis() as u64,
            grace_secs = self.grace.num_seconds(),
            "scheduler engine started"
        );

        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.poll_once() {
                        error!("scheduler tick error: {e}");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("scheduler engine shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Process every job due now. Returns how many were forwarded.
    pub fn poll_once(&self) -> Result<usize> {
        let now = self.handle.now();
        let due = self.handle.take_due(now, self.grace)?;

        for job in &due.misfired {
            warn!(
                job_key = %job.key,
                run_at = %job.run_at,
                "misfire: job older than grace window dropped"
            );
        }

        let mut forwarded = 0;
        for job in due.fired {
            let key = job.key;
            debug!(job_key = %key, lateness_ms = (now - job.run_at).num_milliseconds(), "job fired");
            // try_send never blocks the tick loop.
            match self.fired_tx.try_send(job) {
                Ok(()) => forwarded += 1,
                Err(mpsc::error::TrySendError::Full(job)) => {
                    warn!(job_key = %key, "delivery channel full, job requeued");
                    self.handle.schedule(job.key, job.run_at, &job.payload)?;
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    error!(job_key = %key, "delivery channel closed, job dropped");
                }
            }
        }
        Ok(forwarded)
    }
}

fn ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Undecoded job row: key, run_at, payload, created_at, updated_at.
struct RawJob(String, String, String, String, String);

fn raw_job(row: &Row<'_>) -> rusqlite::Result<RawJob> {
    Ok(RawJob(
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
    ))
}

impl RawJob {
    fn decode(self) -> Result<Job> {
        let instant = |s: &str| {
            DateTime::parse_from_rfc3339(s)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| SchedulerError::Corrupt(format!("{}: {e}", self.0)))
        };
        Ok(Job {
            key: self.0.parse()?,
            run_at: instant(&self.1)?,
            payload: serde_json::from_str(&self.2)?,
            created_at: instant(&self.3)?,
            updated_at: instant(&self.4)?,
        })
    }
}
