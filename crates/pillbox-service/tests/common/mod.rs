//! Shared fixture: the full engine wired over in-memory SQLite, a manual
//! clock and a scripted notifier.
#![allow(dead_code)]

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use pillbox_core::{
    LocalTime, ManualClock, NewSubject, OwnerId, Schedule, Subject, SubjectKind,
};
use pillbox_delivery::{
    DeliveryError, DeliveryOutcome, DeliveryWorker, Notification, Notifier, RateLimiter,
    WorkerSettings,
};
use pillbox_scheduler::{FiredJob, JobKey, SchedulerEngine, SchedulerHandle};
use pillbox_service::{ReconciliationSweep, ReminderService, ServiceSettings};
use pillbox_store::ReminderStore;
use tokio::sync::mpsc;

pub const OWNER: OwnerId = OwnerId(1001);

pub fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
}

pub fn new_medicine(times: &[&str]) -> NewSubject {
    let times = times
        .iter()
        .map(|t| t.parse::<LocalTime>().unwrap())
        .collect();
    NewSubject::new(
        OWNER,
        SubjectKind::Medicine,
        "Levothyroxine",
        Schedule::daily(times),
        "UTC",
    )
    .unwrap()
}

/// Replays scripted failures, then succeeds; records every delivered message.
#[derive(Default)]
pub struct Scripted {
    script: Mutex<VecDeque<Result<(), DeliveryError>>>,
    pub sent: Mutex<Vec<Notification>>,
    attempts: Mutex<u32>,
    delay: Mutex<Duration>,
}

impl Scripted {
    pub fn push(&self, result: Result<(), DeliveryError>) {
        self.script.lock().unwrap().push_back(result);
    }

    /// Hold every send for `delay` after it is counted as an attempt.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn attempts(&self) -> u32 {
        *self.attempts.lock().unwrap()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl Notifier for Scripted {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn send(&self, _owner: OwnerId, n: &Notification) -> Result<(), DeliveryError> {
        *self.attempts.lock().unwrap() += 1;
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let next = self.script.lock().unwrap().pop_front().unwrap_or(Ok(()));
        if next.is_ok() {
            self.sent.lock().unwrap().push(n.clone());
        }
        next
    }
}

pub struct Harness {
    pub clock: Arc<ManualClock>,
    pub store: Arc<ReminderStore>,
    pub jobs: SchedulerHandle,
    pub service: Arc<ReminderService>,
    pub sweep: ReconciliationSweep,
    pub notifier: Arc<Scripted>,
    pub worker: Arc<DeliveryWorker>,
    pub engine: SchedulerEngine,
    pub fired: mpsc::Receiver<FiredJob>,
}

impl Harness {
    pub fn new(start: DateTime<Utc>) -> Self {
        let clock = Arc::new(ManualClock::new(start));
        let store = Arc::new(ReminderStore::open_in_memory().unwrap());
        let jobs = SchedulerHandle::open_in_memory(clock.clone()).unwrap();
        let settings = ServiceSettings {
            analysis_lead_minutes: 120,
            misfire_grace: chrono::Duration::hours(1),
        };
        let service = Arc::new(ReminderService::new(
            store.clone(),
            jobs.clone(),
            clock.clone(),
            settings,
        ));
        let notifier = Arc::new(Scripted::default());
        let worker = Arc::new(DeliveryWorker::new(
            store.clone(),
            notifier.clone(),
            Arc::new(RateLimiter::new(8, Duration::ZERO)),
            clock.clone(),
            WorkerSettings {
                max_attempts: 3,
                backoff_base: Duration::from_millis(1),
            },
        ));
        let (tx, fired) = mpsc::channel(64);
        let engine = SchedulerEngine::new(
            jobs.clone(),
            tx,
            Duration::from_millis(10),
            Duration::from_secs(3600),
        );
        Self {
            clock,
            store,
            jobs,
            sweep: ReconciliationSweep::new(service.clone()),
            service,
            notifier,
            worker,
            engine,
            fired,
        }
    }

    pub fn medicine(&self, times: &[&str]) -> Subject {
        self.service.on_subject_created(new_medicine(times)).unwrap()
    }

    pub fn analysis(&self, date: NaiveDate, time: &str) -> Subject {
        let new = NewSubject::new(
            OWNER,
            SubjectKind::Analysis,
            "Lipid panel",
            Schedule::once(date, time.parse().unwrap()),
            "UTC",
        )
        .unwrap();
        self.service.on_subject_created(new).unwrap()
    }

    /// Poll the engine once and run every fired job through the worker.
    pub async fn fire_due(&mut self) -> Vec<DeliveryOutcome> {
        self.engine.poll_once().unwrap();
        let mut outcomes = Vec::new();
        while let Ok(job) = self.fired.try_recv() {
            outcomes.push(self.worker.deliver(job.key.reminder_id).await);
        }
        outcomes
    }

    pub fn job_keys(&self) -> HashSet<JobKey> {
        self.jobs.list_keys().unwrap().into_iter().collect()
    }

    pub fn advance_to(&self, at: DateTime<Utc>) {
        self.clock.set(at);
    }
}

impl Harness {
    /// Hand the fired-job receiver to a [`Dispatcher`](pillbox_service::Dispatcher).
    pub fn dispatcher(&mut self) -> pillbox_service::Dispatcher {
        let (_unused, placeholder) = mpsc::channel(1);
        let fired = std::mem::replace(&mut self.fired, placeholder);
        pillbox_service::Dispatcher::new(self.worker.clone(), fired)
    }
}
