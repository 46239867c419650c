//! Delivery worker behaviour against a real store and a scripted notifier.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use pillbox_core::{
    Clock, LocalTime, ManualClock, NewSubject, OwnerId, Reminder, ReminderStatus, Schedule,
    SubjectKind, SubjectStatus,
};
use pillbox_delivery::{
    DeliveryError, DeliveryOutcome, DeliveryWorker, Notification, Notifier, RateLimiter,
    WorkerSettings,
};
use pillbox_store::ReminderStore;

/// Replays a fixed script of results, then succeeds.
#[derive(Default)]
struct Scripted {
    script: Mutex<VecDeque<Result<(), DeliveryError>>>,
    sent: Mutex<Vec<Notification>>,
    calls: Mutex<u32>,
}

impl Scripted {
    fn new(script: Vec<Result<(), DeliveryError>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            ..Default::default()
        })
    }

    fn calls(&self) -> u32 {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl Notifier for Scripted {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn send(&self, _owner: OwnerId, n: &Notification) -> Result<(), DeliveryError> {
        *self.calls.lock().unwrap() += 1;
        let next = self.script.lock().unwrap().pop_front().unwrap_or(Ok(()));
        if next.is_ok() {
            self.sent.lock().unwrap().push(n.clone());
        }
        next
    }
}

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 5, 0, 0).unwrap()
}

struct Fixture {
    store: Arc<ReminderStore>,
    clock: Arc<ManualClock>,
    reminder: Reminder,
}

fn fixture() -> Fixture {
    let store = Arc::new(ReminderStore::open_in_memory().unwrap());
    let clock = Arc::new(ManualClock::new(t0()));
    let new = NewSubject::new(
        OwnerId(77),
        SubjectKind::Medicine,
        "Metformin",
        Schedule::daily(vec!["08:00".parse::<LocalTime>().unwrap()]),
        "Europe/Moscow",
    )
    .unwrap();
    let subject = store.insert_subject(&new, t0()).unwrap();
    let reminder = store
        .insert_reminders(&subject, &[t0()], t0())
        .unwrap()
        .remove(0);
    Fixture {
        store,
        clock,
        reminder,
    }
}

fn worker(f: &Fixture, notifier: Arc<dyn Notifier>) -> Arc<DeliveryWorker> {
    Arc::new(DeliveryWorker::new(
        f.store.clone(),
        notifier,
        Arc::new(RateLimiter::new(4, Duration::ZERO)),
        f.clock.clone(),
        WorkerSettings {
            max_attempts: 3,
            backoff_base: Duration::from_millis(2),
        },
    ))
}

#[tokio::test]
async fn sends_once_and_second_fire_is_a_noop() {
    let f = fixture();
    let notifier = Scripted::new(vec![]);
    let w = worker(&f, notifier.clone());

    assert_eq!(
        w.deliver(f.reminder.id).await,
        DeliveryOutcome::Sent { attempts: 1 }
    );
    assert_eq!(w.deliver(f.reminder.id).await, DeliveryOutcome::Stale);
    assert_eq!(notifier.calls(), 1);

    let stored = f.store.get_reminder(f.reminder.id).unwrap();
    assert_eq!(stored.status, ReminderStatus::Sent);
    assert_eq!(stored.retry_count, 1);
    let sent = notifier.sent.lock().unwrap();
    assert_eq!(sent[0].subject_name, "Metformin");
}

#[tokio::test]
async fn racing_fires_send_once() {
    let f = fixture();
    let notifier = Scripted::new(vec![]);
    let w = worker(&f, notifier.clone());
    let (a, b) = tokio::join!(w.deliver(f.reminder.id), w.deliver(f.reminder.id));
    let outcomes = [a, b];
    assert_eq!(
        outcomes
            .iter()
            .filter(|o| matches!(o, DeliveryOutcome::Sent { .. }))
            .count(),
        1
    );
    assert_eq!(notifier.calls(), 1);
}

#[tokio::test]
async fn three_transient_failures_fail_with_retry_count_three() {
    let f = fixture();
    let transient = || Err(DeliveryError::Transient("timed out".into()));
    let notifier = Scripted::new(vec![transient(), transient(), transient()]);
    let w = worker(&f, notifier.clone());

    let outcome = w.deliver(f.reminder.id).await;
    assert!(matches!(outcome, DeliveryOutcome::Failed { attempts: 3, .. }));
    let stored = f.store.get_reminder(f.reminder.id).unwrap();
    assert_eq!(stored.status, ReminderStatus::Failed);
    assert_eq!(stored.retry_count, 3);
    assert_eq!(stored.last_error.as_deref(), Some("transient: timed out"));
    assert_eq!(notifier.calls(), 3);
}

#[tokio::test]
async fn transient_then_success_counts_both_attempts() {
    let f = fixture();
    let notifier = Scripted::new(vec![Err(DeliveryError::Throttled {
        retry_after: Duration::from_millis(5),
    })]);
    let w = worker(&f, notifier.clone());

    assert_eq!(
        w.deliver(f.reminder.id).await,
        DeliveryOutcome::Sent { attempts: 2 }
    );
    let stored = f.store.get_reminder(f.reminder.id).unwrap();
    assert_eq!(stored.status, ReminderStatus::Sent);
    assert_eq!(stored.retry_count, 2);
    assert!(stored.last_error.is_some());
}

#[tokio::test]
async fn permanent_error_short_circuits() {
    let f = fixture();
    let notifier = Scripted::new(vec![Err(DeliveryError::Permanent("chat not found".into()))]);
    let w = worker(&f, notifier.clone());

    let outcome = w.deliver(f.reminder.id).await;
    assert!(matches!(outcome, DeliveryOutcome::Failed { attempts: 1, .. }));
    assert_eq!(notifier.calls(), 1);
    let stored = f.store.get_reminder(f.reminder.id).unwrap();
    assert_eq!(stored.status, ReminderStatus::Failed);
    assert_eq!(stored.retry_count, 1);
}

#[tokio::test]
async fn paused_subject_postpones_without_sending() {
    let f = fixture();
    let until = t0() + chrono::Duration::hours(1);
    f.store
        .set_subject_status(
            f.reminder.subject_id,
            SubjectStatus::Paused,
            Some(until),
            t0(),
        )
        .unwrap();
    let notifier = Scripted::new(vec![]);
    let w = worker(&f, notifier.clone());

    assert_eq!(
        w.deliver(f.reminder.id).await,
        DeliveryOutcome::Postponed { until }
    );
    assert_eq!(notifier.calls(), 0);
    let stored = f.store.get_reminder(f.reminder.id).unwrap();
    assert_eq!(stored.status, ReminderStatus::Postponed);
    assert_eq!(stored.postponed_until, Some(until));
}

#[tokio::test]
async fn expired_pause_does_not_block_delivery() {
    let f = fixture();
    f.store
        .set_subject_status(
            f.reminder.subject_id,
            SubjectStatus::Paused,
            Some(t0() - chrono::Duration::minutes(1)),
            t0(),
        )
        .unwrap();
    let w = worker(&f, Scripted::new(vec![]));
    assert_eq!(
        w.deliver(f.reminder.id).await,
        DeliveryOutcome::Sent { attempts: 1 }
    );
}

#[tokio::test]
async fn terminal_subject_cancels_reminder() {
    let f = fixture();
    f.store
        .set_subject_status(f.reminder.subject_id, SubjectStatus::Cancelled, None, t0())
        .unwrap();
    let notifier = Scripted::new(vec![]);
    let w = worker(&f, notifier.clone());

    assert_eq!(w.deliver(f.reminder.id).await, DeliveryOutcome::Cancelled);
    assert_eq!(notifier.calls(), 0);
    assert_eq!(
        f.store.get_reminder(f.reminder.id).unwrap().status,
        ReminderStatus::Cancelled
    );
    assert_eq!(f.clock.now(), t0());
}
