use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashSet;
use pillbox_core::config::DeliveryConfig;
use pillbox_core::{Clock, ReminderId, ReminderStatus};
use pillbox_store::{ReminderStore, StoreError, Transition};
use tracing::{debug, error, info, instrument, warn};

use crate::error::DeliveryError;
use crate::message;
use crate::notifier::Notifier;
use crate::rate_limit::RateLimiter;

/// Retry policy for one delivery.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub max_attempts: u32,
    /// Attempt `n` is followed by a `n * backoff_base` pause.
    pub backoff_base: Duration,
}

impl From<&DeliveryConfig> for WorkerSettings {
    fn from(cfg: &DeliveryConfig) -> Self {
        Self {
            max_attempts: cfg.max_attempts.max(1),
            backoff_base: cfg.backoff_base(),
        }
    }
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self::from(&DeliveryConfig::default())
    }
}

/// What one [`DeliveryWorker::deliver`] call did.
#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryOutcome {
    /// Another invocation is already delivering this reminder.
    InFlight,
    /// The reminder is gone or no longer pending; nothing was done.
    Stale,
    /// The parent subject is missing or finished.
    Cancelled,
    /// The subject is paused; delivery moved to the pause expiry.
    Postponed { until: DateTime<Utc> },
    Sent { attempts: u32 },
    Failed { attempts: u32, error: String },
    /// A store write failed; the reminder is left for the sweep.
    Aborted,
}

/// Executes fired reminders: validates current state, rate-limits, sends with
/// bounded retry and persists the outcome.
///
/// Errors never escape [`deliver`](Self::deliver); a failing delivery cannot
/// stall the dispatcher or the scheduler loop.
pub struct DeliveryWorker {
    store: Arc<ReminderStore>,
    notifier: Arc<dyn Notifier>,
    limiter: Arc<RateLimiter>,
    clock: Arc<dyn Clock>,
    settings: WorkerSettings,
    in_flight: DashSet<ReminderId>,
}

/// Removes the reminder from the in-flight set when dropped.
struct Claim<'a> {
    set: &'a DashSet<ReminderId>,
    id: ReminderId,
}

impl<'a> Claim<'a> {
    fn take(set: &'a DashSet<ReminderId>, id: ReminderId) -> Option<Self> {
        set.insert(id).then_some(Self { set, id })
    }
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        self.set.remove(&self.id);
    }
}

impl DeliveryWorker {
    pub fn new(
        store: Arc<ReminderStore>,
        notifier: Arc<dyn Notifier>,
        limiter: Arc<RateLimiter>,
        clock: Arc<dyn Clock>,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            store,
            notifier,
            limiter,
            clock,
            settings,
            in_flight: DashSet::new(),
        }
    }

    pub fn notifier_name(&self) -> &str {
        self.notifier.name()
    }

    /// Deliver one reminder. Safe to call repeatedly or concurrently for the
    /// same id: only the first call that finds it `pending` acts.
    #[instrument(skip(self), fields(reminder_id = %id))]
    pub async fn deliver(&self, id: ReminderId) -> DeliveryOutcome {
        let Some(_claim) = Claim::take(&self.in_flight, id) else {
            debug!("delivery already in flight");
            return DeliveryOutcome::InFlight;
        };

        match self.run(id).await {
            Ok(outcome) => outcome,
            Err(StoreError::InvalidTransition { from, .. }) => {
                debug!(status = %from, "reminder changed during delivery");
                DeliveryOutcome::Stale
            }
            Err(e) => {
                error!(error = %e, "delivery aborted by store error");
                DeliveryOutcome::Aborted
            }
        }
    }

    async fn run(&self, id: ReminderId) -> Result<DeliveryOutcome, StoreError> {
        let Some(reminder) = self.store.reminder(id)? else {
            warn!("fired for unknown reminder");
            return Ok(DeliveryOutcome::Stale);
        };
        if reminder.status != ReminderStatus::Pending {
            debug!(status = %reminder.status, "stale trigger ignored");
            return Ok(DeliveryOutcome::Stale);
        }

        let now = self.clock.now();
        let subject = match self.store.subject(reminder.subject_id)? {
            Some(s) if !s.status.is_terminal() => s,
            _ => {
                self.settle(id, Transition::to(ReminderStatus::Cancelled))?;
                info!(subject_id = %reminder.subject_id, "subject gone, reminder cancelled");
                return Ok(DeliveryOutcome::Cancelled);
            }
        };

        if let Some(until) = subject.pause_until.filter(|_| subject.is_paused_at(now)) {
            self.settle(
                id,
                Transition::to(ReminderStatus::Postponed).postponed(until, None),
            )?;
            info!(until = %until, "subject paused, reminder postponed");
            return Ok(DeliveryOutcome::Postponed { until });
        }

        let notification = message::compose(&subject, &reminder);
        let owner = reminder.owner_id;
        let max = self.settings.max_attempts;
        let mut last_error = String::new();

        for attempt in 1..=max {
            let result = match self.limiter.acquire(owner).await {
                Ok(_permit) => self.notifier.send(owner, &notification).await,
                Err(e) => Err(e),
            };

            match result {
                Ok(()) => {
                    self.settle(
                        id,
                        Transition::to(ReminderStatus::Sent).counting_attempt(),
                    )?;
                    info!(owner_id = %owner, attempts = attempt, notifier = self.notifier.name(), "reminder sent");
                    return Ok(DeliveryOutcome::Sent { attempts: attempt });
                }
                Err(e) if e.is_transient() => {
                    warn!(attempt, error = %e, "transient delivery failure");
                    last_error = e.to_string();
                    if attempt < max {
                        if !self.store.record_attempt(id, &last_error, self.clock.now())? {
                            debug!("reminder left pending during retry");
                            return Ok(DeliveryOutcome::Stale);
                        }
                        tokio::time::sleep(self.backoff(attempt, &e)).await;
                    }
                }
                Err(e) => {
                    error!(attempt, error = %e, "permanent delivery failure");
                    let error = e.to_string();
                    self.settle(
                        id,
                        Transition::to(ReminderStatus::Failed)
                            .with_error(error.clone())
                            .counting_attempt(),
                    )?;
                    return Ok(DeliveryOutcome::Failed {
                        attempts: attempt,
                        error,
                    });
                }
            }
        }

        self.settle(
            id,
            Transition::to(ReminderStatus::Failed)
                .with_error(last_error.clone())
                .counting_attempt(),
        )?;
        error!(attempts = max, error = %last_error, "retry budget exhausted");
        Ok(DeliveryOutcome::Failed {
            attempts: max,
            error: last_error,
        })
    }

    /// Move a pending reminder to its outcome state.
    fn settle(&self, id: ReminderId, change: Transition) -> Result<(), StoreError> {
        self.store
            .transition(id, ReminderStatus::Pending, change, self.clock.now())
            .map(|_| ())
    }

    fn backoff(&self, attempt: u32, err: &DeliveryError) -> Duration {
        let linear = self.settings.backoff_base * attempt;
        err.retry_after().map_or(linear, |hint| hint.max(linear))
    }
}
