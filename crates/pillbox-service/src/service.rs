use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use pillbox_core::config::PillboxConfig;
use pillbox_core::{
    time, Clock, NewSubject, OwnerId, Reminder, ReminderId, ReminderStatus, ResponseAction,
    Subject, SubjectId, SubjectStatus, SubjectUpdate,
};
use pillbox_scheduler::{JobKey, SchedulerHandle};
use pillbox_store::{OwnerStats, ReminderStore, Transition};
use serde_json::json;
use tracing::{debug, info, instrument, warn};

use crate::error::{Result, ServiceError};

/// Tunables the service needs from configuration.
#[derive(Debug, Clone)]
pub struct ServiceSettings {
    /// Lead applied to date-bound schedules that do not set their own.
    pub analysis_lead_minutes: u32,
    /// Pending reminders older than this are overdue.
    pub misfire_grace: Duration,
}

impl From<&PillboxConfig> for ServiceSettings {
    fn from(cfg: &PillboxConfig) -> Self {
        Self {
            analysis_lead_minutes: cfg.defaults.analysis_lead_minutes,
            misfire_grace: Duration::seconds(cfg.scheduler.misfire_grace_secs as i64),
        }
    }
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self::from(&PillboxConfig::default())
    }
}

/// The reminder lifecycle entry point.
///
/// Every Subject mutation goes through here: occurrences are resolved to UTC,
/// persisted as Reminder rows and registered as jobs. Job registration is
/// best-effort; a failed registration is logged and left for the sweep, which
/// re-creates missing jobs for pending reminders.
pub struct ReminderService {
    store: Arc<ReminderStore>,
    scheduler: SchedulerHandle,
    clock: Arc<dyn Clock>,
    settings: ServiceSettings,
}

impl ReminderService {
    pub fn new(
        store: Arc<ReminderStore>,
        scheduler: SchedulerHandle,
        clock: Arc<dyn Clock>,
        settings: ServiceSettings,
    ) -> Self {
        Self {
            store,
            scheduler,
            clock,
            settings,
        }
    }

    pub fn store(&self) -> &Arc<ReminderStore> {
        &self.store
    }

    pub fn scheduler(&self) -> &SchedulerHandle {
        &self.scheduler
    }

    pub fn settings(&self) -> &ServiceSettings {
        &self.settings
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    // --- subject lifecycle -------------------------------------------------

    /// Persist a validated subject and materialise its upcoming reminders.
    #[instrument(skip(self, new), fields(owner_id = %new.owner_id, kind = %new.kind))]
    pub fn on_subject_created(&self, new: NewSubject) -> Result<Subject> {
        let now = self.now();
        // Resolve first so an unresolvable schedule never leaves a subject behind.
        time::occurrences(
            &new.schedule,
            new.timezone,
            now,
            self.settings.analysis_lead_minutes,
        )?;
        let subject = self.store.insert_subject(&new, now)?;
        let created = self.ensure_occurrences(&subject)?;
        info!(subject_id = %subject.id, reminders = created.len(), "subject scheduled");
        Ok(subject)
    }

    /// Apply an edit. Schedule or timezone changes cancel pending reminders
    /// and recompute occurrences from the new schedule.
    #[instrument(skip(self, update))]
    pub fn on_subject_updated(
        &self,
        owner: OwnerId,
        id: SubjectId,
        update: SubjectUpdate,
    ) -> Result<Subject> {
        let current = self.owned_live_subject(owner, id)?;
        if let Some(schedule) = &update.schedule {
            let zone = update.timezone.unwrap_or(current.timezone);
            time::occurrences(schedule, zone, self.now(), self.settings.analysis_lead_minutes)?;
        }
        let subject = self.store.update_subject(id, &update, self.now())?;
        if update.reschedules() {
            self.cancel_pending(id)?;
            let created = self.ensure_occurrences(&subject)?;
            info!(reminders = created.len(), "subject rescheduled");
        }
        Ok(subject)
    }

    /// Suppress delivery until `until`. Reminders firing meanwhile are
    /// postponed to the pause expiry instead of sent.
    #[instrument(skip(self))]
    pub fn on_subject_paused(
        &self,
        owner: OwnerId,
        id: SubjectId,
        until: DateTime<Utc>,
    ) -> Result<Subject> {
        self.owned_live_subject(owner, id)?;
        let now = self.now();
        if until <= now {
            return Err(ServiceError::InvalidInput(
                "pause must end in the future".to_string(),
            ));
        }
        let subject = self
            .store
            .set_subject_status(id, SubjectStatus::Paused, Some(until), now)?;
        info!(until = %until, "subject paused");
        Ok(subject)
    }

    /// End a pause early and top up occurrences.
    #[instrument(skip(self))]
    pub fn on_subject_resumed(&self, owner: OwnerId, id: SubjectId) -> Result<Subject> {
        self.owned_live_subject(owner, id)?;
        let subject = self
            .store
            .set_subject_status(id, SubjectStatus::Active, None, self.now())?;
        self.ensure_occurrences(&subject)?;
        info!("subject resumed");
        Ok(subject)
    }

    #[instrument(skip(self))]
    pub fn on_subject_cancelled(&self, owner: OwnerId, id: SubjectId) -> Result<Subject> {
        self.finish(owner, id, SubjectStatus::Cancelled)
    }

    #[instrument(skip(self))]
    pub fn on_subject_deleted(&self, owner: OwnerId, id: SubjectId) -> Result<Subject> {
        self.finish(owner, id, SubjectStatus::Deleted)
    }

    /// Move a subject to a terminal status, cascading to its pending reminders.
    fn finish(&self, owner: OwnerId, id: SubjectId, status: SubjectStatus) -> Result<Subject> {
        self.owned_live_subject(owner, id)?;
        let subject = self.store.set_subject_status(id, status, None, self.now())?;
        let cancelled = self.cancel_pending(id)?;
        info!(%status, cancelled, "subject finished");
        Ok(subject)
    }

    // --- owner feedback ----------------------------------------------------

    /// Record the owner's answer to a delivered reminder.
    ///
    /// Only `sent` reminders accept feedback. For date-bound subjects `take`
    /// and `skip` also complete the subject, since it has a single occurrence.
    #[instrument(skip(self))]
    pub fn on_owner_response(
        &self,
        owner: OwnerId,
        reminder_id: ReminderId,
        action: ResponseAction,
    ) -> Result<Reminder> {
        let action = action.validate()?;
        let reminder = self.store.get_reminder(reminder_id)?;
        if reminder.owner_id != owner {
            return Err(ServiceError::ReminderNotOwned {
                reminder_id,
                owner_id: owner,
            });
        }

        let now = self.now();
        let change = match action {
            ResponseAction::Postpone { days } => {
                let until = now + Duration::days(days as i64);
                Transition::to(ReminderStatus::Postponed).postponed(until, Some(days))
            }
            other => Transition::to(other.target_status()),
        };
        let updated = self
            .store
            .transition(reminder_id, ReminderStatus::Sent, change, now)?;
        info!(%action, "owner response recorded");

        if matches!(action, ResponseAction::Take | ResponseAction::Skip) {
            if let Some(subject) = self.store.subject(reminder.subject_id)? {
                if subject.schedule.is_date_bound() && !subject.status.is_terminal() {
                    self.store.set_subject_status(
                        subject.id,
                        SubjectStatus::Completed,
                        None,
                        now,
                    )?;
                    self.cancel_pending(subject.id)?;
                    info!(subject_id = %subject.id, "date-bound subject completed");
                }
            }
        }
        Ok(updated)
    }

    // --- queries -----------------------------------------------------------

    pub fn subject(&self, owner: OwnerId, id: SubjectId) -> Result<Subject> {
        self.owned_subject(owner, id)
    }

    pub fn list_subjects(&self, owner: OwnerId, include_finished: bool) -> Result<Vec<Subject>> {
        Ok(self.store.list_subjects(owner, include_finished)?)
    }

    pub fn list_reminders(
        &self,
        owner: OwnerId,
        status: Option<ReminderStatus>,
        limit: usize,
    ) -> Result<Vec<Reminder>> {
        Ok(self.store.list_reminders(owner, status, limit)?)
    }

    pub fn stats(&self, owner: OwnerId, since: Option<DateTime<Utc>>) -> Result<OwnerStats> {
        Ok(self.store.stats(owner, since)?)
    }

    // --- shared with the sweep ---------------------------------------------

    /// Create and register any upcoming occurrence of `subject` that has no
    /// reminder yet. Returns the newly created reminders.
    pub fn ensure_occurrences(&self, subject: &Subject) -> Result<Vec<Reminder>> {
        let now = self.now();
        let occurrences = time::occurrences(
            &subject.schedule,
            subject.timezone,
            now,
            self.settings.analysis_lead_minutes,
        )?;
        let created = self.store.insert_occurrences(subject, &occurrences, now)?;
        self.register_all(&created);
        Ok(created)
    }

    /// Register jobs for `reminders`, logging failures for the sweep to repair.
    pub(crate) fn register_all(&self, reminders: &[Reminder]) -> usize {
        reminders
            .iter()
            .filter(|r| match self.register(r) {
                Ok(()) => true,
                Err(e) => {
                    warn!(reminder_id = %r.id, error = %e, "job registration failed, sweep will retry");
                    false
                }
            })
            .count()
    }

    pub(crate) fn register(&self, reminder: &Reminder) -> Result<()> {
        let payload = json!({
            "reminder_id": reminder.id,
            "owner_id": reminder.owner_id,
        });
        self.scheduler
            .schedule(job_key(reminder), reminder.scheduled_time, &payload)?;
        Ok(())
    }

    pub(crate) fn unregister(&self, reminder: &Reminder) {
        if let Err(e) = self.scheduler.cancel(job_key(reminder)) {
            warn!(reminder_id = %reminder.id, error = %e, "job cancel failed, sweep will retry");
        }
    }

    /// Cancel a subject's pending reminders and their jobs. Returns how many.
    fn cancel_pending(&self, id: SubjectId) -> Result<usize> {
        let cancelled = self.store.cancel_pending_for_subject(id, self.now())?;
        for r in &cancelled {
            self.unregister(r);
        }
        debug!(subject_id = %id, count = cancelled.len(), "pending reminders cancelled");
        Ok(cancelled.len())
    }

    fn owned_subject(&self, owner: OwnerId, id: SubjectId) -> Result<Subject> {
        let subject = self.store.get_subject(id)?;
        if subject.owner_id != owner {
            return Err(ServiceError::SubjectNotOwned {
                subject_id: id,
                owner_id: owner,
            });
        }
        Ok(subject)
    }

    fn owned_live_subject(&self, owner: OwnerId, id: SubjectId) -> Result<Subject> {
        let subject = self.owned_subject(owner, id)?;
        if subject.status.is_terminal() {
            return Err(ServiceError::SubjectFinished(id, subject.status));
        }
        Ok(subject)
    }
}

pub fn job_key(reminder: &Reminder) -> JobKey {
    JobKey::new(reminder.subject_kind, reminder.id)
}
