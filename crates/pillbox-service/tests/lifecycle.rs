mod common;

use chrono::NaiveDate;
use common::{utc, Harness, OWNER};
use pillbox_core::{
    OwnerId, ReminderStatus, Schedule, SubjectStatus, SubjectUpdate,
};
use pillbox_service::{job_key, ServiceError};

#[test]
fn created_medicine_gets_reminders_and_jobs() {
    let h = Harness::new(utc(2024, 1, 1, 6, 0));
    let subject = h.medicine(&["08:00", "20:00"]);

    let reminders = h.store.reminders_for_subject(subject.id).unwrap();
    let mut times: Vec<_> = reminders.iter().map(|r| r.scheduled_time).collect();
    times.sort();
    assert_eq!(times, vec![utc(2024, 1, 1, 8, 0), utc(2024, 1, 1, 20, 0)]);
    assert!(reminders.iter().all(|r| r.status == ReminderStatus::Pending));

    let keys = h.job_keys();
    assert_eq!(keys.len(), 2);
    for r in &reminders {
        assert!(keys.contains(&job_key(r)));
        let job = h.jobs.get(job_key(r)).unwrap().unwrap();
        assert_eq!(job.run_at, r.scheduled_time);
    }
}

#[test]
fn analysis_uses_default_lead() {
    let h = Harness::new(utc(2024, 1, 1, 6, 0));
    let subject = h.analysis(NaiveDate::from_ymd_opt(2024, 1, 3).unwrap(), "10:00");

    let reminders = h.store.reminders_for_subject(subject.id).unwrap();
    assert_eq!(reminders.len(), 1);
    assert_eq!(reminders[0].scheduled_time, utc(2024, 1, 3, 8, 0));
}

#[test]
fn past_analysis_produces_no_reminders() {
    let h = Harness::new(utc(2024, 1, 5, 6, 0));
    let new = pillbox_core::NewSubject::new(
        OWNER,
        pillbox_core::SubjectKind::Analysis,
        "Glucose",
        Schedule::once(NaiveDate::from_ymd_opt(2024, 1, 3).unwrap(), "10:00".parse().unwrap()),
        "UTC",
    )
    .unwrap();

    let subject = h.service.on_subject_created(new).unwrap();
    assert!(h.store.reminders_for_subject(subject.id).unwrap().is_empty());
    assert!(h.job_keys().is_empty());
}

#[test]
fn cancel_cascades_to_pending_reminders_and_jobs() {
    let h = Harness::new(utc(2024, 1, 1, 6, 0));
    let subject = h.medicine(&["08:00", "20:00"]);

    let cancelled = h.service.on_subject_cancelled(OWNER, subject.id).unwrap();
    assert_eq!(cancelled.status, SubjectStatus::Cancelled);
    assert!(h
        .store
        .reminders_for_subject(subject.id)
        .unwrap()
        .iter()
        .all(|r| r.status == ReminderStatus::Cancelled));
    assert!(h.job_keys().is_empty());

    let err = h
        .service
        .on_subject_paused(OWNER, subject.id, utc(2024, 1, 2, 0, 0))
        .unwrap_err();
    assert!(matches!(err, ServiceError::SubjectFinished(_, SubjectStatus::Cancelled)));
    assert_eq!(err.code(), "SUBJECT_FINISHED");
}

#[test]
fn delete_is_terminal_too() {
    let h = Harness::new(utc(2024, 1, 1, 6, 0));
    let subject = h.medicine(&["08:00"]);

    h.service.on_subject_deleted(OWNER, subject.id).unwrap();
    assert!(h.job_keys().is_empty());
    assert!(h.service.list_subjects(OWNER, false).unwrap().is_empty());
    assert_eq!(h.service.list_subjects(OWNER, true).unwrap().len(), 1);
}

#[test]
fn schedule_edit_replaces_pending_reminders() {
    let h = Harness::new(utc(2024, 1, 1, 6, 0));
    let subject = h.medicine(&["08:00"]);
    let old = h.store.reminders_for_subject(subject.id).unwrap().remove(0);

    let update = SubjectUpdate::default()
        .schedule(Schedule::daily(vec!["09:30".parse().unwrap()]))
        .unwrap();
    h.service
        .on_subject_updated(OWNER, subject.id, update)
        .unwrap();

    let old = h.store.get_reminder(old.id).unwrap();
    assert_eq!(old.status, ReminderStatus::Cancelled);

    let pending = h
        .store
        .reminders_for_subject(subject.id)
        .unwrap()
        .into_iter()
        .filter(|r| r.status == ReminderStatus::Pending)
        .collect::<Vec<_>>();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].scheduled_time, utc(2024, 1, 1, 9, 30));
    assert_eq!(
        h.job_keys().into_iter().collect::<Vec<_>>(),
        vec![job_key(&pending[0])]
    );
}

#[test]
fn rename_keeps_reminders() {
    let h = Harness::new(utc(2024, 1, 1, 6, 0));
    let subject = h.medicine(&["08:00"]);
    let before = h.store.reminders_for_subject(subject.id).unwrap();

    let update = SubjectUpdate::default().name("Euthyrox").unwrap();
    let renamed = h
        .service
        .on_subject_updated(OWNER, subject.id, update)
        .unwrap();
    assert_eq!(renamed.name, "Euthyrox");
    assert_eq!(h.store.reminders_for_subject(subject.id).unwrap(), before);
}

#[test]
fn other_owner_cannot_touch_subject() {
    let h = Harness::new(utc(2024, 1, 1, 6, 0));
    let subject = h.medicine(&["08:00"]);

    let err = h
        .service
        .on_subject_cancelled(OwnerId(7), subject.id)
        .unwrap_err();
    assert!(matches!(err, ServiceError::SubjectNotOwned { .. }));
    assert_eq!(err.code(), "FORBIDDEN");
    assert_eq!(h.job_keys().len(), 1);
}

#[test]
fn pause_must_end_in_the_future() {
    let h = Harness::new(utc(2024, 1, 1, 6, 0));
    let subject = h.medicine(&["08:00"]);

    let err = h
        .service
        .on_subject_paused(OWNER, subject.id, utc(2024, 1, 1, 5, 0))
        .unwrap_err();
    assert_eq!(err.code(), "INVALID_INPUT");
}

#[test]
fn pause_then_resume() {
    let h = Harness::new(utc(2024, 1, 1, 6, 0));
    let subject = h.medicine(&["08:00"]);

    let paused = h
        .service
        .on_subject_paused(OWNER, subject.id, utc(2024, 1, 3, 0, 0))
        .unwrap();
    assert_eq!(paused.status, SubjectStatus::Paused);
    assert_eq!(paused.pause_until, Some(utc(2024, 1, 3, 0, 0)));
    // pending reminders stay queued while paused
    assert_eq!(h.job_keys().len(), 1);

    let resumed = h.service.on_subject_resumed(OWNER, subject.id).unwrap();
    assert_eq!(resumed.status, SubjectStatus::Active);
    assert_eq!(resumed.pause_until, None);
    assert_eq!(h.store.reminders_for_subject(subject.id).unwrap().len(), 1);
}

#[test]
fn unknown_subject_is_not_found() {
    let h = Harness::new(utc(2024, 1, 1, 6, 0));
    let err = h
        .service
        .subject(OWNER, pillbox_core::SubjectId(404))
        .unwrap_err();
    assert_eq!(err.code(), "NOT_FOUND");
}
