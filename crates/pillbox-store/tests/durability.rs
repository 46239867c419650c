//! Reminders and subjects survive a process restart on a real database file.

use chrono::{Duration, TimeZone, Utc};
use pillbox_core::{LocalTime, NewSubject, OwnerId, ReminderStatus, Schedule, SubjectKind};
use pillbox_store::{ReminderStore, Transition};
use rusqlite::Connection;

#[test]
fn state_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pillbox.db");
    let now = Utc.with_ymd_and_hms(2024, 5, 1, 6, 0, 0).unwrap();

    let (subject_id, reminder_id) = {
        let store = ReminderStore::new(Connection::open(&path).unwrap()).unwrap();
        let new = NewSubject::new(
            OwnerId(9),
            SubjectKind::Analysis,
            "Blood panel",
            Schedule::once(
                chrono::NaiveDate::from_ymd_opt(2024, 5, 3).unwrap(),
                "10:30".parse::<LocalTime>().unwrap(),
            ),
            "Europe/Berlin",
        )
        .unwrap()
        .with_notes("fasting");
        let s = store.insert_subject(&new, now).unwrap();
        let r = store
            .insert_reminders(&s, &[now + Duration::hours(1)], now)
            .unwrap()
            .remove(0);
        store
            .transition(
                r.id,
                ReminderStatus::Pending,
                Transition::to(ReminderStatus::Sent).counting_attempt(),
                now,
            )
            .unwrap();
        (s.id, r.id)
    };

    let store = ReminderStore::new(Connection::open(&path).unwrap()).unwrap();
    let subject = store.get_subject(subject_id).unwrap();
    assert_eq!(subject.name, "Blood panel");
    assert_eq!(subject.notes.as_deref(), Some("fasting"));
    assert_eq!(subject.timezone, chrono_tz::Europe::Berlin);
    assert!(subject.schedule.is_date_bound());

    let reminder = store.get_reminder(reminder_id).unwrap();
    assert_eq!(reminder.status, ReminderStatus::Sent);
    assert_eq!(reminder.retry_count, 1);
    assert_eq!(reminder.scheduled_time, now + Duration::hours(1));
}
