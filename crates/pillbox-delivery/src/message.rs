//! Notification text composition.

use pillbox_core::{
    OwnerId, Reminder, ReminderId, ResponseAction, Schedule, Subject, SubjectKind,
};
use serde::Serialize;

/// Days offered by the postpone button on every notification.
pub const DEFAULT_POSTPONE_DAYS: u32 = 1;

/// A rendered reminder, independent of any chat protocol.
///
/// Front-ends decide markup: [`Notification::plain_text`] gives the
/// unformatted rendering, and `headline` is meant to be emphasised.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub reminder_id: ReminderId,
    pub owner_id: OwnerId,
    pub subject_kind: SubjectKind,
    pub headline: String,
    pub subject_name: String,
    pub details: Vec<String>,
    /// Buttons to offer, in display order.
    pub actions: Vec<ResponseAction>,
}

impl Notification {
    pub fn plain_text(&self) -> String {
        let mut text = format!("{}\n\n{}", self.headline, self.subject_name);
        for line in &self.details {
            text.push('\n');
            text.push_str(line);
        }
        text
    }
}

/// Build the notification for one reminder of `subject`.
pub fn compose(subject: &Subject, reminder: &Reminder) -> Notification {
    let local = reminder.local_time();
    let mut details = Vec::new();

    let headline = match (&subject.kind, &subject.schedule) {
        (SubjectKind::Analysis, Schedule::Once { date, time, .. }) => {
            details.push(format!("📅 {} at {}", date.format("%d.%m.%Y"), time));
            "🩺 Analysis reminder!".to_string()
        }
        (SubjectKind::Analysis, _) => {
            details.push(format!("📅 {}", local.format("%d.%m.%Y %H:%M")));
            "🩺 Analysis reminder!".to_string()
        }
        // A pause can push an advance reminder up to or past its dose.
        (SubjectKind::Medicine, _) => match reminder
            .due_at
            .filter(|due| *due > reminder.scheduled_time)
        {
            Some(due) => {
                let minutes = (due - reminder.scheduled_time).num_minutes();
                let due_local = due.with_timezone(&reminder.timezone);
                details.push(format!("⏰ Due at {}", due_local.format("%H:%M")));
                format!("⏳ Medicine in {minutes} minutes")
            }
            None => "💊 Time to take your medicine!".to_string(),
        },
    };

    if let Some(notes) = &subject.notes {
        details.push(format!("📝 Notes: {notes}"));
    }

    Notification {
        reminder_id: reminder.id,
        owner_id: reminder.owner_id,
        subject_kind: subject.kind,
        headline,
        subject_name: subject.name.clone(),
        details,
        actions: vec![
            ResponseAction::Take,
            ResponseAction::Skip,
            ResponseAction::Postpone {
                days: DEFAULT_POSTPONE_DAYS,
            },
        ],
    }
}
