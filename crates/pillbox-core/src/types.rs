use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::time::{self, LocalTime};

/// Maximum accepted subject name length (characters).
pub const MAX_NAME_CHARS: usize = 200;
/// Upper bound on daily times per subject.
pub const MAX_DAILY_TIMES: usize = 24;
/// Longest lead time a reminder may be sent ahead of its occurrence.
pub const MAX_LEAD_MINUTES: u32 = 7 * 24 * 60;
/// Accepted range for owner postponements.
pub const POSTPONE_DAYS: std::ops::RangeInclusive<u32> = 1..=365;

macro_rules! id_type {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(v: i64) -> Self {
                Self(v)
            }
        }
    };
}

id_type!(
    /// Messaging-platform identity of the single owner of a schedule.
    OwnerId
);
id_type!(
    /// Row id of a Subject.
    SubjectId
);
id_type!(
    /// Row id of a Reminder.
    ReminderId
);

/// What is being tracked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubjectKind {
    /// A medicine course taken at one or more local times every day.
    Medicine,
    /// A lab test / analysis booked for a specific date and time.
    Analysis,
}

impl SubjectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubjectKind::Medicine => "medicine",
            SubjectKind::Analysis => "analysis",
        }
    }
}

impl fmt::Display for SubjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubjectKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "medicine" => Ok(SubjectKind::Medicine),
            "analysis" => Ok(SubjectKind::Analysis),
            other => Err(format!("unknown subject kind: {other}")),
        }
    }
}

/// Lifecycle state of a Subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubjectStatus {
    Active,
    /// Delivery suppressed until `pause_until`.
    Paused,
    Cancelled,
    Completed,
    Deleted,
}

impl SubjectStatus {
    /// Terminal subjects never produce another notification.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SubjectStatus::Cancelled | SubjectStatus::Completed | SubjectStatus::Deleted
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SubjectStatus::Active => "active",
            SubjectStatus::Paused => "paused",
            SubjectStatus::Cancelled => "cancelled",
            SubjectStatus::Completed => "completed",
            SubjectStatus::Deleted => "deleted",
        }
    }
}

impl fmt::Display for SubjectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubjectStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "active" => Ok(SubjectStatus::Active),
            "paused" => Ok(SubjectStatus::Paused),
            "cancelled" => Ok(SubjectStatus::Cancelled),
            "completed" => Ok(SubjectStatus::Completed),
            "deleted" => Ok(SubjectStatus::Deleted),
            other => Err(format!("unknown subject status: {other}")),
        }
    }
}

/// Lifecycle state of a single Reminder occurrence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReminderStatus {
    /// Waiting for its scheduled instant; the only state with a live job.
    Pending,
    /// Delivered; awaiting owner feedback.
    Sent,
    Completed,
    Skipped,
    /// Parked until `postponed_until`, then returned to `Pending` by the sweep.
    Postponed,
    Cancelled,
    Failed,
}

impl ReminderStatus {
    pub const ALL: [ReminderStatus; 7] = [
        ReminderStatus::Pending,
        ReminderStatus::Sent,
        ReminderStatus::Completed,
        ReminderStatus::Skipped,
        ReminderStatus::Postponed,
        ReminderStatus::Cancelled,
        ReminderStatus::Failed,
    ];

    /// The transition table. Anything not listed here is illegal.
    pub fn allowed_next(&self) -> &'static [ReminderStatus] {
        use ReminderStatus::*;
        match self {
            Pending => &[Sent, Cancelled, Postponed, Failed],
            Sent => &[Completed, Skipped, Postponed],
            Postponed => &[Pending],
            Completed | Skipped | Cancelled | Failed => &[],
        }
    }

    pub fn can_transition_to(&self, next: ReminderStatus) -> bool {
        self.allowed_next().contains(&next)
    }

    pub fn is_terminal(&self) -> bool {
        self.allowed_next().is_empty()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReminderStatus::Pending => "pending",
            ReminderStatus::Sent => "sent",
            ReminderStatus::Completed => "completed",
            ReminderStatus::Skipped => "skipped",
            ReminderStatus::Postponed => "postponed",
            ReminderStatus::Cancelled => "cancelled",
            ReminderStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for ReminderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReminderStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        ReminderStatus::ALL
            .into_iter()
            .find(|st| st.as_str() == s)
            .ok_or_else(|| format!("unknown reminder status: {s}"))
    }
}

/// When a Subject's occurrences happen, in the owner's local time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Schedule {
    /// Every day at each of `times`.
    Daily {
        times: Vec<LocalTime>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        lead_minutes: Option<u32>,
    },
    /// Once, on `date` at `time`.
    Once {
        date: NaiveDate,
        time: LocalTime,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        lead_minutes: Option<u32>,
    },
}

impl Schedule {
    pub fn daily(times: Vec<LocalTime>) -> Self {
        Schedule::Daily {
            times,
            lead_minutes: None,
        }
    }

    pub fn once(date: NaiveDate, time: LocalTime) -> Self {
        Schedule::Once {
            date,
            time,
            lead_minutes: None,
        }
    }

    /// Date-bound schedules have exactly one occurrence.
    pub fn is_date_bound(&self) -> bool {
        matches!(self, Schedule::Once { .. })
    }

    pub fn lead_minutes(&self) -> Option<u32> {
        match self {
            Schedule::Daily { lead_minutes, .. } | Schedule::Once { lead_minutes, .. } => {
                *lead_minutes
            }
        }
    }

    /// Sort and de-duplicate daily times and check bounds.
    fn normalized(self) -> Result<Self> {
        if self.lead_minutes().is_some_and(|l| l > MAX_LEAD_MINUTES) {
            return Err(CoreError::InvalidSubject(format!(
                "lead time exceeds {MAX_LEAD_MINUTES} minutes"
            )));
        }
        match self {
            Schedule::Daily {
                mut times,
                lead_minutes,
            } => {
                times.sort();
                times.dedup();
                if times.is_empty() {
                    return Err(CoreError::InvalidSubject(
                        "daily schedule needs at least one time".into(),
                    ));
                }
                if times.len() > MAX_DAILY_TIMES {
                    return Err(CoreError::InvalidSubject(format!(
                        "at most {MAX_DAILY_TIMES} daily times are allowed"
                    )));
                }
                Ok(Schedule::Daily {
                    times,
                    lead_minutes,
                })
            }
            once => Ok(once),
        }
    }
}

/// A tracked medicine course or lab test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subject {
    pub id: SubjectId,
    pub owner_id: OwnerId,
    pub kind: SubjectKind,
    pub name: String,
    pub schedule: Schedule,
    pub status: SubjectStatus,
    pub pause_until: Option<DateTime<Utc>>,
    pub timezone: Tz,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Subject {
    /// True while a pause is in force at `now`.
    ///
    /// A pause whose expiry has passed no longer suppresses delivery even if
    /// the sweep has not cleared it yet.
    pub fn is_paused_at(&self, now: DateTime<Utc>) -> bool {
        self.status == SubjectStatus::Paused && self.pause_until.is_some_and(|until| until > now)
    }
}

/// One scheduled notification occurrence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reminder {
    pub id: ReminderId,
    pub owner_id: OwnerId,
    pub subject_kind: SubjectKind,
    /// Weak reference; the Subject may be gone or terminal.
    pub subject_id: SubjectId,
    pub scheduled_time: DateTime<Utc>,
    /// The dose or appointment an advance reminder announces; `None` for
    /// on-time reminders.
    #[serde(default)]
    pub due_at: Option<DateTime<Utc>>,
    /// Display only; `scheduled_time` is authoritative.
    pub timezone: Tz,
    pub status: ReminderStatus,
    pub retry_count: u32,
    pub last_error: Option<String>,
    pub postponed_until: Option<DateTime<Utc>>,
    pub postponed_days: Option<u32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Reminder {
    pub fn local_time(&self) -> DateTime<Tz> {
        self.scheduled_time.with_timezone(&self.timezone)
    }
}

/// A fully validated Subject awaiting persistence.
///
/// Front-ends gather fields however they like (multi-step dialogs, forms) and
/// hand them over in one [`NewSubject::new`] call once everything is known.
#[derive(Debug, Clone, PartialEq)]
pub struct NewSubject {
    pub owner_id: OwnerId,
    pub kind: SubjectKind,
    pub name: String,
    pub schedule: Schedule,
    pub timezone: Tz,
    pub notes: Option<String>,
}

impl NewSubject {
    pub fn new(
        owner_id: OwnerId,
        kind: SubjectKind,
        name: &str,
        schedule: Schedule,
        timezone: &str,
    ) -> Result<Self> {
        Ok(Self {
            owner_id,
            kind,
            name: validate_name(name)?,
            schedule: schedule.normalized()?,
            timezone: time::parse_zone(timezone)?,
            notes: None,
        })
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        let notes = notes.into();
        self.notes = (!notes.trim().is_empty()).then_some(notes);
        self
    }
}

/// Partial update applied by `on_subject_updated`. `None` leaves a field alone.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubjectUpdate {
    pub name: Option<String>,
    pub schedule: Option<Schedule>,
    pub timezone: Option<Tz>,
    pub notes: Option<String>,
}

impl SubjectUpdate {
    pub fn name(mut self, name: &str) -> Result<Self> {
        self.name = Some(validate_name(name)?);
        Ok(self)
    }

    pub fn schedule(mut self, schedule: Schedule) -> Result<Self> {
        self.schedule = Some(schedule.normalized()?);
        Ok(self)
    }

    pub fn timezone(mut self, zone: &str) -> Result<Self> {
        self.timezone = Some(time::parse_zone(zone)?);
        Ok(self)
    }

    pub fn notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    /// Whether applying this update changes when occurrences happen.
    pub fn reschedules(&self) -> bool {
        self.schedule.is_some() || self.timezone.is_some()
    }
}

fn validate_name(name: &str) -> Result<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(CoreError::InvalidSubject("name must not be empty".into()));
    }
    if name.chars().count() > MAX_NAME_CHARS {
        return Err(CoreError::InvalidSubject(format!(
            "name exceeds {MAX_NAME_CHARS} characters"
        )));
    }
    Ok(name.to_string())
}

/// Owner feedback on a delivered reminder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ResponseAction {
    Take,
    Skip,
    Postpone { days: u32 },
}

impl ResponseAction {
    /// Reject postponements outside [`POSTPONE_DAYS`].
    pub fn validate(self) -> Result<Self> {
        match self {
            ResponseAction::Postpone { days } if !POSTPONE_DAYS.contains(&days) => {
                Err(CoreError::InvalidAction(format!(
                    "postpone must be between {} and {} days, got {days}",
                    POSTPONE_DAYS.start(),
                    POSTPONE_DAYS.end()
                )))
            }
            other => Ok(other),
        }
    }

    /// The reminder status this action moves a `Sent` reminder to.
    pub fn target_status(&self) -> ReminderStatus {
        match self {
            ResponseAction::Take => ReminderStatus::Completed,
            ResponseAction::Skip => ReminderStatus::Skipped,
            ResponseAction::Postpone { .. } => ReminderStatus::Postponed,
        }
    }
}

/// Compact text form used in button payloads: `take`, `skip`, `postpone:3`.
impl fmt::Display for ResponseAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseAction::Take => f.write_str("take"),
            ResponseAction::Skip => f.write_str("skip"),
            ResponseAction::Postpone { days } => write!(f, "postpone:{days}"),
        }
    }
}

impl FromStr for ResponseAction {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        let action = match s.split_once(':') {
            None if s == "take" => ResponseAction::Take,
            None if s == "skip" => ResponseAction::Skip,
            Some(("postpone", days)) => ResponseAction::Postpone {
                days: days
                    .parse()
                    .map_err(|_| CoreError::InvalidAction(s.to_string()))?,
            },
            _ => return Err(CoreError::InvalidAction(s.to_string())),
        };
        action.validate()
    }
}
