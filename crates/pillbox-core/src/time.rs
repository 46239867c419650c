//! Local wall-clock → UTC resolution.
//!
//! Subjects describe their schedule in the owner's local time ("08:00" in
//! `Europe/Moscow`); reminders are always stored as UTC instants. Everything
//! that crosses that boundary goes through this module.
//!
//! # DST policy
//!
//! | Local time              | Resolution                                          |
//! |-------------------------|-----------------------------------------------------|
//! | unambiguous             | the single matching instant                         |
//! | ambiguous (fall-back)   | the earliest of the two instants                    |
//! | nonexistent (gap)       | shifted forward by the gap length (02:30 → 03:30)   |

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, LocalResult, NaiveDate, NaiveDateTime, Offset, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::Schedule;

/// Errors raised when a local time specification cannot be turned into an instant.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TimeResolutionError {
    #[error("invalid local time '{0}': expected HH:MM")]
    InvalidFormat(String),

    #[error("unknown timezone '{0}'")]
    UnknownZone(String),

    #[error("cannot resolve {date} {time} in {zone}")]
    Unresolvable {
        date: NaiveDate,
        time: LocalTime,
        zone: Tz,
    },
}

pub type Result<T> = std::result::Result<T, TimeResolutionError>;

/// A validated local wall-clock time of day with minute precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct LocalTime {
    hour: u8,
    minute: u8,
}

impl LocalTime {
    pub fn new(hour: u8, minute: u8) -> Result<Self> {
        if hour > 23 || minute > 59 {
            return Err(TimeResolutionError::InvalidFormat(format!(
                "{hour}:{minute:02}"
            )));
        }
        Ok(Self { hour, minute })
    }

    pub fn hour(&self) -> u8 {
        self.hour
    }

    pub fn minute(&self) -> u8 {
        self.minute
    }

    fn on(&self, date: NaiveDate) -> Option<NaiveDateTime> {
        date.and_hms_opt(self.hour as u32, self.minute as u32, 0)
    }
}

impl fmt::Display for LocalTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

impl FromStr for LocalTime {
    type Err = TimeResolutionError;

    /// Accepts `H:MM` and `HH:MM`; minutes must be two digits.
    fn from_str(s: &str) -> Result<Self> {
        let invalid = || TimeResolutionError::InvalidFormat(s.to_string());
        let (h, m) = s.trim().split_once(':').ok_or_else(invalid)?;
        let digits = |part: &str| !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit());
        if !digits(h) || h.len() > 2 || !digits(m) || m.len() != 2 {
            return Err(invalid());
        }
        let hour: u8 = h.parse().map_err(|_| invalid())?;
        let minute: u8 = m.parse().map_err(|_| invalid())?;
        Self::new(hour, minute).map_err(|_| invalid())
    }
}

impl TryFrom<String> for LocalTime {
    type Error = TimeResolutionError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<LocalTime> for String {
    fn from(t: LocalTime) -> Self {
        t.to_string()
    }
}

/// Parse an IANA zone name such as `"Europe/Moscow"`.
pub fn parse_zone(name: &str) -> Result<Tz> {
    name.trim()
        .parse::<Tz>()
        .map_err(|_| TimeResolutionError::UnknownZone(name.to_string()))
}

/// Map a naive local date-time in `zone` to UTC using the module's DST policy.
pub fn resolve_local(date: NaiveDate, time: LocalTime, zone: Tz) -> Result<DateTime<Utc>> {
    let unresolvable = || TimeResolutionError::Unresolvable { date, time, zone };
    let naive = time.on(date).ok_or_else(unresolvable)?;

    match zone.from_local_datetime(&naive) {
        LocalResult::Single(dt) => Ok(dt.with_timezone(&Utc)),
        LocalResult::Ambiguous(a, b) => Ok(a.min(b).with_timezone(&Utc)),
        LocalResult::None => {
            // Inside a spring-forward gap: apply the offset in force before the
            // transition, which lands the same distance past the gap's end.
            let before = naive - Duration::days(1);
            let offset = zone.offset_from_utc_datetime(&before).fix();
            let utc = naive - Duration::seconds(offset.local_minus_utc() as i64);
            Ok(Utc.from_utc_datetime(&utc))
        }
    }
}

/// Next instant ≥ `reference` at which the local clock in `zone` reads `time`.
///
/// Combines `time` with the reference's local date; if that already lies in
/// the past, rolls forward one day.
pub fn next_daily(time: LocalTime, zone: Tz, reference: DateTime<Utc>) -> Result<DateTime<Utc>> {
    let local_date = reference.with_timezone(&zone).date_naive();
    let candidate = resolve_local(local_date, time, zone)?;
    if candidate >= reference {
        return Ok(candidate);
    }
    let tomorrow = local_date
        .succ_opt()
        .ok_or(TimeResolutionError::Unresolvable {
            date: local_date,
            time,
            zone,
        })?;
    resolve_local(tomorrow, time, zone)
}

/// Combine an explicit date and time. Date-bound schedules never roll forward.
pub fn on_date(date: NaiveDate, time: LocalTime, zone: Tz) -> Result<DateTime<Utc>> {
    resolve_local(date, time, zone)
}

/// One reminder instant produced by a schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Occurrence {
    pub at: DateTime<Utc>,
    /// Set on advance reminders: the dose or appointment they announce.
    pub due_at: Option<DateTime<Utc>>,
}

impl Occurrence {
    pub fn on_time(at: DateTime<Utc>) -> Self {
        Self { at, due_at: None }
    }

    pub fn advance(at: DateTime<Utc>, due_at: DateTime<Utc>) -> Self {
        Self {
            at,
            due_at: Some(due_at),
        }
    }
}

/// Every reminder instant a schedule produces after `reference`.
///
/// - `Daily`: for each time, the next on-time instant, plus an advance
///   instant `lead_minutes` earlier when that is still in the future.
/// - `Once`: the instant `lead_minutes` (or `default_once_lead` when unset)
///   before the appointment; falls back to the appointment itself when the
///   advance instant has passed, and to nothing when both have.
///
/// The result is sorted by instant with one entry per instant. When an
/// advance reminder lands on another time's on-time instant, the on-time
/// one wins.
pub fn occurrences(
    schedule: &Schedule,
    zone: Tz,
    reference: DateTime<Utc>,
    default_once_lead: u32,
) -> Result<Vec<Occurrence>> {
    let mut out = Vec::new();
    match schedule {
        Schedule::Daily {
            times,
            lead_minutes,
        } => {
            for time in times {
                let on_time = next_daily(*time, zone, reference)?;
                out.push(Occurrence::on_time(on_time));
                if let Some(lead) = lead_minutes.filter(|l| *l > 0) {
                    let advance = on_time - Duration::minutes(lead as i64);
                    if advance > reference {
                        out.push(Occurrence::advance(advance, on_time));
                    }
                }
            }
        }
        Schedule::Once {
            date,
            time,
            lead_minutes,
        } => {
            let at = on_date(*date, *time, zone)?;
            let lead = lead_minutes.unwrap_or(default_once_lead);
            let advance = at - Duration::minutes(lead as i64);
            if advance > reference && advance < at {
                out.push(Occurrence::advance(advance, at));
            } else if at > reference {
                out.push(Occurrence::on_time(at));
            }
        }
    }
    out.sort_by_key(|o| (o.at, o.due_at.is_some()));
    out.dedup_by_key(|o| o.at);
    Ok(out)
}
