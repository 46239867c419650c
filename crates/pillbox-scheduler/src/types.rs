use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use pillbox_core::{ReminderId, SubjectKind};
use serde::{Deserialize, Serialize};

use crate::error::SchedulerError;

/// Identity of a queued trigger: one per pending reminder.
///
/// Rendered as `{kind}_{reminder_id}`, e.g. `medicine_42`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobKey {
    pub kind: SubjectKind,
    pub reminder_id: ReminderId,
}

impl JobKey {
    pub fn new(kind: SubjectKind, reminder_id: ReminderId) -> Self {
        Self { kind, reminder_id }
    }
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.kind, self.reminder_id)
    }
}

impl FromStr for JobKey {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || SchedulerError::InvalidKey(s.to_string());
        let (kind, id) = s.split_once('_').ok_or_else(invalid)?;
        Ok(Self {
            kind: kind.parse().map_err(|_| invalid())?,
            reminder_id: ReminderId(id.parse().map_err(|_| invalid())?),
        })
    }
}

/// A persisted job record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub key: JobKey,
    /// Absolute UTC fire instant.
    pub run_at: DateTime<Utc>,
    /// Opaque JSON forwarded to the consumer of fired jobs.
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A job handed to the dispatcher at fire time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FiredJob {
    pub key: JobKey,
    pub run_at: DateTime<Utc>,
    pub fired_at: DateTime<Utc>,
    pub payload: serde_json::Value,
}

/// Result of claiming every due job in one poll.
#[derive(Debug, Default)]
pub struct DueJobs {
    /// Within the misfire grace window; to be executed exactly once.
    pub fired: Vec<FiredJob>,
    /// Older than the grace window; dropped without execution.
    pub misfired: Vec<Job>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_text_form() {
        let key = JobKey::new(SubjectKind::Analysis, ReminderId(17));
        assert_eq!(key.to_string(), "analysis_17");
        assert_eq!("analysis_17".parse::<JobKey>().unwrap(), key);
        for bad in ["analysis", "pill_3", "medicine_x", "_4"] {
            assert!(bad.parse::<JobKey>().is_err(), "accepted {bad}");
        }
    }
}
