//! `pillbox-core`: domain types shared by every pillbox crate.
//!
//! Holds the Subject/Reminder model with its explicit status transition
//! table, local-time resolution ([`time`]), the injectable [`clock::Clock`],
//! and the figment-backed configuration.

pub mod clock;
pub mod config;
pub mod error;
pub mod time;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::PillboxConfig;
pub use error::{CoreError, Result};
pub use time::{LocalTime, Occurrence, TimeResolutionError};
pub use types::{
    NewSubject, OwnerId, Reminder, ReminderId, ReminderStatus, ResponseAction, Schedule, Subject,
    SubjectId, SubjectKind, SubjectStatus, SubjectUpdate,
};
