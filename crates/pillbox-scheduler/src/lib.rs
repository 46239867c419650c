//! `pillbox-scheduler`: durable one-shot reminder triggers on SQLite.
//!
//! # Overview
//!
//! Each pending reminder owns at most one row in the `jobs` table, keyed by
//! [`JobKey`] (`medicine_42`). The [`engine::SchedulerEngine`] polls the table
//! and claims due jobs in a single transaction, so a job fires at most once
//! even across restarts. Registrations are plain rows: a job queued before a
//! crash is still there when the process comes back.
//!
//! # Misfires
//!
//! | Job lateness at poll time | Outcome                                   |
//! |---------------------------|-------------------------------------------|
//! | ≤ grace window            | fired once (late triggers coalesce)       |
//! | > grace window            | dropped; the sweep fails the reminder     |

pub mod db;
pub mod engine;
pub mod error;
pub mod types;

pub use engine::{SchedulerEngine, SchedulerHandle};
pub use error::{Result, SchedulerError};
pub use types::{DueJobs, FiredJob, Job, JobKey};
