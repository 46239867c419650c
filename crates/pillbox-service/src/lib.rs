//! `pillbox-service`: the reminder lifecycle engine.
//!
//! [`ReminderService`] is constructed once and injected wherever Subject
//! mutations or owner feedback arrive. [`ReconciliationSweep`] periodically
//! repairs drift between the store and the job queue, and [`Dispatcher`]
//! turns fired jobs into concurrent delivery tasks.

pub mod dispatch;
pub mod error;
pub mod service;
pub mod sweep;

pub use dispatch::Dispatcher;
pub use error::{Result, ServiceError};
pub use pillbox_store::OwnerStats;
pub use service::{job_key, ReminderService, ServiceSettings};
pub use sweep::{ReconciliationSweep, SchedulingDrift, SweepReport};
