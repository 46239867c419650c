//! `pillbox-store`: durable Subjects and Reminders on SQLite.
//!
//! The [`ReminderStore`] owns both tables and enforces the reminder state
//! machine: every status change goes through [`ReminderStore::transition`],
//! which consults the transition table in `pillbox-core` and writes with a
//! compare-and-set so concurrent writers on one reminder serialize.

pub mod db;
pub mod error;
pub mod stats;
pub mod store;

pub use error::{Result, StoreError};
pub use stats::{OwnerStats, ReminderCounts};
pub use store::{ReminderStore, Transition, OVERDUE};
