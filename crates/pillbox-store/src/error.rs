use pillbox_core::{ReminderId, ReminderStatus, SubjectId};
use thiserror::Error;

/// Errors raised by the reminder store.
///
/// A failed write leaves the row untouched; callers may retry or leave the
/// repair to the next sweep.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A SQLite operation failed.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("subject not found: {0}")]
    SubjectNotFound(SubjectId),

    #[error("reminder not found: {0}")]
    ReminderNotFound(ReminderId),

    /// The requested status change is not in the transition table, or the row
    /// was no longer in the expected state when the write happened.
    #[error("reminder {id}: illegal transition {from} -> {to}")]
    InvalidTransition {
        id: ReminderId,
        from: ReminderStatus,
        to: ReminderStatus,
    },

    /// A stored value could not be decoded (bad JSON schedule, unknown zone).
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;
