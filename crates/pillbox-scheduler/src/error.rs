use thiserror::Error;

/// Errors that can occur within the scheduler subsystem.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Underlying SQLite / rusqlite error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A job key did not have the `{kind}_{reminder_id}` shape.
    #[error("Invalid job key: {0}")]
    InvalidKey(String),

    /// The job payload could not be encoded or decoded.
    #[error("Invalid payload: {0}")]
    InvalidPayload(#[from] serde_json::Error),

    /// A stored row could not be decoded.
    #[error("Corrupt job row: {0}")]
    Corrupt(String),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
