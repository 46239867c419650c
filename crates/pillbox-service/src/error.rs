use pillbox_core::{CoreError, OwnerId, ReminderId, SubjectId, SubjectStatus, TimeResolutionError};
use pillbox_scheduler::SchedulerError;
use pillbox_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error("subject {subject_id} does not belong to owner {owner_id}")]
    SubjectNotOwned {
        subject_id: SubjectId,
        owner_id: OwnerId,
    },

    #[error("reminder {reminder_id} does not belong to owner {owner_id}")]
    ReminderNotOwned {
        reminder_id: ReminderId,
        owner_id: OwnerId,
    },

    #[error("subject {0} is already {1}")]
    SubjectFinished(SubjectId, SubjectStatus),

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl From<TimeResolutionError> for ServiceError {
    fn from(e: TimeResolutionError) -> Self {
        ServiceError::Core(CoreError::from(e))
    }
}

impl ServiceError {
    /// Short stable code string surfaced to front-ends.
    pub fn code(&self) -> &'static str {
        match self {
            ServiceError::Core(e) => e.code(),
            ServiceError::Store(StoreError::SubjectNotFound(_))
            | ServiceError::Store(StoreError::ReminderNotFound(_)) => "NOT_FOUND",
            ServiceError::Store(StoreError::InvalidTransition { .. }) => "INVALID_TRANSITION",
            ServiceError::Store(_) => "STORE_ERROR",
            ServiceError::Scheduler(_) => "SCHEDULER_ERROR",
            ServiceError::SubjectNotOwned { .. } | ServiceError::ReminderNotOwned { .. } => {
                "FORBIDDEN"
            }
            ServiceError::SubjectFinished(..) => "SUBJECT_FINISHED",
            ServiceError::InvalidInput(_) => "INVALID_INPUT",
        }
    }
}

pub type Result<T> = std::result::Result<T, ServiceError>;
