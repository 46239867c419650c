use thiserror::Error;

use crate::time::TimeResolutionError;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid subject: {0}")]
    InvalidSubject(String),

    #[error("Invalid response action: {0}")]
    InvalidAction(String),

    #[error(transparent)]
    TimeResolution(#[from] TimeResolutionError),
}

impl CoreError {
    /// Short error code string surfaced to front-ends.
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::Config(_) => "CONFIG_ERROR",
            CoreError::InvalidSubject(_) => "INVALID_SUBJECT",
            CoreError::InvalidAction(_) => "INVALID_ACTION",
            CoreError::TimeResolution(_) => "TIME_RESOLUTION_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
