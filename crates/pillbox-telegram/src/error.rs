/// Errors produced by the Telegram adapter.
#[derive(Debug, thiserror::Error)]
pub enum TelegramError {
    #[error("teloxide error: {0}")]
    Teloxide(#[from] teloxide::RequestError),

    #[error("no bot token configured")]
    NoToken,

    #[error("unrecognised callback data: {0}")]
    InvalidCallback(String),
}

pub type Result<T> = std::result::Result<T, TelegramError>;
