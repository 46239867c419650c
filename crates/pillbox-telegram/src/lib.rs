//! Telegram front-end: delivers reminders as chat messages with inline
//! take/skip/postpone buttons and routes button presses back into the
//! reminder service.

pub mod adapter;
pub mod callback;
pub mod error;
pub mod notifier;
pub mod send;

pub use adapter::TelegramAdapter;
pub use callback::CallbackData;
pub use error::TelegramError;
pub use notifier::TelegramNotifier;
