//! Inline-button callbacks: `r:{reminder_id}:{action}`.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use pillbox_core::{OwnerId, ReminderId, ResponseAction};
use pillbox_service::ReminderService;
use teloxide::prelude::*;
use tracing::{info, warn};

use crate::error::TelegramError;

const PREFIX: &str = "r:";

/// Payload attached to each reminder button. Fits well inside Telegram's
/// 64-byte callback data limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallbackData {
    pub reminder_id: ReminderId,
    pub action: ResponseAction,
}

impl fmt::Display for CallbackData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{PREFIX}{}:{}", self.reminder_id, self.action)
    }
}

impl FromStr for CallbackData {
    type Err = TelegramError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || TelegramError::InvalidCallback(s.to_string());
        let (id, action) = s
            .strip_prefix(PREFIX)
            .and_then(|rest| rest.split_once(':'))
            .ok_or_else(invalid)?;
        Ok(Self {
            reminder_id: ReminderId(id.parse().map_err(|_| invalid())?),
            action: action.parse().map_err(|_| invalid())?,
        })
    }
}

/// Toast shown to the owner once a response is recorded.
pub fn confirmation(action: &ResponseAction) -> String {
    match action {
        ResponseAction::Take => "✅ Marked as taken".to_string(),
        ResponseAction::Skip => "⏭ Skipped".to_string(),
        ResponseAction::Postpone { days: 1 } => "⏰ Postponed until tomorrow".to_string(),
        ResponseAction::Postpone { days } => format!("⏰ Postponed for {days} days"),
    }
}

/// Toast for a rejected response, keyed on the service error code.
pub fn rejection(code: &str) -> &'static str {
    match code {
        "INVALID_TRANSITION" => "This reminder was already answered",
        "NOT_FOUND" => "This reminder no longer exists",
        "FORBIDDEN" => "This reminder belongs to someone else",
        _ => "Could not record your answer, please try again",
    }
}

/// Callback-query endpoint registered in the teloxide dispatcher.
///
/// The pressing user is the responding owner; the service rejects presses on
/// reminders owned by someone else. Every query is answered so the client
/// stops showing its progress spinner.
pub async fn handle_callback(
    bot: Bot,
    q: CallbackQuery,
    service: Arc<ReminderService>,
) -> ResponseResult<()> {
    let owner = OwnerId(q.from.id.0 as i64);
    let raw = q.data.as_deref().unwrap_or_default();

    let reply = match raw.parse::<CallbackData>() {
        Ok(data) => match service.on_owner_response(owner, data.reminder_id, data.action) {
            Ok(_) => {
                info!(owner_id = %owner, reminder_id = %data.reminder_id, action = %data.action, "button response recorded");
                confirmation(&data.action)
            }
            Err(e) => {
                warn!(owner_id = %owner, reminder_id = %data.reminder_id, code = e.code(), error = %e, "button response rejected");
                rejection(e.code()).to_string()
            }
        },
        Err(e) => {
            warn!(owner_id = %owner, error = %e, "ignoring callback");
            rejection("").to_string()
        }
    };

    bot.answer_callback_query(q.id).text(reply).await?;
    Ok(())
}
