//! Rendering and error classification for outgoing reminder messages.

use pillbox_core::ResponseAction;
use pillbox_delivery::{DeliveryError, Notification};
use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup};
use teloxide::{ApiError, RequestError};

use crate::callback::CallbackData;

/// Escape special characters for Telegram MarkdownV2.
///
/// MarkdownV2 requires escaping: `_ * [ ] ( ) ~ ` # + - = | { } . ! > \`
pub fn escape_markdown_v2(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 16);
    for ch in text.chars() {
        match ch {
            '_' | '*' | '[' | ']' | '(' | ')' | '~' | '`' | '>' | '#' | '+' | '-' | '='
            | '|' | '{' | '}' | '.' | '!' | '\\' => {
                out.push('\\');
                out.push(ch);
            }
            _ => out.push(ch),
        }
    }
    out
}

/// MarkdownV2 body: bold headline, then the subject name and detail lines.
pub fn render_markdown(n: &Notification) -> String {
    let mut text = format!(
        "*{}*\n\n{}",
        escape_markdown_v2(&n.headline),
        escape_markdown_v2(&n.subject_name)
    );
    for line in &n.details {
        text.push('\n');
        text.push_str(&escape_markdown_v2(line));
    }
    text
}

pub fn button_label(action: &ResponseAction) -> String {
    match action {
        ResponseAction::Take => "✅ Take".to_string(),
        ResponseAction::Skip => "⏭ Skip".to_string(),
        ResponseAction::Postpone { days: 1 } => "⏰ Tomorrow".to_string(),
        ResponseAction::Postpone { days } => format!("⏰ +{days} days"),
    }
}

/// One row of buttons, one per offered action.
pub fn keyboard(n: &Notification) -> InlineKeyboardMarkup {
    let row = n
        .actions
        .iter()
        .map(|action| {
            let data = CallbackData {
                reminder_id: n.reminder_id,
                action: *action,
            };
            InlineKeyboardButton::callback(button_label(action), data.to_string())
        })
        .collect::<Vec<_>>();
    InlineKeyboardMarkup::new(vec![row])
}

/// Map a Bot API failure onto the worker's retry classes.
///
/// Flood control becomes `Throttled` with the server's hint. API-level
/// rejections (blocked bot, unknown chat, bad request) cannot succeed on
/// retry; transport failures can.
pub fn classify(err: RequestError) -> DeliveryError {
    match err {
        RequestError::RetryAfter(secs) => DeliveryError::Throttled {
            retry_after: secs.duration(),
        },
        RequestError::Api(api) => DeliveryError::Permanent(api.to_string()),
        RequestError::MigrateToChatId(_) => {
            DeliveryError::Permanent("chat migrated to a supergroup".to_string())
        }
        other => DeliveryError::Transient(other.to_string()),
    }
}

/// Whether Telegram refused the message because of its markup.
pub fn is_markup_rejection(err: &RequestError) -> bool {
    matches!(err, RequestError::Api(ApiError::CantParseEntities(_)))
}

#[cfg(test)]
mod tests {
    use pillbox_core::{OwnerId, ReminderId, SubjectKind};
    use teloxide::types::InlineKeyboardButtonKind;

    use super::*;

    fn notification() -> Notification {
        Notification {
            reminder_id: ReminderId(42),
            owner_id: OwnerId(7),
            subject_kind: SubjectKind::Analysis,
            headline: "🩺 Analysis reminder!".into(),
            subject_name: "Blood test (CBC)".into(),
            details: vec!["📅 10.02.2024 at 09:15".into()],
            actions: vec![
                ResponseAction::Take,
                ResponseAction::Skip,
                ResponseAction::Postpone { days: 1 },
            ],
        }
    }

    #[test]
    fn escape_markdown_v2_escapes_specials() {
        let escaped = escape_markdown_v2("Hello. World! (test) [link] ~strike~ a>b");
        for needle in ["\\.", "\\!", "\\(", "\\)", "\\[", "\\]", "\\~", "\\>"] {
            assert!(escaped.contains(needle), "missing {needle} in {escaped}");
        }
    }

    #[test]
    fn escape_markdown_v2_leaves_normal_chars() {
        let input = "Hello world 123 abc";
        assert_eq!(escape_markdown_v2(input), input);
    }

    #[test]
    fn markdown_body_bolds_headline_and_escapes_text() {
        assert_eq!(
            render_markdown(&notification()),
            "*🩺 Analysis reminder\\!*\n\nBlood test \\(CBC\\)\n📅 10\\.02\\.2024 at 09:15"
        );
    }

    #[test]
    fn keyboard_carries_callback_per_action() {
        let markup = keyboard(&notification());
        assert_eq!(markup.inline_keyboard.len(), 1);
        let data: Vec<_> = markup.inline_keyboard[0]
            .iter()
            .map(|b| match &b.kind {
                InlineKeyboardButtonKind::CallbackData(d) => d.clone(),
                other => panic!("unexpected button {other:?}"),
            })
            .collect();
        assert_eq!(data, vec!["r:42:take", "r:42:skip", "r:42:postpone:1"]);
        assert_eq!(markup.inline_keyboard[0][2].text, "⏰ Tomorrow");
    }

    #[test]
    fn flood_control_is_throttled() {
        let err = classify(RequestError::RetryAfter(teloxide::types::Seconds::from_seconds(
            12,
        )));
        assert_eq!(
            err.retry_after(),
            Some(std::time::Duration::from_secs(12))
        );
        assert!(err.is_transient());
    }

    #[test]
    fn api_rejections_are_permanent() {
        assert!(!classify(RequestError::Api(ApiError::BotBlocked)).is_transient());
        assert!(!classify(RequestError::Api(ApiError::ChatNotFound)).is_transient());
    }
}
