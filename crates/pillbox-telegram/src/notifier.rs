use async_trait::async_trait;
use pillbox_core::OwnerId;
use pillbox_delivery::{DeliveryError, Notification, Notifier};
use teloxide::prelude::*;
use teloxide::types::ParseMode;
use tracing::{debug, warn};

use crate::send;

/// Sends reminders to the owner's private chat.
///
/// In a private chat the chat id equals the user id, so the owner id is used
/// directly as the destination.
pub struct TelegramNotifier {
    bot: Bot,
    markdown: bool,
}

impl TelegramNotifier {
    pub fn new(bot: Bot, markdown: bool) -> Self {
        Self { bot, markdown }
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn send(&self, owner: OwnerId, n: &Notification) -> Result<(), DeliveryError> {
        let chat_id = ChatId(owner.0);
        let keyboard = send::keyboard(n);

        if self.markdown {
            let sent = self
                .bot
                .send_message(chat_id, send::render_markdown(n))
                .parse_mode(ParseMode::MarkdownV2)
                .reply_markup(keyboard.clone())
                .await;
            match sent {
                Ok(_) => {
                    debug!(owner_id = %owner, reminder_id = %n.reminder_id, "telegram message sent");
                    return Ok(());
                }
                // MarkdownV2 rejected: fall back to plain text.
                Err(e) if send::is_markup_rejection(&e) => {
                    warn!(reminder_id = %n.reminder_id, error = %e, "markdown rejected, sending plain text");
                }
                Err(e) => return Err(send::classify(e)),
            }
        }

        self.bot
            .send_message(chat_id, n.plain_text())
            .reply_markup(keyboard)
            .await
            .map(|_| ())
            .map_err(send::classify)
    }
}
