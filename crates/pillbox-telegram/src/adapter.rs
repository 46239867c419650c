//! Telegram channel adapter.
//!
//! Wraps a teloxide `Bot` + `Dispatcher` and drives the long-polling loop
//! until shutdown. Long polling, so no public URL is required.

use std::sync::Arc;

use pillbox_core::OwnerId;
use pillbox_service::{OwnerStats, ReminderService};
use teloxide::prelude::*;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::callback::handle_callback;
use crate::error::{Result, TelegramError};
use crate::notifier::TelegramNotifier;

const HELP: &str = "I send your medicine and lab test reminders here.\n\
Use the buttons under each reminder to mark it taken, skip it or move it to tomorrow.\n\
/stats shows how you are doing.";

pub struct TelegramAdapter {
    bot: Bot,
    service: Arc<ReminderService>,
}

impl TelegramAdapter {
    pub fn new(token: Option<&str>, service: Arc<ReminderService>) -> Result<Self> {
        let token = token
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(TelegramError::NoToken)?;
        Ok(Self {
            bot: Bot::new(token),
            service,
        })
    }

    /// A notifier sharing this adapter's bot.
    pub fn notifier(&self, markdown: bool) -> TelegramNotifier {
        TelegramNotifier::new(self.bot.clone(), markdown)
    }

    /// Drive the long-polling dispatcher until `shutdown` broadcasts `true`.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!("Telegram: starting long-polling dispatcher");

        let handler = dptree::entry()
            .branch(Update::filter_callback_query().endpoint(handle_callback))
            .branch(Update::filter_message().endpoint(handle_message));

        let mut dispatcher = Dispatcher::builder(self.bot, handler)
            .dependencies(dptree::deps![self.service])
            .default_handler(|_upd| async {})
            .build();

        let token = dispatcher.shutdown_token();
        tokio::spawn(async move {
            while shutdown.changed().await.is_ok() {
                if *shutdown.borrow() {
                    break;
                }
            }
            match token.shutdown() {
                Ok(done) => done.await,
                Err(e) => warn!("telegram dispatcher shutdown: {e}"),
            }
        });

        dispatcher.dispatch().await;
        info!("Telegram dispatcher stopped");
    }
}

/// Text commands. Anything that is not a known command gets the help text.
async fn handle_message(bot: Bot, msg: Message, service: Arc<ReminderService>) -> ResponseResult<()> {
    let Some(from) = msg.from.as_ref().filter(|u| !u.is_bot) else {
        return Ok(());
    };
    if !msg.chat.is_private() {
        return Ok(());
    }
    let owner = OwnerId(from.id.0 as i64);

    let reply = match msg.text().map(str::trim) {
        Some("/stats") => match service.stats(owner, None) {
            Ok(stats) => format_stats(&stats),
            Err(e) => {
                warn!(owner_id = %owner, error = %e, "stats query failed");
                "Statistics are unavailable right now.".to_string()
            }
        },
        _ => HELP.to_string(),
    };

    bot.send_message(msg.chat.id, reply).await?;
    Ok(())
}

fn format_stats(stats: &OwnerStats) -> String {
    let mut text = format!(
        "💊 Medicines: {}\n🩺 Analyses: {}\n\n✅ Taken: {}\n⏭ Skipped: {}\n⏰ Postponed: {}\n❌ Failed: {}",
        stats.medicines,
        stats.analyses,
        stats.reminders.completed,
        stats.reminders.skipped,
        stats.reminders.postponed,
        stats.reminders.failed,
    );
    if let Some(rate) = stats.adherence_rate {
        text.push_str(&format!("\n\nAdherence: {:.0}%", rate * 100.0));
    }
    text
}
