use async_trait::async_trait;
use pillbox_core::OwnerId;
use tracing::info;

use crate::error::DeliveryError;
use crate::message::Notification;

/// The messaging front-end capability the delivery worker sends through.
///
/// Implementations classify every failure as transient or permanent; the
/// worker owns retry policy.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    async fn send(&self, owner: OwnerId, notification: &Notification) -> Result<(), DeliveryError>;
}

/// Writes notifications to the log instead of a chat. Used when no bot token
/// is configured.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    fn name(&self) -> &str {
        "log"
    }

    async fn send(&self, owner: OwnerId, notification: &Notification) -> Result<(), DeliveryError> {
        info!(
            owner_id = %owner,
            reminder_id = %notification.reminder_id,
            text = %notification.plain_text(),
            "notification"
        );
        Ok(())
    }
}
