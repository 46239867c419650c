//! `pillbox-delivery`: turning a fired reminder into a sent message.
//!
//! The [`DeliveryWorker`] re-validates the reminder and its subject at fire
//! time, composes the message, takes a [`RateLimiter`] permit and sends
//! through the injected [`Notifier`], retrying transient failures with linear
//! backoff before settling the reminder as `sent` or `failed`.

pub mod error;
pub mod message;
pub mod notifier;
pub mod rate_limit;
pub mod worker;

pub use error::DeliveryError;
pub use message::{compose, Notification};
pub use notifier::{LogNotifier, Notifier};
pub use rate_limit::{Permit, RateLimiter};
pub use worker::{DeliveryOutcome, DeliveryWorker, WorkerSettings};
