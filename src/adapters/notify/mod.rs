//! Notification Adapters - Alert Delivery
//!
//! - Telegram: Bot API `sendMessage`
//! - Log: structured log line only (no credentials configured)

pub mod log;
pub mod telegram;

pub use self::log::LogNotifier;
pub use telegram::{TelegramCredentials, TelegramNotifier};
