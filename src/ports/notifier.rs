//! Notification Port - Outbound Alert Delivery
//!
//! Delivery is best-effort. A failure is reported back so it can be
//! logged, but it never changes alert trigger bookkeeping.

use async_trait::async_trait;

use crate::domain::NotificationError;

/// Sink for fully rendered alert messages.
#[async_trait]
pub trait Notifier: Send + Sync + 'static {
  /// Deliver `message` to `destination` (e.g. a chat id).
  async fn send(&self, destination: &str, message: &str) -> Result<(), NotificationError>;

  /// Short name for logs.
  fn name(&self) -> &str {
    "notifier"
  }
}
