//! Log-only notifier used when no delivery channel is configured.

use async_trait::async_trait;
use tracing::info;

use crate::domain::NotificationError;
use crate::ports::Notifier;

#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, destination: &str, message: &str) -> Result<(), NotificationError> {
        info!(destination, message, "Alert");
        Ok(())
    }

    fn name(&self) -> &str {
        "log"
    }
}
