//! Telegram Notifier - Bot API `sendMessage` Delivery
//!
//! Posts rendered alert messages to a chat through the Telegram Bot
//! API. Credentials are read from `TELEGRAM_TOKEN` and
//! `TELEGRAM_CHATID`; when either is missing the caller falls back to
//! the log-only sink.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, instrument};

use crate::config::NotificationsConfig;
use crate::domain::NotificationError;
use crate::ports::Notifier;

/// Telegram credentials.
#[derive(Clone)]
pub struct TelegramCredentials {
    pub token: String,
    pub chat_id: String,
}

impl std::fmt::Debug for TelegramCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramCredentials")
            .field("token", &"<redacted>")
            .field("chat_id", &self.chat_id)
            .finish()
    }
}

impl TelegramCredentials {
    /// Read credentials from the environment. `None` if either is unset
    /// or blank.
    pub fn from_env() -> Option<Self> {
        let token = std::env::var("TELEGRAM_TOKEN").ok()?;
        let chat_id = std::env::var("TELEGRAM_CHATID").ok()?;
        Self::new(token, chat_id)
    }

    pub fn new(token: impl Into<String>, chat_id: impl Into<String>) -> Option<Self> {
        let token = token.into();
        let chat_id = chat_id.into();
        if token.trim().is_empty() || chat_id.trim().is_empty() {
            return None;
        }
        Some(Self { token, chat_id })
    }
}

#[derive(Debug, Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
}

/// Telegram Bot API client.
pub struct TelegramNotifier {
    http_client: reqwest::Client,
    /// Bot API base URL (`https://api.telegram.org`).
    api_url: String,
    token: String,
}

impl TelegramNotifier {
    pub fn new(
        config: &NotificationsConfig,
        credentials: &TelegramCredentials,
    ) -> Result<Self, NotificationError> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            http_client,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            token: credentials.token.clone(),
        })
    }

    fn send_message_url(&self) -> String {
        format!("{}/bot{}/sendMessage", self.api_url, self.token)
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    #[instrument(skip(self, message))]
    async fn send(&self, destination: &str, message: &str) -> Result<(), NotificationError> {
        let response = self
            .http_client
            .post(self.send_message_url())
            .json(&SendMessage {
                chat_id: destination,
                text: message,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotificationError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        debug!("Telegram message delivered");
        Ok(())
    }

    fn name(&self) -> &str {
        "telegram"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_credentials_disable_delivery() {
        assert!(TelegramCredentials::new("", "123").is_none());
        assert!(TelegramCredentials::new("abc", " ").is_none());
        assert!(TelegramCredentials::new("abc", "123").is_some());
    }

    #[test]
    fn test_debug_redacts_token() {
        let credentials = TelegramCredentials::new("secret-token", "42").unwrap();
        let rendered = format!("{credentials:?}");
        assert!(!rendered.contains("secret-token"));
        assert!(rendered.contains("42"));
    }

    #[test]
    fn test_send_message_url() {
        let config = NotificationsConfig {
            api_url: "http://localhost:8081/".to_string(),
            ..NotificationsConfig::default()
        };
        let credentials = TelegramCredentials::new("T0K", "1").unwrap();
        let notifier = TelegramNotifier::new(&config, &credentials).unwrap();
        assert_eq!(notifier.send_message_url(), "http://localhost:8081/botT0K/sendMessage");
    }

    #[tokio::test]
    async fn test_unreachable_api_is_request_error() {
        let config = NotificationsConfig {
            api_url: "http://127.0.0.1:1".to_string(),
            timeout_secs: 1,
            ..NotificationsConfig::default()
        };
        let credentials = TelegramCredentials::new("T0K", "1").unwrap();
        let notifier = TelegramNotifier::new(&config, &credentials).unwrap();
        let err = notifier.send("1", "hello").await.unwrap_err();
        assert!(matches!(err, NotificationError::Request(_)));
    }
}
