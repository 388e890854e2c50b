use async_trait::async_trait;
use serde::Serialize;

use crate::types::{OwnerId, WatchError};

/// Outbound channel to wallet owners. Delivery is best-effort.
#[async_trait]
pub trait NotificationSink: Send + Sync + 'static {
    async fn send(&self, owner_id: &OwnerId, message: &str) -> Result<(), WatchError>;
}

const TELEGRAM_API_URL: &str = "https://api.telegram.org";

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
    disable_web_page_preview: bool,
}

/// Sends notifications through the Telegram Bot API; owner ids are chat ids.
pub struct TelegramSink {
    client: reqwest::Client,
    send_url: String,
}

impl TelegramSink {
    pub fn new(bot_token: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            send_url: format!("{TELEGRAM_API_URL}/bot{bot_token}/sendMessage"),
        }
    }
}

#[async_trait]
impl NotificationSink for TelegramSink {
    async fn send(&self, owner_id: &OwnerId, message: &str) -> Result<(), WatchError> {
        let body = SendMessage {
            chat_id: owner_id,
            text: message,
            disable_web_page_preview: true,
        };
        let response = self
            .client
            .post(&self.send_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| WatchError::Delivery(e.to_string()))?;

        if !response.status().is_success() {
            return Err(WatchError::Delivery(format!(
                "telegram returned {} for chat {owner_id}",
                response.status()
            )));
        }
        Ok(())
    }
}
