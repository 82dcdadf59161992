//! Primary bot transport
//!
//! The daemon talks to the messaging platform through the `BotTransport`
//! seam. The production implementation long-polls the Telegram Bot API over
//! HTTPS; tests substitute an in-memory double.

use crate::error::{Error, Result};
use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// One inline button: label plus opaque callback payload.
#[derive(Debug, Clone)]
pub struct Button {
    pub label: String,
    pub payload: String,
}

impl Button {
    pub fn new(label: &str, payload: &str) -> Self {
        Self {
            label: label.to_string(),
            payload: payload.to_string(),
        }
    }
}

/// Inbound event from the primary connection.
#[derive(Debug, Clone)]
pub enum BotEvent {
    Message {
        sender_id: String,
        text: String,
    },
    Callback {
        sender_id: String,
        callback_id: String,
        payload: Vec<u8>,
    },
}

#[async_trait]
pub trait BotTransport: Send + Sync {
    /// Establish (or verify) the primary connection.
    async fn connect(&self) -> Result<()>;

    /// Probe whether the primary connection is currently usable.
    async fn is_connected(&self) -> bool;

    async fn send_message(&self, user_id: &str, text: &str) -> Result<()>;

    /// Send a message with an inline keyboard, one button per row.
    async fn send_buttons(&self, user_id: &str, text: &str, buttons: &[Button]) -> Result<()>;

    /// Acknowledge an inline-button press, optionally with a popup text.
    async fn ack_callback(&self, callback_id: &str, text: Option<&str>) -> Result<()>;

    /// Long-poll for updates, pushing each event into `tx`. Returns when
    /// the receiving side goes away.
    async fn listen(&self, tx: mpsc::Sender<BotEvent>) -> Result<()>;
}

/// Telegram Bot API transport — long-polls `getUpdates`.
pub struct TelegramBot {
    bot_token: String,
    client: reqwest::Client,
}

impl TelegramBot {
    pub fn new(bot_token: String) -> Self {
        Self {
            bot_token,
            client: reqwest::Client::new(),
        }
    }

    fn api_url(&self, method: &str) -> String {
        format!("https://api.telegram.org/bot{}/{method}", self.bot_token)
    }

    fn parse_update(update: &serde_json::Value) -> Option<BotEvent> {
        if let Some(message) = update.get("message") {
            let text = message.get("text").and_then(serde_json::Value::as_str)?;
            let sender_id = message
                .get("from")
                .and_then(|f| f.get("id"))
                .and_then(serde_json::Value::as_i64)?;
            return Some(BotEvent::Message {
                sender_id: sender_id.to_string(),
                text: text.to_string(),
            });
        }

        if let Some(callback) = update.get("callback_query") {
            let callback_id = callback.get("id").and_then(serde_json::Value::as_str)?;
            let sender_id = callback
                .get("from")
                .and_then(|f| f.get("id"))
                .and_then(serde_json::Value::as_i64)?;
            let data = callback.get("data").and_then(serde_json::Value::as_str)?;
            return Some(BotEvent::Callback {
                sender_id: sender_id.to_string(),
                callback_id: callback_id.to_string(),
                payload: data.as_bytes().to_vec(),
            });
        }

        None
    }
}

#[async_trait]
impl BotTransport for TelegramBot {
    async fn connect(&self) -> Result<()> {
        let resp = self
            .client
            .get(self.api_url("getMe"))
            .timeout(Duration::from_secs(10))
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(Error::FatalInit(format!(
                "getMe returned {}",
                resp.status()
            )));
        }

        let me: serde_json::Value = resp.json().await?;
        if let Some(username) = me
            .pointer("/result/username")
            .and_then(serde_json::Value::as_str)
        {
            info!("Bot connected: @{}", username);
        }
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.client
            .get(self.api_url("getMe"))
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }

    async fn send_message(&self, user_id: &str, text: &str) -> Result<()> {
        let body = json!({
            "chat_id": user_id,
            "text": text,
            "parse_mode": "Markdown"
        });
        self.client
            .post(self.api_url("sendMessage"))
            .json(&body)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn send_buttons(&self, user_id: &str, text: &str, buttons: &[Button]) -> Result<()> {
        let keyboard: Vec<Vec<serde_json::Value>> = buttons
            .iter()
            .map(|b| vec![json!({"text": b.label, "callback_data": b.payload})])
            .collect();

        let body = json!({
            "chat_id": user_id,
            "text": text,
            "parse_mode": "Markdown",
            "reply_markup": {"inline_keyboard": keyboard}
        });
        self.client
            .post(self.api_url("sendMessage"))
            .json(&body)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn ack_callback(&self, callback_id: &str, text: Option<&str>) -> Result<()> {
        let mut body = json!({"callback_query_id": callback_id});
        if let Some(text) = text {
            body["text"] = json!(text);
        }
        self.client
            .post(self.api_url("answerCallbackQuery"))
            .json(&body)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn listen(&self, tx: mpsc::Sender<BotEvent>) -> Result<()> {
        let mut offset: i64 = 0;
        info!("Listening for bot updates");

        loop {
            let body = json!({
                "offset": offset,
                "timeout": 30,
                "allowed_updates": ["message", "callback_query"]
            });

            let resp = match self
                .client
                .post(self.api_url("getUpdates"))
                .json(&body)
                .send()
                .await
            {
                Ok(r) => r,
                Err(e) => {
                    warn!("Update poll error: {}", e);
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    continue;
                }
            };

            let data: serde_json::Value = match resp.json().await {
                Ok(d) => d,
                Err(e) => {
                    warn!("Update parse error: {}", e);
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    continue;
                }
            };

            if let Some(results) = data.get("result").and_then(serde_json::Value::as_array) {
                for update in results {
                    if let Some(uid) = update.get("update_id").and_then(serde_json::Value::as_i64)
                    {
                        offset = uid + 1;
                    }

                    if let Some(event) = Self::parse_update(update) {
                        if tx.send(event).await.is_err() {
                            return Ok(());
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_url() {
        let bot = TelegramBot::new("123:ABC".to_string());
        assert_eq!(
            bot.api_url("getMe"),
            "https://api.telegram.org/bot123:ABC/getMe"
        );
    }

    #[test]
    fn test_parse_message_update() {
        let update = json!({
            "update_id": 7,
            "message": {
                "text": "/start",
                "from": {"id": 42},
                "chat": {"id": 42}
            }
        });

        match TelegramBot::parse_update(&update) {
            Some(BotEvent::Message { sender_id, text }) => {
                assert_eq!(sender_id, "42");
                assert_eq!(text, "/start");
            }
            other => panic!("Expected message event, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_callback_update() {
        let update = json!({
            "update_id": 8,
            "callback_query": {
                "id": "cb-1",
                "from": {"id": 42},
                "data": "pay_semaine_42"
            }
        });

        match TelegramBot::parse_update(&update) {
            Some(BotEvent::Callback {
                sender_id,
                callback_id,
                payload,
            }) => {
                assert_eq!(sender_id, "42");
                assert_eq!(callback_id, "cb-1");
                assert_eq!(payload, b"pay_semaine_42");
            }
            other => panic!("Expected callback event, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_ignores_other_updates() {
        let update = json!({
            "update_id": 9,
            "edited_message": {"text": "x", "from": {"id": 1}}
        });
        assert!(TelegramBot::parse_update(&update).is_none());

        // Message without text (sticker, photo)
        let update = json!({
            "update_id": 10,
            "message": {"from": {"id": 1}, "photo": []}
        });
        assert!(TelegramBot::parse_update(&update).is_none());
    }
}
