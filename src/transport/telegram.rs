//! Telegram Bot API 长轮询实现

use super::{BotIdentity, InboundTurn, Transport};
use crate::error::{RecallError, Result, TransportError};
use crate::history::{ChatId, ChatKind, UserSnapshot};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

const API_ROOT: &str = "https://api.telegram.org";
/// getUpdates 的长轮询秒数
const POLL_TIMEOUT_SECS: u64 = 30;

#[derive(Deserialize)]
struct TelegramResponse<T> {
    ok: bool,
    result: Option<T>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Deserialize)]
struct Update {
    update_id: i64,
    message: Option<TelegramMessage>,
}

#[derive(Deserialize)]
struct TelegramMessage {
    message_id: i64,
    from: Option<TelegramUser>,
    chat: TelegramChat,
    text: Option<String>,
    #[serde(default)]
    reply_to_message: Option<Box<TelegramMessage>>,
}

#[derive(Deserialize)]
struct TelegramChat {
    id: i64,
    #[serde(rename = "type")]
    kind: ChatKind,
}

#[derive(Deserialize)]
struct TelegramUser {
    id: i64,
    first_name: String,
    #[serde(default)]
    last_name: Option<String>,
    #[serde(default)]
    username: Option<String>,
}

impl TelegramUser {
    fn snapshot(&self) -> UserSnapshot {
        let display_name = match &self.last_name {
            Some(last) if !last.is_empty() => format!("{} {}", self.first_name, last),
            _ => self.first_name.clone(),
        };
        UserSnapshot::new(self.id, display_name, self.username.clone())
    }
}

impl TelegramMessage {
    fn into_turn(self) -> Option<InboundTurn> {
        // 频道消息等没有发送者
        let user = self.from.as_ref()?.snapshot();
        let reply_to_user = self
            .reply_to_message
            .as_ref()
            .and_then(|m| m.from.as_ref())
            .map(TelegramUser::snapshot);
        Some(InboundTurn {
            message_id: self.message_id,
            chat_id: self.chat.id,
            chat_kind: self.chat.kind,
            user,
            text: self.text,
            reply_to_user,
        })
    }
}

pub struct TelegramTransport {
    client: Client,
    api_base: String,
    offset: AtomicI64,
}

impl TelegramTransport {
    pub fn new(client: Client, token: &str) -> Self {
        Self::with_api_root(client, API_ROOT, token)
    }

    /// 指定 API 地址（本地 Bot API 服务器）
    pub fn with_api_root(client: Client, api_root: &str, token: &str) -> Self {
        Self {
            client,
            api_base: format!("{}/bot{}", api_root.trim_end_matches('/'), token),
            offset: AtomicI64::new(0),
        }
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<T> {
        let url = format!("{}/{}", self.api_base, method);
        let response = self
            .client
            .post(&url)
            .json(&params)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(TransportError::Unauthorized(format!(
                "{} rejected the bot token",
                method
            ))
            .into());
        }

        let body: TelegramResponse<T> = response
            .json()
            .await
            .map_err(|e| TransportError::Network(format!("{} parse error: {}", method, e)))?;

        if !body.ok || !status.is_success() {
            return Err(TransportError::Api {
                status: status.as_u16(),
                description: body.description.unwrap_or_else(|| "ok=false".to_string()),
            }
            .into());
        }
        body.result.ok_or_else(|| {
            RecallError::Transport(TransportError::Api {
                status: status.as_u16(),
                description: format!("{} returned no result", method),
            })
        })
    }
}

#[async_trait]
impl Transport for TelegramTransport {
    async fn identity(&self) -> Result<BotIdentity> {
        let me: TelegramUser = self
            .call("getMe", json!({}), Duration::from_secs(10))
            .await?;
        Ok(BotIdentity {
            id: me.id,
            username: me.username.unwrap_or_default(),
        })
    }

    async fn poll(&self) -> Result<Vec<InboundTurn>> {
        let params = json!({
            "offset": self.offset.load(Ordering::SeqCst),
            "timeout": POLL_TIMEOUT_SECS,
            "allowed_updates": ["message"]
        });
        let updates: Vec<Update> = self
            .call(
                "getUpdates",
                params,
                Duration::from_secs(POLL_TIMEOUT_SECS + 10),
            )
            .await?;

        let mut turns = Vec::with_capacity(updates.len());
        for update in updates {
            self.offset.fetch_max(update.update_id + 1, Ordering::SeqCst);
            match update.message.and_then(TelegramMessage::into_turn) {
                Some(turn) => turns.push(turn),
                None => debug!("Skipping update {} without a user message", update.update_id),
            }
        }
        Ok(turns)
    }

    async fn send(&self, chat_id: ChatId, text: &str, reply_to: Option<i64>) -> Result<()> {
        let mut params = json!({ "chat_id": chat_id, "text": text });
        if let Some(message_id) = reply_to {
            params["reply_parameters"] = json!({
                "message_id": message_id,
                "allow_sending_without_reply": true
            });
        }
        let _: Value = self
            .call("sendMessage", params, Duration::from_secs(30))
            .await?;
        Ok(())
    }

    async fn send_typing(&self, chat_id: ChatId) -> Result<()> {
        let params = json!({ "chat_id": chat_id, "action": "typing" });
        if let Err(e) = self
            .call::<Value>("sendChatAction", params, Duration::from_secs(10))
            .await
        {
            warn!("sendChatAction failed for chat {}: {}", chat_id, e);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_maps_to_turn() {
        let raw = r#"{
            "update_id": 10,
            "message": {
                "message_id": 55,
                "from": {"id": 1, "is_bot": false, "first_name": "Anna", "last_name": "Rossi", "username": "anna"},
                "chat": {"id": -100, "type": "supergroup", "title": "Friends"},
                "text": "@recall_bot what did we decide?",
                "reply_to_message": {
                    "message_id": 54,
                    "from": {"id": 99, "is_bot": true, "first_name": "Recall", "username": "recall_bot"},
                    "chat": {"id": -100, "type": "supergroup"},
                    "text": "earlier answer"
                }
            }
        }"#;
        let update: Update = serde_json::from_str(raw).unwrap();
        let turn = update.message.and_then(TelegramMessage::into_turn).unwrap();

        assert_eq!(turn.message_id, 55);
        assert_eq!(turn.chat_id, -100);
        assert_eq!(turn.chat_kind, ChatKind::Supergroup);
        assert_eq!(turn.user.label(), "Anna Rossi (@anna)");
        assert_eq!(turn.reply_to_user.map(|u| u.id), Some(99));
    }

    #[test]
    fn test_message_without_sender_is_skipped() {
        let raw = r#"{"message_id": 1, "chat": {"id": 5, "type": "channel"}, "text": "news"}"#;
        let message: TelegramMessage = serde_json::from_str(raw).unwrap();
        assert!(message.into_turn().is_none());
    }

    #[test]
    fn test_error_body_parses() {
        let raw = r#"{"ok": false, "error_code": 400, "description": "Bad Request: chat not found"}"#;
        let body: TelegramResponse<Value> = serde_json::from_str(raw).unwrap();
        assert!(!body.ok);
        assert_eq!(body.description.as_deref(), Some("Bad Request: chat not found"));
    }
}
