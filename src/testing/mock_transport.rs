//! 内存中的 [`Transport`]：预置入站批次，记录所有出站消息。

use crate::error::{RecallError, Result, TransportError};
use crate::history::ChatId;
use crate::transport::{BotIdentity, InboundTurn, Transport};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct SentMessage {
    pub chat_id: ChatId,
    pub text: String,
    pub reply_to: Option<i64>,
}

pub struct MockTransport {
    identity: BotIdentity,
    batches: Mutex<VecDeque<Result<Vec<InboundTurn>>>>,
    sent: Mutex<Vec<SentMessage>>,
    typing: Mutex<Vec<ChatId>>,
}

impl MockTransport {
    pub fn new(bot_id: i64, username: &str) -> Self {
        Self {
            identity: BotIdentity {
                id: bot_id,
                username: username.to_string(),
            },
            batches: Mutex::new(VecDeque::new()),
            sent: Mutex::new(Vec::new()),
            typing: Mutex::new(Vec::new()),
        }
    }

    pub fn with_batch(self, turns: Vec<InboundTurn>) -> Self {
        self.batches.lock().unwrap().push_back(Ok(turns));
        self
    }

    pub fn with_poll_error(self, err: TransportError) -> Self {
        self.batches
            .lock()
            .unwrap()
            .push_back(Err(RecallError::Transport(err)));
        self
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub fn typing_count(&self) -> usize {
        self.typing.lock().unwrap().len()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn identity(&self) -> Result<BotIdentity> {
        Ok(self.identity.clone())
    }

    async fn poll(&self) -> Result<Vec<InboundTurn>> {
        let next = self.batches.lock().unwrap().pop_front();
        match next {
            Some(batch) => batch,
            None => {
                // 模拟长轮询空返回
                tokio::time::sleep(Duration::from_millis(10)).await;
                Ok(Vec::new())
            }
        }
    }

    async fn send(&self, chat_id: ChatId, text: &str, reply_to: Option<i64>) -> Result<()> {
        self.sent.lock().unwrap().push(SentMessage {
            chat_id,
            text: text.to_string(),
            reply_to,
        });
        Ok(())
    }

    async fn send_typing(&self, chat_id: ChatId) -> Result<()> {
        self.typing.lock().unwrap().push(chat_id);
        Ok(())
    }
}
