//! 可脚本化的 [`LlmClient`]，用于在不发起 HTTP 请求的情况下测试推理层。
//!
//! ```rust
//! use chat_recall::testing::MockLlmClient;
//! use chat_recall::llm::LlmClient;
//! use chat_recall::llm::types::Message;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let mock = MockLlmClient::new().with_response("Anna likes pizza.");
//! let reply = mock.chat_simple(vec![Message::user("summarize".to_string())]).await.unwrap();
//! assert_eq!(reply, "Anna likes pizza.");
//! assert_eq!(mock.call_count(), 1);
//! # }
//! ```

use crate::error::{LlmError, RecallError, Result};
use crate::llm::types::Message;
use crate::llm::{ChatOptions, LlmClient};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

enum MockLlmResponse {
    Content(String),
    Err(RecallError),
}

/// 按顺序返回预设响应，队列耗尽后返回 `EmptyResponse`。
pub struct MockLlmClient {
    responses: Arc<Mutex<VecDeque<MockLlmResponse>>>,
    /// 每次调用收到的 messages 与采样参数
    calls: Arc<Mutex<Vec<(Vec<Message>, ChatOptions)>>>,
}

impl Default for MockLlmClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self {
            responses: Arc::new(Mutex::new(VecDeque::new())),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_response(self, text: impl Into<String>) -> Self {
        self.responses
            .lock()
            .unwrap()
            .push_back(MockLlmResponse::Content(text.into()));
        self
    }

    pub fn with_error(self, err: RecallError) -> Self {
        self.responses
            .lock()
            .unwrap()
            .push_back(MockLlmResponse::Err(err));
        self
    }

    pub fn with_network_error(self, msg: impl Into<String>) -> Self {
        self.with_error(RecallError::Llm(LlmError::NetworkError(msg.into())))
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn last_messages(&self) -> Option<Vec<Message>> {
        self.calls.lock().unwrap().last().map(|(m, _)| m.clone())
    }

    pub fn last_options(&self) -> Option<ChatOptions> {
        self.calls.lock().unwrap().last().map(|(_, o)| *o)
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn chat_simple(&self, messages: Vec<Message>) -> Result<String> {
        self.chat_with_options(messages, ChatOptions::default()).await
    }

    async fn chat_with_options(&self, messages: Vec<Message>, options: ChatOptions) -> Result<String> {
        self.calls.lock().unwrap().push((messages, options));
        match self.responses.lock().unwrap().pop_front() {
            Some(MockLlmResponse::Content(text)) => Ok(text),
            Some(MockLlmResponse::Err(e)) => Err(e),
            None => Err(RecallError::Llm(LlmError::EmptyResponse)),
        }
    }
}
