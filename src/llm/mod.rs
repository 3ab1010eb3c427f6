mod client;
pub mod config;
pub mod types;

use crate::error::{LlmError, RecallError, Result};
use crate::llm::client::post;
use crate::llm::config::ModelConfig;
use crate::llm::types::{ChatCompletionRequest, Message};
use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::HeaderMap;
use std::sync::Arc;

pub fn assemble_req_header(model: &ModelConfig) -> Result<HeaderMap> {
    let mut header_map = HeaderMap::new();

    // 本地模型不需要鉴权
    if !model.api_key.is_empty() {
        header_map.insert(
            "Authorization",
            format!("Bearer {}", model.api_key)
                .parse()
                .map_err(|e| RecallError::Other(format!("Invalid Authorization header: {}", e)))?,
        );
    }
    header_map.insert(
        "Content-Type",
        "application/json"
            .parse()
            .map_err(|e| RecallError::Other(format!("Invalid Content-Type header: {}", e)))?,
    );
    Ok(header_map)
}

/// 单次调用的采样参数
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChatOptions {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl Default for ChatOptions {
    fn default() -> Self {
        Self {
            temperature: Some(0.3),
            max_tokens: Some(2048),
        }
    }
}

impl ChatOptions {
    pub fn new(temperature: f32, max_tokens: u32) -> Self {
        Self {
            temperature: Some(temperature),
            max_tokens: Some(max_tokens),
        }
    }
}

/// 推理层使用的轻量 LLM 调用接口
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 发起一次简单对话，返回模型的文本内容
    async fn chat_simple(&self, messages: Vec<Message>) -> Result<String>;

    /// 指定采样参数的对话；默认忽略参数
    async fn chat_with_options(&self, messages: Vec<Message>, _options: ChatOptions) -> Result<String> {
        self.chat_simple(messages).await
    }
}

/// 基于 HTTP 的默认实现
pub struct DefaultLlmClient {
    client: Arc<Client>,
    model: ModelConfig,
}

impl DefaultLlmClient {
    pub fn new(client: Arc<Client>, model: ModelConfig) -> Self {
        Self { client, model }
    }
}

#[async_trait]
impl LlmClient for DefaultLlmClient {
    async fn chat_simple(&self, messages: Vec<Message>) -> Result<String> {
        self.chat_with_options(messages, ChatOptions::default()).await
    }

    async fn chat_with_options(&self, messages: Vec<Message>, options: ChatOptions) -> Result<String> {
        let request_body = ChatCompletionRequest {
            model: self.model.model.clone(),
            messages,
            temperature: options.temperature,
            max_tokens: options.max_tokens,
            stream: Some(false),
        };
        let header_map = assemble_req_header(&self.model)?;
        let response = post(
            &self.client,
            &request_body,
            header_map,
            &self.model.completions_url(),
            self.model.timeout(),
        )
        .await?;

        response
            .first_content()
            .ok_or_else(|| LlmError::EmptyResponse.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_without_api_key_has_no_authorization() {
        let headers = assemble_req_header(&ModelConfig::default()).unwrap();
        assert!(headers.get("Authorization").is_none());
        assert_eq!(headers.get("Content-Type").unwrap(), "application/json");
    }

    #[test]
    fn test_header_with_api_key() {
        let model = ModelConfig {
            api_key: "sk-test".to_string(),
            ..ModelConfig::default()
        };
        let headers = assemble_req_header(&model).unwrap();
        assert_eq!(headers.get("Authorization").unwrap(), "Bearer sk-test");
    }
}
