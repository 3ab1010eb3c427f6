//! 推理协作方
//!
//! 核心逻辑只通过 [`Inference`] 使用模型的三种能力：摘要、性格分析、回复生成。
//! 三者都可能失败，调用方负责用固定的兜底文本替换错误，不把原始错误交给用户。

pub mod prompts;

use crate::conversation::{Turn, TurnRole};
use crate::error::{Result, StoreError};
use crate::history::LogEntry;
use crate::llm::types::Message;
use crate::llm::{ChatOptions, LlmClient};
use async_trait::async_trait;
use prompts::{DefaultSummaryPrompt, SummaryPromptBuilder};
use std::sync::Arc;
use tracing::debug;

/// 找不到相关上下文时的摘要
pub const NO_RELEVANT_INFO: &str = "No relevant information found.";

/// 回复生成失败时发给用户的文本
pub const REPLY_FALLBACK: &str =
    "Sorry, I couldn't put together an answer right now. Please try again in a moment.";

/// 性格分析最少需要的消息数
pub const MIN_CHARACTER_MESSAGES: usize = 3;

#[async_trait]
pub trait Inference: Send + Sync {
    /// 概括一段日志；`focus` 为当前话题时只提取相关内容
    async fn summarize(&self, history: &[LogEntry], focus: Option<&str>) -> Result<String>;

    /// 根据用户的消息给出简短的性格描述
    async fn analyze_character(&self, messages: &[String]) -> Result<String>;

    /// 生成回复；`history` 为会话缓冲中的最近几轮
    async fn generate_reply(&self, system: &str, history: &[Turn], prompt: &str) -> Result<String>;
}

/// 摘要是否为“没有相关信息”的占位结果
pub fn is_no_info(summary: &str) -> bool {
    let trimmed = summary.trim().trim_end_matches('.');
    trimmed.is_empty()
        || trimmed.eq_ignore_ascii_case(NO_RELEVANT_INFO.trim_end_matches('.'))
}

/// 基于 [`LlmClient`] 的实现
pub struct LlmInference {
    llm: Arc<dyn LlmClient>,
    summary_prompt: Box<dyn SummaryPromptBuilder>,
}

impl LlmInference {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self {
            llm,
            summary_prompt: Box::new(DefaultSummaryPrompt),
        }
    }

    /// 替换摘要提示词
    pub fn with_summary_prompt(mut self, prompt: impl SummaryPromptBuilder + 'static) -> Self {
        self.summary_prompt = Box::new(prompt);
        self
    }
}

#[async_trait]
impl Inference for LlmInference {
    async fn summarize(&self, history: &[LogEntry], focus: Option<&str>) -> Result<String> {
        let transcript = prompts::render_transcript(history);
        if transcript.is_empty() {
            return Err(StoreError::InsufficientData {
                needed: 1,
                available: 0,
            }
            .into());
        }
        let prompt = self.summary_prompt.build(&transcript, focus);
        debug!(entries = history.len(), focused = focus.is_some(), "请求摘要");
        self.llm
            .chat_with_options(
                vec![
                    Message::system(prompts::SUMMARY_SYSTEM.to_string()),
                    Message::user(prompt),
                ],
                ChatOptions::new(0.5, 1024),
            )
            .await
            .map(|s| s.trim().to_string())
    }

    async fn analyze_character(&self, messages: &[String]) -> Result<String> {
        if messages.len() < MIN_CHARACTER_MESSAGES {
            return Err(StoreError::InsufficientData {
                needed: MIN_CHARACTER_MESSAGES,
                available: messages.len(),
            }
            .into());
        }
        debug!(messages = messages.len(), "请求性格分析");
        self.llm
            .chat_with_options(
                vec![
                    Message::system(prompts::CHARACTER_SYSTEM.to_string()),
                    Message::user(prompts::character_prompt(messages)),
                ],
                ChatOptions::new(0.5, 256),
            )
            .await
            .map(|s| s.trim().to_string())
    }

    async fn generate_reply(&self, system: &str, history: &[Turn], prompt: &str) -> Result<String> {
        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(Message::system(system.to_string()));
        for turn in history {
            messages.push(match turn.role {
                TurnRole::Assistant => Message::assistant(turn.text.clone()),
                TurnRole::User => {
                    let speaker = turn
                        .user
                        .as_ref()
                        .map(|u| u.display_name.as_str())
                        .unwrap_or("user");
                    Message::user(format!("{}: {}", speaker, turn.text))
                }
            });
        }
        messages.push(Message::user(prompt.to_string()));
        self.llm
            .chat_with_options(messages, ChatOptions::new(0.7, 1500))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::UserSnapshot;
    use crate::testing::MockLlmClient;

    #[test]
    fn test_no_info_detection() {
        assert!(is_no_info("No relevant information found."));
        assert!(is_no_info("  no relevant information found  "));
        assert!(is_no_info(""));
        assert!(!is_no_info("Anna proposed pizza on Friday."));
    }

    #[tokio::test]
    async fn test_summarize_sends_transcript_and_focus() {
        let llm = Arc::new(MockLlmClient::new().with_response("  Anna wants pizza.  "));
        let inference = LlmInference::new(llm.clone());
        let anna = UserSnapshot::new(1, "Anna", Some("anna".into()));
        let history = vec![LogEntry::new(7, &anna, Some("pizza friday?".into()))];

        let summary = inference.summarize(&history, Some("dinner")).await.unwrap();
        assert_eq!(summary, "Anna wants pizza.");

        let sent = llm.last_messages().unwrap();
        assert_eq!(sent[0].role, "system");
        let prompt = sent[1].content.clone().unwrap();
        assert!(prompt.contains("Anna (@anna): pizza friday?"));
        assert!(prompt.contains("\"dinner\""));
    }

    #[tokio::test]
    async fn test_summarize_without_text_does_not_call_llm() {
        let llm = Arc::new(MockLlmClient::new());
        let inference = LlmInference::new(llm.clone());
        let anna = UserSnapshot::new(1, "Anna", None);
        let history = vec![LogEntry::new(7, &anna, None)];

        assert!(inference.summarize(&history, None).await.is_err());
        assert_eq!(llm.call_count(), 0);
    }

    #[tokio::test]
    async fn test_character_needs_three_messages() {
        let llm = Arc::new(MockLlmClient::new().with_response("Playful and informal."));
        let inference = LlmInference::new(llm.clone());

        let two = vec!["a".to_string(), "b".to_string()];
        assert!(inference.analyze_character(&two).await.is_err());
        assert_eq!(llm.call_count(), 0);

        let three = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        assert_eq!(
            inference.analyze_character(&three).await.unwrap(),
            "Playful and informal."
        );
    }

    #[tokio::test]
    async fn test_reply_includes_buffer_history() {
        let llm = Arc::new(MockLlmClient::new().with_response("Sure!"));
        let inference = LlmInference::new(llm.clone());
        let history = vec![
            Turn::user("hello", UserSnapshot::new(1, "Anna", None)),
            Turn::assistant("hi Anna"),
        ];

        let reply = inference
            .generate_reply("be nice", &history, "can you help?")
            .await
            .unwrap();
        assert_eq!(reply, "Sure!");

        let sent = llm.last_messages().unwrap();
        let roles: Vec<_> = sent.iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, vec!["system", "user", "assistant", "user"]);
        assert_eq!(sent[1].content.as_deref(), Some("Anna: hello"));
    }

    #[tokio::test]
    async fn test_llm_error_propagates() {
        let llm = Arc::new(MockLlmClient::new().with_network_error("offline"));
        let inference = LlmInference::new(llm);
        let result = inference.generate_reply("sys", &[], "hi").await;
        assert!(result.is_err());
    }
}
