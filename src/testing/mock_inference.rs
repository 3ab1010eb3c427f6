//! 可脚本化的 [`Inference`]
//!
//! 没有预设结果时返回可预测的默认文本：
//! `summary of N messages`、`character from N messages`、`reply to: <prompt>`。
//! [`set_failing`](MockInference::set_failing) 可以在测试中途让所有能力开始失败。

use crate::conversation::Turn;
use crate::error::{LlmError, RecallError, Result};
use crate::history::LogEntry;
use crate::inference::Inference;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

/// 一次 `summarize` 调用
#[derive(Debug, Clone, PartialEq)]
pub struct SummarizeCall {
    pub entries: usize,
    pub focus: Option<String>,
}

/// 一次 `generate_reply` 调用
#[derive(Debug, Clone, PartialEq)]
pub struct ReplyCall {
    pub system: String,
    pub history: Vec<Turn>,
    pub prompt: String,
}

#[derive(Default)]
pub struct MockInference {
    summaries: Mutex<VecDeque<String>>,
    characters: Mutex<VecDeque<String>>,
    replies: Mutex<VecDeque<String>>,
    failing: AtomicBool,
    summarize_calls: Mutex<Vec<SummarizeCall>>,
    character_calls: Mutex<Vec<Vec<String>>>,
    reply_calls: Mutex<Vec<ReplyCall>>,
}

impl MockInference {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_summary(self, text: impl Into<String>) -> Self {
        self.summaries.lock().unwrap().push_back(text.into());
        self
    }

    pub fn with_character(self, text: impl Into<String>) -> Self {
        self.characters.lock().unwrap().push_back(text.into());
        self
    }

    pub fn with_reply(self, text: impl Into<String>) -> Self {
        self.replies.lock().unwrap().push_back(text.into());
        self
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn summarize_calls(&self) -> Vec<SummarizeCall> {
        self.summarize_calls.lock().unwrap().clone()
    }

    pub fn character_calls(&self) -> Vec<Vec<String>> {
        self.character_calls.lock().unwrap().clone()
    }

    pub fn character_call_count(&self) -> usize {
        self.character_calls.lock().unwrap().len()
    }

    pub fn reply_calls(&self) -> Vec<ReplyCall> {
        self.reply_calls.lock().unwrap().clone()
    }

    fn check(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(RecallError::Llm(LlmError::NetworkError(
                "mock inference offline".to_string(),
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl Inference for MockInference {
    async fn summarize(&self, history: &[LogEntry], focus: Option<&str>) -> Result<String> {
        self.summarize_calls.lock().unwrap().push(SummarizeCall {
            entries: history.len(),
            focus: focus.map(str::to_string),
        });
        self.check()?;
        let scripted = self.summaries.lock().unwrap().pop_front();
        Ok(scripted.unwrap_or_else(|| format!("summary of {} messages", history.len())))
    }

    async fn analyze_character(&self, messages: &[String]) -> Result<String> {
        self.character_calls.lock().unwrap().push(messages.to_vec());
        self.check()?;
        let scripted = self.characters.lock().unwrap().pop_front();
        Ok(scripted.unwrap_or_else(|| format!("character from {} messages", messages.len())))
    }

    async fn generate_reply(&self, system: &str, history: &[Turn], prompt: &str) -> Result<String> {
        self.reply_calls.lock().unwrap().push(ReplyCall {
            system: system.to_string(),
            history: history.to_vec(),
            prompt: prompt.to_string(),
        });
        self.check()?;
        let scripted = self.replies.lock().unwrap().pop_front();
        Ok(scripted.unwrap_or_else(|| format!("reply to: {}", prompt)))
    }
}
