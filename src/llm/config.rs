//! 模型端点配置
//!
//! 兼容 OpenAI `/chat/completions` 协议的任意端点（OpenAI、DeepSeek、Ollama 的兼容接口等）。

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 单个模型的连接配置
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct ModelConfig {
    /// LLM 接口中使用的模型名（如 `gpt-4o`）
    pub model: String,
    /// API 根地址，会拼接 `/chat/completions`
    pub base_url: String,
    /// 本地模型可以留空
    pub api_key: String,
    /// 单次请求超时（秒）
    pub timeout_secs: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model: "llama3".to_string(),
            base_url: "http://localhost:11434/v1".to_string(),
            api_key: String::new(),
            timeout_secs: 120,
        }
    }
}

impl ModelConfig {
    pub fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completions_url_trims_trailing_slash() {
        let config = ModelConfig {
            base_url: "https://api.example.com/v1/".to_string(),
            ..ModelConfig::default()
        };
        assert_eq!(
            config.completions_url(),
            "https://api.example.com/v1/chat/completions"
        );
    }
}
