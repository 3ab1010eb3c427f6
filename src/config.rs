//! 运行时配置
//!
//! 三层叠加：内置默认值 → 可选 YAML 文件 → 环境变量（启动时先加载 `.env`）。
//! 命令行参数在 `main` 中最后覆盖。
//!
//! ```yaml
//! log_dir: logs
//! data_dir: data
//! freshness_window_secs: 300
//! response_style: strict
//! admin_ids: [12345678]
//! ```
//!
//! 环境变量：`BOT_TOKEN`、`LLM_MODEL`、`LLM_BASE_URL`、`LLM_API_KEY`、
//! `SKIP_INITIAL_CHARACTER_ANALYSIS`。

use crate::error::{ConfigError, Result};
use crate::llm::config::ModelConfig;
use dotenv::dotenv;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// 回复时允许使用通用知识的程度
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStyle {
    /// 只依据对话中出现过的事实作答
    #[default]
    Strict,
    /// 允许补充通用知识
    Permissive,
}

impl std::str::FromStr for ResponseStyle {
    type Err = ConfigError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "strict" => Ok(Self::Strict),
            "permissive" => Ok(Self::Permissive),
            other => Err(ConfigError::InvalidValue {
                field: "response_style".to_string(),
                message: format!("unknown style '{}'", other),
            }),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct Config {
    /// 每日日志文件所在目录
    pub log_dir: PathBuf,
    /// 画像 / 会话快照 / 上下文缓存所在目录
    pub data_dir: PathBuf,
    pub freshness_window_secs: u64,
    pub context_refresh_interval_secs: u64,
    /// 上下文刷新一轮整体失败后的退避时间
    pub context_refresh_backoff_secs: u64,
    pub profile_refresh_interval_secs: u64,
    pub profile_refresh_backoff_secs: u64,
    /// 画像刷新首轮前的等待
    pub profile_startup_delay_secs: u64,
    /// 跳过启动时的画像补全分析，并把首轮画像刷新推迟一个完整周期
    pub skip_initial_profile_analysis: bool,
    pub autosave_interval_secs: u64,
    /// 每个 chat 的会话缓冲容量
    pub buffer_capacity: usize,
    /// 每累计多少条消息重新分析一次画像
    pub profile_batch_size: usize,
    /// 画像分析所需的最少消息数
    pub profile_min_sample: usize,
    /// 单次画像分析最多使用的消息数
    pub profile_sample_limit: usize,
    /// 单条消息触发的即时摘要最多读取的日志条数
    pub quick_context_limit: usize,
    /// 周期刷新时摘要最多读取的日志条数
    pub full_context_limit: usize,
    /// 单条出站消息的最大字符数
    pub max_message_len: usize,
    pub response_style: ResponseStyle,
    pub reply_language: String,
    /// 可以使用 `/logs` 的用户
    pub admin_ids: Vec<i64>,
    pub bot_token: Option<String>,
    pub model: Option<ModelConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from("logs"),
            data_dir: PathBuf::from("data"),
            freshness_window_secs: 300,
            context_refresh_interval_secs: 1800,
            context_refresh_backoff_secs: 30,
            profile_refresh_interval_secs: 1800,
            profile_refresh_backoff_secs: 300,
            profile_startup_delay_secs: 60,
            skip_initial_profile_analysis: false,
            autosave_interval_secs: 600,
            buffer_capacity: 100,
            profile_batch_size: 10,
            profile_min_sample: 5,
            profile_sample_limit: 50,
            quick_context_limit: 100,
            full_context_limit: 500,
            max_message_len: 4000,
            response_style: ResponseStyle::Strict,
            reply_language: "English".to_string(),
            admin_ids: Vec::new(),
            bot_token: None,
            model: None,
        }
    }
}

impl Config {
    /// 读取 YAML 配置文件；未给出路径时使用默认值
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let file = std::fs::File::open(path)
            .map_err(|_| ConfigError::FileNotFound(path.display().to_string()))?;
        let config: Config = serde_yaml::from_reader(file)?;
        Ok(config)
    }

    /// 用环境变量覆盖密钥类配置
    pub fn with_env(mut self) -> Result<Self> {
        dotenv().ok();

        if let Some(token) = non_empty_var("BOT_TOKEN") {
            self.bot_token = Some(token);
        }
        if let Some(flag) = non_empty_var("SKIP_INITIAL_CHARACTER_ANALYSIS") {
            self.skip_initial_profile_analysis = flag.eq_ignore_ascii_case("true");
        }
        if let Some(style) = non_empty_var("RESPONSE_STYLE") {
            self.response_style = style.parse()?;
        }

        let model = non_empty_var("LLM_MODEL");
        let base_url = non_empty_var("LLM_BASE_URL");
        let api_key = non_empty_var("LLM_API_KEY");
        if model.is_some() || base_url.is_some() || api_key.is_some() {
            let current = self.model.take().unwrap_or_default();
            self.model = Some(ModelConfig {
                model: model.unwrap_or(current.model),
                base_url: base_url.unwrap_or(current.base_url),
                api_key: api_key.unwrap_or(current.api_key),
                timeout_secs: current.timeout_secs,
            });
        }
        Ok(self)
    }

    /// 检查策略常量的取值
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("buffer_capacity", self.buffer_capacity),
            ("profile_batch_size", self.profile_batch_size),
            ("profile_min_sample", self.profile_min_sample),
            ("quick_context_limit", self.quick_context_limit),
            ("full_context_limit", self.full_context_limit),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    message: "must be greater than zero".to_string(),
                }
                .into());
            }
        }
        // 至少要能放下 "(part 99/99) " 之类的前缀和一个字符
        if self.max_message_len < 32 {
            return Err(ConfigError::InvalidValue {
                field: "max_message_len".to_string(),
                message: "must be at least 32".to_string(),
            }
            .into());
        }
        Ok(())
    }

    /// 启动 Bot 时必须存在的 token
    pub fn require_bot_token(&self) -> Result<&str> {
        self.bot_token
            .as_deref()
            .ok_or_else(|| ConfigError::MissingField("bot_token".to_string()).into())
    }

    /// 未配置时使用本地 OpenAI 兼容服务
    pub fn model_config(&self) -> ModelConfig {
        self.model.clone().unwrap_or_default()
    }

    pub fn freshness_window(&self) -> Duration {
        Duration::from_secs(self.freshness_window_secs)
    }

    pub fn context_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.context_refresh_interval_secs)
    }

    pub fn context_refresh_backoff(&self) -> Duration {
        Duration::from_secs(self.context_refresh_backoff_secs)
    }

    pub fn profile_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.profile_refresh_interval_secs)
    }

    pub fn profile_refresh_backoff(&self) -> Duration {
        Duration::from_secs(self.profile_refresh_backoff_secs)
    }

    /// 首轮画像刷新前的等待；跳过首轮时等待一个完整周期
    pub fn profile_first_pass_delay(&self) -> Duration {
        if self.skip_initial_profile_analysis {
            self.profile_refresh_interval()
        } else {
            Duration::from_secs(self.profile_startup_delay_secs)
        }
    }

    pub fn autosave_interval(&self) -> Duration {
        Duration::from_secs(self.autosave_interval_secs)
    }

    pub fn profiles_path(&self) -> PathBuf {
        self.data_dir.join("user_data.json")
    }

    pub fn conversations_path(&self) -> PathBuf {
        self.data_dir.join("conversations.json")
    }

    pub fn context_cache_dir(&self) -> PathBuf {
        self.data_dir.join("context_cache")
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_match_observed_policy() {
        let config = Config::default();
        assert_eq!(config.freshness_window(), Duration::from_secs(300));
        assert_eq!(config.context_refresh_interval(), Duration::from_secs(1800));
        assert_eq!(config.buffer_capacity, 100);
        assert_eq!(config.profile_batch_size, 10);
        assert_eq!(config.profile_min_sample, 5);
        assert_eq!(config.max_message_len, 4000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_yaml_partial_override() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            "buffer_capacity: 20\nresponse_style: permissive\nadmin_ids: [1, 2]"
        )
        .unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.buffer_capacity, 20);
        assert_eq!(config.response_style, ResponseStyle::Permissive);
        assert_eq!(config.admin_ids, vec![1, 2]);
        // 未出现的字段保留默认值
        assert_eq!(config.profile_batch_size, 10);
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let err = Config::load(Some(Path::new("/definitely/not/here.yaml"))).unwrap_err();
        assert!(matches!(
            err,
            crate::error::RecallError::Config(ConfigError::FileNotFound(_))
        ));
    }

    #[test]
    fn test_validate_rejects_zero_batch() {
        let config = Config {
            profile_batch_size: 0,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_skip_initial_defers_first_profile_pass() {
        let config = Config {
            skip_initial_profile_analysis: true,
            ..Config::default()
        };
        assert_eq!(
            config.profile_first_pass_delay(),
            config.profile_refresh_interval()
        );
    }

    #[test]
    fn test_missing_token_is_reported() {
        let config = Config::default();
        assert!(config.require_bot_token().is_err());
    }
}
