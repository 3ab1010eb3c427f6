//! 只追加的消息日志
//!
//! 日志是唯一的事实来源：会话缓冲、上下文缓存和用户画像都是从这里派生出来、
//! 可能落后于它的缓存。
//!
//! | 类型 | 作用 |
//! |------|------|
//! | [`LogEntry`] | 一行日志，写入后不可修改 |
//! | [`UserSnapshot`] | 某一时刻的用户身份信息（可附带画像描述） |
//! | [`LogStore`] | 按天分文件追加，读取时扫描全部文件 |

pub mod log_store;

pub use log_store::LogStore;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type ChatId = i64;
pub type UserId = i64;

/// 命令消息的保留前缀
pub const COMMAND_MARKER: char = '/';

/// chat 类型
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChatKind {
    Private,
    Group,
    Supergroup,
    Channel,
}

impl ChatKind {
    pub fn is_group(&self) -> bool {
        matches!(self, ChatKind::Group | ChatKind::Supergroup)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ChatKind::Private => "private",
            ChatKind::Group => "group",
            ChatKind::Supergroup => "supergroup",
            ChatKind::Channel => "channel",
        }
    }
}

/// 用户身份快照
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct UserSnapshot {
    pub id: UserId,
    pub display_name: String,
    #[serde(default)]
    pub username: Option<String>,
    /// 最近一次分析得到的性格描述
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub character: Option<String>,
}

impl UserSnapshot {
    pub fn new(id: UserId, display_name: impl Into<String>, username: Option<String>) -> Self {
        Self {
            id,
            display_name: display_name.into(),
            username: username.filter(|u| !u.is_empty()),
            character: None,
        }
    }

    /// `Alice (@alice)` 形式的称呼
    pub fn label(&self) -> String {
        match &self.username {
            Some(username) => format!("{} (@{})", self.display_name, username),
            None => self.display_name.clone(),
        }
    }
}

/// 单条日志记录
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub message_id: Option<i64>,
    pub chat_id: ChatId,
    #[serde(default)]
    pub chat_kind: Option<ChatKind>,
    pub user_id: UserId,
    #[serde(default, alias = "user_first_name")]
    pub user_display_name: String,
    #[serde(default)]
    pub username: Option<String>,
    /// 非文本事件（图片、贴纸等）没有文本
    #[serde(default)]
    pub text: Option<String>,
}

impl LogEntry {
    pub fn new(chat_id: ChatId, user: &UserSnapshot, text: Option<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            message_id: None,
            chat_id,
            chat_kind: None,
            user_id: user.id,
            user_display_name: user.display_name.clone(),
            username: user.username.clone(),
            text,
        }
    }

    pub fn user(&self) -> UserSnapshot {
        UserSnapshot::new(
            self.user_id,
            self.user_display_name.clone(),
            self.username.clone(),
        )
    }

    /// 可以作为画像分析输入的文本
    pub fn eligible_text(&self) -> Option<&str> {
        self.text.as_deref().filter(|t| is_eligible_text(t))
    }
}

pub fn is_command(text: &str) -> bool {
    text.trim_start().starts_with(COMMAND_MARKER)
}

/// 非空且不是命令
pub fn is_eligible_text(text: &str) -> bool {
    !text.trim().is_empty() && !is_command(text)
}
