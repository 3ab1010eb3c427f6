//! 会话缓冲
//!
//! 每个 chat 保留最近 `capacity` 条对话（默认 100），超出时先丢弃最旧的。
//! 这个上限用于控制发给模型的提示长度，不负责限制日志规模。
//!
//! 只由前台消息处理路径修改；进程重启后可以从快照文件恢复，
//! 快照缺失也无妨，完整历史始终在日志里。

pub mod snapshot;

pub use snapshot::ConversationSnapshot;

use crate::history::{ChatId, UserSnapshot};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Assistant,
}

/// 一轮对话
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Turn {
    pub role: TurnRole,
    pub text: String,
    /// 发送者快照（助手回复为 `None`）
    #[serde(default)]
    pub user: Option<UserSnapshot>,
    pub at: DateTime<Utc>,
}

impl Turn {
    pub fn user(text: impl Into<String>, user: UserSnapshot) -> Self {
        Self {
            role: TurnRole::User,
            text: text.into(),
            user: Some(user),
            at: Utc::now(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: TurnRole::Assistant,
            text: text.into(),
            user: None,
            at: Utc::now(),
        }
    }
}

pub struct ConversationBuffer {
    capacity: usize,
    chats: RwLock<HashMap<ChatId, VecDeque<Turn>>>,
}

impl ConversationBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            chats: RwLock::new(HashMap::new()),
        }
    }

    pub async fn append(&self, chat_id: ChatId, turn: Turn) {
        let mut chats = self.chats.write().await;
        let turns = chats.entry(chat_id).or_default();
        turns.push_back(turn);
        while turns.len() > self.capacity {
            turns.pop_front();
        }
    }

    /// 当前缓冲内容，旧的在前
    pub async fn snapshot(&self, chat_id: ChatId) -> Vec<Turn> {
        self.chats
            .read()
            .await
            .get(&chat_id)
            .map(|turns| turns.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// 清空某个 chat 的缓冲，返回之前是否有内容
    ///
    /// 不影响日志和上下文缓存。
    pub async fn reset(&self, chat_id: ChatId) -> bool {
        let removed = self.chats.write().await.remove(&chat_id);
        let had_turns = removed.is_some_and(|turns| !turns.is_empty());
        debug!(chat_id, had_turns, "会话缓冲已清空");
        had_turns
    }

    pub async fn len(&self, chat_id: ChatId) -> usize {
        self.chats
            .read()
            .await
            .get(&chat_id)
            .map(VecDeque::len)
            .unwrap_or(0)
    }

    /// 全部 chat 的拷贝，供快照持久化使用
    pub async fn export(&self) -> HashMap<ChatId, Vec<Turn>> {
        self.chats
            .read()
            .await
            .iter()
            .map(|(chat_id, turns)| (*chat_id, turns.iter().cloned().collect()))
            .collect()
    }

    /// 用快照内容填充缓冲（每个 chat 只保留最近 `capacity` 条）
    pub async fn restore(&self, saved: HashMap<ChatId, Vec<Turn>>) {
        let mut chats = self.chats.write().await;
        for (chat_id, turns) in saved {
            let skip = turns.len().saturating_sub(self.capacity);
            chats.insert(chat_id, turns.into_iter().skip(skip).collect());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn anna() -> UserSnapshot {
        UserSnapshot::new(1, "Anna", None)
    }

    #[tokio::test]
    async fn test_overflow_keeps_last_hundred_oldest_first() {
        let buffer = ConversationBuffer::new(100);
        for i in 0..150 {
            buffer.append(7, Turn::user(format!("msg {i}"), anna())).await;
        }

        let turns = buffer.snapshot(7).await;
        assert_eq!(turns.len(), 100);
        assert_eq!(turns.first().unwrap().text, "msg 50");
        assert_eq!(turns.last().unwrap().text, "msg 149");
    }

    #[tokio::test]
    async fn test_chats_are_isolated_and_reset_is_scoped() {
        let buffer = ConversationBuffer::new(10);
        buffer.append(7, Turn::user("hello", anna())).await;
        buffer.append(7, Turn::assistant("hi Anna")).await;
        buffer.append(8, Turn::user("other chat", anna())).await;

        assert_eq!(buffer.len(7).await, 2);
        assert!(buffer.reset(7).await);
        assert!(buffer.snapshot(7).await.is_empty());
        assert_eq!(buffer.len(8).await, 1);
        assert!(!buffer.reset(7).await);
    }

    #[tokio::test]
    async fn test_restore_truncates_to_capacity() {
        let buffer = ConversationBuffer::new(3);
        let saved: Vec<Turn> = (0..5).map(|i| Turn::user(format!("m{i}"), anna())).collect();
        buffer.restore(HashMap::from([(7, saved)])).await;

        let texts: Vec<_> = buffer.snapshot(7).await.into_iter().map(|t| t.text).collect();
        assert_eq!(texts, vec!["m2", "m3", "m4"]);
        assert_eq!(buffer.export().await[&7].len(), 3);
    }
}
