//! 聊天通道
//!
//! 核心逻辑只依赖 [`Transport`]：拉取入站消息、发送回复、发送“正在输入”状态。
//! [`TelegramTransport`] 是基于 Bot API 长轮询的实现。

pub mod telegram;

pub use telegram::TelegramTransport;

use crate::error::Result;
use crate::history::{ChatId, ChatKind, UserId, UserSnapshot};
use async_trait::async_trait;

/// 助手自己的账号
#[derive(Debug, Clone, PartialEq)]
pub struct BotIdentity {
    pub id: UserId,
    pub username: String,
}

/// 入站消息
#[derive(Debug, Clone, PartialEq)]
pub struct InboundTurn {
    pub message_id: i64,
    pub chat_id: ChatId,
    pub chat_kind: ChatKind,
    pub user: UserSnapshot,
    /// 非文本消息为 `None`
    pub text: Option<String>,
    /// 被回复消息的作者
    pub reply_to_user: Option<UserSnapshot>,
}

impl InboundTurn {
    /// 解析 `/name@bot args`，返回 `(name, bot, args)`
    pub fn command(&self) -> Option<Command<'_>> {
        let text = self.text.as_deref()?.trim_start();
        let body = text.strip_prefix('/')?;
        let (head, args) = match body.split_once(char::is_whitespace) {
            Some((head, args)) => (head, args.trim()),
            None => (body, ""),
        };
        let (name, target) = match head.split_once('@') {
            Some((name, target)) => (name, Some(target)),
            None => (head, None),
        };
        if name.is_empty() {
            return None;
        }
        Some(Command { name, target, args })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Command<'a> {
    pub name: &'a str,
    /// `/cmd@bot` 中的 bot 用户名
    pub target: Option<&'a str>,
    pub args: &'a str,
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// 助手账号信息
    async fn identity(&self) -> Result<BotIdentity>;

    /// 拉取下一批入站消息；长轮询超时由实现方控制
    async fn poll(&self) -> Result<Vec<InboundTurn>>;

    async fn send(&self, chat_id: ChatId, text: &str, reply_to: Option<i64>) -> Result<()>;

    async fn send_typing(&self, chat_id: ChatId) -> Result<()>;
}

/// 把超长文本拆成不超过 `max_len` 个字符的若干段
///
/// 优先在句末切分，其次在空白处，最后硬切。从第二段开始加 `(part i/n) ` 前缀，
/// 前缀也计入长度。
pub fn split_message(text: &str, max_len: usize) -> Vec<String> {
    if text.chars().count() <= max_len {
        return vec![text.to_string()];
    }

    let mut total = 2;
    let mut parts = Vec::new();
    // 段数的位数变化会改变前缀长度，迭代到稳定为止
    for _ in 0..4 {
        let reserve = marker(total, total).chars().count();
        parts = chunk(text, max_len, max_len.saturating_sub(reserve).max(1));
        if marker(parts.len(), parts.len()).chars().count() <= reserve {
            break;
        }
        total = parts.len();
    }

    let n = parts.len();
    parts
        .into_iter()
        .enumerate()
        .map(|(i, part)| {
            if i == 0 {
                part
            } else {
                format!("{}{}", marker(i + 1, n), part)
            }
        })
        .collect()
}

fn marker(i: usize, n: usize) -> String {
    format!("(part {i}/{n}) ")
}

fn chunk(text: &str, first_limit: usize, rest_limit: usize) -> Vec<String> {
    let mut parts = Vec::new();
    let mut rest = text.trim();
    while !rest.is_empty() {
        let limit = if parts.is_empty() { first_limit } else { rest_limit };
        if rest.chars().count() <= limit {
            parts.push(rest.to_string());
            break;
        }
        let cut = cut_point(rest, limit);
        parts.push(rest[..cut].trim_end().to_string());
        rest = rest[cut..].trim_start();
    }
    parts
}

/// `limit` 个字符以内的最佳切分字节位置
fn cut_point(text: &str, limit: usize) -> usize {
    let window_end = text
        .char_indices()
        .nth(limit)
        .map(|(idx, _)| idx)
        .unwrap_or(text.len());
    let window = &text[..window_end];
    let min_chars = limit / 2;

    let sentence_end = window
        .char_indices()
        .filter(|&(idx, c)| {
            matches!(c, '.' | '!' | '?' | '\n')
                && window[idx + c.len_utf8()..]
                    .chars()
                    .next()
                    .is_none_or(char::is_whitespace)
        })
        .map(|(idx, c)| idx + c.len_utf8())
        .next_back();
    if let Some(cut) = sentence_end
        && window[..cut].chars().count() >= min_chars
    {
        return cut;
    }

    if let Some((idx, _)) = window.char_indices().filter(|&(_, c)| c.is_whitespace()).next_back()
        && window[..idx].chars().count() >= min_chars
    {
        return idx;
    }

    window_end
}
