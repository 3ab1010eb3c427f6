//! 前台消息处理
//!
//! 每条入站消息依次经过：写日志 → 更新画像计数 → 命令分发或写入会话缓冲 →
//! 到点时分析画像 → 被点名时生成回复。任何一步的错误都不会让轮询循环退出，
//! 用户最多看到一条通用的失败提示。

mod commands;
pub mod prompt;

use crate::conversation::Turn;
use crate::error::{RecallError, Result, TransportError};
use crate::history::{ChatId, LogEntry, UserSnapshot, is_eligible_text};
use crate::inference::REPLY_FALLBACK;
use crate::scheduler::sleep_or_cancel;
use crate::state::ChatState;
use crate::transport::{BotIdentity, InboundTurn, Transport, split_message};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// 处理消息出错时发给用户的文本
pub const GENERIC_FAILURE: &str = "Sorry, something went wrong while handling your message.";

/// 连续失败达到该次数后长时间等待并重新计数
const MAX_POLL_FAILURES: u32 = 10;

pub struct ChatBot {
    state: Arc<ChatState>,
    transport: Arc<dyn Transport>,
    identity: BotIdentity,
}

impl ChatBot {
    /// 获取助手身份后创建
    pub async fn connect(state: Arc<ChatState>, transport: Arc<dyn Transport>) -> Result<Self> {
        let identity = transport.identity().await?;
        info!(bot_id = identity.id, username = %identity.username, "🤖 已连接聊天通道");
        Ok(Self {
            state,
            transport,
            identity,
        })
    }

    /// 轮询循环；取消后返回 `Ok`，token 失效时返回错误
    pub async fn run(&self, token: CancellationToken) -> Result<()> {
        let mut failures = 0u32;
        loop {
            let polled = tokio::select! {
                _ = token.cancelled() => break,
                polled = self.transport.poll() => polled,
            };

            match polled {
                Ok(turns) => {
                    failures = 0;
                    for turn in turns {
                        self.handle(turn).await;
                    }
                }
                Err(RecallError::Transport(TransportError::Unauthorized(msg))) => {
                    error!(reason = %msg, "聊天通道拒绝了凭据，停止轮询");
                    return Err(TransportError::Unauthorized(msg).into());
                }
                Err(e) => {
                    failures += 1;
                    let wait = poll_backoff(failures);
                    warn!(error = %e, failures, wait = ?wait, "轮询失败，稍后重试");
                    if failures >= MAX_POLL_FAILURES {
                        failures = 0;
                    }
                    if !sleep_or_cancel(wait, &token).await {
                        break;
                    }
                }
            }
        }
        info!("轮询循环已停止");
        Ok(())
    }

    /// 处理一条入站消息；错误在这里兜底
    pub async fn handle(&self, turn: InboundTurn) {
        if let Err(e) = self.process(&turn).await {
            error!(chat_id = turn.chat_id, message_id = turn.message_id, error = %e, "处理消息失败");
            if let Err(e) = self
                .transport
                .send(turn.chat_id, GENERIC_FAILURE, Some(turn.message_id))
                .await
            {
                warn!(chat_id = turn.chat_id, error = %e, "失败提示发送失败");
            }
        }
    }

    async fn process(&self, turn: &InboundTurn) -> Result<()> {
        self.ingest(turn).await;
        let state = &self.state;
        let observation = state
            .profiles
            .observe(turn.chat_id, &turn.user, turn.text.as_deref())
            .await;

        if let Some(command) = turn.command() {
            let ours = command
                .target
                .is_none_or(|t| t.eq_ignore_ascii_case(&self.identity.username));
            if ours {
                return commands::dispatch(self, turn, command).await;
            }
            return Ok(());
        }

        let Some(text) = turn.text.as_deref().filter(|t| is_eligible_text(t)) else {
            return Ok(());
        };

        // 回复使用的历史不包含当前这条
        let history = state.buffer.snapshot(turn.chat_id).await;
        let mut user = observation.profile.snapshot();
        state
            .buffer
            .append(turn.chat_id, Turn::user(text, user.clone()))
            .await;

        if observation.analysis_due {
            match state.profiles.analyze_from_log(turn.chat_id, user.id).await {
                Ok(description) => user.character = Some(description),
                Err(e) => warn!(chat_id = turn.chat_id, user_id = user.id, error = %e, "画像分析失败"),
            }
        }

        match self.addressed_prompt(turn, text) {
            Some(prompt) => self.respond(turn, &user, &prompt, &history).await,
            None => Ok(()),
        }
    }

    /// 写日志失败不影响后续处理
    async fn ingest(&self, turn: &InboundTurn) {
        let mut entry = LogEntry::new(turn.chat_id, &turn.user, turn.text.clone());
        entry.message_id = Some(turn.message_id);
        entry.chat_kind = Some(turn.chat_kind);
        if let Err(e) = self.state.log.append(entry).await {
            warn!(chat_id = turn.chat_id, error = %e, "消息写入日志失败");
        }
    }

    /// 需要回复时返回去掉点名后的问题
    fn addressed_prompt(&self, turn: &InboundTurn, text: &str) -> Option<String> {
        if !turn.chat_kind.is_group() {
            return Some(text.trim().to_string());
        }
        let replied_to_us = turn
            .reply_to_user
            .as_ref()
            .is_some_and(|u| u.id == self.identity.id);
        let stripped = strip_mention(text, &self.identity.username);
        match stripped {
            Some(prompt) if !prompt.is_empty() => Some(prompt),
            Some(_) => None,
            None if replied_to_us => Some(text.trim().to_string()),
            None => None,
        }
    }

    async fn respond(
        &self,
        turn: &InboundTurn,
        user: &UserSnapshot,
        prompt: &str,
        history: &[Turn],
    ) -> Result<()> {
        let state = &self.state;
        if let Err(e) = self.transport.send_typing(turn.chat_id).await {
            debug!(chat_id = turn.chat_id, error = %e, "typing 状态发送失败");
        }

        let context = state.cache.resolve(turn.chat_id, prompt).await;
        let system = prompt::system_instructions(&state.config, user, &context, Utc::now());

        let reply = match state.inference.generate_reply(&system, history, prompt).await {
            Ok(reply) if !reply.trim().is_empty() => {
                state
                    .buffer
                    .append(turn.chat_id, Turn::assistant(reply.clone()))
                    .await;
                reply
            }
            Ok(_) => REPLY_FALLBACK.to_string(),
            Err(e) => {
                warn!(chat_id = turn.chat_id, error = %e, "回复生成失败");
                REPLY_FALLBACK.to_string()
            }
        };
        self.deliver(turn.chat_id, &reply, Some(turn.message_id)).await
    }

    /// 按长度限制拆分后依次发送，第一段回复原消息
    async fn deliver(&self, chat_id: ChatId, text: &str, reply_to: Option<i64>) -> Result<()> {
        let parts = split_message(text, self.state.config.max_message_len);
        for (i, part) in parts.iter().enumerate() {
            let reply_to = if i == 0 { reply_to } else { None };
            self.transport.send(chat_id, part, reply_to).await?;
        }
        Ok(())
    }
}

/// 第 n 次连续失败后的等待：5 秒起翻倍，最多 60 秒；达到上限次数后等 120 秒
pub fn poll_backoff(failures: u32) -> Duration {
    if failures >= MAX_POLL_FAILURES {
        return Duration::from_secs(120);
    }
    let exponent = failures.saturating_sub(1).min(8);
    Duration::from_secs((5u64 << exponent).min(60))
}

/// 去掉 `@username`；文本中没有点名时返回 `None`
fn strip_mention(text: &str, username: &str) -> Option<String> {
    if username.is_empty() {
        return None;
    }
    let needle = format!("@{}", username.to_ascii_lowercase());
    let lowered = text.to_ascii_lowercase();
    if !lowered.contains(&needle) {
        return None;
    }

    let mut result = String::with_capacity(text.len());
    let mut last = 0;
    for (start, _) in lowered.match_indices(&needle) {
        result.push_str(&text[last..start]);
        last = start + needle.len();
    }
    result.push_str(&text[last..]);
    Some(result.split_whitespace().collect::<Vec<_>>().join(" "))
}
