//! 每个 chat 的对话摘要缓存
//!
//! 摘要在 [`ContextCache::regenerate`] 成功后立即写入
//! `context_cache/context_<chat_id>.json`。读取从不阻塞在重新生成上：
//! [`ContextCache::get`] 只返回当前值和是否新鲜。
//!
//! 生成失败或得到空摘要时保留原有条目，`generated_at` 不会后退。
//! 同一 chat 的写盘按 chat 串行，磁盘上只会留下较新的摘要。

use crate::error::{LlmError, Result, StoreError};
use crate::history::{ChatId, LogStore};
use crate::inference::{Inference, NO_RELEVANT_INFO, is_no_info};
use crate::storage;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

const FILE_PREFIX: &str = "context_";
const FILE_SUFFIX: &str = ".json";

/// 内存中的缓存条目
#[derive(Debug, Clone, PartialEq)]
pub struct ContextCacheEntry {
    pub summary: String,
    pub generated_at: DateTime<Utc>,
    /// 生成时参与摘要的日志条数
    pub source_message_count: usize,
}

/// 磁盘格式；生成时间取文件修改时间
#[derive(Debug, Serialize, Deserialize)]
struct PersistedContext {
    summary: String,
    #[serde(default)]
    source_message_count: usize,
}

/// [`ContextCache::get`] 的结果
#[derive(Debug, Clone, PartialEq)]
pub struct ContextLookup {
    pub summary: String,
    pub is_fresh: bool,
    pub generated_at: DateTime<Utc>,
    pub source_message_count: usize,
}

/// 重新生成时读取的日志范围
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegenerateScope {
    /// 响应单条消息，读取较少的最近记录
    Quick,
    /// 周期刷新，读取更长的历史
    Full,
}

#[derive(Debug, Clone, Copy)]
pub struct ContextLimits {
    pub quick: usize,
    pub full: usize,
}

impl Default for ContextLimits {
    fn default() -> Self {
        Self {
            quick: 100,
            full: 500,
        }
    }
}

pub struct ContextCache {
    dir: PathBuf,
    freshness_window: Duration,
    limits: ContextLimits,
    log: Arc<LogStore>,
    inference: Arc<dyn Inference>,
    entries: RwLock<HashMap<ChatId, ContextCacheEntry>>,
    /// 每个 chat 最近一次写盘的条目
    persisted: Mutex<HashMap<ChatId, Arc<Mutex<Option<ContextCacheEntry>>>>>,
}

impl ContextCache {
    pub fn new(
        dir: impl AsRef<Path>,
        freshness_window: Duration,
        limits: ContextLimits,
        log: Arc<LogStore>,
        inference: Arc<dyn Inference>,
    ) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            freshness_window,
            limits,
            log,
            inference,
            entries: RwLock::new(HashMap::new()),
            persisted: Mutex::new(HashMap::new()),
        }
    }

    /// 读取目录中全部缓存文件，返回加载的条目数
    ///
    /// 无法读取或解析的文件跳过并记录警告。
    pub async fn load_all(&self) -> Result<usize> {
        let mut dir = match tokio::fs::read_dir(&self.dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => {
                return Err(StoreError::IoError(format!(
                    "读取 {} 失败: {e}",
                    self.dir.display()
                ))
                .into());
            }
        };

        let mut loaded = HashMap::new();
        while let Some(item) = dir.next_entry().await? {
            let path = item.path();
            let Some(chat_id) = chat_id_from_path(&path) else {
                continue;
            };
            let persisted = match storage::read_json::<PersistedContext>(&path).await {
                Ok(Some(persisted)) => persisted,
                Ok(None) => continue,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "跳过无法读取的上下文缓存");
                    continue;
                }
            };
            let generated_at = match item.metadata().await.and_then(|m| m.modified()) {
                Ok(modified) => DateTime::<Utc>::from(modified),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "无法读取修改时间，视为已过期");
                    DateTime::<Utc>::UNIX_EPOCH
                }
            };
            loaded.insert(
                chat_id,
                ContextCacheEntry {
                    summary: persisted.summary,
                    generated_at,
                    source_message_count: persisted.source_message_count,
                },
            );
        }

        let count = loaded.len();
        self.entries.write().await.extend(loaded);
        info!(dir = %self.dir.display(), chats = count, "🗂️ 上下文缓存已加载");
        Ok(count)
    }

    /// 当前缓存值；从不触发重新生成
    pub async fn get(&self, chat_id: ChatId) -> Option<ContextLookup> {
        let entries = self.entries.read().await;
        let entry = entries.get(&chat_id)?;
        Some(ContextLookup {
            summary: entry.summary.clone(),
            is_fresh: self.is_fresh(entry.generated_at, Utc::now()),
            generated_at: entry.generated_at,
            source_message_count: entry.source_message_count,
        })
    }

    /// 从日志重新生成摘要
    ///
    /// 成功后写入内存和磁盘；磁盘写入失败只记录警告。得到“没有相关信息”时
    /// 不覆盖已有摘要，但仍把它返回给调用方。
    pub async fn regenerate(
        &self,
        chat_id: ChatId,
        scope: RegenerateScope,
        focus: Option<&str>,
    ) -> Result<String> {
        let mut history = self.log.read_chat_history(chat_id).await?;
        if history.is_empty() {
            return Err(StoreError::EmptyHistory(chat_id).into());
        }
        let limit = match scope {
            RegenerateScope::Quick => self.limits.quick,
            RegenerateScope::Full => self.limits.full,
        };
        let window = history.split_off(history.len().saturating_sub(limit));

        let summary = self.inference.summarize(&window, focus).await?;
        let summary = summary.trim().to_string();
        if summary.is_empty() {
            return Err(LlmError::EmptyResponse.into());
        }

        let entry = {
            let mut entries = self.entries.write().await;
            let previous = entries.get(&chat_id);
            if is_no_info(&summary) && previous.is_some() {
                debug!(chat_id, "摘要没有相关信息，保留已有条目");
                return Ok(summary);
            }
            let now = Utc::now();
            let generated_at = previous.map_or(now, |p| p.generated_at.max(now));
            let entry = ContextCacheEntry {
                summary: summary.clone(),
                generated_at,
                source_message_count: window.len(),
            };
            entries.insert(chat_id, entry.clone());
            entry
        };

        if let Err(e) = self.persist(chat_id).await {
            warn!(chat_id, error = %e, "上下文缓存写入磁盘失败");
        }
        debug!(chat_id, ?scope, messages = entry.source_message_count, "📝 上下文摘要已更新");
        Ok(summary)
    }

    /// 回复前解析上下文：新鲜值直接用；否则带焦点快速重新生成；
    /// 失败时退回旧值；都没有时返回 [`NO_RELEVANT_INFO`]
    pub async fn resolve(&self, chat_id: ChatId, focus: &str) -> String {
        let current = self.get(chat_id).await;
        if let Some(lookup) = &current
            && lookup.is_fresh
        {
            return lookup.summary.clone();
        }

        match self
            .regenerate(chat_id, RegenerateScope::Quick, Some(focus))
            .await
        {
            Ok(summary) if !is_no_info(&summary) => summary,
            Ok(_) => current
                .map(|l| l.summary)
                .unwrap_or_else(|| NO_RELEVANT_INFO.to_string()),
            Err(e) => {
                warn!(chat_id, error = %e, "即时摘要失败，使用已有上下文");
                current
                    .map(|l| l.summary)
                    .unwrap_or_else(|| NO_RELEVANT_INFO.to_string())
            }
        }
    }

    fn is_fresh(&self, generated_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        let Ok(age) = now.signed_duration_since(generated_at).to_std() else {
            // 生成时间在未来（时钟回拨）
            return true;
        };
        age < self.freshness_window
    }

    /// 把内存中的当前条目写入磁盘
    ///
    /// 同一 chat 的写入串行执行，且总是写当时最新的条目；该条目已经写过时
    /// 跳过。返回是否写入。
    async fn persist(&self, chat_id: ChatId) -> Result<bool> {
        let slot = self
            .persisted
            .lock()
            .await
            .entry(chat_id)
            .or_default()
            .clone();
        let mut last_written = slot.lock().await;
        let Some(current) = self.entries.read().await.get(&chat_id).cloned() else {
            return Ok(false);
        };
        if last_written.as_ref() == Some(&current) {
            debug!(chat_id, "磁盘上已是最新摘要，跳过写入");
            return Ok(false);
        }

        let path = self.dir.join(format!("{FILE_PREFIX}{chat_id}{FILE_SUFFIX}"));
        let persisted = PersistedContext {
            summary: current.summary.clone(),
            source_message_count: current.source_message_count,
        };
        storage::write_json_atomic(&path, &persisted).await?;
        *last_written = Some(current);
        Ok(true)
    }
}

fn chat_id_from_path(path: &Path) -> Option<ChatId> {
    path.file_name()?
        .to_str()?
        .strip_prefix(FILE_PREFIX)?
        .strip_suffix(FILE_SUFFIX)?
        .parse()
        .ok()
}
