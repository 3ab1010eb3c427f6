//! 按天分文件的 JSON Lines 日志
//!
//! 文件名为 `chat_log_YYYY-MM-DD.jsonl`（UTC 日期），每行一个 [`LogEntry`]。
//! 读取操作每次都扫描全部文件：读取频率是人类对话的量级，换来的是无索引、
//! 崩溃后无需修复的简单格式。
//!
//! - 单行解析失败只跳过该行
//! - 单个文件读取失败只跳过该文件
//! - 追加按调用顺序串行化，时间戳对本写入方单调不减

use super::{ChatId, LogEntry, UserId, UserSnapshot};
use crate::error::{Result, StoreError};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const FILE_PREFIX: &str = "chat_log_";
const FILE_SUFFIX: &str = ".jsonl";

pub struct LogStore {
    dir: PathBuf,
    /// 上一次成功写入的时间戳，同时充当写锁
    last_written: Mutex<Option<DateTime<Utc>>>,
}

impl LogStore {
    /// 打开日志目录，不存在时自动创建
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)
            .map_err(|e| StoreError::IoError(format!("创建日志目录失败: {e}")))?;
        info!(dir = %dir.display(), "📜 LogStore 初始化");
        Ok(Self {
            dir,
            last_written: Mutex::new(None),
        })
    }

    /// 追加一条记录，返回实际写入的记录（时间戳可能被上调）
    ///
    /// IO 错误原样返回，由调用方决定丢弃还是重试。
    pub async fn append(&self, mut entry: LogEntry) -> Result<LogEntry> {
        let mut last = self.last_written.lock().await;
        if let Some(prev) = *last
            && entry.timestamp < prev
        {
            entry.timestamp = prev;
        }

        let path = self.file_for(&entry.timestamp);
        let mut line = serde_json::to_string(&entry)?;
        line.push('\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| StoreError::IoError(format!("打开日志文件失败: {e}")))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| StoreError::IoError(format!("写入日志失败: {e}")))?;
        file.flush()
            .await
            .map_err(|e| StoreError::IoError(format!("写入日志失败: {e}")))?;

        *last = Some(entry.timestamp);
        debug!(chat_id = entry.chat_id, user_id = entry.user_id, file = %path.display(), "日志已追加");
        Ok(entry)
    }

    /// 某个 chat 的全部记录，按时间排序（同一时间戳保持文件顺序和行顺序）
    pub async fn read_chat_history(&self, chat_id: ChatId) -> Result<Vec<LogEntry>> {
        let mut entries: Vec<LogEntry> = self
            .scan()
            .await?
            .into_iter()
            .filter(|e| e.chat_id == chat_id)
            .collect();
        entries.sort_by_key(|e| e.timestamp);
        Ok(entries)
    }

    /// 某个用户在某个 chat 中的文本消息（排除命令和非文本事件）
    pub async fn read_user_history(&self, chat_id: ChatId, user_id: UserId) -> Result<Vec<LogEntry>> {
        let mut entries: Vec<LogEntry> = self
            .scan()
            .await?
            .into_iter()
            .filter(|e| e.chat_id == chat_id && e.user_id == user_id && e.eligible_text().is_some())
            .collect();
        entries.sort_by_key(|e| e.timestamp);
        Ok(entries)
    }

    /// chat → user → 身份信息；同一用户以最后出现的非空字段为准
    pub async fn extract_all_users(&self) -> Result<BTreeMap<ChatId, BTreeMap<UserId, UserSnapshot>>> {
        let mut entries = self.scan().await?;
        entries.sort_by_key(|e| e.timestamp);

        let mut users: BTreeMap<ChatId, BTreeMap<UserId, UserSnapshot>> = BTreeMap::new();
        for entry in entries {
            let snapshot = users
                .entry(entry.chat_id)
                .or_default()
                .entry(entry.user_id)
                .or_insert_with(|| entry.user());
            if !entry.user_display_name.is_empty() {
                snapshot.display_name = entry.user_display_name.clone();
            }
            if let Some(username) = entry.username.as_ref().filter(|u| !u.is_empty()) {
                snapshot.username = Some(username.clone());
            }
        }

        let total: usize = users.values().map(|u| u.len()).sum();
        debug!(chats = users.len(), users = total, "从日志中提取用户");
        Ok(users)
    }

    /// chat → user → 可用于画像分析的文本，按时间排序
    pub async fn extract_user_messages(
        &self,
    ) -> Result<BTreeMap<ChatId, BTreeMap<UserId, Vec<String>>>> {
        let mut entries = self.scan().await?;
        entries.sort_by_key(|e| e.timestamp);

        let mut messages: BTreeMap<ChatId, BTreeMap<UserId, Vec<String>>> = BTreeMap::new();
        for entry in &entries {
            if let Some(text) = entry.eligible_text() {
                messages
                    .entry(entry.chat_id)
                    .or_default()
                    .entry(entry.user_id)
                    .or_default()
                    .push(text.to_string());
            }
        }
        Ok(messages)
    }

    /// 日志中出现过的全部 chat
    pub async fn known_chats(&self) -> Result<Vec<ChatId>> {
        let chats: BTreeSet<ChatId> = self.scan().await?.iter().map(|e| e.chat_id).collect();
        Ok(chats.into_iter().collect())
    }

    pub async fn count_entries(&self) -> Result<usize> {
        Ok(self.scan().await?.len())
    }

    /// 全部 chat 中最近的 `limit` 条记录，旧的在前
    pub async fn recent_entries(&self, limit: usize) -> Result<Vec<LogEntry>> {
        let mut entries = self.scan().await?;
        entries.sort_by_key(|e| e.timestamp);
        let skip = entries.len().saturating_sub(limit);
        Ok(entries.split_off(skip))
    }

    fn file_for(&self, timestamp: &DateTime<Utc>) -> PathBuf {
        self.dir.join(format!(
            "{FILE_PREFIX}{}{FILE_SUFFIX}",
            timestamp.format("%Y-%m-%d")
        ))
    }

    /// 按文件名（即日期）升序列出日志文件
    async fn log_files(&self) -> Result<Vec<PathBuf>> {
        let mut dir = match tokio::fs::read_dir(&self.dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(vec![]),
            Err(e) => return Err(StoreError::IoError(format!("读取日志目录失败: {e}")).into()),
        };

        let mut files = Vec::new();
        while let Some(item) = dir
            .next_entry()
            .await
            .map_err(|e| StoreError::IoError(format!("读取日志目录失败: {e}")))?
        {
            let name = item.file_name();
            let name = name.to_string_lossy();
            if name.starts_with(FILE_PREFIX) && name.ends_with(FILE_SUFFIX) {
                files.push(item.path());
            }
        }
        files.sort();
        Ok(files)
    }

    /// 依次读取所有文件的所有有效行
    async fn scan(&self) -> Result<Vec<LogEntry>> {
        let mut entries = Vec::new();
        for path in self.log_files().await? {
            let raw = match tokio::fs::read(&path).await {
                Ok(raw) => raw,
                Err(e) => {
                    warn!(file = %path.display(), error = %e, "日志文件读取失败，已跳过");
                    continue;
                }
            };

            let mut skipped = 0usize;
            for line in raw.split(|b| *b == b'\n') {
                if line.iter().all(u8::is_ascii_whitespace) {
                    continue;
                }
                match serde_json::from_slice::<LogEntry>(line) {
                    Ok(entry) => entries.push(entry),
                    Err(_) => skipped += 1,
                }
            }
            if skipped > 0 {
                warn!(file = %path.display(), skipped, "跳过无法解析的日志行");
            }
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn user(id: UserId, name: &str) -> UserSnapshot {
        UserSnapshot::new(id, name, Some(name.to_lowercase()))
    }

    fn entry_at(ts: DateTime<Utc>, chat_id: ChatId, user: &UserSnapshot, text: &str) -> LogEntry {
        LogEntry {
            timestamp: ts,
            ..LogEntry::new(chat_id, user, Some(text.to_string()))
        }
    }

    #[tokio::test]
    async fn test_append_then_read_chat_history() {
        let dir = tempfile::tempdir().unwrap();
        let store = LogStore::open(dir.path()).unwrap();
        let anna = user(1, "Anna");
        let bruno = user(2, "Bruno");

        for i in 0..5 {
            store
                .append(LogEntry::new(7, &anna, Some(format!("chat7 #{i}"))))
                .await
                .unwrap();
            store
                .append(LogEntry::new(8, &bruno, Some(format!("chat8 #{i}"))))
                .await
                .unwrap();
        }

        let history = store.read_chat_history(7).await.unwrap();
        assert_eq!(history.len(), 5);
        assert!(history.iter().all(|e| e.chat_id == 7));
        let texts: Vec<_> = history.iter().map(|e| e.text.clone().unwrap()).collect();
        assert_eq!(texts, vec!["chat7 #0", "chat7 #1", "chat7 #2", "chat7 #3", "chat7 #4"]);
        assert!(history.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));

        // 日志未变化时两次读取结果完全一致
        assert_eq!(history, store.read_chat_history(7).await.unwrap());
    }

    #[tokio::test]
    async fn test_timestamps_never_decrease() {
        let dir = tempfile::tempdir().unwrap();
        let store = LogStore::open(dir.path()).unwrap();
        let anna = user(1, "Anna");
        let later = Utc.with_ymd_and_hms(2025, 5, 2, 12, 0, 0).unwrap();
        let earlier = later - Duration::minutes(5);

        store.append(entry_at(later, 7, &anna, "first")).await.unwrap();
        let stored = store.append(entry_at(earlier, 7, &anna, "second")).await.unwrap();
        assert_eq!(stored.timestamp, later);

        let history = store.read_chat_history(7).await.unwrap();
        assert_eq!(history[0].text.as_deref(), Some("first"));
        assert_eq!(history[1].text.as_deref(), Some("second"));
    }

    #[tokio::test]
    async fn test_history_merges_day_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = LogStore::open(dir.path()).unwrap();
        let anna = user(1, "Anna");
        let day1 = Utc.with_ymd_and_hms(2025, 1, 1, 23, 59, 0).unwrap();
        let day2 = Utc.with_ymd_and_hms(2025, 1, 2, 0, 1, 0).unwrap();

        store.append(entry_at(day1, 7, &anna, "yesterday")).await.unwrap();
        store.append(entry_at(day2, 7, &anna, "today")).await.unwrap();

        assert!(dir.path().join("chat_log_2025-01-01.jsonl").exists());
        assert!(dir.path().join("chat_log_2025-01-02.jsonl").exists());

        let history = store.read_chat_history(7).await.unwrap();
        let texts: Vec<_> = history.iter().filter_map(|e| e.text.as_deref()).collect();
        assert_eq!(texts, vec!["yesterday", "today"]);
    }

    #[tokio::test]
    async fn test_malformed_lines_and_files_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let store = LogStore::open(dir.path()).unwrap();
        let anna = user(1, "Anna");
        let ts = Utc.with_ymd_and_hms(2025, 2, 1, 8, 0, 0).unwrap();
        store.append(entry_at(ts, 7, &anna, "good")).await.unwrap();

        // 同一文件中插入坏行
        let path = dir.path().join("chat_log_2025-02-01.jsonl");
        let mut raw = std::fs::read(&path).unwrap();
        raw.extend_from_slice(b"{not json\n\xff\xfe\n");
        std::fs::write(&path, raw).unwrap();
        store
            .append(entry_at(ts + Duration::seconds(1), 7, &anna, "after"))
            .await
            .unwrap();

        // 完全损坏的文件不影响其他文件
        std::fs::write(dir.path().join("chat_log_2025-01-15.jsonl"), b"\x00\x01garbage").unwrap();
        // 非日志文件被忽略
        std::fs::write(dir.path().join("notes.txt"), b"{}").unwrap();

        let history = store.read_chat_history(7).await.unwrap();
        let texts: Vec<_> = history.iter().filter_map(|e| e.text.as_deref()).collect();
        assert_eq!(texts, vec!["good", "after"]);
    }

    #[tokio::test]
    async fn test_user_history_excludes_commands_and_non_text() {
        let dir = tempfile::tempdir().unwrap();
        let store = LogStore::open(dir.path()).unwrap();
        let anna = user(1, "Anna");
        let bruno = user(2, "Bruno");

        store.append(LogEntry::new(7, &anna, Some("hello".into()))).await.unwrap();
        store.append(LogEntry::new(7, &anna, Some("/reset".into()))).await.unwrap();
        store.append(LogEntry::new(7, &anna, None)).await.unwrap();
        store.append(LogEntry::new(7, &anna, Some("  ".into()))).await.unwrap();
        store.append(LogEntry::new(7, &bruno, Some("other user".into()))).await.unwrap();
        store.append(LogEntry::new(9, &anna, Some("other chat".into()))).await.unwrap();
        store.append(LogEntry::new(7, &anna, Some("bye".into()))).await.unwrap();

        let history = store.read_user_history(7, 1).await.unwrap();
        let texts: Vec<_> = history.iter().filter_map(|e| e.text.as_deref()).collect();
        assert_eq!(texts, vec!["hello", "bye"]);

        // chat 历史包含全部 6 条记录，包括命令和非文本事件
        assert_eq!(store.read_chat_history(7).await.unwrap().len(), 6);
    }

    #[tokio::test]
    async fn test_extract_users_and_messages() {
        let dir = tempfile::tempdir().unwrap();
        let store = LogStore::open(dir.path()).unwrap();
        let anna = user(1, "Anna");
        let renamed = UserSnapshot::new(1, "Anna Maria", None);
        let bruno = user(2, "Bruno");

        store.append(LogEntry::new(7, &anna, Some("one".into()))).await.unwrap();
        store.append(LogEntry::new(7, &renamed, Some("two".into()))).await.unwrap();
        store.append(LogEntry::new(7, &bruno, Some("/help".into()))).await.unwrap();
        store.append(LogEntry::new(8, &bruno, Some("three".into()))).await.unwrap();

        let users = store.extract_all_users().await.unwrap();
        assert_eq!(users.len(), 2);
        let anna_snapshot = &users[&7][&1];
        assert_eq!(anna_snapshot.display_name, "Anna Maria");
        // 新记录没有用户名时保留旧值
        assert_eq!(anna_snapshot.username.as_deref(), Some("anna"));
        assert!(users[&7].contains_key(&2));

        let messages = store.extract_user_messages().await.unwrap();
        assert_eq!(messages[&7][&1], vec!["one", "two"]);
        assert!(!messages[&7].contains_key(&2));
        assert_eq!(messages[&8][&2], vec!["three"]);

        assert_eq!(store.known_chats().await.unwrap(), vec![7, 8]);
        assert_eq!(store.count_entries().await.unwrap(), 4);

        let recent = store.recent_entries(2).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[1].text.as_deref(), Some("three"));
    }

    #[tokio::test]
    async fn test_missing_directory_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = LogStore::open(dir.path().join("logs")).unwrap();
        std::fs::remove_dir(dir.path().join("logs")).unwrap();
        assert!(store.read_chat_history(1).await.unwrap().is_empty());
        assert!(store.known_chats().await.unwrap().is_empty());
    }
}
