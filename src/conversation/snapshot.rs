//! 会话缓冲的整文件快照（`conversations.json`）
//!
//! 尽力而为：文件可能不存在或落后于内存，启动时读到什么就恢复什么。

use super::{ConversationBuffer, Turn};
use crate::error::Result;
use crate::history::ChatId;
use crate::storage;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub struct ConversationSnapshot {
    path: PathBuf,
}

impl ConversationSnapshot {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub async fn load(&self) -> Result<HashMap<ChatId, Vec<Turn>>> {
        let saved: HashMap<ChatId, Vec<Turn>> = storage::read_json(&self.path)
            .await?
            .unwrap_or_default();
        let turns: usize = saved.values().map(Vec::len).sum();
        info!(path = %self.path.display(), chats = saved.len(), turns, "🗂️ 会话快照已加载");
        Ok(saved)
    }

    pub async fn save(&self, buffer: &ConversationBuffer) -> Result<()> {
        // 先拷贝再写文件，写盘期间不持有缓冲的锁
        let data = buffer.export().await;
        storage::write_json_atomic(&self.path, &data).await?;
        debug!(path = %self.path.display(), chats = data.len(), "💾 会话快照已持久化");
        Ok(())
    }

    pub async fn restore_into(&self, buffer: &ConversationBuffer) -> Result<()> {
        let saved = self.load().await?;
        buffer.restore(saved).await;
        Ok(())
    }
}
