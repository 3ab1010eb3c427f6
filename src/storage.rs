//! 整文件 JSON 持久化的公共函数
//!
//! 写入先落到同目录的临时文件再 rename，进程中途退出时旧文件保持完整。
//! 每次写入使用独立的临时文件名，同一目标的并发写入不会互相删除临时文件；
//! 写入顺序由调用方保证。

use crate::error::{Result, StoreError};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::warn;

static TMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// 序列化并原子地替换目标文件
pub async fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| StoreError::SerializationError(e.to_string()))?;
    write_atomic(path, json.as_bytes()).await
}

pub async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| StoreError::IoError(format!("创建目录失败: {e}")))?;
    }
    let tmp = tmp_path(path);
    tokio::fs::write(&tmp, bytes)
        .await
        .map_err(|e| StoreError::IoError(format!("写入 {} 失败: {e}", tmp.display())))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| StoreError::IoError(format!("替换 {} 失败: {e}", path.display())))?;
    Ok(())
}

/// 读取整文件 JSON；文件不存在返回 `None`，内容损坏时记录警告并返回 `None`
pub async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let raw = match tokio::fs::read(path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(StoreError::IoError(format!("读取 {} 失败: {e}", path.display())).into());
        }
    };
    match serde_json::from_slice(&raw) {
        Ok(value) => Ok(Some(value)),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "文件解析失败，从空状态开始");
            Ok(None)
        }
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    let seq = TMP_SEQ.fetch_add(1, Ordering::Relaxed);
    name.push(format!(".{}.{seq}.tmp", std::process::id()));
    path.with_file_name(name)
}
