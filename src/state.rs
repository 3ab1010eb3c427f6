//! 前台处理和后台任务共享的组件

use crate::config::Config;
use crate::context::{ContextCache, ContextLimits};
use crate::conversation::{ConversationBuffer, ConversationSnapshot};
use crate::error::Result;
use crate::history::LogStore;
use crate::inference::Inference;
use crate::profile::{ProfilePolicy, ProfileStore};
use crate::scheduler::{self, Autosave, ContextRefresh, ProfileRefresh, Schedule};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// 启动时从磁盘和日志恢复的情况
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StartupReport {
    pub log_entries: usize,
    pub cached_contexts: usize,
    pub profiles_added: usize,
    pub profiles_analyzed: usize,
}

pub struct ChatState {
    pub config: Arc<Config>,
    pub log: Arc<LogStore>,
    pub buffer: Arc<ConversationBuffer>,
    pub snapshot: Arc<ConversationSnapshot>,
    pub cache: Arc<ContextCache>,
    pub profiles: Arc<ProfileStore>,
    pub inference: Arc<dyn Inference>,
}

impl ChatState {
    pub async fn open(config: Arc<Config>, inference: Arc<dyn Inference>) -> Result<Self> {
        let log = Arc::new(LogStore::open(&config.log_dir)?);
        let cache = Arc::new(ContextCache::new(
            config.context_cache_dir(),
            config.freshness_window(),
            ContextLimits {
                quick: config.quick_context_limit,
                full: config.full_context_limit,
            },
            log.clone(),
            inference.clone(),
        ));
        let profiles = Arc::new(
            ProfileStore::open(
                config.profiles_path(),
                ProfilePolicy {
                    batch_size: config.profile_batch_size,
                    min_sample: config.profile_min_sample,
                    sample_limit: config.profile_sample_limit,
                },
                log.clone(),
                inference.clone(),
            )
            .await?,
        );
        Ok(Self {
            buffer: Arc::new(ConversationBuffer::new(config.buffer_capacity)),
            snapshot: Arc::new(ConversationSnapshot::new(config.conversations_path())),
            config,
            log,
            cache,
            profiles,
            inference,
        })
    }

    /// 恢复缓存和会话快照，并用日志补全画像
    ///
    /// 未设置跳过时，为样本足够但还没有描述的用户立即分析一次。
    pub async fn warm_up(&self) -> Result<StartupReport> {
        let mut report = StartupReport {
            cached_contexts: self.cache.load_all().await?,
            ..StartupReport::default()
        };
        self.snapshot.restore_into(&self.buffer).await?;

        report.log_entries = self.log.count_entries().await?;
        let users = self.log.extract_all_users().await?;
        let messages = self.log.extract_user_messages().await?;
        let merged = self.profiles.merge_from_log(&users, &messages).await;
        report.profiles_added = merged.added;

        if self.config.skip_initial_profile_analysis {
            info!("跳过启动时的画像分析");
        } else {
            for (chat_id, user_id) in self.profiles.pending_analysis().await {
                let Some(texts) = messages.get(&chat_id).and_then(|m| m.get(&user_id)) else {
                    continue;
                };
                match self.profiles.analyze(chat_id, user_id, texts).await {
                    Ok(_) => report.profiles_analyzed += 1,
                    Err(e) => warn!(chat_id, user_id, error = %e, "启动画像分析失败"),
                }
            }
        }
        self.profiles.save_or_warn().await;

        info!(
            log_entries = report.log_entries,
            cached_contexts = report.cached_contexts,
            profiles_added = report.profiles_added,
            profiles_analyzed = report.profiles_analyzed,
            "🚀 启动恢复完成"
        );
        Ok(report)
    }

    /// 启动三个后台循环
    pub fn spawn_background(&self, token: &CancellationToken) -> Vec<JoinHandle<()>> {
        let config = &self.config;
        vec![
            scheduler::spawn(
                Arc::new(ContextRefresh {
                    log: self.log.clone(),
                    cache: self.cache.clone(),
                }),
                Schedule {
                    first_delay: Duration::ZERO,
                    interval: config.context_refresh_interval(),
                    backoff: config.context_refresh_backoff(),
                },
                token.child_token(),
            ),
            scheduler::spawn(
                Arc::new(ProfileRefresh {
                    log: self.log.clone(),
                    profiles: self.profiles.clone(),
                }),
                Schedule {
                    first_delay: config.profile_first_pass_delay(),
                    interval: config.profile_refresh_interval(),
                    backoff: config.profile_refresh_backoff(),
                },
                token.child_token(),
            ),
            scheduler::spawn(
                Arc::new(Autosave {
                    profiles: self.profiles.clone(),
                    buffer: self.buffer.clone(),
                    snapshot: self.snapshot.clone(),
                }),
                Schedule {
                    first_delay: config.autosave_interval(),
                    interval: config.autosave_interval(),
                    backoff: config.autosave_interval(),
                },
                token.child_token(),
            ),
        ]
    }

    /// 退出前保存画像和会话快照
    pub async fn flush(&self) {
        self.profiles.save_or_warn().await;
        if let Err(e) = self.snapshot.save(&self.buffer).await {
            warn!(error = %e, "会话快照持久化失败");
        }
        info!("💾 退出前数据已保存");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::Turn;
    use crate::history::{LogEntry, UserSnapshot};
    use crate::testing::MockInference;

    fn config(dir: &std::path::Path, skip: bool) -> Arc<Config> {
        Arc::new(Config {
            log_dir: dir.join("logs"),
            data_dir: dir.join("data"),
            skip_initial_profile_analysis: skip,
            ..Config::default()
        })
    }

    async fn seed(dir: &std::path::Path) {
        let log = LogStore::open(dir.join("logs")).unwrap();
        let anna = UserSnapshot::new(1, "Anna", None);
        for i in 0..6 {
            log.append(LogEntry::new(7, &anna, Some(format!("text {i}"))))
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_warm_up_backfills_and_analyzes() {
        let dir = tempfile::tempdir().unwrap();
        seed(dir.path()).await;
        let inference = Arc::new(MockInference::new());
        let state = ChatState::open(config(dir.path(), false), inference.clone())
            .await
            .unwrap();

        let report = state.warm_up().await.unwrap();
        assert_eq!(report.log_entries, 6);
        assert_eq!(report.profiles_added, 1);
        assert_eq!(report.profiles_analyzed, 1);
        assert_eq!(inference.character_call_count(), 1);
        assert!(dir.path().join("data/user_data.json").exists());
    }

    #[tokio::test]
    async fn test_warm_up_skip_flag() {
        let dir = tempfile::tempdir().unwrap();
        seed(dir.path()).await;
        let inference = Arc::new(MockInference::new());
        let state = ChatState::open(config(dir.path(), true), inference.clone())
            .await
            .unwrap();

        let report = state.warm_up().await.unwrap();
        assert_eq!(report.profiles_analyzed, 0);
        assert_eq!(inference.character_call_count(), 0);
        assert_eq!(state.profiles.get_profile(7, 1).await.unwrap().message_count, 6);
    }

    #[tokio::test]
    async fn test_flush_then_restore_buffer() {
        let dir = tempfile::tempdir().unwrap();
        let inference = Arc::new(MockInference::new());
        let state = ChatState::open(config(dir.path(), true), inference.clone())
            .await
            .unwrap();
        state
            .buffer
            .append(7, Turn::user("remember me", UserSnapshot::new(1, "Anna", None)))
            .await;
        state.flush().await;

        let reopened = ChatState::open(config(dir.path(), true), inference)
            .await
            .unwrap();
        reopened.warm_up().await.unwrap();
        assert_eq!(reopened.buffer.len(7).await, 1);
    }
}
