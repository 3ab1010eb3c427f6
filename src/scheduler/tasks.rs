use super::{PassReport, PeriodicTask};
use crate::context::{ContextCache, RegenerateScope};
use crate::conversation::{ConversationBuffer, ConversationSnapshot};
use crate::error::{RecallError, Result, StoreError};
use crate::history::LogStore;
use crate::profile::ProfileStore;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::warn;

/// 为日志中的每个 chat 重新生成完整摘要
pub struct ContextRefresh {
    pub log: Arc<LogStore>,
    pub cache: Arc<ContextCache>,
}

#[async_trait]
impl PeriodicTask for ContextRefresh {
    fn name(&self) -> &'static str {
        "context_refresh"
    }

    async fn run_pass(&self) -> Result<PassReport> {
        let mut report = PassReport::default();
        for chat_id in self.log.known_chats().await? {
            match self
                .cache
                .regenerate(chat_id, RegenerateScope::Full, None)
                .await
            {
                Ok(_) => report.processed += 1,
                Err(RecallError::Store(
                    StoreError::EmptyHistory(_) | StoreError::InsufficientData { .. },
                )) => report.skipped += 1,
                Err(e) => {
                    warn!(chat_id, error = %e, "上下文刷新失败");
                    report.failed += 1;
                }
            }
        }
        Ok(report)
    }
}

/// 重新分析样本足够的用户，结束后保存画像
pub struct ProfileRefresh {
    pub log: Arc<LogStore>,
    pub profiles: Arc<ProfileStore>,
}

#[async_trait]
impl PeriodicTask for ProfileRefresh {
    fn name(&self) -> &'static str {
        "profile_refresh"
    }

    async fn run_pass(&self) -> Result<PassReport> {
        let users = self.log.extract_all_users().await?;
        let messages = self.log.extract_user_messages().await?;
        self.profiles.merge_from_log(&users, &messages).await;

        let min_sample = self.profiles.policy().min_sample;
        let mut report = PassReport::default();
        for (chat_id, chat_messages) in &messages {
            for (user_id, texts) in chat_messages {
                if texts.len() < min_sample {
                    report.skipped += 1;
                    continue;
                }
                match self.profiles.analyze(*chat_id, *user_id, texts).await {
                    Ok(_) => report.processed += 1,
                    Err(e) => {
                        warn!(chat_id, user_id, error = %e, "画像刷新失败");
                        report.failed += 1;
                    }
                }
            }
        }
        self.profiles.save().await?;
        Ok(report)
    }
}

/// 定期保存画像和会话快照
pub struct Autosave {
    pub profiles: Arc<ProfileStore>,
    pub buffer: Arc<ConversationBuffer>,
    pub snapshot: Arc<ConversationSnapshot>,
}

#[async_trait]
impl PeriodicTask for Autosave {
    fn name(&self) -> &'static str {
        "autosave"
    }

    async fn run_pass(&self) -> Result<PassReport> {
        self.profiles.save().await?;
        self.snapshot.save(&self.buffer).await?;
        Ok(PassReport {
            processed: 2,
            ..PassReport::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ContextLimits;
    use crate::history::{LogEntry, UserSnapshot};
    use crate::profile::ProfilePolicy;
    use crate::inference::LlmInference;
    use crate::testing::{MockInference, MockLlmClient};
    use std::time::Duration;

    #[tokio::test]
    async fn test_context_refresh_continues_after_failure() {
        let dir = tempfile::tempdir().unwrap();
        let log = Arc::new(LogStore::open(dir.path().join("logs")).unwrap());
        let anna = UserSnapshot::new(1, "Anna", None);
        for chat_id in [7, 8] {
            log.append(LogEntry::new(chat_id, &anna, Some("hello".into())))
                .await
                .unwrap();
        }
        let inference = Arc::new(MockInference::new());
        let cache = Arc::new(ContextCache::new(
            dir.path().join("cache"),
            Duration::from_secs(300),
            ContextLimits::default(),
            log.clone(),
            inference.clone(),
        ));
        let task = ContextRefresh {
            log: log.clone(),
            cache: cache.clone(),
        };

        let report = task.run_pass().await.unwrap();
        assert_eq!(report.processed, 2);

        inference.set_failing(true);
        let report = task.run_pass().await.unwrap();
        assert_eq!(report.failed, 2);
        assert!(cache.get(7).await.is_some());
    }

    #[tokio::test]
    async fn test_context_refresh_skips_chat_without_text() {
        let dir = tempfile::tempdir().unwrap();
        let log = Arc::new(LogStore::open(dir.path().join("logs")).unwrap());
        let anna = UserSnapshot::new(1, "Anna", None);
        log.append(LogEntry::new(7, &anna, Some("   ".into())))
            .await
            .unwrap();
        log.append(LogEntry::new(7, &anna, None)).await.unwrap();
        let cache = Arc::new(ContextCache::new(
            dir.path().join("cache"),
            Duration::from_secs(300),
            ContextLimits::default(),
            log.clone(),
            Arc::new(LlmInference::new(Arc::new(MockLlmClient::new()))),
        ));
        let task = ContextRefresh {
            log,
            cache: cache.clone(),
        };

        let report = task.run_pass().await.unwrap();
        assert_eq!(report.skipped, 1);
        assert_eq!(report.failed, 0);
        assert!(cache.get(7).await.is_none());
    }

    #[tokio::test]
    async fn test_profile_refresh_analyzes_and_saves() {
        let dir = tempfile::tempdir().unwrap();
        let log = Arc::new(LogStore::open(dir.path().join("logs")).unwrap());
        let anna = UserSnapshot::new(1, "Anna", None);
        let bob = UserSnapshot::new(2, "Bob", None);
        for i in 0..5 {
            log.append(LogEntry::new(7, &anna, Some(format!("anna {i}"))))
                .await
                .unwrap();
        }
        log.append(LogEntry::new(7, &bob, Some("bob".into())))
            .await
            .unwrap();

        let profiles_path = dir.path().join("data/user_data.json");
        let profiles = Arc::new(
            ProfileStore::open(
                &profiles_path,
                ProfilePolicy::default(),
                log.clone(),
                Arc::new(MockInference::new()),
            )
            .await
            .unwrap(),
        );
        let task = ProfileRefresh {
            log,
            profiles: profiles.clone(),
        };

        let report = task.run_pass().await.unwrap();
        assert_eq!(report.processed, 1);
        assert_eq!(report.skipped, 1);
        assert!(profiles_path.exists());
        let anna_profile = profiles.get_profile(7, 1).await.unwrap();
        assert_eq!(
            anna_profile.character_description.as_deref(),
            Some("character from 5 messages")
        );
        assert!(profiles.get_profile(7, 2).await.unwrap().character_description.is_none());
    }
}
