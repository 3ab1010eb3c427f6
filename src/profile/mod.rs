//! 用户画像
//!
//! 按 (chat, user) 维护消息计数和性格描述，整体持久化到 `user_data.json`。
//! 描述一旦存在就不会被清空；分析失败时画像保持原样。
//!
//! 锁只在修改内存数据时持有，模型调用和写盘都在锁外进行。
//! 写盘另由一把互斥锁串行化，后开始的保存总是写入更新的快照。

mod trigger;

pub use trigger::ProfilePolicy;

use crate::error::{LlmError, Result, StoreError};
use crate::history::{ChatId, LogStore, UserId, UserSnapshot};
use crate::inference::Inference;
use crate::storage;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

type ProfileMap = BTreeMap<ChatId, BTreeMap<UserId, UserProfile>>;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct UserProfile {
    pub user_id: UserId,
    #[serde(default, alias = "first_name")]
    pub display_name: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default, alias = "character")]
    pub character_description: Option<String>,
    #[serde(default)]
    pub message_count: usize,
    /// 上次分析时的 `message_count`
    #[serde(default)]
    pub last_analyzed_message_count: usize,
    #[serde(default)]
    pub analyzed_at: Option<DateTime<Utc>>,
}

impl UserProfile {
    pub fn new(user_id: UserId, display_name: impl Into<String>, username: Option<String>) -> Self {
        Self {
            user_id,
            display_name: display_name.into(),
            username: username.filter(|u| !u.is_empty()),
            character_description: None,
            message_count: 0,
            last_analyzed_message_count: 0,
            analyzed_at: None,
        }
    }

    fn from_snapshot(user: &UserSnapshot) -> Self {
        Self::new(user.id, user.display_name.clone(), user.username.clone())
    }

    /// 用较新的身份信息覆盖，空值不覆盖
    fn refresh_identity(&mut self, user: &UserSnapshot) {
        if !user.display_name.is_empty() {
            self.display_name = user.display_name.clone();
        }
        if user.username.is_some() {
            self.username = user.username.clone();
        }
    }

    pub fn snapshot(&self) -> UserSnapshot {
        UserSnapshot {
            character: self.character_description.clone(),
            ..UserSnapshot::new(self.user_id, self.display_name.clone(), self.username.clone())
        }
    }
}

/// [`ProfileStore::observe`] 的结果
#[derive(Debug, Clone)]
pub struct Observation {
    pub profile: UserProfile,
    /// 是否应该立即重新分析
    pub analysis_due: bool,
}

/// [`ProfileStore::merge_from_log`] 的统计
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MergeReport {
    pub added: usize,
    pub updated: usize,
}

pub struct ProfileStore {
    path: PathBuf,
    policy: ProfilePolicy,
    log: Arc<LogStore>,
    inference: Arc<dyn Inference>,
    profiles: RwLock<ProfileMap>,
    save_lock: Mutex<()>,
}

impl ProfileStore {
    /// 打开画像文件；不存在或损坏时从空状态开始
    pub async fn open(
        path: impl AsRef<Path>,
        policy: ProfilePolicy,
        log: Arc<LogStore>,
        inference: Arc<dyn Inference>,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let profiles: ProfileMap = storage::read_json(&path).await?.unwrap_or_default();
        let users: usize = profiles.values().map(BTreeMap::len).sum();
        info!(path = %path.display(), chats = profiles.len(), users, "👤 用户画像已加载");
        Ok(Self {
            path,
            policy,
            log,
            inference,
            profiles: RwLock::new(profiles),
            save_lock: Mutex::new(()),
        })
    }

    pub fn policy(&self) -> ProfilePolicy {
        self.policy
    }

    /// 记录一条入站消息
    ///
    /// 只有可分析的文本才计数；返回更新后的画像和是否需要分析。
    pub async fn observe(
        &self,
        chat_id: ChatId,
        user: &UserSnapshot,
        text: Option<&str>,
    ) -> Observation {
        let mut profiles = self.profiles.write().await;
        let profile = profiles
            .entry(chat_id)
            .or_default()
            .entry(user.id)
            .or_insert_with(|| UserProfile::from_snapshot(user));
        profile.refresh_identity(user);

        let counted = text.is_some_and(crate::history::is_eligible_text);
        if counted {
            profile.message_count += 1;
        }
        Observation {
            analysis_due: counted && self.policy.should_analyze(profile),
            profile: profile.clone(),
        }
    }

    /// 用给定的消息分析用户性格；取最近 `sample_limit` 条
    pub async fn analyze(
        &self,
        chat_id: ChatId,
        user_id: UserId,
        messages: &[String],
    ) -> Result<String> {
        if messages.len() < self.policy.min_sample {
            return Err(StoreError::InsufficientData {
                needed: self.policy.min_sample,
                available: messages.len(),
            }
            .into());
        }
        let sample = &messages[messages.len().saturating_sub(self.policy.sample_limit)..];

        let description = self.inference.analyze_character(sample).await?;
        let description = description.trim().to_string();
        if description.is_empty() {
            return Err(LlmError::EmptyResponse.into());
        }

        let mut profiles = self.profiles.write().await;
        let profile = profiles
            .get_mut(&chat_id)
            .and_then(|users| users.get_mut(&user_id))
            .ok_or_else(|| {
                StoreError::IoError(format!("用户 {user_id} 不在 chat {chat_id} 的画像中"))
            })?;
        profile.character_description = Some(description.clone());
        profile.message_count = profile.message_count.max(messages.len());
        profile.last_analyzed_message_count = profile.message_count;
        profile.analyzed_at = Some(Utc::now());
        debug!(chat_id, user_id, sample = sample.len(), "🧠 性格描述已更新");
        Ok(description)
    }

    /// 从日志读取该用户的消息后分析
    pub async fn analyze_from_log(&self, chat_id: ChatId, user_id: UserId) -> Result<String> {
        let messages: Vec<String> = self
            .log
            .read_user_history(chat_id, user_id)
            .await?
            .iter()
            .filter_map(|e| e.eligible_text().map(str::to_string))
            .collect();
        self.analyze(chat_id, user_id, &messages).await
    }

    pub async fn get_profile(&self, chat_id: ChatId, user_id: UserId) -> Option<UserProfile> {
        self.profiles
            .read()
            .await
            .get(&chat_id)?
            .get(&user_id)
            .cloned()
    }

    /// chat 内所有画像，按用户 id 排序
    pub async fn chat_profiles(&self, chat_id: ChatId) -> Vec<UserProfile> {
        self.profiles
            .read()
            .await
            .get(&chat_id)
            .map(|users| users.values().cloned().collect())
            .unwrap_or_default()
    }

    /// 给身份快照附上已知的性格描述
    pub async fn enrich(&self, chat_id: ChatId, mut user: UserSnapshot) -> UserSnapshot {
        if let Some(profile) = self.get_profile(chat_id, user.id).await {
            user.character = profile.character_description;
        }
        user
    }

    /// 用日志中的用户和消息数补全画像
    ///
    /// 不存在的用户新建；已有用户只补齐空字段，计数取两者较大值。
    pub async fn merge_from_log(
        &self,
        users: &BTreeMap<ChatId, BTreeMap<UserId, UserSnapshot>>,
        messages: &BTreeMap<ChatId, BTreeMap<UserId, Vec<String>>>,
    ) -> MergeReport {
        let mut report = MergeReport::default();
        let mut profiles = self.profiles.write().await;
        for (chat_id, chat_users) in users {
            let chat_profiles = profiles.entry(*chat_id).or_default();
            for (user_id, snapshot) in chat_users {
                let logged = messages
                    .get(chat_id)
                    .and_then(|m| m.get(user_id))
                    .map_or(0, Vec::len);
                match chat_profiles.get_mut(user_id) {
                    Some(profile) => {
                        let mut changed = false;
                        if profile.display_name.is_empty() && !snapshot.display_name.is_empty() {
                            profile.display_name = snapshot.display_name.clone();
                            changed = true;
                        }
                        if profile.username.is_none() && snapshot.username.is_some() {
                            profile.username = snapshot.username.clone();
                            changed = true;
                        }
                        if logged > profile.message_count {
                            profile.message_count = logged;
                            changed = true;
                        }
                        if changed {
                            report.updated += 1;
                        }
                    }
                    None => {
                        let mut profile = UserProfile::from_snapshot(snapshot);
                        profile.message_count = logged;
                        chat_profiles.insert(*user_id, profile);
                        report.added += 1;
                    }
                }
            }
        }
        report
    }

    /// 没有描述但样本已足够的用户
    pub async fn pending_analysis(&self) -> Vec<(ChatId, UserId)> {
        let profiles = self.profiles.read().await;
        profiles
            .iter()
            .flat_map(|(chat_id, users)| {
                users
                    .values()
                    .filter(|p| {
                        p.character_description.is_none()
                            && p.message_count >= self.policy.min_sample
                    })
                    .map(move |p| (*chat_id, p.user_id))
            })
            .collect()
    }

    /// 整体写入磁盘
    pub async fn save(&self) -> Result<()> {
        let _guard = self.save_lock.lock().await;
        let data = self.profiles.read().await.clone();
        storage::write_json_atomic(&self.path, &data).await?;
        debug!(path = %self.path.display(), chats = data.len(), "💾 用户画像已持久化");
        Ok(())
    }

    /// 保存失败只记录警告
    pub async fn save_or_warn(&self) {
        if let Err(e) = self.save().await {
            warn!(error = %e, "用户画像持久化失败");
        }
    }
}
