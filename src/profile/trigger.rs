//! 画像重新分析的触发策略

use super::UserProfile;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProfilePolicy {
    /// 每累计多少条消息重新分析一次
    pub batch_size: usize,
    /// 分析所需的最少消息数
    pub min_sample: usize,
    /// 单次分析最多使用的最近消息数
    pub sample_limit: usize,
}

impl Default for ProfilePolicy {
    fn default() -> Self {
        Self {
            batch_size: 10,
            min_sample: 5,
            sample_limit: 50,
        }
    }
}

impl ProfilePolicy {
    /// 计数刚刚增加后是否应该分析
    ///
    /// 样本足够时，没有描述的用户立即分析；已有描述的用户每满一批分析一次。
    pub fn should_analyze(&self, profile: &UserProfile) -> bool {
        let count = profile.message_count;
        if count < self.min_sample {
            return false;
        }
        profile.character_description.is_none() || count % self.batch_size == 0
    }
}
