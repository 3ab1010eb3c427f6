//! 推理层使用的提示词
//!
//! 摘要提示词可以替换：实现 [`SummaryPromptBuilder`]，或者用 [`FnSummaryPrompt`] 包一个闭包。

use crate::history::LogEntry;

pub const SUMMARY_SYSTEM: &str = "You are an analytical assistant. You read the history of a group chat \
and extract the information that helps answer the next message.";

pub const CHARACTER_SYSTEM: &str = "You are a personality analyst. You briefly describe a user's \
character based only on the messages they wrote.";

/// 摘要提示词构建接口
pub trait SummaryPromptBuilder: Send + Sync {
    fn build(&self, transcript: &str, focus: Option<&str>) -> String;
}

/// 默认摘要提示词：有焦点时只提取相关信息，没有焦点时概括整段对话
pub struct DefaultSummaryPrompt;

impl SummaryPromptBuilder for DefaultSummaryPrompt {
    fn build(&self, transcript: &str, focus: Option<&str>) -> String {
        let task = match focus {
            Some(topic) => format!(
                "Find the information in this chat history that is relevant to the current message: \"{topic}\".\n\
                 Write a summary (at most 200 words) of what can help answer it."
            ),
            None => "Write a summary (at most 300 words) of this chat history: the topics discussed, \
                     the facts people shared and the open questions."
                .to_string(),
        };
        format!(
            "{task}\n\n\
             Chat history:\n{transcript}\n\n\
             Keep track of who said what and keep the context of the conversations between the different users. \
             Point out the topics, the differing opinions and the shared information.\n\
             If there is nothing relevant, answer exactly \"{}\"",
            super::NO_RELEVANT_INFO
        )
    }
}

/// 用闭包自定义提示词的便捷包装
pub struct FnSummaryPrompt<F>(pub F)
where
    F: Fn(&str, Option<&str>) -> String + Send + Sync;

impl<F> SummaryPromptBuilder for FnSummaryPrompt<F>
where
    F: Fn(&str, Option<&str>) -> String + Send + Sync,
{
    fn build(&self, transcript: &str, focus: Option<&str>) -> String {
        (self.0)(transcript, focus)
    }
}

/// 每条文本消息一行：`- 时间: 名字 (@用户名): 内容`
pub fn render_transcript(history: &[LogEntry]) -> String {
    history
        .iter()
        .filter_map(|entry| {
            let text = entry.text.as_deref().filter(|t| !t.trim().is_empty())?;
            Some(format!(
                "- {}: {} (@{}): {}",
                entry.timestamp.format("%Y-%m-%d %H:%M"),
                entry.user_display_name,
                entry.username.as_deref().unwrap_or("no-username"),
                text
            ))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn character_prompt(messages: &[String]) -> String {
    let rendered = serde_json::to_string_pretty(messages).unwrap_or_else(|_| messages.join("\n"));
    format!(
        "Analyze the character of the user from the following messages.\n\
         Give a short description (at most 50 words) of their personality and way of communicating.\n\
         Identify traits such as formal/informal, serious/playful, technical/simple, patient/impatient.\n\n\
         User messages:\n{rendered}\n\n\
         Describe the user's character clearly and concisely:"
    )
}
