//! 斜杠命令

use super::ChatBot;
use crate::error::Result;
use crate::history::LogEntry;
use crate::transport::{Command, InboundTurn};
use tracing::debug;

const WELCOME: &str = "Hi! I'm an assistant that remembers this chat. \
In groups, mention me or reply to one of my messages and I'll answer.\n\n\
/character - what I've noticed about you (reply to someone to ask about them)\n\
/users - the people I know in this chat\n\
/reset - forget our recent conversation";

/// `/users` 中性格描述的最大长度
const USERS_DESCRIPTION_CHARS: usize = 100;
/// `/logs` 中每条文本的最大长度
const LOGS_TEXT_CHARS: usize = 30;
const LOGS_LIMIT: usize = 10;

pub(super) async fn dispatch(bot: &ChatBot, turn: &InboundTurn, command: Command<'_>) -> Result<()> {
    let reply = match command.name.to_ascii_lowercase().as_str() {
        "start" | "help" => WELCOME.to_string(),
        "reset" => reset(bot, turn).await,
        "character" | "carattere" => character(bot, turn).await,
        "users" | "utenti" => users(bot, turn).await,
        "logs" => logs(bot, turn).await?,
        other => {
            debug!(command = other, "忽略未知命令");
            return Ok(());
        }
    };
    bot.deliver(turn.chat_id, &reply, Some(turn.message_id)).await
}

async fn reset(bot: &ChatBot, turn: &InboundTurn) -> String {
    if bot.state.buffer.reset(turn.chat_id).await {
        "I've cleared my memory of our conversation.".to_string()
    } else {
        "There was no conversation to clear.".to_string()
    }
}

async fn character(bot: &ChatBot, turn: &InboundTurn) -> String {
    let profiles = &bot.state.profiles;
    match &turn.reply_to_user {
        Some(target) => {
            let profile = profiles.get_profile(turn.chat_id, target.id).await;
            match profile.and_then(|p| p.character_description.map(|c| (p.display_name, c))) {
                Some((name, character)) => {
                    format!("Here's the character I've noticed in {}: {}", name, character)
                }
                None => "I haven't analyzed enough messages from this user to describe their \
                         character yet."
                    .to_string(),
            }
        }
        None => match profiles
            .get_profile(turn.chat_id, turn.user.id)
            .await
            .and_then(|p| p.character_description)
        {
            Some(character) => format!("Here's the character I've noticed in you: {}", character),
            None => "I haven't analyzed enough of your messages to describe your character yet."
                .to_string(),
        },
    }
}

async fn users(bot: &ChatBot, turn: &InboundTurn) -> String {
    let profiles = bot.state.profiles.chat_profiles(turn.chat_id).await;
    if profiles.is_empty() {
        return "I haven't stored any users in this chat yet.".to_string();
    }

    let lines: Vec<String> = profiles
        .iter()
        .map(|p| {
            let character = p
                .character_description
                .as_deref()
                .map(|c| truncate(c, USERS_DESCRIPTION_CHARS))
                .unwrap_or_else(|| "not analyzed yet".to_string());
            format!("• {}\n  Character: {}", p.snapshot().label(), character)
        })
        .collect();

    format!(
        "🧠 Users I know in this chat ({}):\n\n{}\n\nℹ️ Characters are updated automatically as people write.",
        lines.len(),
        lines.join("\n\n")
    )
}

async fn logs(bot: &ChatBot, turn: &InboundTurn) -> Result<String> {
    if !bot.state.config.admin_ids.contains(&turn.user.id) {
        return Ok("You are not allowed to use this command.".to_string());
    }
    let entries = bot.state.log.recent_entries(LOGS_LIMIT).await?;
    if entries.is_empty() {
        return Ok("No logs available.".to_string());
    }
    let mut text = format!("Last {} logged messages:\n\n", entries.len());
    for entry in &entries {
        text.push_str(&log_line(entry));
        text.push('\n');
    }
    Ok(text)
}

fn log_line(entry: &LogEntry) -> String {
    format!(
        "- {}: {} in {}: {}",
        entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
        entry.user_display_name,
        entry.chat_kind.map_or("unknown", |k| k.as_str()),
        entry
            .text
            .as_deref()
            .map(|t| truncate(t, LOGS_TEXT_CHARS))
            .unwrap_or_else(|| "[no text]".to_string())
    )
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let head: String = text.chars().take(max_chars).collect();
    format!("{}...", head)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_counts_chars() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("àèìòù-àèìòù", 5), "àèìòù...");
    }
}
