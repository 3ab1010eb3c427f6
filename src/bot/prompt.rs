//! 回复生成的系统指令

use crate::config::{Config, ResponseStyle};
use crate::history::UserSnapshot;
use crate::inference::is_no_info;
use chrono::{DateTime, Utc};

pub fn system_instructions(
    config: &Config,
    user: &UserSnapshot,
    context: &str,
    now: DateTime<Utc>,
) -> String {
    let mut prompt = format!(
        "You are a helpful, precise and friendly assistant taking part in a chat. \
         Today is {}. Always reply in {}.\n\n",
        now.format("%A %d %B %Y"),
        config.reply_language
    );

    prompt.push_str(&format!("You are talking with {}.", user.label()));
    if let Some(character) = &user.character {
        prompt.push_str(&format!(
            " Their character, as observed so far: {}. Adapt tone and content to it.",
            character
        ));
    }
    prompt.push_str("\n\n");

    prompt.push_str(match config.response_style {
        ResponseStyle::Strict => {
            "Base every statement about this chat and its members only on the conversation \
             context and history you are given. If they do not contain the answer, say that \
             you don't know instead of guessing."
        }
        ResponseStyle::Permissive => {
            "Use the conversation context when it is relevant, and feel free to add general \
             knowledge where it helps the answer."
        }
    });
    prompt.push_str("\n\n");

    if is_no_info(context) {
        prompt.push_str("There is no relevant earlier context in this chat for this message.");
    } else {
        prompt.push_str(&format!(
            "Context of the conversation in this chat:\n{}\n\n\
             Use this context naturally, without mentioning that you are reading earlier messages.",
            context.trim()
        ));
    }
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::NO_RELEVANT_INFO;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 14, 9, 0, 0).unwrap()
    }

    #[test]
    fn test_includes_user_character_and_context() {
        let config = Config::default();
        let user = UserSnapshot {
            character: Some("Direct and curious".to_string()),
            ..UserSnapshot::new(1, "Anna", Some("anna".to_string()))
        };
        let prompt = system_instructions(&config, &user, "They planned a trip to Rome.", now());

        assert!(prompt.contains("Friday 14 March 2025"));
        assert!(prompt.contains("Always reply in English"));
        assert!(prompt.contains("Anna (@anna)"));
        assert!(prompt.contains("Direct and curious"));
        assert!(prompt.contains("They planned a trip to Rome."));
        assert!(prompt.contains("say that you don't know"));
    }

    #[test]
    fn test_permissive_style_and_missing_context() {
        let config = Config {
            response_style: ResponseStyle::Permissive,
            reply_language: "Italian".to_string(),
            ..Config::default()
        };
        let user = UserSnapshot::new(2, "Bob", None);
        let prompt = system_instructions(&config, &user, NO_RELEVANT_INFO, now());

        assert!(prompt.contains("general knowledge"));
        assert!(prompt.contains("Always reply in Italian"));
        assert!(prompt.contains("no relevant earlier context"));
        assert!(!prompt.contains("Their character"));
    }
}
