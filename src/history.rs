use crate::types::{Message, Role};

pub const DEFAULT_HISTORY_LIMIT: usize = 20;
pub const HISTORY_HEADER: &str = "conversation history:\n";
pub const QUESTION_MARKER: &str = "current question:\n";
pub const USER_LABEL: &str = "User";
pub const BOT_LABEL: &str = "Bot";

fn speaker(message: &Message) -> &str {
    match message.role {
        Role::User => USER_LABEL,
        Role::Bot => message
            .bot_name
            .as_deref()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or(BOT_LABEL),
    }
}

pub fn render_history(messages: &[Message], max_messages: usize) -> String {
    let start = messages.len().saturating_sub(max_messages);
    let kept = &messages[start..];
    if kept.is_empty() {
        return String::new();
    }

    let mut out = String::from(HISTORY_HEADER);
    for message in kept {
        out.push_str(speaker(message));
        out.push_str(": ");
        out.push_str(&message.content);
        out.push_str("\n\n");
    }
    out.push_str(QUESTION_MARKER);
    out
}
