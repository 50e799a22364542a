use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Bot,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileAttachment {
    pub name: String,
    pub size: Option<i64>,
    #[serde(rename = "type")]
    pub mime_type: Option<String>,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<FileAttachment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bot_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bot_name: Option<String>,
    pub timestamp: i64,
}

impl Message {
    pub fn user(id: impl Into<String>, content: impl Into<String>, timestamp: i64) -> Self {
        Self {
            id: id.into(),
            role: Role::User,
            content: content.into(),
            files: Vec::new(),
            bot_id: None,
            bot_name: None,
            timestamp,
        }
    }

    pub fn bot(
        id: impl Into<String>,
        content: impl Into<String>,
        bot_id: Option<String>,
        bot_name: Option<String>,
        timestamp: i64,
    ) -> Self {
        Self {
            id: id.into(),
            role: Role::Bot,
            content: content.into(),
            files: Vec::new(),
            bot_id,
            bot_name,
            timestamp,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub title: String,
    pub messages: Vec<Message>,
    #[serde(default)]
    pub bots_ids: Vec<String>,
    #[serde(default)]
    pub is_group_chat: bool,
    pub bot_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    pub fn append(&mut self, messages: impl IntoIterator<Item = Message>, now: DateTime<Utc>) {
        self.messages.extend(messages);
        self.updated_at = now;
    }

    pub fn authors_consistent(&self) -> bool {
        !self.is_group_chat
            || self
                .messages
                .iter()
                .filter(|m| m.role == Role::Bot)
                .all(|m| m.bot_id.is_some() && m.bot_name.is_some())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BotDescriptor {
    pub bot_id: String,
    pub name: String,
    pub bot_token: Option<String>,
    pub openai_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BotCredential {
    OpenAi(String),
    ProTalk(String),
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

impl BotDescriptor {
    pub fn credential(&self) -> Option<BotCredential> {
        if let Some(key) = non_empty(&self.openai_key) {
            return Some(BotCredential::OpenAi(key));
        }
        non_empty(&self.bot_token).map(BotCredential::ProTalk)
    }

    pub fn token(&self) -> Option<String> {
        non_empty(&self.bot_token)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BotReply {
    pub bot_id: String,
    pub bot_name: String,
    pub response: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BotReply {
    pub fn success(bot_id: &str, bot_name: &str, response: String) -> Self {
        Self {
            bot_id: bot_id.to_string(),
            bot_name: bot_name.to_string(),
            response,
            error: None,
        }
    }

    pub fn failure(bot_id: &str, bot_name: &str, error: String) -> Self {
        Self {
            bot_id: bot_id.to_string(),
            bot_name: bot_name.to_string(),
            response: format!("error for bot {}: {}", bot_id, error),
            error: Some(error),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Pending,
    Processing,
    Completed,
    Error,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Pending => "pending",
            MessageStatus::Processing => "processing",
            MessageStatus::Completed => "completed",
            MessageStatus::Error => "error",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(MessageStatus::Pending),
            "processing" => Some(MessageStatus::Processing),
            "completed" => Some(MessageStatus::Completed),
            "error" => Some(MessageStatus::Error),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, MessageStatus::Completed | MessageStatus::Error)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AsyncMessageStatus {
    pub message_id: String,
    pub chat_id: String,
    pub bot_id: String,
    pub status: MessageStatus,
    pub retry_count: i32,
    pub reply: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusPatch {
    pub status: Option<MessageStatus>,
    pub reply: Option<String>,
    pub error_message: Option<String>,
    pub retry_count: Option<i32>,
}

impl StatusPatch {
    pub fn status(status: MessageStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn completed(reply: String) -> Self {
        Self {
            status: Some(MessageStatus::Completed),
            reply: Some(reply),
            ..Self::default()
        }
    }

    pub fn failed(error: String) -> Self {
        Self {
            status: Some(MessageStatus::Error),
            error_message: Some(error),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollResult {
    pub status: MessageStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&AsyncMessageStatus> for PollResult {
    fn from(record: &AsyncMessageStatus) -> Self {
        Self {
            status: record.status,
            reply: record.reply.clone(),
            error: record.error_message.clone(),
        }
    }
}
