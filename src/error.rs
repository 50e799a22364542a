use thiserror::Error;

pub type Result<T> = std::result::Result<T, ChatError>;

// Retry classification reads the Display strings below.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("Invalid bot_id: {0}")]
    InvalidBotId(String),

    #[error("Bot IDs are required")]
    BotIdsRequired,

    #[error("bot {0} is not configured")]
    BotNotFound(String),

    #[error("bot {0} has no bot_token for async delivery")]
    MissingBotToken(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("{service} responded with {status}: {body}")]
    Downstream {
        service: &'static str,
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("{service} returned an unexpected body: {detail}")]
    MalformedResponse {
        service: &'static str,
        detail: String,
    },

    #[error("{service} reported an error: {message}")]
    Rejected {
        service: &'static str,
        message: String,
    },

    #[error("delivery failed for {operation} after {attempts} attempts: {source}")]
    Delivery {
        operation: String,
        attempts: u32,
        #[source]
        source: Box<ChatError>,
    },

    #[error("unknown message_id {0}")]
    UnknownMessage(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl ChatError {
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            ChatError::Config(_)
                | ChatError::InvalidBotId(_)
                | ChatError::BotIdsRequired
                | ChatError::BotNotFound(_)
                | ChatError::MissingBotToken(_)
        )
    }
}

impl From<reqwest::Error> for ChatError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ChatError::Timeout(err.to_string())
        } else if err.is_decode() {
            ChatError::MalformedResponse {
                service: "http",
                detail: err.to_string(),
            }
        } else {
            ChatError::Network(err.to_string())
        }
    }
}

impl From<sqlx::Error> for ChatError {
    fn from(err: sqlx::Error) -> Self {
        ChatError::Storage(err.to_string())
    }
}

pub fn truncate_body(body: &str, max: usize) -> String {
    if body.chars().count() <= max {
        return body.to_string();
    }
    let mut out: String = body.chars().take(max).collect();
    out.push_str("...");
    out
}
