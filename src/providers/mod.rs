pub mod openai;
pub mod protalk;

use crate::config::{Config, OpenAiConfig, ProTalkConfig};
use crate::error::{ChatError, Result};
use crate::types::{BotCredential, BotDescriptor};
use async_trait::async_trait;
use reqwest::Client;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyState {
    Ready(String),
    NotReady,
}

#[async_trait]
pub trait BotResponder: Send + Sync {
    async fn call_bot(&self, bot: &BotDescriptor, chat_id: &str, text: &str) -> Result<String>;
}

#[async_trait]
pub trait AsyncBotGateway: Send + Sync {
    async fn submit(
        &self,
        token: &str,
        bot_id: &str,
        chat_id: &str,
        message_id: &str,
        text: &str,
    ) -> Result<()>;

    async fn fetch_reply(
        &self,
        token: &str,
        bot_id: &str,
        chat_id: &str,
        message_id: &str,
    ) -> Result<ReplyState>;
}

#[derive(Clone)]
pub struct HttpBotClient {
    http: Client,
    openai: OpenAiConfig,
    protalk: ProTalkConfig,
}

impl HttpBotClient {
    pub fn new(http: Client, openai: OpenAiConfig, protalk: ProTalkConfig) -> Self {
        Self { http, openai, protalk }
    }

    pub fn from_config(http: Client, cfg: &Config) -> Self {
        Self::new(http, cfg.openai.clone(), cfg.protalk.clone())
    }
}

#[async_trait]
impl BotResponder for HttpBotClient {
    async fn call_bot(&self, bot: &BotDescriptor, chat_id: &str, text: &str) -> Result<String> {
        match bot.credential() {
            Some(BotCredential::OpenAi(key)) => {
                openai::send_chat_completion(&self.http, &self.openai, &key, text).await
            }
            Some(BotCredential::ProTalk(token)) => {
                protalk::ask(&self.http, &self.protalk, &token, &bot.bot_id, chat_id, text).await
            }
            None => Err(ChatError::Config(format!(
                "bot {} has neither bot_token nor openai_key",
                bot.bot_id
            ))),
        }
    }
}

#[async_trait]
impl AsyncBotGateway for HttpBotClient {
    async fn submit(
        &self,
        token: &str,
        bot_id: &str,
        chat_id: &str,
        message_id: &str,
        text: &str,
    ) -> Result<()> {
        protalk::send_message_async(&self.http, &self.protalk, token, bot_id, chat_id, message_id, text)
            .await
    }

    async fn fetch_reply(
        &self,
        token: &str,
        bot_id: &str,
        chat_id: &str,
        message_id: &str,
    ) -> Result<ReplyState> {
        protalk::get_reply(&self.http, &self.protalk, token, bot_id, chat_id, message_id).await
    }
}
