use crate::error::{ChatError, Result};
use crate::history::{render_history, BOT_LABEL};
use crate::providers::BotResponder;
use crate::retry::{invoke_with_retry, RetryPolicy};
use crate::store::BotStore;
use crate::types::{BotDescriptor, BotReply, FileAttachment, Message};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub fn order_bots(bot_ids: &[String], preferred: Option<&str>) -> Vec<String> {
    let mut ordered = bot_ids.to_vec();
    if let Some(preferred) = preferred {
        if let Some(pos) = ordered.iter().position(|id| id == preferred) {
            let first = ordered.remove(pos);
            ordered.insert(0, first);
        }
    }
    ordered
}

pub fn build_message_content(history: &str, user_text: &str, files: &[FileAttachment]) -> String {
    let mut content = format!("{history}{user_text}");
    if !files.is_empty() {
        let urls: Vec<&str> = files.iter().map(|f| f.url.as_str()).collect();
        content.push_str("\n\n");
        content.push_str(&urls.join("\n"));
    }
    content
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mention {
    pub target: Option<String>,
    pub text: String,
}

pub fn parse_mention(text: &str) -> Mention {
    if let Some(rest) = text.strip_prefix('@') {
        if let Some(idx) = rest.find(": ") {
            return Mention {
                target: Some(rest[..idx].trim().to_string()),
                text: rest[idx + 2..].to_string(),
            };
        }
    }
    Mention {
        target: None,
        text: text.to_string(),
    }
}

pub fn resolve_mention<'a>(name: &str, bots: &'a [BotDescriptor]) -> Option<&'a BotDescriptor> {
    let wanted = name.trim().to_lowercase();
    bots.iter().find(|bot| bot.name.trim().to_lowercase() == wanted)
}

#[derive(Debug, Clone, PartialEq)]
pub struct DispatchTurn {
    pub order: Vec<String>,
    pub base_content: String,
    pub message_content: String,
    pub responses: Vec<BotReply>,
}

impl DispatchTurn {
    pub fn new(order: Vec<String>, base_content: String) -> Self {
        Self {
            order,
            message_content: base_content.clone(),
            base_content,
            responses: Vec::new(),
        }
    }

    pub fn next_bot(&self) -> Option<&str> {
        self.order.get(self.responses.len()).map(String::as_str)
    }

    pub fn is_done(&self) -> bool {
        self.responses.len() >= self.order.len()
    }

    // Only the latest reply is carried forward.
    pub fn advance(self, reply: BotReply) -> Self {
        let message_content = if reply.is_error() {
            self.message_content
        } else {
            format!("{}\n\n{}: {}", self.base_content, reply.bot_name, reply.response)
        };
        let mut responses = self.responses;
        responses.push(reply);
        Self {
            order: self.order,
            base_content: self.base_content,
            message_content,
            responses,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct GroupRequest {
    pub chat_id: String,
    pub user_text: String,
    pub bot_ids: Vec<String>,
    pub files: Vec<FileAttachment>,
    pub preferred_first_bot_id: Option<String>,
    pub history: Vec<Message>,
}

#[derive(Clone)]
pub struct Orchestrator {
    bots: Arc<dyn BotStore>,
    responder: Arc<dyn BotResponder>,
    retry: RetryPolicy,
    history_limit: usize,
}

impl Orchestrator {
    pub fn new(
        bots: Arc<dyn BotStore>,
        responder: Arc<dyn BotResponder>,
        retry: RetryPolicy,
        history_limit: usize,
    ) -> Self {
        Self {
            bots,
            responder,
            retry,
            history_limit,
        }
    }

    fn base_content(&self, history: &[Message], user_text: &str, files: &[FileAttachment]) -> String {
        let rendered = render_history(history, self.history_limit);
        build_message_content(&rendered, user_text, files)
    }

    async fn call_with_retry(&self, bot: &BotDescriptor, chat_id: &str, content: &str) -> Result<String> {
        let operation = format!("call_bot:{}", bot.bot_id);
        invoke_with_retry(&operation, &self.retry, || {
            self.responder.call_bot(bot, chat_id, content)
        })
        .await
    }

    async fn run_slot(&self, chat_id: &str, bot_id: &str, content: &str) -> BotReply {
        let bot = match self.bots.get_bot_by_id(bot_id).await {
            Ok(Some(bot)) => bot,
            Ok(None) => {
                let err = ChatError::BotNotFound(bot_id.to_string());
                warn!(chat_id, bot_id, "{err}");
                return BotReply::failure(bot_id, BOT_LABEL, err.to_string());
            }
            Err(err) => {
                warn!(chat_id, bot_id, "bot lookup failed: {err}");
                return BotReply::failure(bot_id, BOT_LABEL, err.to_string());
            }
        };
        let name = if bot.name.trim().is_empty() { BOT_LABEL } else { bot.name.as_str() };

        match self.call_with_retry(&bot, chat_id, content).await {
            Ok(response) => {
                debug!(chat_id, bot_id, "bot replied");
                BotReply::success(bot_id, name, response)
            }
            Err(err) => {
                warn!(chat_id, bot_id, "bot call failed: {err}");
                BotReply::failure(bot_id, name, err.to_string())
            }
        }
    }

    pub async fn dispatch_group_message(&self, req: &GroupRequest) -> Result<Vec<BotReply>> {
        if req.bot_ids.is_empty() {
            return Err(ChatError::BotIdsRequired);
        }

        let order = order_bots(&req.bot_ids, req.preferred_first_bot_id.as_deref());
        let base = self.base_content(&req.history, &req.user_text, &req.files);
        info!(chat_id = %req.chat_id, bots = order.len(), "dispatching group turn");

        let mut turn = DispatchTurn::new(order, base);
        while let Some(bot_id) = turn.next_bot().map(str::to_string) {
            let reply = self.run_slot(&req.chat_id, &bot_id, &turn.message_content).await;
            turn = turn.advance(reply);
        }

        let failed = turn.responses.iter().filter(|r| r.is_error()).count();
        info!(chat_id = %req.chat_id, failed, "group turn finished");
        Ok(turn.responses)
    }

    pub async fn send_single(
        &self,
        chat_id: &str,
        bot_id: &str,
        user_text: &str,
        files: &[FileAttachment],
        history: &[Message],
    ) -> Result<String> {
        let bot = self
            .bots
            .get_bot_by_id(bot_id)
            .await?
            .ok_or_else(|| ChatError::BotNotFound(bot_id.to_string()))?;
        let content = self.base_content(history, user_text, files);
        self.call_with_retry(&bot, chat_id, &content).await
    }

    pub async fn resolve_bots(&self, bot_ids: &[String]) -> Vec<BotDescriptor> {
        let mut out = Vec::new();
        for bot_id in bot_ids {
            match self.bots.get_bot_by_id(bot_id).await {
                Ok(Some(bot)) => out.push(bot),
                Ok(None) => {}
                Err(err) => warn!(bot_id, "bot lookup failed: {err}"),
            }
        }
        out
    }
}

pub fn replies_to_messages(replies: &[BotReply], timestamp: i64) -> Vec<Message> {
    replies
        .iter()
        .enumerate()
        .map(|(idx, reply)| {
            Message::bot(
                uuid::Uuid::new_v4().to_string(),
                reply.response.clone(),
                Some(reply.bot_id.clone()),
                Some(reply.bot_name.clone()),
                timestamp + idx as i64,
            )
        })
        .collect()
}
