use crate::config::PollingConfig;
use crate::dispatch::build_message_content;
use crate::error::{ChatError, Result};
use crate::providers::{AsyncBotGateway, ReplyState};
use crate::retry::{invoke_with_retry, RetryPolicy};
use crate::store::{BotStore, StatusStore};
use crate::types::{AsyncMessageStatus, FileAttachment, MessageStatus, PollResult, StatusPatch};
use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const ID_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
const ID_SUFFIX_LEN: usize = 9;

pub fn generate_message_id(now_millis: i64) -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..ID_SUFFIX_LEN)
        .map(|_| ID_ALPHABET[rng.gen_range(0..ID_ALPHABET.len())] as char)
        .collect();
    format!("{now_millis}_{suffix}")
}

fn describe_wait(total: Duration) -> String {
    let secs = total.as_secs();
    if secs >= 60 && secs % 60 == 0 {
        let minutes = secs / 60;
        if minutes == 1 {
            "1 minute".to_string()
        } else {
            format!("{minutes} minutes")
        }
    } else if secs >= 1 {
        format!("{secs} seconds")
    } else {
        format!("{} ms", total.as_millis())
    }
}

pub fn timeout_message(total: Duration) -> String {
    format!("Timeout: no response after {}", describe_wait(total))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PollUpdate {
    Completed { reply: String },
    Failed { error: String },
    TimedOut { error: String },
}

impl PollUpdate {
    pub fn status(&self) -> MessageStatus {
        match self {
            PollUpdate::Completed { .. } => MessageStatus::Completed,
            PollUpdate::Failed { .. } | PollUpdate::TimedOut { .. } => MessageStatus::Error,
        }
    }

    pub fn reply(&self) -> Option<&str> {
        match self {
            PollUpdate::Completed { reply } => Some(reply),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            PollUpdate::Failed { error } | PollUpdate::TimedOut { error } => Some(error),
            PollUpdate::Completed { .. } => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, PollUpdate::TimedOut { .. })
    }
}

#[async_trait]
pub trait Scheduler: Send + Sync {
    async fn wait(&self, interval: Duration);
}

pub struct TokioScheduler;

#[async_trait]
impl Scheduler for TokioScheduler {
    async fn wait(&self, interval: Duration) {
        tokio::time::sleep(interval).await;
    }
}

#[derive(Clone)]
pub struct AsyncMessageTracker {
    statuses: Arc<dyn StatusStore>,
    bots: Arc<dyn BotStore>,
    gateway: Arc<dyn AsyncBotGateway>,
    retry: RetryPolicy,
}

impl AsyncMessageTracker {
    pub fn new(
        statuses: Arc<dyn StatusStore>,
        bots: Arc<dyn BotStore>,
        gateway: Arc<dyn AsyncBotGateway>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            statuses,
            bots,
            gateway,
            retry,
        }
    }

    async fn bot_token(&self, bot_id: &str) -> Result<String> {
        let bot = self
            .bots
            .get_bot_by_id(bot_id)
            .await?
            .ok_or_else(|| ChatError::BotNotFound(bot_id.to_string()))?;
        bot.token()
            .ok_or_else(|| ChatError::MissingBotToken(bot_id.to_string()))
    }

    pub async fn send_async(
        &self,
        chat_id: &str,
        bot_id: &str,
        text: &str,
        files: &[FileAttachment],
    ) -> Result<String> {
        let message_id = generate_message_id(Utc::now().timestamp_millis());
        self.send_async_with_id(chat_id, bot_id, &message_id, text, files)
            .await?;
        Ok(message_id)
    }

    pub async fn send_async_with_id(
        &self,
        chat_id: &str,
        bot_id: &str,
        message_id: &str,
        text: &str,
        files: &[FileAttachment],
    ) -> Result<()> {
        let token = self.bot_token(bot_id).await?;
        let content = build_message_content("", text, files);

        let now = Utc::now();
        let record = AsyncMessageStatus {
            message_id: message_id.to_string(),
            chat_id: chat_id.to_string(),
            bot_id: bot_id.to_string(),
            status: MessageStatus::Pending,
            retry_count: 0,
            reply: None,
            error_message: None,
            created_at: now,
            updated_at: now,
        };
        self.statuses.insert(&record).await?;

        let submitted = invoke_with_retry("send_message_async", &self.retry, || {
            self.gateway
                .submit(&token, bot_id, chat_id, message_id, &content)
        })
        .await;

        match submitted {
            Ok(()) => {
                self.statuses
                    .update(message_id, &StatusPatch::status(MessageStatus::Processing))
                    .await?;
                info!(message_id, chat_id, bot_id, "async message accepted");
                Ok(())
            }
            Err(err) => {
                warn!(message_id, chat_id, bot_id, "async submit failed: {err}");
                if let Err(store_err) = self
                    .statuses
                    .update(message_id, &StatusPatch::failed(err.to_string()))
                    .await
                {
                    warn!(message_id, "could not record submit failure: {store_err}");
                }
                Err(err)
            }
        }
    }

    pub async fn poll(&self, message_id: &str, bot_id: &str, chat_id: &str) -> Result<PollResult> {
        let record = self
            .statuses
            .get(message_id)
            .await?
            .ok_or_else(|| ChatError::UnknownMessage(message_id.to_string()))?;
        if record.status.is_terminal() {
            return Ok(PollResult::from(&record));
        }

        let token = self.bot_token(bot_id).await?;
        match self
            .gateway
            .fetch_reply(&token, bot_id, chat_id, message_id)
            .await
        {
            Ok(ReplyState::Ready(reply)) => {
                self.statuses
                    .update(message_id, &StatusPatch::completed(reply.clone()))
                    .await?;
                info!(message_id, "async reply completed");
                Ok(PollResult {
                    status: MessageStatus::Completed,
                    reply: Some(reply),
                    error: None,
                })
            }
            Ok(ReplyState::NotReady) => {
                debug!(message_id, "reply not ready");
                Ok(PollResult {
                    status: MessageStatus::Processing,
                    reply: None,
                    error: None,
                })
            }
            Err(err) => {
                let error = err.to_string();
                let patch = StatusPatch {
                    retry_count: Some(record.retry_count + 1),
                    ..StatusPatch::failed(error.clone())
                };
                self.statuses.update(message_id, &patch).await?;
                warn!(message_id, "async reply failed: {error}");
                Ok(PollResult {
                    status: MessageStatus::Error,
                    reply: None,
                    error: Some(error),
                })
            }
        }
    }

    // Marks the row `error` unless it already reached a terminal state.
    async fn close_open_row(&self, message_id: &str, error: &str) {
        let still_open = match self.statuses.get(message_id).await {
            Ok(Some(record)) => !record.status.is_terminal(),
            Ok(None) => false,
            Err(err) => {
                warn!(message_id, "status lookup failed while closing: {err}");
                false
            }
        };
        if still_open {
            if let Err(err) = self
                .statuses
                .update(message_id, &StatusPatch::failed(error.to_string()))
                .await
            {
                warn!(message_id, "could not record failure: {err}");
            }
        }
    }

    pub fn polling_loop(
        &self,
        message_id: &str,
        bot_id: &str,
        chat_id: &str,
        polling: &PollingConfig,
    ) -> PollingLoop {
        PollingLoop {
            tracker: self.clone(),
            message_id: message_id.to_string(),
            bot_id: bot_id.to_string(),
            chat_id: chat_id.to_string(),
            interval: polling.interval(),
            max_attempts: polling.max_attempts.max(1),
            attempts: 0,
            finished: false,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn start_polling<F>(
        &self,
        message_id: &str,
        bot_id: &str,
        chat_id: &str,
        polling: &PollingConfig,
        scheduler: Arc<dyn Scheduler>,
        on_update: F,
    ) -> PollHandle
    where
        F: FnOnce(PollUpdate) + Send + 'static,
    {
        let mut polling_loop = self.polling_loop(message_id, bot_id, chat_id, polling);
        let cancelled = polling_loop.cancel_flag();
        let wake = Arc::new(Notify::new());
        let woken = wake.clone();
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = scheduler.wait(polling_loop.interval()) => {}
                    _ = woken.notified() => {}
                }
                if polling_loop.is_cancelled() {
                    debug!(message_id = %polling_loop.message_id, "polling cancelled");
                    return;
                }
                if let Some(update) = polling_loop.tick().await {
                    on_update(update);
                    return;
                }
            }
        });
        PollHandle {
            cancelled,
            wake,
            task,
        }
    }
}

pub struct PollingLoop {
    tracker: AsyncMessageTracker,
    message_id: String,
    bot_id: String,
    chat_id: String,
    interval: Duration,
    max_attempts: u32,
    attempts: u32,
    finished: bool,
    cancelled: Arc<AtomicBool>,
}

impl PollingLoop {
    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancelled.clone()
    }

    pub async fn tick(&mut self) -> Option<PollUpdate> {
        if self.finished || self.is_cancelled() {
            return None;
        }
        self.attempts += 1;

        let outcome = match self
            .tracker
            .poll(&self.message_id, &self.bot_id, &self.chat_id)
            .await
        {
            Ok(result) => match result.status {
                MessageStatus::Completed => Some(PollUpdate::Completed {
                    reply: result.reply.unwrap_or_default(),
                }),
                MessageStatus::Error => Some(PollUpdate::Failed {
                    error: result
                        .error
                        .unwrap_or_else(|| "unknown error".to_string()),
                }),
                MessageStatus::Pending | MessageStatus::Processing => None,
            },
            Err(err) => {
                warn!(message_id = %self.message_id, "poll attempt failed: {err}");
                let error = err.to_string();
                self.tracker.close_open_row(&self.message_id, &error).await;
                Some(PollUpdate::Failed { error })
            }
        };

        let outcome = match outcome {
            Some(update) => Some(update),
            None if self.attempts >= self.max_attempts => {
                let error = timeout_message(self.interval * self.max_attempts);
                warn!(message_id = %self.message_id, attempts = self.attempts, "{error}");
                self.tracker.close_open_row(&self.message_id, &error).await;
                Some(PollUpdate::TimedOut { error })
            }
            None => None,
        };

        if outcome.is_some() {
            self.finished = true;
        }
        outcome
    }
}

pub struct PollHandle {
    cancelled: Arc<AtomicBool>,
    wake: Arc<Notify>,
    task: JoinHandle<()>,
}

impl PollHandle {
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.wake.notify_one();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub async fn join(self) -> std::result::Result<(), tokio::task::JoinError> {
        self.task.await
    }
}
