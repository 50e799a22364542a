use crate::config::RetryConfig;
use crate::error::{ChatError, Result};
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

const RETRYABLE_KEYWORDS: &[&str] = &[
    "timeout",
    "network error",
    "failed to fetch",
    "failed to send a request",
    "non-2xx status",
    "connection",
    "fetch",
    "request failed",
    "network request failed",
    "unable to reach",
    "service unavailable",
    "internal server error",
];

pub fn is_retryable_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    RETRYABLE_KEYWORDS.iter().any(|kw| lower.contains(kw))
}

pub fn is_retryable(err: &ChatError) -> bool {
    if err.is_config() {
        return false;
    }
    is_retryable_message(&err.to_string())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(cfg: &RetryConfig) -> Self {
        Self {
            max_retries: cfg.max_retries,
            base_delay: Duration::from_millis(cfg.base_delay_ms),
            max_jitter: Duration::from_millis(cfg.max_jitter_ms),
        }
    }
}

impl RetryPolicy {
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2_u32.saturating_pow(attempt.min(16));
        self.base_delay.saturating_mul(factor)
    }

    fn jitter(&self) -> Duration {
        let max = self.max_jitter.as_millis() as u64;
        if max == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..=max))
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        self.backoff(attempt) + self.jitter()
    }
}

pub async fn invoke_with_retry<T, F, Fut>(operation: &str, policy: &RetryPolicy, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt: u32 = 0;
    loop {
        match op().await {
            Ok(value) => {
                if attempt > 0 {
                    debug!(operation, attempts = attempt + 1, "succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) => {
                if !is_retryable(&err) {
                    debug!(operation, "non-retryable error: {err}");
                    return Err(err);
                }
                if attempt >= policy.max_retries {
                    warn!(operation, attempts = attempt + 1, "giving up: {err}");
                    return Err(ChatError::Delivery {
                        operation: operation.to_string(),
                        attempts: attempt + 1,
                        source: Box::new(err),
                    });
                }
                let delay = policy.delay(attempt);
                warn!(operation, attempt = attempt + 1, ?delay, "retrying after error: {err}");
                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
