use crate::config::OpenAiConfig;
use crate::error::{truncate_body, ChatError, Result};
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

pub const SYSTEM_PROMPT: &str = "You are a helpful assistant that answers customer requests.";
const ERROR_BODY_LIMIT: usize = 500;

pub fn build_completion_request(cfg: &OpenAiConfig, text: &str) -> Value {
    json!({
        "model": cfg.model,
        "messages": [
            {"role": "system", "content": SYSTEM_PROMPT},
            {"role": "user", "content": text},
        ],
        "temperature": cfg.temperature,
    })
}

pub fn parse_completion(value: &Value) -> Result<String> {
    value
        .get("choices")
        .and_then(|v| v.as_array())
        .and_then(|choices| choices.first())
        .and_then(|choice| choice.get("message"))
        .and_then(|message| message.get("content"))
        .and_then(|content| content.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| ChatError::MalformedResponse {
            service: "openai",
            detail: "missing choices[0].message.content".to_string(),
        })
}

pub async fn send_chat_completion(
    client: &Client,
    cfg: &OpenAiConfig,
    api_key: &str,
    text: &str,
) -> Result<String> {
    let payload = build_completion_request(cfg, text);
    let resp = client
        .post(&cfg.api_url)
        .bearer_auth(api_key)
        .timeout(Duration::from_secs(cfg.request_timeout_seconds))
        .json(&payload)
        .send()
        .await?;

    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(ChatError::Downstream {
            service: "openai",
            status,
            body: truncate_body(&body, ERROR_BODY_LIMIT),
        });
    }

    let value: Value = resp.json().await.map_err(|err| ChatError::MalformedResponse {
        service: "openai",
        detail: err.to_string(),
    })?;
    parse_completion(&value)
}
