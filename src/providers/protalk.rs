use crate::config::ProTalkConfig;
use crate::error::{truncate_body, ChatError, Result};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

use super::ReplyState;

const ERROR_BODY_LIMIT: usize = 500;

// RFC 3986 unreserved characters stay literal in the token segment.
const TOKEN_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

pub fn endpoint(base_url: &str, action: &str, token: &str) -> String {
    format!(
        "{}/{}/{}",
        base_url.trim_end_matches('/'),
        action,
        utf8_percent_encode(token, TOKEN_SEGMENT)
    )
}

pub fn parse_bot_id(bot_id: &str) -> Result<i64> {
    bot_id
        .trim()
        .parse::<i64>()
        .map_err(|_| ChatError::InvalidBotId(bot_id.to_string()))
}

fn non_empty_str<'a>(value: &'a Value, field: &str) -> Option<&'a str> {
    value
        .get(field)
        .and_then(|v| v.as_str())
        .filter(|s| !s.trim().is_empty())
}

pub fn parse_reply_body(value: &Value) -> ReplyState {
    match non_empty_str(value, "done").or_else(|| non_empty_str(value, "reply")) {
        Some(text) => ReplyState::Ready(text.to_string()),
        None => ReplyState::NotReady,
    }
}

async fn post_json(client: &Client, cfg: &ProTalkConfig, url: &str, payload: &Value) -> Result<Value> {
    let resp = client
        .post(url)
        .timeout(Duration::from_secs(cfg.request_timeout_seconds))
        .json(payload)
        .send()
        .await?;

    let status = resp.status();
    let body = resp.text().await?;
    if !status.is_success() {
        return Err(ChatError::Downstream {
            service: "protalk",
            status,
            body: truncate_body(&body, ERROR_BODY_LIMIT),
        });
    }
    serde_json::from_str(&body).map_err(|err| ChatError::MalformedResponse {
        service: "protalk",
        detail: format!("{err} (status {status}, body {})", truncate_body(&body, ERROR_BODY_LIMIT)),
    })
}

pub async fn ask(
    client: &Client,
    cfg: &ProTalkConfig,
    token: &str,
    bot_id: &str,
    chat_id: &str,
    message: &str,
) -> Result<String> {
    let bot_id = parse_bot_id(bot_id)?;
    let payload = json!({
        "bot_id": bot_id,
        "chat_id": chat_id,
        "message": message,
    });
    let value = post_json(client, cfg, &endpoint(&cfg.base_url, "ask", token), &payload).await?;
    value
        .get("done")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| ChatError::MalformedResponse {
            service: "protalk",
            detail: format!("missing done field: {}", truncate_body(&value.to_string(), ERROR_BODY_LIMIT)),
        })
}

pub async fn send_message_async(
    client: &Client,
    cfg: &ProTalkConfig,
    token: &str,
    bot_id: &str,
    chat_id: &str,
    message_id: &str,
    text: &str,
) -> Result<()> {
    let bot_id = parse_bot_id(bot_id)?;
    let payload = json!({
        "bot_id": bot_id,
        "chat_id": chat_id,
        "message_id": message_id,
        "text": text,
    });
    let value = post_json(
        client,
        cfg,
        &endpoint(&cfg.base_url, "send_message_async", token),
        &payload,
    )
    .await?;
    if let Some(message) = non_empty_str(&value, "error") {
        return Err(ChatError::Rejected {
            service: "protalk",
            message: message.to_string(),
        });
    }
    Ok(())
}

pub async fn get_reply(
    client: &Client,
    cfg: &ProTalkConfig,
    token: &str,
    bot_id: &str,
    chat_id: &str,
    message_id: &str,
) -> Result<ReplyState> {
    let bot_id = parse_bot_id(bot_id)?;
    let payload = json!({
        "bot_id": bot_id,
        "chat_id": chat_id,
        "message_id": message_id,
    });
    let value = post_json(client, cfg, &endpoint(&cfg.base_url, "get_reply", token), &payload).await?;
    if let Some(message) = non_empty_str(&value, "error") {
        return Err(ChatError::Rejected {
            service: "protalk",
            message: message.to_string(),
        });
    }
    Ok(parse_reply_body(&value))
}
