#[path = "../common/mod.rs"]
mod common;

use bizo_chat::error::ChatError;
use bizo_chat::retry::{invoke_with_retry, is_retryable, is_retryable_message, RetryPolicy};
use common::{fast_retry, mock_error};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

#[tokio::test]
async fn test_network_error_retried_until_exhausted() {
    let calls = AtomicU32::new(0);
    let counter = &calls;
    let result: Result<(), ChatError> = invoke_with_retry("probe", &fast_retry(3), || async move {
        counter.fetch_add(1, Ordering::SeqCst);
        Err(mock_error("network request failed"))
    })
    .await;

    assert_eq!(calls.load(Ordering::SeqCst), 4);
    match result {
        Err(ChatError::Delivery { operation, attempts, source }) => {
            assert_eq!(operation, "probe");
            assert_eq!(attempts, 4);
            assert!(source.to_string().contains("network request failed"));
        }
        other => panic!("expected delivery failure, got {other:?}"),
    }
}

#[tokio::test]
async fn test_invalid_bot_id_fails_first_attempt() {
    let calls = AtomicU32::new(0);
    let counter = &calls;
    let result: Result<(), ChatError> = invoke_with_retry("probe", &fast_retry(3), || async move {
        counter.fetch_add(1, Ordering::SeqCst);
        Err(mock_error("invalid bot_id"))
    })
    .await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(matches!(result, Err(ChatError::Rejected { .. })));
}

#[tokio::test]
async fn test_typed_invalid_bot_id_not_retried() {
    let calls = AtomicU32::new(0);
    let counter = &calls;
    let result: Result<(), ChatError> = invoke_with_retry("probe", &fast_retry(3), || async move {
        counter.fetch_add(1, Ordering::SeqCst);
        Err(ChatError::InvalidBotId("abc".to_string()))
    })
    .await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(matches!(result, Err(ChatError::InvalidBotId(_))));
}

#[tokio::test]
async fn test_recovers_after_transient_error() {
    let calls = AtomicU32::new(0);
    let counter = &calls;
    let result = invoke_with_retry("probe", &fast_retry(3), || async move {
        let n = counter.fetch_add(1, Ordering::SeqCst);
        if n < 2 {
            Err(ChatError::Timeout("request timed out".to_string()))
        } else {
            Ok("done")
        }
    })
    .await;

    assert_eq!(result.unwrap(), "done");
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_zero_retries_single_attempt() {
    let calls = AtomicU32::new(0);
    let counter = &calls;
    let result: Result<(), ChatError> = invoke_with_retry("probe", &fast_retry(0), || async move {
        counter.fetch_add(1, Ordering::SeqCst);
        Err(ChatError::Network("connection refused".to_string()))
    })
    .await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(matches!(result, Err(ChatError::Delivery { attempts: 1, .. })));
}

#[test]
fn test_classifier_keywords() {
    for msg in [
        "Request Timeout",
        "Failed to fetch",
        "Failed to send a request to the Edge Function",
        "Edge Function returned a non-2xx status code",
        "Unable to reach host",
        "500 Internal Server Error",
    ] {
        assert!(is_retryable_message(msg), "{msg} should be retryable");
    }
    assert!(!is_retryable_message("Bot IDs are required"));
    assert!(!is_retryable(&ChatError::BotIdsRequired));
}

#[test]
fn test_downstream_status_classification() {
    let unavailable = ChatError::Downstream {
        service: "protalk",
        status: reqwest::StatusCode::SERVICE_UNAVAILABLE,
        body: String::new(),
    };
    let bad_request = ChatError::Downstream {
        service: "protalk",
        status: reqwest::StatusCode::BAD_REQUEST,
        body: "bad".to_string(),
    };
    assert!(is_retryable(&unavailable));
    assert!(!is_retryable(&bad_request));
}

#[test]
fn test_default_policy() {
    let policy = RetryPolicy::default();
    assert_eq!(policy.max_retries, 3);
    assert_eq!(policy.base_delay, Duration::from_millis(1000));
    assert_eq!(policy.max_jitter, Duration::from_millis(1000));
}
