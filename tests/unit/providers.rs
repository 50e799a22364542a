use bizo_chat::config::{OpenAiConfig, ProTalkConfig};
use bizo_chat::error::ChatError;
use bizo_chat::providers::openai::SYSTEM_PROMPT;
use bizo_chat::providers::{AsyncBotGateway, BotResponder, HttpBotClient, ReplyState};
use bizo_chat::types::BotDescriptor;
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client_for(server: &MockServer) -> HttpBotClient {
    let openai = OpenAiConfig {
        api_url: format!("{}/v1/chat/completions", server.uri()),
        ..OpenAiConfig::default()
    };
    let protalk = ProTalkConfig {
        base_url: format!("{}/api/v1.0", server.uri()),
        ..ProTalkConfig::default()
    };
    HttpBotClient::new(reqwest::Client::new(), openai, protalk)
}

fn openai_bot() -> BotDescriptor {
    BotDescriptor {
        bot_id: "gpt".to_string(),
        name: "Helper".to_string(),
        bot_token: None,
        openai_key: Some("sk-test".to_string()),
    }
}

fn protalk_bot(bot_id: &str) -> BotDescriptor {
    BotDescriptor {
        bot_id: bot_id.to_string(),
        name: "Proxy".to_string(),
        bot_token: Some("tok-1".to_string()),
        openai_key: None,
    }
}

#[tokio::test]
async fn test_openai_completion() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer sk-test"))
        .and(body_partial_json(json!({
            "model": "gpt-4o-mini",
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": "hi"}
            ]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{"message": {"role": "assistant", "content": "hello there"}}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let reply = client_for(&server)
        .call_bot(&openai_bot(), "chat-1", "hi")
        .await
        .unwrap();
    assert_eq!(reply, "hello there");
}

#[tokio::test]
async fn test_openai_key_takes_precedence() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{"message": {"content": "direct"}}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let bot = BotDescriptor {
        bot_token: Some("tok-1".to_string()),
        ..openai_bot()
    };
    let reply = client_for(&server).call_bot(&bot, "chat-1", "hi").await.unwrap();
    assert_eq!(reply, "direct");
}

#[tokio::test]
async fn test_openai_error_status_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(500).set_body_string("upstream exploded"))
        .mount(&server)
        .await;

    let err = client_for(&server)
        .call_bot(&openai_bot(), "chat-1", "hi")
        .await
        .unwrap_err();
    match &err {
        ChatError::Downstream { service, status, body } => {
            assert_eq!(*service, "openai");
            assert_eq!(status.as_u16(), 500);
            assert_eq!(body, "upstream exploded");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(err.to_string().contains("500"));
}

#[tokio::test]
async fn test_openai_malformed_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"choices": []})))
        .mount(&server)
        .await;

    let err = client_for(&server)
        .call_bot(&openai_bot(), "chat-1", "hi")
        .await
        .unwrap_err();
    assert!(matches!(err, ChatError::MalformedResponse { service: "openai", .. }));
}

#[tokio::test]
async fn test_protalk_ask() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1.0/ask/tok-1"))
        .and(body_partial_json(json!({
            "bot_id": 17,
            "chat_id": "chat-1",
            "message": "hi"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"done": "proxy says hi"})))
        .expect(1)
        .mount(&server)
        .await;

    let reply = client_for(&server)
        .call_bot(&protalk_bot("17"), "chat-1", "hi")
        .await
        .unwrap();
    assert_eq!(reply, "proxy says hi");
}

#[tokio::test]
async fn test_protalk_invalid_bot_id_sends_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"done": "x"})))
        .expect(0)
        .mount(&server)
        .await;

    let err = client_for(&server)
        .call_bot(&protalk_bot("not-a-number"), "chat-1", "hi")
        .await
        .unwrap_err();
    assert!(matches!(err, ChatError::InvalidBotId(_)));
    assert_eq!(err.to_string(), "Invalid bot_id: not-a-number");
}

#[tokio::test]
async fn test_protalk_non_json_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1.0/ask/tok-1"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>gateway</html>"))
        .mount(&server)
        .await;

    let err = client_for(&server)
        .call_bot(&protalk_bot("17"), "chat-1", "hi")
        .await
        .unwrap_err();
    assert!(matches!(err, ChatError::MalformedResponse { service: "protalk", .. }));
}

#[tokio::test]
async fn test_missing_credentials_is_config_error() {
    let server = MockServer::start().await;
    let bot = BotDescriptor {
        bot_id: "1".to_string(),
        name: "Empty".to_string(),
        bot_token: Some("  ".to_string()),
        openai_key: None,
    };
    let err = client_for(&server).call_bot(&bot, "chat-1", "hi").await.unwrap_err();
    assert!(err.is_config());
}

#[tokio::test]
async fn test_submit_async_message() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1.0/send_message_async/tok-1"))
        .and(body_partial_json(json!({
            "bot_id": 17,
            "chat_id": "chat-1",
            "message_id": "123_abc",
            "text": "hello"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "accepted"})))
        .expect(1)
        .mount(&server)
        .await;

    client_for(&server)
        .submit("tok-1", "17", "chat-1", "123_abc", "hello")
        .await
        .unwrap();
}

#[tokio::test]
async fn test_submit_rejected_by_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1.0/send_message_async/tok-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"error": "bot disabled"})))
        .mount(&server)
        .await;

    let err = client_for(&server)
        .submit("tok-1", "17", "chat-1", "123_abc", "hello")
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "protalk reported an error: bot disabled");
}

#[tokio::test]
async fn test_fetch_reply_states() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1.0/get_reply/tok-1"))
        .and(body_partial_json(json!({"message_id": "ready"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"done": "42"})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1.0/get_reply/tok-1"))
        .and(body_partial_json(json!({"message_id": "waiting"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "processing"})))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let ready = client.fetch_reply("tok-1", "17", "chat-1", "ready").await.unwrap();
    let waiting = client.fetch_reply("tok-1", "17", "chat-1", "waiting").await.unwrap();
    assert_eq!(ready, ReplyState::Ready("42".to_string()));
    assert_eq!(waiting, ReplyState::NotReady);
}

#[tokio::test]
async fn test_fetch_reply_server_error_is_retryable() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1.0/get_reply/tok-1"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let err = client_for(&server)
        .fetch_reply("tok-1", "17", "chat-1", "m1")
        .await
        .unwrap_err();
    assert!(bizo_chat::retry::is_retryable(&err));
}

#[tokio::test]
async fn test_token_with_unreserved_chars_stays_literal() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1.0/ask/tok-1_a.b~c"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"done": "routed"})))
        .expect(1)
        .mount(&server)
        .await;

    let bot = BotDescriptor {
        bot_token: Some("tok-1_a.b~c".to_string()),
        ..protalk_bot("17")
    };
    let reply = client_for(&server).call_bot(&bot, "chat-1", "hi").await.unwrap();
    assert_eq!(reply, "routed");
}
