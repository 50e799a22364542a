use bizo_chat::types::{
    AsyncMessageStatus, BotReply, FileAttachment, Message, MessageStatus, PollResult, Role,
    StatusPatch,
};
use chrono::Utc;
use serde_json::json;

#[test]
fn test_message_status_strings() {
    for status in [
        MessageStatus::Pending,
        MessageStatus::Processing,
        MessageStatus::Completed,
        MessageStatus::Error,
    ] {
        assert_eq!(MessageStatus::parse(status.as_str()), Some(status));
        assert_eq!(
            serde_json::to_value(status).unwrap(),
            json!(status.as_str())
        );
    }
    assert_eq!(MessageStatus::parse("Completed"), None);
}

#[test]
fn test_user_message_serialization() {
    let msg = Message::user("m1", "hello", 1_700_000_000_000);
    let value = serde_json::to_value(&msg).unwrap();
    assert_eq!(value["role"], "user");
    assert_eq!(value["timestamp"], 1_700_000_000_000i64);
    assert!(value.get("bot_id").is_none());
    assert!(value.get("files").is_none());
}

#[test]
fn test_bot_message_carries_author() {
    let msg = Message::bot("m2", "hi", Some("7".into()), Some("Seven".into()), 5);
    assert_eq!(msg.role, Role::Bot);
    let value = serde_json::to_value(&msg).unwrap();
    assert_eq!(value["role"], "bot");
    assert_eq!(value["bot_name"], "Seven");
}

#[test]
fn test_file_attachment_uses_type_key() {
    let raw = json!({"name": "a.pdf", "size": 12, "type": "application/pdf", "url": "https://x/a.pdf"});
    let file: FileAttachment = serde_json::from_value(raw).unwrap();
    assert_eq!(file.mime_type.as_deref(), Some("application/pdf"));
    assert_eq!(serde_json::to_value(&file).unwrap()["type"], "application/pdf");
}

#[test]
fn test_message_deserializes_without_optional_fields() {
    let raw = json!({"id": "m3", "role": "user", "content": "x", "timestamp": 1});
    let msg: Message = serde_json::from_value(raw).unwrap();
    assert!(msg.files.is_empty());
    assert!(msg.bot_name.is_none());
}

#[test]
fn test_bot_reply_success_omits_error() {
    let reply = BotReply::success("7", "Seven", "fine".to_string());
    assert!(!reply.is_error());
    let value = serde_json::to_value(&reply).unwrap();
    assert!(value.get("error").is_none());
    assert_eq!(value["response"], "fine");
}

#[test]
fn test_poll_result_from_record() {
    let now = Utc::now();
    let record = AsyncMessageStatus {
        message_id: "1_a".to_string(),
        chat_id: "c".to_string(),
        bot_id: "7".to_string(),
        status: MessageStatus::Error,
        retry_count: 2,
        reply: None,
        error_message: Some("gone".to_string()),
        created_at: now,
        updated_at: now,
    };
    let result = PollResult::from(&record);
    assert_eq!(result.status, MessageStatus::Error);
    assert_eq!(result.error.as_deref(), Some("gone"));
    let value = serde_json::to_value(&result).unwrap();
    assert_eq!(value, json!({"status": "error", "error": "gone"}));
}

#[test]
fn test_status_patch_constructors() {
    assert_eq!(
        StatusPatch::status(MessageStatus::Processing),
        StatusPatch {
            status: Some(MessageStatus::Processing),
            ..StatusPatch::default()
        }
    );
    let done = StatusPatch::completed("42".to_string());
    assert_eq!(done.reply.as_deref(), Some("42"));
    assert!(done.error_message.is_none());
    let failed = StatusPatch::failed("x".to_string());
    assert_eq!(failed.status, Some(MessageStatus::Error));
    assert!(failed.retry_count.is_none());
}

#[test]
fn test_group_conversation_appends_tagged_replies() {
    use bizo_chat::dispatch::replies_to_messages;
    use bizo_chat::types::Conversation;

    let created = Utc::now();
    let mut chat = Conversation {
        id: "chat-1".to_string(),
        title: "Team".to_string(),
        messages: vec![Message::user("m1", "Hello", 1)],
        bots_ids: vec!["b1".to_string(), "b2".to_string()],
        is_group_chat: true,
        bot_id: None,
        created_at: created,
        updated_at: created,
    };
    let replies = vec![
        BotReply::success("b1", "Alpha", "Hi".to_string()),
        BotReply::failure("b2", "Beta", "down".to_string()),
    ];
    let later = created + chrono::Duration::seconds(1);
    chat.append(replies_to_messages(&replies, 10), later);

    assert_eq!(chat.messages.len(), 3);
    assert_eq!(chat.messages[1].timestamp, 10);
    assert_eq!(chat.messages[2].timestamp, 11);
    assert_eq!(chat.messages[2].content, "error for bot b2: down");
    assert_eq!(chat.updated_at, later);
    assert!(chat.authors_consistent());

    chat.messages.push(Message::bot("m4", "anon", None, None, 12));
    assert!(!chat.authors_consistent());
}
