use axum::extract::ws::{Message, WebSocket};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tokio::sync::broadcast;

pub const EVENT_MESSAGE_STATUS: &str = "message_status";
pub const EVENT_GROUP_TURN: &str = "group_turn";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsEvent {
    pub event: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<String>,
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WsCommand {
    #[serde(rename = "connect")]
    Connect { token: Option<String> },
    #[serde(rename = "subscribe")]
    Subscribe {
        events: Option<Vec<String>>,
        #[serde(default)]
        chat_ids: Option<Vec<String>>,
    },
    #[serde(rename = "ping")]
    Ping,
}

#[derive(Debug, Clone, Default)]
pub struct Subscription {
    pub events: Option<HashSet<String>>,
    pub chat_ids: Option<HashSet<String>>,
}

impl Subscription {
    pub fn accepts(&self, evt: &WsEvent) -> bool {
        if let Some(events) = self.events.as_ref() {
            if !events.contains(&evt.event) {
                return false;
            }
        }
        match (self.chat_ids.as_ref(), evt.chat_id.as_ref()) {
            (Some(chats), Some(chat_id)) => chats.contains(chat_id),
            (Some(_), None) => false,
            (None, _) => true,
        }
    }
}

fn to_text(evt: &WsEvent) -> Message {
    Message::Text(serde_json::to_string(evt).unwrap_or_default())
}

pub async fn handle_ws(
    mut socket: WebSocket,
    mut rx: broadcast::Receiver<WsEvent>,
    auth_token: Option<String>,
) {
    let mut authorized = auth_token.is_none();
    let mut subscription = Subscription::default();

    loop {
        tokio::select! {
            msg = socket.recv() => {
                let text = match msg {
                    None | Some(Ok(Message::Close(_))) | Some(Err(_)) => break,
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(_)) => continue,
                };
                let Ok(cmd) = serde_json::from_str::<WsCommand>(&text) else {
                    continue;
                };
                match cmd {
                    WsCommand::Connect { token } => {
                        if let Some(expected) = auth_token.as_ref() {
                            if token.as_deref() != Some(expected.as_str()) {
                                let _ = socket.send(Message::Close(None)).await;
                                break;
                            }
                        }
                        authorized = true;
                        let ack = WsEvent {
                            event: "presence".to_string(),
                            chat_id: None,
                            payload: serde_json::json!({"status": "connected"}),
                        };
                        let _ = socket.send(to_text(&ack)).await;
                    }
                    WsCommand::Subscribe { events, chat_ids } => {
                        subscription = Subscription {
                            events: events.map(|items| items.into_iter().collect()),
                            chat_ids: chat_ids.map(|items| items.into_iter().collect()),
                        };
                    }
                    WsCommand::Ping => {
                        let health = WsEvent {
                            event: "health".to_string(),
                            chat_id: None,
                            payload: serde_json::json!({"status": "ok"}),
                        };
                        let _ = socket.send(to_text(&health)).await;
                    }
                }
            }
            evt = rx.recv() => {
                let Ok(evt) = evt else {
                    continue;
                };
                if !authorized || !subscription.accepts(&evt) {
                    continue;
                }
                if socket.send(to_text(&evt)).await.is_err() {
                    break;
                }
            }
        }
    }
}
