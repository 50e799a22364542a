pub mod config;
pub mod db;
pub mod dispatch;
pub mod error;
pub mod history;
pub mod providers;
pub mod retry;
pub mod store;
pub mod tracker;
pub mod types;
pub mod ws;

pub use config::Config;
pub use error::ChatError;

use self::config::{load_config, resolve_database_url};
use self::db::SqlStore;
use self::dispatch::{parse_mention, replies_to_messages, resolve_mention, GroupRequest, Orchestrator};
use self::providers::HttpBotClient;
use self::retry::RetryPolicy;
use self::tracker::{AsyncMessageTracker, PollUpdate, Scheduler, TokioScheduler};
use self::types::{BotDescriptor, BotReply, FileAttachment, Message, PollResult};

use axum::{
    extract::{Path, Query, State, WebSocketUpgrade},
    http::{HeaderMap, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::AnyPool;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info};

pub const AUTH_HEADER: &str = "X-Bizo-Token";

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub store: SqlStore,
    pub orchestrator: Orchestrator,
    pub tracker: AsyncMessageTracker,
    pub scheduler: Arc<dyn Scheduler>,
    pub ws_tx: broadcast::Sender<ws::WsEvent>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SingleMessageRequest {
    pub bot_id: String,
    pub text: String,
    #[serde(default)]
    pub files: Vec<FileAttachment>,
    #[serde(default)]
    pub history: Vec<Message>,
}

#[derive(Debug, Serialize)]
pub struct SingleMessageResponse {
    pub reply: String,
    pub message: Message,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GroupMessageRequest {
    pub bot_ids: Vec<String>,
    pub text: String,
    #[serde(default)]
    pub files: Vec<FileAttachment>,
    #[serde(default)]
    pub history: Vec<Message>,
    pub target_bot_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct GroupMessageResponse {
    pub responses: Vec<BotReply>,
    pub messages: Vec<Message>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AsyncSendRequest {
    pub bot_id: String,
    pub text: String,
    #[serde(default)]
    pub files: Vec<FileAttachment>,
}

#[derive(Debug, Serialize)]
pub struct AsyncSendResponse {
    pub message_id: String,
    pub status: String,
}

#[derive(Debug, Deserialize)]
pub struct PollQuery {
    pub bot_id: String,
    pub chat_id: String,
}

#[derive(Debug, Deserialize)]
pub struct TokenQuery {
    pub token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BotUpsertRequest {
    pub name: String,
    pub bot_token: Option<String>,
    pub openai_key: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct BotSummary {
    pub bot_id: String,
    pub name: String,
    pub has_bot_token: bool,
    pub has_openai_key: bool,
}

impl From<&BotDescriptor> for BotSummary {
    fn from(bot: &BotDescriptor) -> Self {
        Self {
            bot_id: bot.bot_id.clone(),
            name: bot.name.clone(),
            has_bot_token: bot.token().is_some(),
            has_openai_key: bot
                .openai_key
                .as_deref()
                .is_some_and(|key| !key.trim().is_empty()),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub bots: i64,
    pub async_messages: i64,
}

pub fn build_state(config: Config, store: SqlStore, http: reqwest::Client) -> AppState {
    let client = Arc::new(HttpBotClient::from_config(http, &config));
    let retry = RetryPolicy::from(&config.retry);
    let store_arc = Arc::new(store.clone());

    let orchestrator = Orchestrator::new(
        store_arc.clone(),
        client.clone(),
        retry.clone(),
        config.history.max_messages,
    );
    let tracker = AsyncMessageTracker::new(store_arc.clone(), store_arc, client, retry);
    let (ws_tx, _) = broadcast::channel(100);

    AppState {
        config,
        store,
        orchestrator,
        tracker,
        scheduler: Arc::new(TokioScheduler),
        ws_tx,
    }
}

pub fn build_router(state: AppState) -> Router {
    let authed_routes = Router::new()
        .route("/v1/status", get(status))
        .route("/v1/bots", get(list_bots))
        .route("/v1/bots/:bot_id", get(get_bot).put(put_bot))
        .route("/v1/chats/:chat_id/messages", post(send_single))
        .route("/v1/chats/:chat_id/group-messages", post(send_group))
        .route("/v1/chats/:chat_id/async-messages", post(send_async))
        .route("/v1/async-messages/:message_id", get(poll_message))
        .route("/v1/ws", get(ws_handler))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth));

    let public_routes = Router::new().route("/v1/health", get(health));

    Router::new()
        .merge(authed_routes)
        .merge(public_routes)
        .with_state(state)
}

pub async fn create_app() -> anyhow::Result<(AppState, Router)> {
    sqlx::any::install_default_drivers();

    let config = load_config();
    let db_url = resolve_database_url(&config);
    let db_kind = db::db_kind_from_url(&db_url);
    let pool = AnyPool::connect(&db_url).await?;
    db::init_db(&pool, db_kind).await?;
    info!(?db_kind, "database ready");

    let state = build_state(config, SqlStore::new(pool, db_kind), reqwest::Client::new());
    let app = build_router(state.clone());
    Ok((state, app))
}

async fn require_auth(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<TokenQuery>,
    req: axum::http::Request<axum::body::Body>,
    next: middleware::Next,
) -> impl IntoResponse {
    if let Some(token) = state.config.auth.token.as_ref() {
        let supplied = headers
            .get(AUTH_HEADER)
            .and_then(|v| v.to_str().ok())
            .or(query.token.as_deref());
        if supplied != Some(token.as_str()) {
            return StatusCode::UNAUTHORIZED.into_response();
        }
    }
    next.run(req).await
}

fn error_response(err: ChatError) -> Response {
    let status = match &err {
        ChatError::BotNotFound(_) | ChatError::UnknownMessage(_) => StatusCode::NOT_FOUND,
        e if e.is_config() => StatusCode::BAD_REQUEST,
        ChatError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::BAD_GATEWAY,
    };
    (status, Json(json!({"error": err.to_string()}))).into_response()
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

async fn status(State(state): State<AppState>) -> impl IntoResponse {
    let bots = sqlx::query_scalar::<_, i64>("SELECT COUNT(1) FROM bots")
        .fetch_one(&state.store.pool)
        .await
        .unwrap_or(0);
    let async_messages = sqlx::query_scalar::<_, i64>("SELECT COUNT(1) FROM async_message_status")
        .fetch_one(&state.store.pool)
        .await
        .unwrap_or(0);
    Json(StatusResponse { bots, async_messages })
}

async fn ws_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    let rx = state.ws_tx.subscribe();
    let token = state.config.auth.token.clone();
    ws.on_upgrade(move |socket| ws::handle_ws(socket, rx, token))
}

async fn list_bots(State(state): State<AppState>) -> Response {
    match db::list_bots(&state.store.pool, state.store.kind).await {
        Ok(bots) => Json(bots.iter().map(BotSummary::from).collect::<Vec<_>>()).into_response(),
        Err(err) => error_response(err),
    }
}

async fn get_bot(State(state): State<AppState>, Path(bot_id): Path<String>) -> Response {
    match db::get_bot(&state.store.pool, state.store.kind, &bot_id).await {
        Ok(Some(bot)) => Json(BotSummary::from(&bot)).into_response(),
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(err) => error_response(err),
    }
}

async fn put_bot(
    State(state): State<AppState>,
    Path(bot_id): Path<String>,
    Json(req): Json<BotUpsertRequest>,
) -> Response {
    let bot = BotDescriptor {
        bot_id,
        name: req.name,
        bot_token: req.bot_token,
        openai_key: req.openai_key,
    };
    if bot.credential().is_none() {
        return error_response(ChatError::Config(format!(
            "bot {} needs a bot_token or an openai_key",
            bot.bot_id
        )));
    }
    match db::upsert_bot(&state.store.pool, state.store.kind, &bot).await {
        Ok(()) => Json(BotSummary::from(&bot)).into_response(),
        Err(err) => error_response(err),
    }
}

async fn send_single(
    State(state): State<AppState>,
    Path(chat_id): Path<String>,
    Json(req): Json<SingleMessageRequest>,
) -> Response {
    match state
        .orchestrator
        .send_single(&chat_id, &req.bot_id, &req.text, &req.files, &req.history)
        .await
    {
        Ok(reply) => {
            let message = Message::bot(
                uuid::Uuid::new_v4().to_string(),
                reply.clone(),
                Some(req.bot_id.clone()),
                None,
                now_millis(),
            );
            Json(SingleMessageResponse { reply, message }).into_response()
        }
        Err(err) => {
            error!("send_single error: {err}");
            error_response(err)
        }
    }
}

async fn send_group(
    State(state): State<AppState>,
    Path(chat_id): Path<String>,
    Json(req): Json<GroupMessageRequest>,
) -> Response {
    let mention = parse_mention(&req.text);
    let mut preferred = req.target_bot_id.clone();
    if preferred.is_none() {
        if let Some(target) = mention.target.as_deref() {
            let bots = state.orchestrator.resolve_bots(&req.bot_ids).await;
            preferred = resolve_mention(target, &bots).map(|bot| bot.bot_id.clone());
        }
    }

    let group = GroupRequest {
        chat_id: chat_id.clone(),
        user_text: mention.text,
        bot_ids: req.bot_ids,
        files: req.files,
        preferred_first_bot_id: preferred,
        history: req.history,
    };

    match state.orchestrator.dispatch_group_message(&group).await {
        Ok(responses) => {
            let messages = replies_to_messages(&responses, now_millis());
            let _ = state.ws_tx.send(ws::WsEvent {
                event: ws::EVENT_GROUP_TURN.to_string(),
                chat_id: Some(chat_id),
                payload: json!({"messages": messages}),
            });
            Json(GroupMessageResponse { responses, messages }).into_response()
        }
        Err(err) => {
            error!("send_group error: {err}");
            error_response(err)
        }
    }
}

async fn send_async(
    State(state): State<AppState>,
    Path(chat_id): Path<String>,
    Json(req): Json<AsyncSendRequest>,
) -> Response {
    let message_id = match state
        .tracker
        .send_async(&chat_id, &req.bot_id, &req.text, &req.files)
        .await
    {
        Ok(id) => id,
        Err(err) => {
            error!("send_async error: {err}");
            return error_response(err);
        }
    };

    let ws_tx = state.ws_tx.clone();
    let event_chat = chat_id.clone();
    let event_message = message_id.clone();
    state.tracker.start_polling(
        &message_id,
        &req.bot_id,
        &chat_id,
        &state.config.polling,
        state.scheduler.clone(),
        move |update: PollUpdate| {
            let _ = ws_tx.send(ws::WsEvent {
                event: ws::EVENT_MESSAGE_STATUS.to_string(),
                chat_id: Some(event_chat),
                payload: json!({"message_id": event_message, "update": update}),
            });
        },
    );

    Json(AsyncSendResponse {
        message_id,
        status: "processing".to_string(),
    })
    .into_response()
}

async fn poll_message(
    State(state): State<AppState>,
    Path(message_id): Path<String>,
    Query(query): Query<PollQuery>,
) -> Response {
    match state
        .tracker
        .poll(&message_id, &query.bot_id, &query.chat_id)
        .await
    {
        Ok(result) => Json::<PollResult>(result).into_response(),
        Err(err) => error_response(err),
    }
}
