use crate::error::{ChatError, Result};
use crate::store::{BotStore, StatusStore};
use crate::types::{AsyncMessageStatus, BotDescriptor, MessageStatus, StatusPatch};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use sqlx::any::AnyRow;
use sqlx::{AnyPool, Row, ValueRef};
use std::borrow::Cow;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbKind {
    Sqlite,
    Postgres,
}

pub fn db_kind_from_url(url: &str) -> DbKind {
    let lower = url.to_lowercase();
    if lower.starts_with("postgres://") || lower.starts_with("postgresql://") {
        DbKind::Postgres
    } else {
        DbKind::Sqlite
    }
}

pub fn rewrite_sql(sql: &str, kind: DbKind) -> Cow<'_, str> {
    match kind {
        DbKind::Sqlite => Cow::Borrowed(sql),
        DbKind::Postgres => {
            let mut out = String::with_capacity(sql.len() + 8);
            let mut idx = 1;
            for ch in sql.chars() {
                if ch == '?' {
                    out.push('$');
                    out.push_str(&idx.to_string());
                    idx += 1;
                } else {
                    out.push(ch);
                }
            }
            Cow::Owned(out)
        }
    }
}

fn millis_to_datetime(ts: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ts).single().unwrap_or_else(Utc::now)
}

pub async fn init_db(pool: &AnyPool, kind: DbKind) -> Result<()> {
    let stmts = [
        r#"CREATE TABLE IF NOT EXISTS bots (
            bot_id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            bot_token TEXT,
            openai_key TEXT,
            updated_at BIGINT NOT NULL
        )"#,
        r#"CREATE TABLE IF NOT EXISTS async_message_status (
            message_id TEXT PRIMARY KEY,
            chat_id TEXT NOT NULL,
            bot_id TEXT NOT NULL,
            status TEXT NOT NULL,
            retry_count INTEGER NOT NULL,
            reply TEXT,
            error_message TEXT,
            created_at BIGINT NOT NULL,
            updated_at BIGINT NOT NULL
        )"#,
        r#"CREATE INDEX IF NOT EXISTS idx_async_status_chat ON async_message_status(chat_id, created_at)"#,
    ];

    for stmt in stmts {
        let sql = rewrite_sql(stmt, kind);
        sqlx::query(sql.as_ref()).execute(pool).await?;
    }
    Ok(())
}

// The Any driver refuses to decode NULL into Option<String>.
fn nullable_text(row: &AnyRow, column: &str) -> Result<Option<String>> {
    if row.try_get_raw(column)?.is_null() {
        return Ok(None);
    }
    Ok(Some(row.try_get(column)?))
}

fn bot_from_row(row: &AnyRow) -> Result<BotDescriptor> {
    Ok(BotDescriptor {
        bot_id: row.try_get("bot_id")?,
        name: row.try_get("name")?,
        bot_token: nullable_text(row, "bot_token")?,
        openai_key: nullable_text(row, "openai_key")?,
    })
}

pub async fn upsert_bot(pool: &AnyPool, kind: DbKind, bot: &BotDescriptor) -> Result<()> {
    let sql = rewrite_sql(
        r#"INSERT INTO bots (bot_id, name, bot_token, openai_key, updated_at)
           VALUES (?, ?, ?, ?, ?)
           ON CONFLICT(bot_id) DO UPDATE SET
               name=excluded.name,
               bot_token=excluded.bot_token,
               openai_key=excluded.openai_key,
               updated_at=excluded.updated_at"#,
        kind,
    );
    sqlx::query(sql.as_ref())
        .bind(&bot.bot_id)
        .bind(&bot.name)
        .bind(bot.bot_token.as_deref())
        .bind(bot.openai_key.as_deref())
        .bind(Utc::now().timestamp_millis())
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn get_bot(pool: &AnyPool, kind: DbKind, bot_id: &str) -> Result<Option<BotDescriptor>> {
    let sql = rewrite_sql(
        "SELECT bot_id, name, bot_token, openai_key FROM bots WHERE bot_id = ?",
        kind,
    );
    let row = sqlx::query(sql.as_ref())
        .bind(bot_id)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(bot_from_row).transpose()
}

pub async fn list_bots(pool: &AnyPool, kind: DbKind) -> Result<Vec<BotDescriptor>> {
    let sql = rewrite_sql(
        "SELECT bot_id, name, bot_token, openai_key FROM bots ORDER BY name ASC",
        kind,
    );
    let rows = sqlx::query(sql.as_ref()).fetch_all(pool).await?;
    rows.iter().map(bot_from_row).collect()
}

pub async fn insert_status(pool: &AnyPool, kind: DbKind, record: &AsyncMessageStatus) -> Result<()> {
    let sql = rewrite_sql(
        r#"INSERT INTO async_message_status (
            message_id, chat_id, bot_id, status, retry_count, reply, error_message, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        kind,
    );
    sqlx::query(sql.as_ref())
        .bind(&record.message_id)
        .bind(&record.chat_id)
        .bind(&record.bot_id)
        .bind(record.status.as_str())
        .bind(record.retry_count)
        .bind(record.reply.as_deref())
        .bind(record.error_message.as_deref())
        .bind(record.created_at.timestamp_millis())
        .bind(record.updated_at.timestamp_millis())
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn get_status(pool: &AnyPool, kind: DbKind, message_id: &str) -> Result<Option<AsyncMessageStatus>> {
    let sql = rewrite_sql(
        r#"SELECT message_id, chat_id, bot_id, status, retry_count, reply, error_message, created_at, updated_at
           FROM async_message_status WHERE message_id = ?"#,
        kind,
    );
    let row = sqlx::query(sql.as_ref())
        .bind(message_id)
        .fetch_optional(pool)
        .await?;

    let Some(row) = row else {
        return Ok(None);
    };
    let status: String = row.try_get("status")?;
    let created_at: i64 = row.try_get("created_at")?;
    let updated_at: i64 = row.try_get("updated_at")?;
    Ok(Some(AsyncMessageStatus {
        message_id: row.try_get("message_id")?,
        chat_id: row.try_get("chat_id")?,
        bot_id: row.try_get("bot_id")?,
        status: MessageStatus::parse(&status)
            .ok_or_else(|| ChatError::Storage(format!("unknown status value {status}")))?,
        retry_count: row.try_get::<i64, _>("retry_count")? as i32,
        reply: nullable_text(&row, "reply")?,
        error_message: nullable_text(&row, "error_message")?,
        created_at: millis_to_datetime(created_at),
        updated_at: millis_to_datetime(updated_at),
    }))
}

pub async fn update_status(pool: &AnyPool, kind: DbKind, message_id: &str, patch: &StatusPatch) -> Result<()> {
    let mut sets = vec!["updated_at=?"];
    if patch.status.is_some() {
        sets.push("status=?");
    }
    if patch.reply.is_some() {
        sets.push("reply=?");
    }
    if patch.error_message.is_some() {
        sets.push("error_message=?");
    }
    if patch.retry_count.is_some() {
        sets.push("retry_count=?");
    }
    let base_sql = format!(
        "UPDATE async_message_status SET {} WHERE message_id=?",
        sets.join(", ")
    );
    let sql = rewrite_sql(&base_sql, kind);

    let mut query = sqlx::query(sql.as_ref()).bind(Utc::now().timestamp_millis());
    if let Some(status) = patch.status {
        query = query.bind(status.as_str());
    }
    if let Some(reply) = patch.reply.as_deref() {
        query = query.bind(reply);
    }
    if let Some(error) = patch.error_message.as_deref() {
        query = query.bind(error);
    }
    if let Some(retry_count) = patch.retry_count {
        query = query.bind(retry_count);
    }
    query.bind(message_id).execute(pool).await?;
    Ok(())
}

#[derive(Clone)]
pub struct SqlStore {
    pub pool: AnyPool,
    pub kind: DbKind,
}

impl SqlStore {
    pub fn new(pool: AnyPool, kind: DbKind) -> Self {
        Self { pool, kind }
    }
}

#[async_trait]
impl BotStore for SqlStore {
    async fn get_bot_by_id(&self, bot_id: &str) -> Result<Option<BotDescriptor>> {
        get_bot(&self.pool, self.kind, bot_id).await
    }
}

#[async_trait]
impl StatusStore for SqlStore {
    async fn get(&self, message_id: &str) -> Result<Option<AsyncMessageStatus>> {
        get_status(&self.pool, self.kind, message_id).await
    }

    async fn insert(&self, record: &AsyncMessageStatus) -> Result<()> {
        insert_status(&self.pool, self.kind, record).await
    }

    async fn update(&self, message_id: &str, patch: &StatusPatch) -> Result<()> {
        update_status(&self.pool, self.kind, message_id, patch).await
    }
}
