use crate::error::Result;
use crate::types::{AsyncMessageStatus, BotDescriptor, StatusPatch};
use async_trait::async_trait;

#[async_trait]
pub trait BotStore: Send + Sync {
    async fn get_bot_by_id(&self, bot_id: &str) -> Result<Option<BotDescriptor>>;
}

#[async_trait]
pub trait StatusStore: Send + Sync {
    async fn get(&self, message_id: &str) -> Result<Option<AsyncMessageStatus>>;
    async fn insert(&self, record: &AsyncMessageStatus) -> Result<()>;
    async fn update(&self, message_id: &str, patch: &StatusPatch) -> Result<()>;
}
