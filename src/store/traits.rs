use crate::store::error::Result;
use async_trait::async_trait;
use tgcore::content::ContentKey;
use tgcore::records::{ChatRecord, CompoundId, ContentFile, MessageRecord, UserRecord};

/// Durable storage for everything the recorder observes.
///
/// `update_*` methods return `Ok(false)` when no row matched; callers log
/// that and move on.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn get_user(&self, user_id: i64) -> Result<Option<UserRecord>>;
    /// Upsert. A `None` bio never clears a stored one.
    async fn put_user(&self, user: &UserRecord) -> Result<()>;
    async fn update_user_bio(&self, user_id: i64, bio: &str) -> Result<bool>;

    async fn get_chat(&self, chat_id: i64) -> Result<Option<ChatRecord>>;
    /// Upsert. A `None` about never clears a stored one.
    async fn put_chat(&self, chat: &ChatRecord) -> Result<()>;
    async fn update_chat_about(&self, group_id: i64, about: &str) -> Result<bool>;

    /// Append a message. Arrival order is preserved; a repeated compound id
    /// is an error.
    async fn insert_message(&self, message: &MessageRecord) -> Result<()>;
    async fn get_message(&self, id: CompoundId) -> Result<Option<MessageRecord>>;
    async fn update_message_text(
        &self,
        id: CompoundId,
        text: &str,
        edit_timestamp: i64,
    ) -> Result<bool>;
    async fn update_message_content(
        &self,
        id: CompoundId,
        content_key: &ContentKey,
        edit_timestamp: i64,
    ) -> Result<bool>;

    async fn put_file(&self, file: &ContentFile) -> Result<()>;
    async fn get_file(&self, key: &ContentKey) -> Result<Option<ContentFile>>;
}
