use crate::store::error::{Result, StoreError};
use crate::store::traits::RecordStore;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use tgcore::content::ContentKey;
use tgcore::records::{ChatRecord, CompoundId, ContentFile, MessageRecord, UserRecord};
use tokio::sync::RwLock;

#[derive(Default)]
struct MessageLog {
    /// arrival order
    rows: Vec<MessageRecord>,
    index: HashMap<CompoundId, usize>,
}

/// Record store kept entirely in memory. Mirrors the SQLite semantics.
#[derive(Default)]
pub struct MemoryStore {
    users: RwLock<HashMap<i64, UserRecord>>,
    chats: RwLock<HashMap<i64, ChatRecord>>,
    messages: RwLock<MessageLog>,
    files: RwLock<HashMap<ContentKey, ContentFile>>,
    put_file_calls: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All messages in arrival order.
    pub async fn messages(&self) -> Vec<MessageRecord> {
        self.messages.read().await.rows.clone()
    }

    pub async fn file_count(&self) -> usize {
        self.files.read().await.len()
    }

    pub fn put_file_calls(&self) -> usize {
        self.put_file_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn get_user(&self, user_id: i64) -> Result<Option<UserRecord>> {
        Ok(self.users.read().await.get(&user_id).cloned())
    }

    async fn put_user(&self, user: &UserRecord) -> Result<()> {
        let mut users = self.users.write().await;
        let mut record = user.clone();
        if record.bio.is_none() {
            record.bio = users.get(&user.id).and_then(|u| u.bio.clone());
        }
        users.insert(user.id, record);
        Ok(())
    }

    async fn update_user_bio(&self, user_id: i64, bio: &str) -> Result<bool> {
        let mut users = self.users.write().await;
        match users.get_mut(&user_id) {
            Some(user) => {
                user.bio = Some(bio.to_string());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn get_chat(&self, chat_id: i64) -> Result<Option<ChatRecord>> {
        Ok(self.chats.read().await.get(&chat_id).cloned())
    }

    async fn put_chat(&self, chat: &ChatRecord) -> Result<()> {
        let mut chats = self.chats.write().await;
        let mut record = chat.clone();
        if record.about.is_none() {
            record.about = chats.get(&chat.id).and_then(|c| c.about.clone());
        }
        chats.insert(chat.id, record);
        Ok(())
    }

    async fn update_chat_about(&self, group_id: i64, about: &str) -> Result<bool> {
        let mut chats = self.chats.write().await;
        let mut matched = false;
        for chat in chats.values_mut().filter(|c| c.group_id == Some(group_id)) {
            chat.about = Some(about.to_string());
            matched = true;
        }
        Ok(matched)
    }

    async fn insert_message(&self, message: &MessageRecord) -> Result<()> {
        let mut log = self.messages.write().await;
        if log.index.contains_key(&message.id) {
            return Err(StoreError::Duplicate(message.id.to_string()));
        }
        let position = log.rows.len();
        log.index.insert(message.id, position);
        log.rows.push(message.clone());
        Ok(())
    }

    async fn get_message(&self, id: CompoundId) -> Result<Option<MessageRecord>> {
        let log = self.messages.read().await;
        Ok(log.index.get(&id).map(|&i| log.rows[i].clone()))
    }

    async fn update_message_text(
        &self,
        id: CompoundId,
        text: &str,
        edit_timestamp: i64,
    ) -> Result<bool> {
        let mut log = self.messages.write().await;
        let Some(&i) = log.index.get(&id) else {
            return Ok(false);
        };
        let row = &mut log.rows[i];
        row.text = text.to_string();
        row.timestamp = edit_timestamp;
        Ok(true)
    }

    async fn update_message_content(
        &self,
        id: CompoundId,
        content_key: &ContentKey,
        edit_timestamp: i64,
    ) -> Result<bool> {
        let mut log = self.messages.write().await;
        let Some(&i) = log.index.get(&id) else {
            return Ok(false);
        };
        let row = &mut log.rows[i];
        row.content_key = Some(content_key.clone());
        row.timestamp = edit_timestamp;
        Ok(true)
    }

    async fn put_file(&self, file: &ContentFile) -> Result<()> {
        self.put_file_calls.fetch_add(1, Ordering::SeqCst);
        self.files
            .write()
            .await
            .insert(file.key.clone(), file.clone());
        Ok(())
    }

    async fn get_file(&self, key: &ContentKey) -> Result<Option<ContentFile>> {
        Ok(self.files.read().await.get(key).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(chat_id: i64, message_id: i64, text: &str) -> MessageRecord {
        MessageRecord {
            id: CompoundId::new(chat_id, message_id),
            timestamp: 100,
            text: text.to_string(),
            message_type: 1,
            content_key: None,
            sender_id: 7,
            reply_target: None,
            forward_origin: None,
        }
    }

    #[tokio::test]
    async fn messages_keep_arrival_order_and_reject_duplicates() {
        let store = MemoryStore::new();
        store.insert_message(&message(1, 20, "b")).await.unwrap();
        store.insert_message(&message(1, 10, "a")).await.unwrap();
        assert!(matches!(
            store.insert_message(&message(1, 10, "again")).await,
            Err(StoreError::Duplicate(_))
        ));

        let texts: Vec<_> = store.messages().await.into_iter().map(|m| m.text).collect();
        assert_eq!(texts, vec!["b", "a"]);
    }

    #[tokio::test]
    async fn upsert_does_not_clear_bio() {
        let store = MemoryStore::new();
        let user = UserRecord {
            id: 3,
            display_name: "Ann".into(),
            ..Default::default()
        };
        store.put_user(&user).await.unwrap();
        assert!(store.update_user_bio(3, "hello").await.unwrap());
        store.put_user(&user).await.unwrap();
        assert_eq!(
            store.get_user(3).await.unwrap().unwrap().bio.as_deref(),
            Some("hello")
        );
        assert!(!store.update_user_bio(4, "nobody").await.unwrap());
    }

    #[tokio::test]
    async fn updates_report_missing_rows() {
        let store = MemoryStore::new();
        let id = CompoundId::new(1, 1);
        assert!(!store.update_message_text(id, "x", 5).await.unwrap());
        assert!(!store.update_chat_about(9, "about").await.unwrap());
    }
}
