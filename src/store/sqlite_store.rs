use crate::store::error::{Result, StoreError};
use crate::store::traits::RecordStore;
use async_trait::async_trait;
use log::debug;
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::path::Path;
use tgcore::content::ContentKey;
use tgcore::records::{ChatRecord, CompoundId, ContentFile, MessageRecord, UserRecord};
use tokio::sync::Mutex;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS messages (
    id TEXT PRIMARY KEY NOT NULL,
    timestamp INTEGER NOT NULL,
    message TEXT NOT NULL,
    message_type INTEGER NOT NULL,
    content_file_id TEXT,
    chat_id INTEGER NOT NULL,
    sender_id INTEGER NOT NULL,
    in_reply_of TEXT,
    forwarded_from TEXT
);
CREATE INDEX IF NOT EXISTS from_sender_in_chat ON messages (sender_id, chat_id);

CREATE TABLE IF NOT EXISTS users (
    user_id INTEGER PRIMARY KEY NOT NULL,
    fullname TEXT NOT NULL,
    username TEXT,
    usernames TEXT,
    disabled_usernames TEXT,
    bio TEXT,
    profile_pic_file_id TEXT
);

CREATE TABLE IF NOT EXISTS chats (
    chat_id INTEGER PRIMARY KEY NOT NULL,
    group_id INTEGER,
    name TEXT NOT NULL,
    about TEXT,
    pic_file_id TEXT
);

CREATE TABLE IF NOT EXISTS files (
    file_id TEXT PRIMARY KEY NOT NULL,
    downloaded_as TEXT NOT NULL,
    origin_id TEXT NOT NULL
);
";

/// Username lists are stored comma-separated; usernames never contain commas.
fn join_names(names: &[String]) -> Option<String> {
    (!names.is_empty()).then(|| names.join(","))
}

fn split_names(raw: Option<String>) -> Vec<String> {
    raw.map(|r| {
        r.split(',')
            .filter(|n| !n.is_empty())
            .map(str::to_string)
            .collect()
    })
    .unwrap_or_default()
}

fn db_err(e: rusqlite::Error) -> StoreError {
    StoreError::Database(e.to_string())
}

fn parse_compound(raw: String) -> rusqlite::Result<CompoundId> {
    raw.parse().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<MessageRecord> {
    let reply: Option<String> = row.get("in_reply_of")?;
    Ok(MessageRecord {
        id: parse_compound(row.get("id")?)?,
        timestamp: row.get("timestamp")?,
        text: row.get("message")?,
        message_type: row.get("message_type")?,
        content_key: row
            .get::<_, Option<String>>("content_file_id")?
            .map(ContentKey::from_stored),
        sender_id: row.get("sender_id")?,
        reply_target: reply.map(parse_compound).transpose()?,
        forward_origin: row.get("forwarded_from")?,
    })
}

/// SQLite-backed [`RecordStore`]. Every statement is parameterized.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the database at `path`. `":memory:"` opens a private
    /// in-memory database.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(|e| StoreError::Connection(e.to_string()))?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().map_err(|e| StoreError::Connection(e.to_string()))?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;",
        )
        .map_err(db_err)?;
        conn.execute_batch(SCHEMA).map_err(db_err)?;
        debug!(target: "Store/Sqlite", "Schema ready");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

#[async_trait]
impl RecordStore for SqliteStore {
    async fn get_user(&self, user_id: i64) -> Result<Option<UserRecord>> {
        let conn = self.conn.lock().await;
        conn.query_row(
            "SELECT user_id, fullname, username, usernames, disabled_usernames, bio,
                    profile_pic_file_id
             FROM users WHERE user_id = ?1",
            params![user_id],
            |row| {
                Ok(UserRecord {
                    id: row.get(0)?,
                    display_name: row.get(1)?,
                    username: row.get(2)?,
                    usernames: split_names(row.get(3)?),
                    disabled_usernames: split_names(row.get(4)?),
                    bio: row.get(5)?,
                    avatar_key: row.get::<_, Option<String>>(6)?.map(ContentKey::from_stored),
                })
            },
        )
        .optional()
        .map_err(db_err)
    }

    async fn put_user(&self, user: &UserRecord) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO users (user_id, fullname, username, usernames, disabled_usernames,
                                bio, profile_pic_file_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(user_id) DO UPDATE SET
                fullname = excluded.fullname,
                username = excluded.username,
                usernames = excluded.usernames,
                disabled_usernames = excluded.disabled_usernames,
                bio = COALESCE(excluded.bio, users.bio),
                profile_pic_file_id = excluded.profile_pic_file_id",
            params![
                user.id,
                user.display_name,
                user.username,
                join_names(&user.usernames),
                join_names(&user.disabled_usernames),
                user.bio,
                user.avatar_key.as_ref().map(ContentKey::as_str),
            ],
        )
        .map_err(db_err)?;
        Ok(())
    }

    async fn update_user_bio(&self, user_id: i64, bio: &str) -> Result<bool> {
        let conn = self.conn.lock().await;
        let changed = conn
            .execute(
                "UPDATE users SET bio = ?1 WHERE user_id = ?2",
                params![bio, user_id],
            )
            .map_err(db_err)?;
        Ok(changed > 0)
    }

    async fn get_chat(&self, chat_id: i64) -> Result<Option<ChatRecord>> {
        let conn = self.conn.lock().await;
        conn.query_row(
            "SELECT chat_id, group_id, name, about, pic_file_id FROM chats WHERE chat_id = ?1",
            params![chat_id],
            |row| {
                Ok(ChatRecord {
                    id: row.get(0)?,
                    group_id: row.get(1)?,
                    name: row.get(2)?,
                    about: row.get(3)?,
                    avatar_key: row.get::<_, Option<String>>(4)?.map(ContentKey::from_stored),
                })
            },
        )
        .optional()
        .map_err(db_err)
    }

    async fn put_chat(&self, chat: &ChatRecord) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO chats (chat_id, group_id, name, about, pic_file_id)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(chat_id) DO UPDATE SET
                group_id = excluded.group_id,
                name = excluded.name,
                about = COALESCE(excluded.about, chats.about),
                pic_file_id = excluded.pic_file_id",
            params![
                chat.id,
                chat.group_id,
                chat.name,
                chat.about,
                chat.avatar_key.as_ref().map(ContentKey::as_str),
            ],
        )
        .map_err(db_err)?;
        Ok(())
    }

    async fn update_chat_about(&self, group_id: i64, about: &str) -> Result<bool> {
        let conn = self.conn.lock().await;
        let changed = conn
            .execute(
                "UPDATE chats SET about = ?1 WHERE group_id = ?2",
                params![about, group_id],
            )
            .map_err(db_err)?;
        Ok(changed > 0)
    }

    async fn insert_message(&self, message: &MessageRecord) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO messages
                (id, timestamp, message, message_type, content_file_id,
                 chat_id, sender_id, in_reply_of, forwarded_from)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                message.id.to_string(),
                message.timestamp,
                message.text,
                message.message_type,
                message.content_key.as_ref().map(ContentKey::as_str),
                message.chat_id(),
                message.sender_id,
                message.reply_target.map(|r| r.to_string()),
                message.forward_origin,
            ],
        )
        .map_err(|e| match e.sqlite_error_code() {
            Some(rusqlite::ErrorCode::ConstraintViolation) => {
                StoreError::Duplicate(message.id.to_string())
            }
            _ => db_err(e),
        })?;
        Ok(())
    }

    async fn get_message(&self, id: CompoundId) -> Result<Option<MessageRecord>> {
        let conn = self.conn.lock().await;
        conn.query_row(
            "SELECT id, timestamp, message, message_type, content_file_id,
                    chat_id, sender_id, in_reply_of, forwarded_from
             FROM messages WHERE id = ?1",
            params![id.to_string()],
            message_from_row,
        )
        .optional()
        .map_err(db_err)
    }

    async fn update_message_text(
        &self,
        id: CompoundId,
        text: &str,
        edit_timestamp: i64,
    ) -> Result<bool> {
        let conn = self.conn.lock().await;
        let changed = conn
            .execute(
                "UPDATE messages SET message = ?1, timestamp = ?2 WHERE id = ?3",
                params![text, edit_timestamp, id.to_string()],
            )
            .map_err(db_err)?;
        Ok(changed > 0)
    }

    async fn update_message_content(
        &self,
        id: CompoundId,
        content_key: &ContentKey,
        edit_timestamp: i64,
    ) -> Result<bool> {
        let conn = self.conn.lock().await;
        let changed = conn
            .execute(
                "UPDATE messages SET content_file_id = ?1, timestamp = ?2 WHERE id = ?3",
                params![content_key.as_str(), edit_timestamp, id.to_string()],
            )
            .map_err(db_err)?;
        Ok(changed > 0)
    }

    async fn put_file(&self, file: &ContentFile) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO files (file_id, downloaded_as, origin_id) VALUES (?1, ?2, ?3)
             ON CONFLICT(file_id) DO UPDATE SET
                downloaded_as = excluded.downloaded_as,
                origin_id = excluded.origin_id",
            params![file.key.as_str(), file.local_path, file.origin_id],
        )
        .map_err(db_err)?;
        Ok(())
    }

    async fn get_file(&self, key: &ContentKey) -> Result<Option<ContentFile>> {
        let conn = self.conn.lock().await;
        conn.query_row(
            "SELECT file_id, downloaded_as, origin_id FROM files WHERE file_id = ?1",
            params![key.as_str()],
            |row| {
                Ok(ContentFile {
                    key: ContentKey::from_stored(row.get::<_, String>(0)?),
                    local_path: row.get(1)?,
                    origin_id: row.get(2)?,
                })
            },
        )
        .optional()
        .map_err(db_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(chat_id: i64, message_id: i64) -> MessageRecord {
        MessageRecord {
            id: CompoundId::new(chat_id, message_id),
            timestamp: 1_700_000_000,
            text: "hi'); DROP TABLE messages; --".into(),
            message_type: 1,
            content_key: None,
            sender_id: 42,
            reply_target: Some(CompoundId::new(chat_id, message_id - 1)),
            forward_origin: Some("chat:-100".into()),
        }
    }

    #[tokio::test]
    async fn message_round_trip_and_edit() {
        let store = SqliteStore::open_in_memory().unwrap();
        let original = message(-100, 5);
        store.insert_message(&original).await.unwrap();

        let loaded = store.get_message(original.id).await.unwrap().unwrap();
        assert_eq!(loaded, original);

        assert!(store
            .update_message_text(original.id, "edited", 1_700_000_100)
            .await
            .unwrap());
        let edited = store.get_message(original.id).await.unwrap().unwrap();
        assert_eq!(edited.text, "edited");
        assert_eq!(edited.timestamp, 1_700_000_100);
        assert_eq!(edited.reply_target, original.reply_target);
        assert_eq!(edited.forward_origin, original.forward_origin);

        assert!(!store
            .update_message_text(CompoundId::new(1, 1), "missing", 0)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn duplicate_message_is_reported() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.insert_message(&message(1, 2)).await.unwrap();
        let err = store.insert_message(&message(1, 2)).await.unwrap_err();
        assert!(matches!(err, StoreError::Duplicate(_)));
    }

    #[tokio::test]
    async fn chat_about_is_updated_by_group_and_survives_upsert() {
        let store = SqliteStore::open_in_memory().unwrap();
        let chat = ChatRecord {
            id: -100_123,
            group_id: Some(123),
            name: "Group".into(),
            about: None,
            avatar_key: None,
        };
        store.put_chat(&chat).await.unwrap();
        assert!(store.update_chat_about(123, "rules").await.unwrap());

        let renamed = ChatRecord {
            name: "Renamed".into(),
            ..chat.clone()
        };
        store.put_chat(&renamed).await.unwrap();
        let loaded = store.get_chat(chat.id).await.unwrap().unwrap();
        assert_eq!(loaded.name, "Renamed");
        assert_eq!(loaded.about.as_deref(), Some("rules"));
        assert!(!store.update_chat_about(999, "x").await.unwrap());
    }

    #[tokio::test]
    async fn files_are_keyed_by_content_key() {
        let store = SqliteStore::open_in_memory().unwrap();
        let key = ContentKey::derive("AgAD", "1:2");
        assert!(store.get_file(&key).await.unwrap().is_none());
        let file = ContentFile {
            key: key.clone(),
            local_path: "/tmp/x".into(),
            origin_id: "1:2".into(),
        };
        store.put_file(&file).await.unwrap();
        store.put_file(&file).await.unwrap();
        assert_eq!(store.get_file(&key).await.unwrap(), Some(file));
    }

    #[tokio::test]
    async fn on_disk_database_persists_across_opens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("rec.db");
        {
            let store = SqliteStore::open(&path).unwrap();
            store
                .put_user(&UserRecord {
                    id: 1,
                    display_name: "Ann".into(),
                    username: Some("ann".into()),
                    usernames: vec!["ann".into(), "ann_b".into()],
                    disabled_usernames: vec!["annie".into()],
                    bio: Some("hi".into()),
                    avatar_key: None,
                })
                .await
                .unwrap();
        }
        let store = SqliteStore::open(&path).unwrap();
        let user = store.get_user(1).await.unwrap().unwrap();
        assert_eq!(user.username.as_deref(), Some("ann"));
        assert_eq!(user.usernames, vec!["ann", "ann_b"]);
        assert_eq!(user.disabled_usernames, vec!["annie"]);
        assert_eq!(user.bio.as_deref(), Some("hi"));
    }
}
