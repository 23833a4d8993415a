//! Persistence writer.
//!
//! Drains the persist queue conversation by conversation and turns each job
//! into store writes. Jobs for one conversation are applied in the order they
//! were queued, so an edit never overtakes the message it edits.

use crate::recorder::Recorder;
use crate::store::Result as StoreResult;
use log::{debug, error, info, warn};
use std::sync::Arc;
use tgcore::api::{Message, MessageContent, RemoteFile};
use tgcore::records::{ChatRecord, CompoundId, EntityKind, MessageRecord, UserRecord};
use tokio::sync::watch;

#[derive(Debug, Clone)]
pub enum PersistJob {
    NewMessage(Arc<Message>),
    TextEdit {
        id: CompoundId,
        text: String,
        edit_timestamp: i64,
    },
    ContentEdit {
        id: CompoundId,
        content: MessageContent,
        edit_timestamp: i64,
    },
    GroupAbout {
        group_id: i64,
        about: String,
    },
    /// Upsert a user. The avatar, if any, is fetched first and referenced
    /// only once it is saved.
    User {
        record: UserRecord,
        avatar: Option<RemoteFile>,
    },
    Chat {
        record: ChatRecord,
        avatar: Option<RemoteFile>,
    },
    UserBio {
        user_id: i64,
        bio: String,
    },
}

fn log_update(what: &str, result: StoreResult<bool>) {
    match result {
        Ok(true) => debug!(target: "Recorder/Writer", "Updated {what}"),
        Ok(false) => error!(target: "Recorder/Writer", "No record found for {what}"),
        Err(e) => error!(target: "Recorder/Writer", "Failed to update {what}: {e}"),
    }
}

impl Recorder {
    pub(crate) async fn run_writer(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(target: "Recorder/Writer", "Persistence writer started");
        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => {},
                _ = self.to_persist.notified() => {},
            }
            self.write_pending().await;
            if *shutdown.borrow() {
                break;
            }
        }
        // jobs queued while the last pass ran
        let written = self.write_pending().await;
        info!(target: "Recorder/Writer", "Persistence writer stopped, {written} jobs in final drain");
    }

    pub(crate) async fn write_pending(&self) -> usize {
        let mut written = 0;
        for (_, jobs) in self.to_persist.drain() {
            for job in jobs {
                self.persist(job).await;
                written += 1;
            }
        }
        written
    }

    async fn persist(&self, job: PersistJob) {
        match job {
            PersistJob::NewMessage(message) => {
                let mut record = MessageRecord::from_remote(&message);
                if let Some(file) = message.content.file() {
                    record.content_key = self.fetch_content(file, &record.id.to_string()).await;
                }
                match self.store.insert_message(&record).await {
                    Ok(()) => debug!(target: "Recorder/Writer", "Stored message {}", record.id),
                    Err(e) => {
                        error!(target: "Recorder/Writer", "Failed to store message {}: {e}", record.id)
                    }
                }
            }
            PersistJob::TextEdit {
                id,
                text,
                edit_timestamp,
            } => log_update(
                &format!("text of message {id}"),
                self.store
                    .update_message_text(id, &text, edit_timestamp)
                    .await,
            ),
            PersistJob::ContentEdit {
                id,
                content,
                edit_timestamp,
            } => {
                let Some(file) = content.file() else {
                    debug!(target: "Recorder/Writer", "New content of {id} has no file");
                    return;
                };
                let Some(key) = self.fetch_content(file, &id.to_string()).await else {
                    return;
                };
                log_update(
                    &format!("content of message {id}"),
                    self.store
                        .update_message_content(id, &key, edit_timestamp)
                        .await,
                );
            }
            PersistJob::GroupAbout { group_id, about } => log_update(
                &format!("about of group {group_id}"),
                self.store.update_chat_about(group_id, &about).await,
            ),
            PersistJob::User { mut record, avatar } => {
                let id = record.id;
                if let Some(file) = avatar {
                    record.avatar_key = self
                        .fetch_content(&file, &EntityKind::User.avatar_origin(id))
                        .await;
                }
                match self.store.put_user(&record).await {
                    // cache what the store now holds, bio included
                    Ok(()) => match self.store.get_user(id).await {
                        Ok(Some(stored)) => self.users.put(id, stored),
                        Ok(None) => {}
                        Err(e) => warn!(target: "Recorder/Writer", "Failed to reload user {id}: {e}"),
                    },
                    Err(e) => error!(target: "Recorder/Writer", "Failed to store user {id}: {e}"),
                }
                self.users.finish_fetch(id);
            }
            PersistJob::Chat { mut record, avatar } => {
                let id = record.id;
                if let Some(file) = avatar {
                    record.avatar_key = self
                        .fetch_content(&file, &EntityKind::Chat.avatar_origin(id))
                        .await;
                }
                match self.store.put_chat(&record).await {
                    Ok(()) => match self.store.get_chat(id).await {
                        Ok(Some(stored)) => self.chats.put(id, stored),
                        Ok(None) => {}
                        Err(e) => warn!(target: "Recorder/Writer", "Failed to reload chat {id}: {e}"),
                    },
                    Err(e) => error!(target: "Recorder/Writer", "Failed to store chat {id}: {e}"),
                }
                self.chats.finish_fetch(id);
            }
            PersistJob::UserBio { user_id, bio } => log_update(
                &format!("bio of user {user_id}"),
                self.store.update_user_bio(user_id, &bio).await,
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, RecordStore};
    use crate::test_utils::{
        MockSessionFactory, ScriptedPrompt, local_file, test_config, test_recorder, text_message,
    };
    use tgcore::content::ContentKey;

    fn idle_recorder(store: Arc<MemoryStore>, dir: &std::path::Path) -> Arc<Recorder> {
        test_recorder(
            test_config(dir),
            store,
            Arc::new(MockSessionFactory::new()),
            Arc::new(ScriptedPrompt::silent()),
        )
    }

    fn new_message(chat_id: i64, message_id: i64) -> PersistJob {
        PersistJob::NewMessage(Arc::new(text_message(chat_id, message_id, 5, "hello")))
    }

    #[tokio::test]
    async fn shutdown_drains_everything_already_queued() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        let recorder = idle_recorder(store.clone(), dir.path());
        let shutdown = recorder.shutdown.subscribe();

        recorder.to_persist.enqueue(1, new_message(1, 1));
        recorder.to_persist.enqueue(2, new_message(2, 1));
        recorder.to_persist.enqueue(1, new_message(1, 2));
        recorder.shutdown.send_replace(true);
        recorder.clone().run_writer(shutdown).await;

        let ids: Vec<_> = store.messages().await.into_iter().map(|m| m.id).collect();
        assert_eq!(ids.len(), 3);
        let first = ids.iter().position(|id| *id == CompoundId::new(1, 1)).unwrap();
        let second = ids.iter().position(|id| *id == CompoundId::new(1, 2)).unwrap();
        assert!(first < second);
        assert!(ids.contains(&CompoundId::new(2, 1)));
        assert!(recorder.to_persist.is_empty());
    }

    #[tokio::test]
    async fn failing_job_does_not_stall_the_queue() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        let recorder = idle_recorder(store.clone(), dir.path());

        recorder.to_persist.enqueue(
            3,
            PersistJob::TextEdit {
                id: CompoundId::new(3, 99),
                text: "never stored".into(),
                edit_timestamp: 1,
            },
        );
        recorder.to_persist.enqueue(3, new_message(3, 1));
        // duplicate insert fails, the edit behind it still applies
        recorder.to_persist.enqueue(3, new_message(3, 1));
        recorder.to_persist.enqueue(
            3,
            PersistJob::TextEdit {
                id: CompoundId::new(3, 1),
                text: "edited".into(),
                edit_timestamp: 2,
            },
        );
        recorder.to_persist.enqueue(
            3,
            PersistJob::ContentEdit {
                id: CompoundId::new(3, 1),
                content: MessageContent::text_message("no file here"),
                edit_timestamp: 3,
            },
        );
        assert_eq!(recorder.write_pending().await, 5);

        let stored = store.get_message(CompoundId::new(3, 1)).await.unwrap().unwrap();
        assert_eq!(stored.text, "edited");
        assert_eq!(stored.timestamp, 2);
        assert_eq!(store.messages().await.len(), 1);
    }

    #[tokio::test]
    async fn metadata_jobs_upsert_and_amend() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        let recorder = idle_recorder(store.clone(), dir.path());

        recorder.to_persist.enqueue(
            8,
            PersistJob::User {
                record: UserRecord {
                    id: 8,
                    display_name: "Grace".into(),
                    ..Default::default()
                },
                avatar: None,
            },
        );
        recorder.to_persist.enqueue(
            8,
            PersistJob::UserBio {
                user_id: 8,
                bio: "compilers".into(),
            },
        );
        recorder.to_persist.enqueue(
            -1008,
            PersistJob::Chat {
                record: ChatRecord {
                    id: -1008,
                    group_id: Some(1008),
                    name: "Lab".into(),
                    ..Default::default()
                },
                avatar: None,
            },
        );
        recorder.write_pending().await;
        recorder.to_persist.enqueue(
            1008,
            PersistJob::GroupAbout {
                group_id: 1008,
                about: "research".into(),
            },
        );
        recorder.write_pending().await;

        let user = store.get_user(8).await.unwrap().unwrap();
        assert_eq!(user.bio.as_deref(), Some("compilers"));
        let chat = store.get_chat(-1008).await.unwrap().unwrap();
        assert_eq!(chat.about.as_deref(), Some("research"));
        assert_eq!(recorder.users.get(8).map(|u| u.display_name), Some("Grace".into()));
    }

    #[tokio::test]
    async fn unsaved_avatar_is_not_referenced() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        let recorder = idle_recorder(store.clone(), dir.path());
        assert!(recorder.users.begin_fetch(42));

        // not on disk and no session to download it through
        let mut avatar = local_file(9, "AQADgone", &dir.path().join("missing.jpg"));
        avatar.local = Default::default();
        recorder.to_persist.enqueue(
            42,
            PersistJob::User {
                record: UserRecord {
                    id: 42,
                    display_name: "Ada".into(),
                    ..Default::default()
                },
                avatar: Some(avatar),
            },
        );
        recorder.write_pending().await;

        let stored = store.get_user(42).await.unwrap().unwrap();
        assert_eq!(stored.display_name, "Ada");
        assert!(stored.avatar_key.is_none());
        assert_eq!(store.put_file_calls(), 0);
        assert_eq!(recorder.users.get(42), Some(stored));
        assert!(!recorder.users.is_fetching(42));
    }

    #[tokio::test]
    async fn saved_avatar_is_referenced_by_the_chat() {
        let dir = tempfile::tempdir().unwrap();
        let picture = dir.path().join("group.jpg");
        std::fs::write(&picture, b"jpeg").unwrap();
        let store = Arc::new(MemoryStore::new());
        let recorder = idle_recorder(store.clone(), &dir.path().join("downloads"));

        recorder.to_persist.enqueue(
            -77,
            PersistJob::Chat {
                record: ChatRecord {
                    id: -77,
                    name: "Photos".into(),
                    ..Default::default()
                },
                avatar: Some(local_file(4, "AQADgroup", &picture)),
            },
        );
        recorder.write_pending().await;

        let key = ContentKey::derive("AQADgroup", &EntityKind::Chat.avatar_origin(-77));
        let stored = store.get_chat(-77).await.unwrap().unwrap();
        assert_eq!(stored.avatar_key, Some(key.clone()));
        assert!(store.get_file(&key).await.unwrap().is_some());
    }
}
