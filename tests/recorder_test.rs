use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tgrecorder::Recorder;
use tgrecorder::api::{
    AuthorizationState, Document, FormattedText, ForwardOrigin, GroupFullInfo, Message,
    MessageContent, MessageForwardInfo, MessageReplyTo, Object, Request, Update, UserFullInfo,
};
use tgrecorder::content::ContentKey;
use tgrecorder::records::{CompoundId, EntityKind};
use tgrecorder::store::{MemoryStore, RecordStore};
use tgrecorder::test_utils::{
    MockSessionClient, MockSessionFactory, Responder, ScriptedPrompt, eventually, group_chat,
    local_file, metadata_responder, test_config, test_recorder, text_message, user,
};

const WAIT: Duration = Duration::from_secs(5);

struct Harness {
    recorder: Arc<Recorder>,
    store: Arc<MemoryStore>,
    client: Arc<MockSessionClient>,
    dir: TempDir,
}

async fn authorized(responder: Responder) -> Harness {
    let dir = tempfile::tempdir().expect("temp dir");
    let client = Arc::new(MockSessionClient::with_responder(responder));
    let factory = Arc::new(MockSessionFactory::with_clients(vec![client.clone()]));
    let store = Arc::new(MemoryStore::new());
    let recorder = test_recorder(
        test_config(&dir.path().join("downloads")),
        store.clone(),
        factory,
        Arc::new(ScriptedPrompt::silent()),
    );
    recorder.start().await.expect("recorder should start");

    client.push(Update::AuthorizationState {
        authorization_state: AuthorizationState::Ready,
    });
    let rec = &recorder;
    assert!(eventually(WAIT, || async move { rec.is_authorized() }).await);

    Harness {
        recorder,
        store,
        client,
        dir,
    }
}

fn with_document(mut message: Message, file: tgrecorder::api::RemoteFile, caption: &str) -> Message {
    message.content = MessageContent::MessageDocument {
        document: Document {
            file_name: "notes.txt".to_string(),
            document: file,
        },
        caption: FormattedText::from(caption),
    };
    message
}

#[tokio::test]
async fn messages_of_one_conversation_are_read_in_order() {
    let h = authorized(metadata_responder()).await;
    h.client.push(Update::NewMessage {
        message: text_message(10, 1, 7, "first"),
    });
    h.client.push(Update::NewMessage {
        message: text_message(10, 2, 7, "second"),
    });

    let position = |id: i64| {
        h.client.sent_requests().iter().position(|r| {
            matches!(r, Request::ViewMessages { chat_id: 10, message_ids, force_read: true, .. } if message_ids == &vec![id])
        })
    };
    let client = &h.client;
    assert!(
        eventually(WAIT, || async move {
            client
                .sent_requests()
                .iter()
                .filter(|r| matches!(r, Request::ViewMessages { .. }))
                .count()
                == 2
        })
        .await
    );

    let first = position(1).expect("first message viewed");
    let second = position(2).expect("second message viewed");
    assert!(first < second);
    let opened = h
        .client
        .sent_requests()
        .iter()
        .position(|r| matches!(r, Request::OpenChat { chat_id: 10 }))
        .expect("chat opened");
    assert!(opened < first);

    h.recorder.stop().await.unwrap();
    assert_eq!(h.store.messages().await.len(), 2);
}

#[tokio::test]
async fn late_code_reply_after_close_is_discarded() {
    let dir = tempfile::tempdir().unwrap();
    let first = Arc::new(MockSessionClient::new());
    let factory = Arc::new(
        MockSessionFactory::with_clients(vec![first.clone()]).with_responder(metadata_responder()),
    );
    let prompt = Arc::new(ScriptedPrompt::new(["24680"]));
    let recorder = test_recorder(
        test_config(dir.path()),
        Arc::new(MemoryStore::new()),
        factory.clone(),
        prompt.clone(),
    );
    recorder.start().await.unwrap();

    first.push(Update::AuthorizationState {
        authorization_state: AuthorizationState::WaitCode,
    });
    let client = &first;
    assert!(
        eventually(WAIT, || async move {
            client
                .last_request_id(|r| matches!(r, Request::CheckAuthenticationCode { .. }))
                .is_some()
        })
        .await
    );
    let code_request = first
        .last_request_id(|r| matches!(r, Request::CheckAuthenticationCode { .. }))
        .unwrap();

    // the session closes before the code check is answered
    first.push(Update::AuthorizationState {
        authorization_state: AuthorizationState::Closed,
    });
    first.reply(
        code_request,
        Object::Error {
            code: 400,
            message: "PHONE_CODE_INVALID".to_string(),
        },
    );

    let rec = &recorder;
    assert!(eventually(WAIT, || async move { rec.restart_count() == 1 }).await);
    assert_eq!(factory.created().len(), 2);
    assert!(!recorder.is_authorized());

    // the fresh session starts over normally
    let second = factory.latest().unwrap();
    second.push(Update::AuthorizationState {
        authorization_state: AuthorizationState::WaitParameters,
    });
    let client = &second;
    assert!(
        eventually(WAIT, || async move {
            client
                .sent_requests()
                .iter()
                .any(|r| matches!(r, Request::SetParameters(_)))
        })
        .await
    );

    recorder.stop().await.unwrap();
    assert_eq!(prompt.asked(), vec!["Enter authentication code".to_string()]);
    let code_checks = factory
        .created()
        .iter()
        .flat_map(|c| c.sent_requests())
        .filter(|r| matches!(r, Request::CheckAuthenticationCode { .. }))
        .count();
    assert_eq!(code_checks, 1);
}

#[tokio::test]
async fn rejected_code_is_asked_again() {
    let dir = tempfile::tempdir().unwrap();
    let client = Arc::new(MockSessionClient::with_responder(Arc::new(|request: &Request| {
        match request {
            Request::CheckAuthenticationCode { code } if code == "1111" => Some(Object::Error {
                code: 400,
                message: "PHONE_CODE_INVALID".to_string(),
            }),
            _ => Some(Object::Ok),
        }
    })));
    let factory = Arc::new(MockSessionFactory::with_clients(vec![client.clone()]));
    let prompt = Arc::new(ScriptedPrompt::new(["1111", "2222"]));
    let recorder = test_recorder(
        test_config(dir.path()),
        Arc::new(MemoryStore::new()),
        factory,
        prompt.clone(),
    );
    recorder.start().await.unwrap();
    client.push(Update::AuthorizationState {
        authorization_state: AuthorizationState::WaitCode,
    });

    let c = &client;
    assert!(
        eventually(WAIT, || async move {
            c.sent_requests().iter().any(
                |r| matches!(r, Request::CheckAuthenticationCode { code } if code == "2222"),
            )
        })
        .await
    );
    recorder.stop().await.unwrap();
    assert_eq!(prompt.asked().len(), 2);
}

#[tokio::test]
async fn edit_changes_text_and_timestamp_only() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("notes.txt");
    std::fs::write(&source, b"meeting notes").unwrap();
    let attachment = local_file(3, "AgADnotes", &source);

    let mut original = with_document(text_message(10, 2, 7, ""), attachment, "see attached");
    original.reply_to = Some(MessageReplyTo::MessageReplyToMessage {
        chat_id: 10,
        message_id: 1,
    });
    original.forward_info = Some(MessageForwardInfo {
        origin: ForwardOrigin::MessageOriginChat {
            sender_chat_id: -100500,
            author_signature: String::new(),
        },
        date: 1_600_000_000,
    });

    let mut edited = original.clone();
    if let MessageContent::MessageDocument { caption, .. } = &mut edited.content {
        *caption = FormattedText::from("see attached, v2");
    }
    let fallback = metadata_responder();
    let h = authorized(Arc::new(move |request: &Request| match request {
        Request::GetMessage { .. } => Some(Object::Message(edited.clone())),
        other => fallback(other),
    }))
    .await;

    h.client.push(Update::NewMessage {
        message: original.clone(),
    });
    let store = &h.store;
    assert!(eventually(WAIT, || async move { store.messages().await.len() == 1 }).await);

    let id = CompoundId::new(10, 2);
    let stored = h.store.get_message(id).await.unwrap().unwrap();
    assert_eq!(stored.reply_target, Some(CompoundId::new(10, 1)));
    assert_eq!(stored.forward_origin.as_deref(), Some("chat:-100500"));
    let key = ContentKey::derive("AgADnotes", "10:2");
    assert_eq!(stored.content_key, Some(key.clone()));
    let saved = h.dir.path().join("downloads").join(key.as_str());
    assert_eq!(std::fs::read(&saved).unwrap(), b"meeting notes");

    h.client.push(Update::MessageEdited {
        chat_id: 10,
        message_id: 2,
        edit_date: 1_800_000_000,
    });
    assert!(
        eventually(WAIT, || async move {
            store
                .get_message(id)
                .await
                .ok()
                .flatten()
                .is_some_and(|m| m.text == "see attached, v2")
        })
        .await
    );

    let after = h.store.get_message(id).await.unwrap().unwrap();
    assert_eq!(after.timestamp, 1_800_000_000);
    assert_eq!(after.content_key, stored.content_key);
    assert_eq!(after.reply_target, stored.reply_target);
    assert_eq!(after.forward_origin, stored.forward_origin);
    h.recorder.stop().await.unwrap();
}

#[tokio::test]
async fn repeated_avatar_is_stored_once() {
    let h = authorized(metadata_responder()).await;
    let picture = h.dir.path().join("avatar.jpg");
    std::fs::write(&picture, b"jpeg").unwrap();
    let avatar = local_file(9, "AQADavatar", &picture);

    for _ in 0..2 {
        h.client.push(Update::User {
            user: user(42, "Ada", Some(avatar.clone())),
        });
    }
    // queued behind both avatars for the same user
    h.client.push(Update::UserFullInfo {
        user_id: 42,
        user_full_info: UserFullInfo {
            bio: Some(FormattedText::from("analyst")),
        },
    });

    let store = &h.store;
    assert!(
        eventually(WAIT, || async move {
            store
                .get_user(42)
                .await
                .ok()
                .flatten()
                .is_some_and(|u| u.bio.as_deref() == Some("analyst"))
        })
        .await
    );

    let key = ContentKey::derive("AQADavatar", &EntityKind::User.avatar_origin(42));
    let stored = h.store.get_user(42).await.unwrap().unwrap();
    assert_eq!(stored.display_name, "Ada");
    assert_eq!(stored.avatar_key, Some(key.clone()));
    assert!(h.store.get_file(&key).await.unwrap().is_some());
    assert_eq!(h.store.put_file_calls(), 1);
    assert_eq!(h.store.file_count().await, 1);
    h.recorder.stop().await.unwrap();
}

#[tokio::test]
async fn user_with_unsaved_avatar_is_stored_without_it() {
    let h = authorized(metadata_responder()).await;
    let mut avatar = local_file(11, "AQADlost", &h.dir.path().join("nowhere.jpg"));
    avatar.local = Default::default();
    h.client.push(Update::User {
        user: user(43, "Brook", Some(avatar)),
    });

    let store = &h.store;
    assert!(
        eventually(WAIT, || async move {
            store.get_user(43).await.ok().flatten().is_some()
        })
        .await
    );
    let stored = h.store.get_user(43).await.unwrap().unwrap();
    assert_eq!(stored.display_name, "Brook");
    assert!(stored.avatar_key.is_none());
    assert_eq!(h.store.file_count().await, 0);
    h.recorder.stop().await.unwrap();
}

#[tokio::test]
async fn missing_file_is_downloaded_through_the_session() {
    let dir = tempfile::tempdir().unwrap();
    let fetched = dir.path().join("fetched.bin");
    std::fs::write(&fetched, b"payload").unwrap();
    let done = local_file(5, "BQADfile", &fetched);

    let fallback = metadata_responder();
    let h = authorized(Arc::new(move |request: &Request| match request {
        Request::DownloadFile { file_id: 5, .. } => Some(Object::File(done.clone())),
        other => fallback(other),
    }))
    .await;

    let mut remote_only = local_file(5, "BQADfile", &fetched);
    remote_only.local = Default::default();
    h.client.push(Update::NewMessage {
        message: with_document(text_message(20, 1, 7, ""), remote_only, ""),
    });

    let store = &h.store;
    assert!(eventually(WAIT, || async move { store.messages().await.len() == 1 }).await);
    let key = ContentKey::derive("BQADfile", "20:1");
    let stored = h.store.messages().await.remove(0);
    assert_eq!(stored.content_key, Some(key.clone()));
    let saved = h.dir.path().join("downloads").join(key.as_str());
    assert_eq!(std::fs::read(saved).unwrap(), b"payload");
    assert!(
        h.client
            .sent_requests()
            .iter()
            .any(|r| matches!(r, Request::DownloadFile { synchronous: true, .. }))
    );
    h.recorder.stop().await.unwrap();
}

#[tokio::test]
async fn failed_download_still_stores_the_message() {
    let h = authorized(metadata_responder()).await;
    let mut remote_only = local_file(6, "BQADgone", std::path::Path::new("/nonexistent"));
    remote_only.local = Default::default();
    h.client.push(Update::NewMessage {
        message: with_document(text_message(21, 1, 7, ""), remote_only, "lost"),
    });

    let store = &h.store;
    assert!(eventually(WAIT, || async move { store.messages().await.len() == 1 }).await);
    let stored = h.store.messages().await.remove(0);
    assert_eq!(stored.text, "lost");
    assert!(stored.content_key.is_none());
    h.recorder.stop().await.unwrap();
}

#[tokio::test]
async fn group_description_reaches_the_chat_record() {
    let h = authorized(metadata_responder()).await;
    h.client.push(Update::NewChat {
        chat: group_chat(-100123, 123, "Rustaceans", None),
    });
    let store = &h.store;
    assert!(
        eventually(WAIT, || async move {
            store.get_chat(-100123).await.ok().flatten().is_some()
        })
        .await
    );

    h.client.push(Update::SupergroupFullInfo {
        supergroup_id: 123,
        supergroup_full_info: GroupFullInfo {
            description: "Systems programming".to_string(),
        },
    });
    assert!(
        eventually(WAIT, || async move {
            store
                .get_chat(-100123)
                .await
                .ok()
                .flatten()
                .is_some_and(|c| c.about.as_deref() == Some("Systems programming"))
        })
        .await
    );

    // a later chat refresh keeps the description
    h.client.push(Update::NewChat {
        chat: group_chat(-100123, 123, "Rustaceans EU", None),
    });
    assert!(
        eventually(WAIT, || async move {
            store
                .get_chat(-100123)
                .await
                .ok()
                .flatten()
                .is_some_and(|c| c.name == "Rustaceans EU")
        })
        .await
    );
    let chat = h.store.get_chat(-100123).await.unwrap().unwrap();
    assert_eq!(chat.about.as_deref(), Some("Systems programming"));
    h.recorder.stop().await.unwrap();
}

#[tokio::test]
async fn start_and_stop_only_once() {
    let h = authorized(metadata_responder()).await;
    assert!(h.recorder.start().await.is_err());
    h.recorder.stop().await.unwrap();
    h.recorder.stop().await.unwrap();
    assert_eq!(h.recorder.pending_requests(), 0);
    assert!(
        h.client
            .sent_requests()
            .iter()
            .any(|r| matches!(r, Request::Close))
    );
}
