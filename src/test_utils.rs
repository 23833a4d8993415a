//! Mocks and builders shared by unit and integration tests.

use crate::config::Config;
use crate::prompt::{Prompt, PromptError};
use crate::recorder::{PollTiming, Recorder};
use crate::session::{SessionClient, SessionClientFactory, SessionError};
use crate::store::RecordStore;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::future::Future;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tgcore::api::{
    Chat, ChatPhotoInfo, ChatType, LocalFile, Message, MessageContent, MessageSender, Object,
    ProfilePhoto, RemoteFile, RemoteFileInfo, Request, Response, Update, User,
};
use tgcore::reading::HumanBehaviour;
use tokio::sync::mpsc;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Answers requests synchronously. `None` means no automatic reply.
pub type Responder = Arc<dyn Fn(&Request) -> Option<Object> + Send + Sync>;

/// In-process session collaborator. Records every request and hands out
/// whatever the test pushes or the responder answers.
pub struct MockSessionClient {
    sent: Mutex<Vec<(u64, Request)>>,
    deliver: mpsc::UnboundedSender<Response>,
    inbox: tokio::sync::Mutex<mpsc::UnboundedReceiver<Response>>,
    responder: Mutex<Option<Responder>>,
    closed: AtomicBool,
}

impl Default for MockSessionClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MockSessionClient {
    pub fn new() -> Self {
        let (deliver, inbox) = mpsc::unbounded_channel();
        Self {
            sent: Mutex::new(Vec::new()),
            deliver,
            inbox: tokio::sync::Mutex::new(inbox),
            responder: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    pub fn with_responder(responder: Responder) -> Self {
        let client = Self::new();
        client.set_responder(responder);
        client
    }

    pub fn set_responder(&self, responder: Responder) {
        *lock(&self.responder) = Some(responder);
    }

    pub fn push(&self, update: Update) {
        let _ = self.deliver.send(Response::push(update));
    }

    pub fn reply(&self, request_id: u64, object: Object) {
        let _ = self.deliver.send(Response::reply(request_id, object));
    }

    /// Make every further `send` fail.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<(u64, Request)> {
        lock(&self.sent).clone()
    }

    pub fn sent_requests(&self) -> Vec<Request> {
        lock(&self.sent).iter().map(|(_, r)| r.clone()).collect()
    }

    /// Id of the latest request matching `predicate`.
    pub fn last_request_id(&self, predicate: impl Fn(&Request) -> bool) -> Option<u64> {
        lock(&self.sent)
            .iter()
            .rev()
            .find(|(_, r)| predicate(r))
            .map(|(id, _)| *id)
    }
}

#[async_trait]
impl SessionClient for MockSessionClient {
    fn send(&self, request_id: u64, request: Request) -> Result<(), SessionError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SessionError::Closed);
        }
        let answer = lock(&self.responder)
            .as_ref()
            .and_then(|responder| responder(&request));
        lock(&self.sent).push((request_id, request));
        if let Some(object) = answer {
            self.reply(request_id, object);
        }
        Ok(())
    }

    async fn receive(&self, timeout: Duration) -> Option<Response> {
        let mut inbox = self.inbox.lock().await;
        tokio::time::timeout(timeout, inbox.recv())
            .await
            .ok()
            .flatten()
    }
}

/// Hands out prepared clients first, then fresh ones.
#[derive(Default)]
pub struct MockSessionFactory {
    prepared: Mutex<VecDeque<Arc<MockSessionClient>>>,
    created: Mutex<Vec<Arc<MockSessionClient>>>,
    responder: Option<Responder>,
}

impl MockSessionFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_clients(clients: Vec<Arc<MockSessionClient>>) -> Self {
        Self {
            prepared: Mutex::new(clients.into()),
            ..Self::default()
        }
    }

    /// Fresh clients answer through `responder`.
    pub fn with_responder(mut self, responder: Responder) -> Self {
        self.responder = Some(responder);
        self
    }

    pub fn created(&self) -> Vec<Arc<MockSessionClient>> {
        lock(&self.created).clone()
    }

    pub fn latest(&self) -> Option<Arc<MockSessionClient>> {
        lock(&self.created).last().cloned()
    }
}

#[async_trait]
impl SessionClientFactory for MockSessionFactory {
    async fn create_client(&self) -> Result<Arc<dyn SessionClient>, anyhow::Error> {
        let client = match lock(&self.prepared).pop_front() {
            Some(client) => client,
            None => Arc::new(match &self.responder {
                Some(responder) => MockSessionClient::with_responder(responder.clone()),
                None => MockSessionClient::new(),
            }),
        };
        lock(&self.created).push(client.clone());
        Ok(client)
    }
}

/// Answers prompts from a script and remembers what was asked.
#[derive(Default)]
pub struct ScriptedPrompt {
    answers: Mutex<VecDeque<String>>,
    asked: Mutex<Vec<String>>,
}

impl ScriptedPrompt {
    pub fn new<I, S>(answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            answers: Mutex::new(answers.into_iter().map(Into::into).collect()),
            asked: Mutex::new(Vec::new()),
        }
    }

    /// A prompt with no answers; every question fails.
    pub fn silent() -> Self {
        Self::default()
    }

    pub fn asked(&self) -> Vec<String> {
        lock(&self.asked).clone()
    }
}

#[async_trait]
impl Prompt for ScriptedPrompt {
    async fn prompt_line(&self, label: &str) -> Result<String, PromptError> {
        lock(&self.asked).push(label.to_string());
        lock(&self.answers).pop_front().ok_or(PromptError::Closed)
    }
}

/// Configuration with near-zero reading pauses.
pub fn test_config(download_folder: &Path) -> Config {
    Config {
        api_id: 1,
        api_hash: "0123456789abcdef".to_string(),
        first_name: "Test".to_string(),
        last_name: "Recorder".to_string(),
        database_path: download_folder.join("test.db"),
        session_directory: "tdlib".to_string(),
        download_folder: download_folder.to_path_buf(),
        user_cache_capacity: 16,
        chat_cache_capacity: 16,
        human_behaviour: HumanBehaviour {
            read_msg_frequency_mean: 0.02,
            read_msg_frequency_std_dev: 0.0,
            read_msg_min_wait_sec: 0.02,
            text_read_speed_wpm: 1_000_000.0,
            photo_read_speed_sec: 0.0,
        },
        phone_number: Some("+10000000000".to_string()),
        bridge_command: None,
    }
}

pub fn fast_timing() -> PollTiming {
    PollTiming {
        receive_timeout: Duration::from_millis(20),
        idle_interval: Duration::from_millis(10),
        auth_retry_delay: Duration::from_millis(10),
        restart_backoff: Duration::from_millis(20),
    }
}

pub fn test_recorder(
    config: Config,
    store: Arc<dyn RecordStore>,
    factory: Arc<dyn SessionClientFactory>,
    prompt: Arc<dyn Prompt>,
) -> Arc<Recorder> {
    Recorder::builder()
        .with_config(config)
        .with_store(store)
        .with_client_factory(factory)
        .with_prompt(prompt)
        .with_poll_timing(fast_timing())
        .build()
        .expect("test recorder should build")
}

pub fn text_message(chat_id: i64, message_id: i64, sender_user_id: i64, text: &str) -> Message {
    Message {
        id: message_id,
        chat_id,
        sender_id: MessageSender::MessageSenderUser {
            user_id: sender_user_id,
        },
        date: 1_700_000_000 + message_id,
        edit_date: 0,
        message_thread_id: 0,
        content: MessageContent::text_message(text),
        reply_to: None,
        forward_info: None,
    }
}

/// A file the collaborator already has on disk at `path`.
pub fn local_file(id: i32, unique_id: &str, path: &Path) -> RemoteFile {
    RemoteFile {
        id,
        size: 0,
        local: LocalFile {
            path: path.to_string_lossy().into_owned(),
            is_downloading_completed: true,
        },
        remote: RemoteFileInfo {
            unique_id: unique_id.to_string(),
        },
    }
}

pub fn user(id: i64, first_name: &str, avatar: Option<RemoteFile>) -> User {
    User {
        id,
        first_name: first_name.to_string(),
        last_name: String::new(),
        usernames: None,
        profile_photo: avatar.map(|big| ProfilePhoto { id: 1, big }),
    }
}

pub fn group_chat(id: i64, supergroup_id: i64, title: &str, avatar: Option<RemoteFile>) -> Chat {
    Chat {
        id,
        kind: ChatType::ChatTypeSupergroup {
            supergroup_id,
            is_channel: false,
        },
        title: title.to_string(),
        photo: avatar.map(|big| ChatPhotoInfo { big }),
    }
}

/// Answer metadata lookups with generic objects so no fetch stays pending.
pub fn metadata_responder() -> Responder {
    Arc::new(|request: &Request| match request {
        Request::GetUser { user_id } => Some(Object::User(user(*user_id, "Someone", None))),
        Request::GetChat { chat_id } => Some(Object::Chat(group_chat(
            *chat_id,
            chat_id.abs(),
            "Some chat",
            None,
        ))),
        _ => Some(Object::Ok),
    })
}

/// Poll `condition` until it holds or `timeout` passes.
pub async fn eventually<F, Fut>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
