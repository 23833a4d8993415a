//! Session orchestrator.
//!
//! The event loop is the only consumer of the session collaborator. It
//! routes replies to their continuations and push events to the handlers
//! below, which feed two conversation-keyed queues: one drained by the read
//! simulator (`reader.rs`) and one by the persistence writer (`writer.rs`).

use crate::config::Config;
use crate::metadata::MetadataCache;
use crate::prompt::Prompt;
use crate::queue::WorkQueue;
use crate::request::reply_or_log;
use crate::session::{SessionClient, SessionClientFactory};
use crate::store::RecordStore;
use crate::writer::PersistJob;
use anyhow::anyhow;
use chrono::Utc;
use log::{debug, error, info, warn};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;
use tgcore::api::{
    AuthorizationState, Chat, Message, MessageSender, Object, Payload, Request, Response, Update,
    User,
};
use tgcore::auth::{AuthAction, AuthReply, AuthSession};
use tgcore::correlator::Correlator;
use tgcore::records::{ChatRecord, CompoundId, EntityKind, UserRecord};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;

#[derive(Debug, Error)]
pub enum RecorderError {
    #[error("recorder was already started")]
    AlreadyStarted,
    #[error("recorder was never started")]
    NotStarted,
    #[error("failed to create session client: {0:#}")]
    Session(anyhow::Error),
}

/// Poll intervals of the event loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollTiming {
    /// Blocking receive timeout while not authorized.
    pub receive_timeout: Duration,
    /// Sleep between drains while authorized.
    pub idle_interval: Duration,
    /// Pause before re-entering an authorization state after a rejection.
    pub auth_retry_delay: Duration,
    /// Pause before retrying a failed session restart.
    pub restart_backoff: Duration,
}

impl Default for PollTiming {
    fn default() -> Self {
        Self {
            receive_timeout: Duration::from_secs(10),
            idle_interval: Duration::from_secs(1),
            auth_retry_delay: Duration::from_secs(1),
            restart_backoff: Duration::from_secs(5),
        }
    }
}

struct Workers {
    events: JoinHandle<()>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

pub struct Recorder {
    pub(crate) config: Arc<Config>,
    pub(crate) store: Arc<dyn RecordStore>,
    client_factory: Arc<dyn SessionClientFactory>,
    prompt: Arc<dyn Prompt>,
    timing: PollTiming,

    client: RwLock<Option<Arc<dyn SessionClient>>>,
    pub(crate) correlator: Correlator<Object>,
    auth: Mutex<AuthSession>,

    pub(crate) users: MetadataCache<UserRecord>,
    pub(crate) chats: MetadataCache<ChatRecord>,

    pub(crate) to_read: WorkQueue<Arc<Message>>,
    pub(crate) to_persist: WorkQueue<PersistJob>,

    is_authorized: AtomicBool,
    needs_restart: AtomicBool,
    is_started: AtomicBool,
    is_stopped: AtomicBool,
    restarts: AtomicU64,

    /// Stops the reader and the writer.
    pub(crate) shutdown: watch::Sender<bool>,
    /// Stops the event loop, after the workers are done.
    events_stop: watch::Sender<bool>,
    workers: tokio::sync::Mutex<Option<Workers>>,
}

impl Recorder {
    pub fn builder() -> RecorderBuilder {
        RecorderBuilder::default()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> Arc<dyn RecordStore> {
        self.store.clone()
    }

    pub fn is_authorized(&self) -> bool {
        self.is_authorized.load(Ordering::Relaxed)
    }

    /// Number of completed session restarts.
    pub fn restart_count(&self) -> u64 {
        self.restarts.load(Ordering::Relaxed)
    }

    /// Requests still waiting for a reply.
    pub fn pending_requests(&self) -> usize {
        self.correlator.pending_count()
    }

    pub(crate) fn client(&self) -> Option<Arc<dyn SessionClient>> {
        self.client
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_client(&self, client: Option<Arc<dyn SessionClient>>) {
        *self.client.write().unwrap_or_else(PoisonError::into_inner) = client;
    }

    fn auth(&self) -> MutexGuard<'_, AuthSession> {
        self.auth.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create the session and spawn the event loop and both workers. May only
    /// be called once.
    pub async fn start(self: &Arc<Self>) -> Result<(), RecorderError> {
        if self.is_started.swap(true, Ordering::SeqCst) {
            return Err(RecorderError::AlreadyStarted);
        }
        info!(target: "Recorder", "Starting recorder");

        let client = self
            .client_factory
            .create_client()
            .await
            .map_err(RecorderError::Session)?;
        self.set_client(Some(client));
        self.query_version();

        let events = tokio::spawn(self.clone().run_event_loop(self.events_stop.subscribe()));
        let reader = tokio::spawn(self.clone().run_reader(self.shutdown.subscribe()));
        let writer = tokio::spawn(self.clone().run_writer(self.shutdown.subscribe()));
        *self.workers.lock().await = Some(Workers {
            events,
            reader,
            writer,
        });
        Ok(())
    }

    /// Stop the workers, let each finish a final drain of what is already
    /// queued, then stop the event loop. Later calls are no-ops.
    pub async fn stop(&self) -> Result<(), RecorderError> {
        if !self.is_started.load(Ordering::SeqCst) {
            return Err(RecorderError::NotStarted);
        }
        if self.is_stopped.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        info!(target: "Recorder", "Stopping recorder");

        let Some(workers) = self.workers.lock().await.take() else {
            return Ok(());
        };

        // the event loop keeps running so the final drains can still download
        self.shutdown.send_replace(true);
        self.to_persist.wake();
        for (name, handle) in [("reader", workers.reader), ("writer", workers.writer)] {
            if let Err(e) = handle.await {
                error!(target: "Recorder", "The {name} task failed: {e}");
            }
        }

        self.events_stop.send_replace(true);
        if let Err(e) = workers.events.await {
            error!(target: "Recorder", "The event loop task failed: {e}");
        }
        info!(target: "Recorder", "Recorder stopped");
        Ok(())
    }

    fn query_version(&self) {
        self.send_with(
            Request::GetOption {
                name: "version".to_string(),
            },
            Some(Box::new(|reply| match reply_or_log("getOption", reply) {
                Some(Object::OptionValueString { value }) => {
                    info!(target: "Recorder", "Session collaborator version {value}")
                }
                Some(other) => debug!(target: "Recorder", "Version reply: {other:?}"),
                None => {}
            })),
        );
    }

    async fn run_event_loop(self: Arc<Self>, mut stop: watch::Receiver<bool>) {
        info!(target: "Recorder/Events", "Event loop started");
        loop {
            if *stop.borrow() {
                break;
            }

            if self.needs_restart.load(Ordering::SeqCst) {
                if let Err(e) = self.reset().await {
                    error!(target: "Recorder/Events", "Session restart failed: {e:#}");
                    tokio::select! {
                        biased;
                        _ = stop.changed() => {},
                        _ = sleep(self.timing.restart_backoff) => {},
                    }
                }
                continue;
            }

            let Some(client) = self.client() else {
                self.needs_restart.store(true, Ordering::SeqCst);
                continue;
            };

            if self.is_authorized() {
                while let Some(response) = client.receive(Duration::ZERO).await {
                    self.process_response(response).await;
                    if *stop.borrow() || self.needs_restart.load(Ordering::SeqCst) {
                        break;
                    }
                }
                tokio::select! {
                    biased;
                    _ = stop.changed() => {},
                    _ = sleep(self.timing.idle_interval) => {},
                }
            } else {
                let received = tokio::select! {
                    biased;
                    _ = stop.changed() => None,
                    response = client.receive(self.timing.receive_timeout) => response,
                };
                if let Some(response) = received {
                    self.process_response(response).await;
                }
            }
        }

        if let Some(client) = self.client() {
            let request_id = self.correlator.register(None);
            if let Err(e) = client.send(request_id, Request::Close) {
                warn!(target: "Recorder/Events", "Could not close the session: {e}");
            }
        }
        let dropped = self.correlator.reset();
        info!(target: "Recorder/Events", "Event loop stopped, {dropped} requests left unanswered");
    }

    /// Tear the session down and build a fresh one. Pending continuations
    /// and queued work are dropped without running.
    async fn reset(self: &Arc<Self>) -> Result<(), anyhow::Error> {
        info!(target: "Recorder", "Restarting session");
        self.is_authorized.store(false, Ordering::SeqCst);
        self.auth().restart();
        let dropped = self.correlator.reset();
        let unread = self.to_read.clear();
        let unwritten = self.to_persist.clear();
        self.users.clear_in_flight();
        self.chats.clear_in_flight();
        self.set_client(None);
        debug!(
            target: "Recorder",
            "Dropped {dropped} pending requests, {unread} unread and {unwritten} unwritten items"
        );

        let client = self.client_factory.create_client().await?;
        self.set_client(Some(client));
        self.needs_restart.store(false, Ordering::SeqCst);
        let restarts = self.restarts.fetch_add(1, Ordering::SeqCst) + 1;
        info!(target: "Recorder", "Session restarted ({restarts} so far)");
        self.query_version();
        Ok(())
    }

    pub(crate) async fn process_response(self: &Arc<Self>, response: Response) {
        let request_id = response.request_id;
        if response.is_push() {
            match response.payload {
                Some(Payload::Update(update)) => self.dispatch_update(update).await,
                Some(Payload::Object(object)) => {
                    debug!(target: "Recorder/Events", "Unhandled variant in push event: {object:?}")
                }
                None => {}
            }
            return;
        }

        let object = match response.payload {
            Some(Payload::Object(object)) => Some(object),
            Some(Payload::Update(update)) => {
                warn!(
                    target: "Recorder/Events",
                    "Unhandled variant {} as reply to request {request_id}",
                    update.name()
                );
                None
            }
            None => None,
        };
        if !self.correlator.complete(request_id, object) {
            debug!(target: "Recorder/Events", "No continuation for request {request_id}");
        }
    }

    async fn dispatch_update(self: &Arc<Self>, update: Update) {
        match update {
            Update::AuthorizationState {
                authorization_state,
            } => self.on_authorization_state(authorization_state),
            Update::NewMessage { message } => self.on_new_message(message).await,
            Update::MessageEdited {
                chat_id,
                message_id,
                edit_date,
            } => self.on_message_edited(chat_id, message_id, edit_date),
            Update::MessageContent {
                chat_id,
                message_id,
                new_content,
            } => self.to_persist.enqueue(
                chat_id,
                PersistJob::ContentEdit {
                    id: CompoundId::new(chat_id, message_id),
                    content: new_content,
                    edit_timestamp: Utc::now().timestamp(),
                },
            ),
            Update::User { user } => self.accept_user(user),
            Update::UserFullInfo {
                user_id,
                user_full_info,
            } => {
                let bio = user_full_info.bio.map(|b| b.text).unwrap_or_default();
                self.users.modify(user_id, |u| u.bio = Some(bio.clone()));
                self.to_persist
                    .enqueue(user_id, PersistJob::UserBio { user_id, bio });
            }
            Update::NewChat { chat } => self.accept_chat(chat),
            Update::ChatTitle { chat_id, title } => {
                debug!(target: "Recorder/Events", "Chat {chat_id} renamed to '{title}'");
                self.chats.evict(chat_id);
                if self.chats.begin_fetch(chat_id) {
                    self.fetch_chat(chat_id);
                }
            }
            Update::SupergroupFullInfo {
                supergroup_id,
                supergroup_full_info,
            } => self.enqueue_group_about(supergroup_id, supergroup_full_info.description),
            Update::BasicGroupFullInfo {
                basic_group_id,
                basic_group_full_info,
            } => self.enqueue_group_about(basic_group_id, basic_group_full_info.description),
        }
    }

    fn enqueue_group_about(&self, group_id: i64, about: String) {
        self.to_persist
            .enqueue(group_id, PersistJob::GroupAbout { group_id, about });
    }

    // --- authorization ---

    fn on_authorization_state(self: &Arc<Self>, state: AuthorizationState) {
        info!(target: "Recorder/Auth", "Authorization state {state:?}");
        let (action, generation) = {
            let mut auth = self.auth();
            let action = auth.transition(state);
            (action, auth.generation())
        };
        self.perform_auth_action(action, generation);
    }

    fn perform_auth_action(self: &Arc<Self>, action: AuthAction, generation: u64) {
        match action {
            AuthAction::SupplyParameters => self.submit_auth(
                generation,
                Request::SetParameters(self.config.session_parameters()),
            ),
            AuthAction::SupplyPhoneNumber => match &self.config.phone_number {
                Some(phone_number) => self.submit_auth(
                    generation,
                    Request::SetAuthenticationPhoneNumber {
                        phone_number: phone_number.clone(),
                    },
                ),
                None => self.solicit(generation, "Enter phone number".to_string(), |line| {
                    Request::SetAuthenticationPhoneNumber { phone_number: line }
                }),
            },
            AuthAction::SupplyCode => {
                self.solicit(generation, "Enter authentication code".to_string(), |code| {
                    Request::CheckAuthenticationCode { code }
                })
            }
            AuthAction::SupplyPassword { hint } => {
                let label = if hint.is_empty() {
                    "Enter password".to_string()
                } else {
                    format!("Enter password (hint: {hint})")
                };
                self.solicit(generation, label, |password| {
                    Request::CheckAuthenticationPassword { password }
                })
            }
            AuthAction::ShowConfirmationLink { link } => {
                info!(target: "Recorder/Auth", "Confirm this login on another device: {link}")
            }
            AuthAction::Register => self.submit_auth(
                generation,
                Request::RegisterUser {
                    first_name: self.config.first_name.clone(),
                    last_name: self.config.last_name.clone(),
                },
            ),
            AuthAction::Authorized => {
                self.is_authorized.store(true, Ordering::SeqCst);
                info!(target: "Recorder/Auth", "Authorized");
            }
            AuthAction::LoggingOut | AuthAction::Closing => {
                self.is_authorized.store(false, Ordering::SeqCst);
            }
            AuthAction::Restart => {
                self.is_authorized.store(false, Ordering::SeqCst);
                self.needs_restart.store(true, Ordering::SeqCst);
                info!(target: "Recorder/Auth", "Session closed, restart scheduled");
            }
            AuthAction::Unhandled => {
                warn!(target: "Recorder/Auth", "Unhandled variant of authorization state")
            }
        }
    }

    /// Ask the prompt for an answer off the event loop. The answer is only
    /// sent if the session is still in the state that asked for it.
    fn solicit(self: &Arc<Self>, generation: u64, label: String, build: fn(String) -> Request) {
        let recorder = self.clone();
        tokio::spawn(async move {
            match recorder.prompt.prompt_line(&label).await {
                Ok(answer) => {
                    if !recorder.auth().is_current(generation) {
                        debug!(target: "Recorder/Auth", "Dropping answer to '{label}', state moved on");
                        return;
                    }
                    recorder.submit_auth(generation, build(answer));
                }
                Err(e) => error!(target: "Recorder/Auth", "Prompt '{label}' failed: {e}"),
            }
        });
    }

    fn submit_auth(self: &Arc<Self>, generation: u64, request: Request) {
        let label = request.label();
        let recorder = self.clone();
        self.send_with(
            request,
            Some(Box::new(move |reply| {
                recorder.on_auth_reply(generation, label, reply)
            })),
        );
    }

    fn on_auth_reply(self: &Arc<Self>, generation: u64, label: &'static str, reply: Option<Object>) {
        let verdict = self.auth().judge(generation, reply.as_ref());
        match verdict {
            AuthReply::Stale => {
                debug!(target: "Recorder/Auth", "Dropping stale reply to {label}")
            }
            AuthReply::NoResponse => error!(target: "Recorder/Auth", "No response to {label}"),
            AuthReply::Rejected { code, message } => {
                warn!(target: "Recorder/Auth", "{label} rejected with code {code}: {message}");
                self.schedule_reenter(generation);
            }
            AuthReply::Accepted => debug!(target: "Recorder/Auth", "{label} accepted"),
        }
    }

    fn schedule_reenter(self: &Arc<Self>, generation: u64) {
        let recorder = self.clone();
        let delay = self.timing.auth_retry_delay;
        tokio::spawn(async move {
            sleep(delay).await;
            let next = {
                let mut auth = recorder.auth();
                if auth.is_current(generation) {
                    Some((auth.reenter(), auth.generation()))
                } else {
                    None
                }
            };
            if let Some((action, generation)) = next {
                recorder.perform_auth_action(action, generation);
            }
        });
    }

    // --- messages and metadata ---

    async fn on_new_message(self: &Arc<Self>, message: Message) {
        let message = Arc::new(message);
        let chat_id = message.chat_id;
        debug!(target: "Recorder/Events", "New message {chat_id}:{}", message.id);

        match message.sender_id {
            MessageSender::MessageSenderUser { user_id } => {
                self.resolve_user(user_id).await;
            }
            MessageSender::MessageSenderChat { chat_id: sender } if sender != chat_id => {
                self.resolve_chat(sender).await;
            }
            MessageSender::MessageSenderChat { .. } => {}
        }
        self.resolve_chat(chat_id).await;

        self.to_read.enqueue(chat_id, message.clone());
        self.to_persist
            .enqueue(chat_id, PersistJob::NewMessage(message));
    }

    fn on_message_edited(self: &Arc<Self>, chat_id: i64, message_id: i64, edit_date: i64) {
        let recorder = self.clone();
        self.send_with(
            Request::GetMessage {
                chat_id,
                message_id,
            },
            Some(Box::new(move |reply| match reply_or_log("getMessage", reply) {
                Some(Object::Message(message)) => recorder.to_persist.enqueue(
                    chat_id,
                    PersistJob::TextEdit {
                        id: CompoundId::new(chat_id, message_id),
                        text: message.content.text().to_string(),
                        edit_timestamp: edit_date,
                    },
                ),
                Some(other) => {
                    warn!(target: "Recorder/Events", "Unexpected reply to getMessage: {other:?}")
                }
                None => {}
            })),
        );
    }

    pub(crate) async fn resolve_user(self: &Arc<Self>, user_id: i64) -> Option<UserRecord> {
        self.users
            .resolve(user_id, self.store.get_user(user_id), || {
                self.fetch_user(user_id)
            })
            .await
            .value()
    }

    pub(crate) async fn resolve_chat(self: &Arc<Self>, chat_id: i64) -> Option<ChatRecord> {
        self.chats
            .resolve(chat_id, self.store.get_chat(chat_id), || {
                self.fetch_chat(chat_id)
            })
            .await
            .value()
    }

    /// Remote lookup; the caller has already marked the fetch in flight.
    fn fetch_user(self: &Arc<Self>, user_id: i64) {
        let recorder = self.clone();
        self.send_with(
            Request::GetUser { user_id },
            Some(Box::new(move |reply| {
                match reply_or_log("getUser", reply) {
                    // the writer ends the fetch once the user is stored
                    Some(Object::User(user)) => recorder.accept_user(user),
                    Some(other) => {
                        warn!(target: "Recorder/Metadata", "Unexpected reply to getUser: {other:?}");
                        recorder.users.finish_fetch(user_id);
                    }
                    None => recorder.users.finish_fetch(user_id),
                }
            })),
        );
    }

    fn fetch_chat(self: &Arc<Self>, chat_id: i64) {
        let recorder = self.clone();
        self.send_with(
            Request::GetChat { chat_id },
            Some(Box::new(move |reply| {
                match reply_or_log("getChat", reply) {
                    // the writer ends the fetch once the chat is stored
                    Some(Object::Chat(chat)) => recorder.accept_chat(chat),
                    Some(other) => {
                        warn!(target: "Recorder/Metadata", "Unexpected reply to getChat: {other:?}");
                        recorder.chats.finish_fetch(chat_id);
                    }
                    None => recorder.chats.finish_fetch(chat_id),
                }
            })),
        );
    }

    /// Queue a user for persistence. The writer stores it, then caches the
    /// stored row and ends any fetch in flight, so the cache never holds an
    /// entity the store lacks.
    fn accept_user(&self, user: User) {
        let avatar = user.profile_photo.as_ref().map(|p| p.big.clone());
        self.to_persist.enqueue(
            user.id,
            PersistJob::User {
                record: UserRecord::from_remote(&user),
                avatar,
            },
        );
    }

    fn accept_chat(&self, chat: Chat) {
        let avatar = chat.photo.as_ref().map(|p| p.big.clone());
        self.to_persist.enqueue(
            chat.id,
            PersistJob::Chat {
                record: ChatRecord::from_remote(&chat),
                avatar,
            },
        );
    }
}

#[derive(Default)]
pub struct RecorderBuilder {
    config: Option<Arc<Config>>,
    store: Option<Arc<dyn RecordStore>>,
    client_factory: Option<Arc<dyn SessionClientFactory>>,
    prompt: Option<Arc<dyn Prompt>>,
    timing: Option<PollTiming>,
}

impl RecorderBuilder {
    pub fn with_config(mut self, config: Config) -> Self {
        self.config = Some(Arc::new(config));
        self
    }

    pub fn with_store(mut self, store: Arc<dyn RecordStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_client_factory(mut self, factory: Arc<dyn SessionClientFactory>) -> Self {
        self.client_factory = Some(factory);
        self
    }

    pub fn with_prompt(mut self, prompt: Arc<dyn Prompt>) -> Self {
        self.prompt = Some(prompt);
        self
    }

    pub fn with_poll_timing(mut self, timing: PollTiming) -> Self {
        self.timing = Some(timing);
        self
    }

    pub fn build(self) -> Result<Arc<Recorder>, anyhow::Error> {
        let config = self
            .config
            .ok_or_else(|| anyhow!("Configuration is required to build a recorder"))?;
        let store = self
            .store
            .ok_or_else(|| anyhow!("A record store is required to build a recorder"))?;
        let client_factory = self
            .client_factory
            .ok_or_else(|| anyhow!("A session client factory is required to build a recorder"))?;
        let prompt = self
            .prompt
            .ok_or_else(|| anyhow!("A prompt is required to build a recorder"))?;

        let (shutdown, _) = watch::channel(false);
        let (events_stop, _) = watch::channel(false);
        Ok(Arc::new(Recorder {
            users: MetadataCache::new(EntityKind::User, config.user_cache_capacity),
            chats: MetadataCache::new(EntityKind::Chat, config.chat_cache_capacity),
            config,
            store,
            client_factory,
            prompt,
            timing: self.timing.unwrap_or_default(),
            client: RwLock::new(None),
            correlator: Correlator::new(),
            auth: Mutex::new(AuthSession::new()),
            to_read: WorkQueue::new(),
            to_persist: WorkQueue::new(),
            is_authorized: AtomicBool::new(false),
            needs_restart: AtomicBool::new(false),
            is_started: AtomicBool::new(false),
            is_stopped: AtomicBool::new(false),
            restarts: AtomicU64::new(0),
            shutdown,
            events_stop,
            workers: tokio::sync::Mutex::new(None),
        }))
    }
}
