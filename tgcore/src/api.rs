//! Typed model of the remote session API.
//!
//! The session collaborator decodes wire data into these values before the
//! orchestrator ever sees them. The serde representation follows the JSON
//! interface of the remote library: every object carries an `@type` tag in
//! camelCase and snake_case fields.

use serde::{Deserialize, Serialize};

/// Request id reserved for unsolicited push events.
pub const PUSH_EVENT_ID: u64 = 0;

/// Static parameters supplied when the session asks for them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionParameters {
    pub database_directory: String,
    pub use_message_database: bool,
    pub use_secret_chats: bool,
    pub api_id: i32,
    pub api_hash: String,
    pub system_language_code: String,
    pub device_model: String,
    pub application_version: String,
}

/// Outgoing requests. The set is closed: the recorder never sends anything
/// that is not listed here, and in particular never authors messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "@type", rename_all = "camelCase")]
pub enum Request {
    #[serde(rename = "setTdlibParameters")]
    SetParameters(SessionParameters),
    SetAuthenticationPhoneNumber {
        phone_number: String,
    },
    CheckAuthenticationCode {
        code: String,
    },
    CheckAuthenticationPassword {
        password: String,
    },
    RegisterUser {
        first_name: String,
        last_name: String,
    },
    GetOption {
        name: String,
    },
    GetUser {
        user_id: i64,
    },
    GetChat {
        chat_id: i64,
    },
    GetMessage {
        chat_id: i64,
        message_id: i64,
    },
    OpenChat {
        chat_id: i64,
    },
    CloseChat {
        chat_id: i64,
    },
    ViewMessages {
        chat_id: i64,
        message_thread_id: i64,
        message_ids: Vec<i64>,
        force_read: bool,
    },
    DownloadFile {
        file_id: i32,
        priority: i32,
        offset: i64,
        limit: i64,
        synchronous: bool,
    },
    Close,
}

impl Request {
    /// Short semantic label used when logging failures of this request.
    pub fn label(&self) -> &'static str {
        match self {
            Request::SetParameters(_) => "setTdlibParameters",
            Request::SetAuthenticationPhoneNumber { .. } => "setAuthenticationPhoneNumber",
            Request::CheckAuthenticationCode { .. } => "checkAuthenticationCode",
            Request::CheckAuthenticationPassword { .. } => "checkAuthenticationPassword",
            Request::RegisterUser { .. } => "registerUser",
            Request::GetOption { .. } => "getOption",
            Request::GetUser { .. } => "getUser",
            Request::GetChat { .. } => "getChat",
            Request::GetMessage { .. } => "getMessage",
            Request::OpenChat { .. } => "openChat",
            Request::CloseChat { .. } => "closeChat",
            Request::ViewMessages { .. } => "viewMessages",
            Request::DownloadFile { .. } => "downloadFile",
            Request::Close => "close",
        }
    }

    /// A synchronous download of the whole file at top priority.
    pub fn download(file_id: i32) -> Self {
        Request::DownloadFile {
            file_id,
            priority: 1,
            offset: 0,
            limit: 0,
            synchronous: true,
        }
    }
}

/// One item pulled from the session collaborator.
#[derive(Debug, Clone)]
pub struct Response {
    pub request_id: u64,
    pub payload: Option<Payload>,
}

impl Response {
    pub fn push(update: Update) -> Self {
        Self {
            request_id: PUSH_EVENT_ID,
            payload: Some(Payload::Update(update)),
        }
    }

    pub fn reply(request_id: u64, object: Object) -> Self {
        Self {
            request_id,
            payload: Some(Payload::Object(object)),
        }
    }

    pub fn is_push(&self) -> bool {
        self.request_id == PUSH_EVENT_ID
    }
}

/// Anything the collaborator can hand back: a push event or a request result.
///
/// Updates are tried first because request results carry a catch-all arm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Payload {
    Update(Update),
    Object(Object),
}

/// Result objects returned for requests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "@type", rename_all = "camelCase")]
pub enum Object {
    Ok,
    Error {
        code: i32,
        message: String,
    },
    User(User),
    Chat(Chat),
    Message(Message),
    #[serde(rename = "file")]
    File(RemoteFile),
    OptionValueString {
        value: String,
    },
    OptionValueEmpty,
    #[serde(other)]
    Unknown,
}

impl Object {
    pub fn as_error(&self) -> Option<(i32, &str)> {
        match self {
            Object::Error { code, message } => Some((*code, message.as_str())),
            _ => None,
        }
    }
}

/// Unsolicited push events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "@type")]
pub enum Update {
    #[serde(rename = "updateAuthorizationState")]
    AuthorizationState {
        authorization_state: AuthorizationState,
    },
    #[serde(rename = "updateNewMessage")]
    NewMessage { message: Message },
    #[serde(rename = "updateMessageEdited")]
    MessageEdited {
        chat_id: i64,
        message_id: i64,
        edit_date: i64,
    },
    #[serde(rename = "updateMessageContent")]
    MessageContent {
        chat_id: i64,
        message_id: i64,
        new_content: MessageContent,
    },
    #[serde(rename = "updateUser")]
    User { user: User },
    #[serde(rename = "updateUserFullInfo")]
    UserFullInfo {
        user_id: i64,
        user_full_info: UserFullInfo,
    },
    #[serde(rename = "updateNewChat")]
    NewChat { chat: Chat },
    #[serde(rename = "updateChatTitle")]
    ChatTitle { chat_id: i64, title: String },
    #[serde(rename = "updateSupergroupFullInfo")]
    SupergroupFullInfo {
        supergroup_id: i64,
        supergroup_full_info: GroupFullInfo,
    },
    #[serde(rename = "updateBasicGroupFullInfo")]
    BasicGroupFullInfo {
        basic_group_id: i64,
        basic_group_full_info: GroupFullInfo,
    },
}

impl Update {
    pub fn name(&self) -> &'static str {
        match self {
            Update::AuthorizationState { .. } => "updateAuthorizationState",
            Update::NewMessage { .. } => "updateNewMessage",
            Update::MessageEdited { .. } => "updateMessageEdited",
            Update::MessageContent { .. } => "updateMessageContent",
            Update::User { .. } => "updateUser",
            Update::UserFullInfo { .. } => "updateUserFullInfo",
            Update::NewChat { .. } => "updateNewChat",
            Update::ChatTitle { .. } => "updateChatTitle",
            Update::SupergroupFullInfo { .. } => "updateSupergroupFullInfo",
            Update::BasicGroupFullInfo { .. } => "updateBasicGroupFullInfo",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "@type")]
pub enum AuthorizationState {
    #[serde(rename = "authorizationStateWaitTdlibParameters")]
    WaitParameters,
    #[serde(rename = "authorizationStateWaitPhoneNumber")]
    WaitPhoneNumber,
    #[serde(rename = "authorizationStateWaitCode")]
    WaitCode,
    #[serde(rename = "authorizationStateWaitPassword")]
    WaitPassword {
        #[serde(default)]
        password_hint: String,
    },
    #[serde(rename = "authorizationStateWaitOtherDeviceConfirmation")]
    WaitOtherDeviceConfirmation { link: String },
    #[serde(rename = "authorizationStateWaitRegistration")]
    WaitRegistration,
    #[serde(rename = "authorizationStateReady")]
    Ready,
    #[serde(rename = "authorizationStateLoggingOut")]
    LoggingOut,
    #[serde(rename = "authorizationStateClosing")]
    Closing,
    #[serde(rename = "authorizationStateClosed")]
    Closed,
    #[serde(other)]
    Unknown,
}

impl AuthorizationState {
    /// States in which the session waits for the client to supply something.
    pub fn is_waiting(&self) -> bool {
        matches!(
            self,
            AuthorizationState::WaitParameters
                | AuthorizationState::WaitPhoneNumber
                | AuthorizationState::WaitCode
                | AuthorizationState::WaitPassword { .. }
                | AuthorizationState::WaitOtherDeviceConfirmation { .. }
                | AuthorizationState::WaitRegistration
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormattedText {
    pub text: String,
}

impl From<&str> for FormattedText {
    fn from(text: &str) -> Self {
        Self {
            text: text.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalFile {
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub is_downloading_completed: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFileInfo {
    #[serde(default)]
    pub unique_id: String,
}

/// A file known to the session. `id` is only valid for the current session;
/// `remote.unique_id` is stable across sessions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFile {
    pub id: i32,
    #[serde(default)]
    pub size: i64,
    #[serde(default)]
    pub local: LocalFile,
    #[serde(default)]
    pub remote: RemoteFileInfo,
}

impl RemoteFile {
    /// Identifier used for content addressing.
    pub fn remote_id(&self) -> String {
        if self.remote.unique_id.is_empty() {
            self.id.to_string()
        } else {
            self.remote.unique_id.clone()
        }
    }

    pub fn downloaded_path(&self) -> Option<&str> {
        (self.local.is_downloading_completed && !self.local.path.is_empty())
            .then_some(self.local.path.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usernames {
    #[serde(default)]
    pub active_usernames: Vec<String>,
    #[serde(default)]
    pub disabled_usernames: Vec<String>,
    #[serde(default)]
    pub editable_username: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfilePhoto {
    pub id: i64,
    pub big: RemoteFile,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatPhotoInfo {
    pub big: RemoteFile,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub usernames: Option<Usernames>,
    #[serde(default)]
    pub profile_photo: Option<ProfilePhoto>,
}

impl User {
    pub fn full_name(&self) -> String {
        match (self.first_name.is_empty(), self.last_name.is_empty()) {
            (false, false) => format!("{} {}", self.first_name, self.last_name),
            (false, true) => self.first_name.clone(),
            (true, false) => self.last_name.clone(),
            (true, true) => String::new(),
        }
    }

    pub fn active_username(&self) -> Option<&str> {
        self.usernames
            .as_ref()
            .and_then(|u| u.active_usernames.first())
            .map(String::as_str)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserFullInfo {
    #[serde(default)]
    pub bio: Option<FormattedText>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupFullInfo {
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "@type", rename_all = "camelCase")]
pub enum ChatType {
    ChatTypePrivate { user_id: i64 },
    ChatTypeBasicGroup { basic_group_id: i64 },
    ChatTypeSupergroup { supergroup_id: i64, is_channel: bool },
    ChatTypeSecret { secret_chat_id: i32, user_id: i64 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chat {
    pub id: i64,
    #[serde(rename = "type")]
    pub kind: ChatType,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub photo: Option<ChatPhotoInfo>,
}

impl Chat {
    /// Basic-group or supergroup id, if this chat is a group.
    pub fn group_id(&self) -> Option<i64> {
        match self.kind {
            ChatType::ChatTypeBasicGroup { basic_group_id } => Some(basic_group_id),
            ChatType::ChatTypeSupergroup { supergroup_id, .. } => Some(supergroup_id),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "@type", rename_all = "camelCase")]
pub enum MessageSender {
    MessageSenderUser { user_id: i64 },
    MessageSenderChat { chat_id: i64 },
}

impl MessageSender {
    pub fn id(&self) -> i64 {
        match *self {
            MessageSender::MessageSenderUser { user_id } => user_id,
            MessageSender::MessageSenderChat { chat_id } => chat_id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "@type", rename_all = "camelCase")]
pub enum MessageReplyTo {
    MessageReplyToMessage { chat_id: i64, message_id: i64 },
    MessageReplyToStory { story_sender_chat_id: i64, story_id: i32 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "@type", rename_all = "camelCase")]
pub enum ForwardOrigin {
    MessageOriginUser {
        sender_user_id: i64,
    },
    MessageOriginChat {
        sender_chat_id: i64,
        #[serde(default)]
        author_signature: String,
    },
    MessageOriginHiddenUser {
        sender_name: String,
    },
    MessageOriginChannel {
        chat_id: i64,
        message_id: i64,
        #[serde(default)]
        author_signature: String,
    },
}

impl ForwardOrigin {
    /// Compact textual form stored alongside the message.
    pub fn describe(&self) -> String {
        match self {
            ForwardOrigin::MessageOriginUser { sender_user_id } => format!("user:{sender_user_id}"),
            ForwardOrigin::MessageOriginChat { sender_chat_id, .. } => {
                format!("chat:{sender_chat_id}")
            }
            ForwardOrigin::MessageOriginHiddenUser { sender_name } => format!("hidden:{sender_name}"),
            ForwardOrigin::MessageOriginChannel {
                chat_id,
                message_id,
                ..
            } => format!("channel:{chat_id}:{message_id}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageForwardInfo {
    pub origin: ForwardOrigin,
    #[serde(default)]
    pub date: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhotoSize {
    #[serde(rename = "type", default)]
    pub size_type: String,
    pub photo: RemoteFile,
    #[serde(default)]
    pub width: i32,
    #[serde(default)]
    pub height: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Photo {
    #[serde(default)]
    pub sizes: Vec<PhotoSize>,
}

impl Photo {
    pub fn largest(&self) -> Option<&RemoteFile> {
        self.sizes
            .iter()
            .max_by_key(|s| i64::from(s.width) * i64::from(s.height))
            .map(|s| &s.photo)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Video {
    #[serde(default)]
    pub duration: i32,
    pub video: RemoteFile,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    #[serde(default)]
    pub file_name: String,
    pub document: RemoteFile,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Audio {
    #[serde(default)]
    pub duration: i32,
    pub audio: RemoteFile,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceNote {
    #[serde(default)]
    pub duration: i32,
    pub voice: RemoteFile,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Animation {
    #[serde(default)]
    pub duration: i32,
    pub animation: RemoteFile,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sticker {
    pub sticker: RemoteFile,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "@type", rename_all = "camelCase")]
pub enum MessageContent {
    MessageText {
        text: FormattedText,
    },
    MessagePhoto {
        photo: Photo,
        #[serde(default)]
        caption: FormattedText,
    },
    MessageVideo {
        video: Video,
        #[serde(default)]
        caption: FormattedText,
    },
    MessageDocument {
        document: Document,
        #[serde(default)]
        caption: FormattedText,
    },
    MessageAudio {
        audio: Audio,
        #[serde(default)]
        caption: FormattedText,
    },
    MessageVoiceNote {
        voice_note: VoiceNote,
        #[serde(default)]
        caption: FormattedText,
    },
    MessageAnimation {
        animation: Animation,
        #[serde(default)]
        caption: FormattedText,
    },
    MessageSticker {
        sticker: Sticker,
    },
    #[serde(other)]
    Unsupported,
}

impl MessageContent {
    pub fn text_message(text: &str) -> Self {
        MessageContent::MessageText { text: text.into() }
    }

    /// Message text, or the caption for media messages.
    pub fn text(&self) -> &str {
        match self {
            MessageContent::MessageText { text } => &text.text,
            MessageContent::MessagePhoto { caption, .. }
            | MessageContent::MessageVideo { caption, .. }
            | MessageContent::MessageDocument { caption, .. }
            | MessageContent::MessageAudio { caption, .. }
            | MessageContent::MessageVoiceNote { caption, .. }
            | MessageContent::MessageAnimation { caption, .. } => &caption.text,
            MessageContent::MessageSticker { .. } | MessageContent::Unsupported => "",
        }
    }

    /// The downloadable file attached to this content, if any.
    pub fn file(&self) -> Option<&RemoteFile> {
        match self {
            MessageContent::MessageText { .. } | MessageContent::Unsupported => None,
            MessageContent::MessagePhoto { photo, .. } => photo.largest(),
            MessageContent::MessageVideo { video, .. } => Some(&video.video),
            MessageContent::MessageDocument { document, .. } => Some(&document.document),
            MessageContent::MessageAudio { audio, .. } => Some(&audio.audio),
            MessageContent::MessageVoiceNote { voice_note, .. } => Some(&voice_note.voice),
            MessageContent::MessageAnimation { animation, .. } => Some(&animation.animation),
            MessageContent::MessageSticker { sticker } => Some(&sticker.sticker),
        }
    }

    /// Stable type code persisted with each message.
    pub fn kind(&self) -> i32 {
        match self {
            MessageContent::Unsupported => 0,
            MessageContent::MessageText { .. } => 1,
            MessageContent::MessagePhoto { .. } => 2,
            MessageContent::MessageVideo { .. } => 3,
            MessageContent::MessageDocument { .. } => 4,
            MessageContent::MessageAudio { .. } => 5,
            MessageContent::MessageVoiceNote { .. } => 6,
            MessageContent::MessageAnimation { .. } => 7,
            MessageContent::MessageSticker { .. } => 8,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    pub chat_id: i64,
    pub sender_id: MessageSender,
    pub date: i64,
    #[serde(default)]
    pub edit_date: i64,
    #[serde(default)]
    pub message_thread_id: i64,
    pub content: MessageContent,
    #[serde(default)]
    pub reply_to: Option<MessageReplyTo>,
    #[serde(default)]
    pub forward_info: Option<MessageForwardInfo>,
}
