//! Durable record types and their construction from remote objects.

use crate::api::{self, MessageReplyTo};
use crate::content::ContentKey;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// `(chat id, message id)`, the primary key of a stored message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CompoundId {
    pub chat_id: i64,
    pub message_id: i64,
}

impl CompoundId {
    pub fn new(chat_id: i64, message_id: i64) -> Self {
        Self {
            chat_id,
            message_id,
        }
    }
}

impl fmt::Display for CompoundId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.chat_id, self.message_id)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid compound message id: '{0}'")]
pub struct ParseCompoundIdError(String);

impl FromStr for CompoundId {
    type Err = ParseCompoundIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseCompoundIdError(s.to_string());
        let (chat, message) = s.split_once(':').ok_or_else(err)?;
        Ok(Self {
            chat_id: chat.parse().map_err(|_| err())?,
            message_id: message.parse().map_err(|_| err())?,
        })
    }
}

/// Which kind of metadata entity a record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    User,
    Chat,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::User => "user",
            EntityKind::Chat => "chat",
        }
    }

    /// Origin id used for content addressing of the entity's avatar.
    pub fn avatar_origin(&self, id: i64) -> String {
        format!("{}:{}", self.as_str(), id)
    }
}

/// `avatar_key` is only set once the avatar has been saved.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: i64,
    pub display_name: String,
    pub username: Option<String>,
    /// Every active username, the primary one first.
    pub usernames: Vec<String>,
    pub disabled_usernames: Vec<String>,
    pub bio: Option<String>,
    pub avatar_key: Option<ContentKey>,
}

impl UserRecord {
    pub fn from_remote(user: &api::User) -> Self {
        let (usernames, disabled_usernames) = match &user.usernames {
            Some(u) => (u.active_usernames.clone(), u.disabled_usernames.clone()),
            None => Default::default(),
        };
        Self {
            id: user.id,
            display_name: user.full_name(),
            username: user.active_username().map(str::to_string),
            usernames,
            disabled_usernames,
            bio: None,
            avatar_key: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRecord {
    pub id: i64,
    pub group_id: Option<i64>,
    pub name: String,
    pub about: Option<String>,
    pub avatar_key: Option<ContentKey>,
}

impl ChatRecord {
    pub fn from_remote(chat: &api::Chat) -> Self {
        Self {
            id: chat.id,
            group_id: chat.group_id(),
            name: chat.title.clone(),
            about: None,
            avatar_key: None,
        }
    }
}

/// A message as stored. `content_key` is filled in by the persistence
/// writer once the attached file has been fetched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: CompoundId,
    pub timestamp: i64,
    pub text: String,
    pub message_type: i32,
    pub content_key: Option<ContentKey>,
    pub sender_id: i64,
    pub reply_target: Option<CompoundId>,
    pub forward_origin: Option<String>,
}

impl MessageRecord {
    pub fn from_remote(message: &api::Message) -> Self {
        let reply_target = match message.reply_to {
            Some(MessageReplyTo::MessageReplyToMessage {
                chat_id,
                message_id,
            }) => Some(CompoundId::new(chat_id, message_id)),
            _ => None,
        };
        Self {
            id: CompoundId::new(message.chat_id, message.id),
            timestamp: message.date,
            text: message.content.text().to_string(),
            message_type: message.content.kind(),
            content_key: None,
            sender_id: message.sender_id.id(),
            reply_target,
            forward_origin: message.forward_info.as_ref().map(|f| f.origin.describe()),
        }
    }

    pub fn chat_id(&self) -> i64 {
        self.id.chat_id
    }
}

/// A downloaded file, stored at most once per content key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentFile {
    pub key: ContentKey,
    pub local_path: String,
    pub origin_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{
        ForwardOrigin, Message, MessageContent, MessageForwardInfo, MessageSender, ProfilePhoto,
        RemoteFile, User, Usernames,
    };

    #[test]
    fn compound_id_round_trips_through_text() {
        let id = CompoundId::new(-1001234, 77);
        assert_eq!(id.to_string(), "-1001234:77");
        assert_eq!("-1001234:77".parse::<CompoundId>(), Ok(id));
        assert!("nope".parse::<CompoundId>().is_err());
        assert!("1:x".parse::<CompoundId>().is_err());
    }

    #[test]
    fn message_record_keeps_reply_and_forward() {
        let message = Message {
            id: 10,
            chat_id: 5,
            sender_id: MessageSender::MessageSenderUser { user_id: 9 },
            date: 1_700_000_000,
            edit_date: 0,
            message_thread_id: 0,
            content: MessageContent::text_message("hello there"),
            reply_to: Some(MessageReplyTo::MessageReplyToMessage {
                chat_id: 5,
                message_id: 3,
            }),
            forward_info: Some(MessageForwardInfo {
                origin: ForwardOrigin::MessageOriginChat {
                    sender_chat_id: -200,
                    author_signature: String::new(),
                },
                date: 1_600_000_000,
            }),
        };

        let record = MessageRecord::from_remote(&message);
        assert_eq!(record.id, CompoundId::new(5, 10));
        assert_eq!(record.sender_id, 9);
        assert_eq!(record.text, "hello there");
        assert_eq!(record.reply_target, Some(CompoundId::new(5, 3)));
        assert_eq!(record.forward_origin.as_deref(), Some("chat:-200"));
        assert!(record.content_key.is_none());
    }

    #[test]
    fn user_record_keeps_usernames_but_no_unsaved_avatar() {
        let user = User {
            id: 42,
            first_name: "Ada".into(),
            last_name: "Lovelace".into(),
            usernames: Some(Usernames {
                active_usernames: vec!["ada".into(), "countess".into()],
                disabled_usernames: vec!["old_ada".into()],
                editable_username: "ada".into(),
            }),
            profile_photo: Some(ProfilePhoto {
                id: 1,
                big: RemoteFile {
                    id: 3,
                    ..Default::default()
                },
            }),
        };
        let record = UserRecord::from_remote(&user);
        assert_eq!(record.display_name, "Ada Lovelace");
        assert_eq!(record.username.as_deref(), Some("ada"));
        assert_eq!(record.usernames, vec!["ada", "countess"]);
        assert_eq!(record.disabled_usernames, vec!["old_ada"]);
        assert!(record.avatar_key.is_none());
    }
}
