use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

use crate::models::{Message, PinnedMessage};

const USER_TOPIC_PREFIX: &str = "user-";
const PRESENCE_TOPIC: &str = "presence-online";

/// A named relay channel.
///
/// On the wire a conversation topic is the bare conversation id, a personal
/// topic is `user-<id>`, and presence is the shared `presence-online` topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Topic {
    Conversation(Uuid),
    User(Uuid),
    Presence,
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Conversation(id) => write!(f, "{}", id),
            Self::User(id) => write!(f, "{}{}", USER_TOPIC_PREFIX, id),
            Self::Presence => f.write_str(PRESENCE_TOPIC),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("invalid topic '{0}'")]
pub struct TopicParseError(pub String);

impl FromStr for Topic {
    type Err = TopicParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == PRESENCE_TOPIC {
            return Ok(Self::Presence);
        }
        if let Some(rest) = s.strip_prefix(USER_TOPIC_PREFIX) {
            return rest
                .parse()
                .map(Self::User)
                .map_err(|_| TopicParseError(s.to_string()));
        }
        s.parse()
            .map(Self::Conversation)
            .map_err(|_| TopicParseError(s.to_string()))
    }
}

impl Serialize for Topic {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Topic {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Events published through the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "data",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum RelayEvent {
    /// A message was posted (or forwarded) into a conversation
    MessageCreated(Message),

    /// A message's content was edited by its sender
    MessageUpdated {
        id: Uuid,
        conversation_id: Uuid,
        content: String,
        edited: bool,
    },

    /// A message was deleted. Carries no content.
    MessageDeleted { id: Uuid, conversation_id: Uuid },

    MessagePinned {
        pinned_message: PinnedMessage,
        conversation_id: Uuid,
    },

    ReactionAdded {
        message_id: Uuid,
        conversation_id: Uuid,
        emoji: String,
        user_id: Uuid,
    },

    ReactionRemoved {
        message_id: Uuid,
        conversation_id: Uuid,
        emoji: String,
        user_id: Uuid,
    },

    UserOnline { user_id: Uuid },

    UserOffline { user_id: Uuid },
}

impl RelayEvent {
    /// Wire name of the event kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MessageCreated(_) => "message-created",
            Self::MessageUpdated { .. } => "message-updated",
            Self::MessageDeleted { .. } => "message-deleted",
            Self::MessagePinned { .. } => "message-pinned",
            Self::ReactionAdded { .. } => "reaction-added",
            Self::ReactionRemoved { .. } => "reaction-removed",
            Self::UserOnline { .. } => "user-online",
            Self::UserOffline { .. } => "user-offline",
        }
    }

    /// Returns the conversation this event belongs to. Presence events are global.
    pub fn conversation_id(&self) -> Option<Uuid> {
        match self {
            Self::MessageCreated(message) => Some(message.conversation_id),
            Self::MessageUpdated { conversation_id, .. }
            | Self::MessageDeleted { conversation_id, .. }
            | Self::MessagePinned { conversation_id, .. }
            | Self::ReactionAdded { conversation_id, .. }
            | Self::ReactionRemoved { conversation_id, .. } => Some(*conversation_id),
            Self::UserOnline { .. } | Self::UserOffline { .. } => None,
        }
    }
}

/// An event together with the topic it was published on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub topic: Topic,
    pub event: RelayEvent,
}

/// Frames sent FROM server TO client over the gateway socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "data",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum ServerFrame {
    /// Connection is authenticated and subscribed to its personal and presence topics
    Ready { user_id: Uuid, connection_id: Uuid },

    Event(Envelope),

    Subscribed { topic: Topic },

    Unsubscribed { topic: Topic },

    /// A subscribe command was refused
    Rejected { topic: Topic, reason: String },
}

/// Commands sent FROM client TO server over the gateway socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum ClientCommand {
    Subscribe { topic: Topic },
    Unsubscribe { topic: Topic },
}
