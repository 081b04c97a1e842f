//! Database row types. These map directly to SQLite rows and are kept apart
//! from the courier-types models so the DB layer stays independent.

use anyhow::{Result, anyhow};
use uuid::Uuid;

use courier_types::models::{
    Conversation, Message, MessageSeen, Participant, ParticipantRole, PinnedMessage, Reaction,
    User,
};

use crate::{format_timestamp, parse_timestamp};

fn parse_id(raw: &str, what: &str) -> Result<Uuid> {
    raw.parse()
        .map_err(|e| anyhow!("Corrupt {} '{}': {}", what, raw, e))
}

pub struct UserRow {
    pub id: String,
    pub username: String,
    pub display_name: String,
    pub avatar: Option<String>,
    pub password: String,
    pub created_at: String,
}

impl UserRow {
    pub fn into_user(self) -> Result<User> {
        Ok(User {
            id: parse_id(&self.id, "user id")?,
            username: self.username,
            display_name: self.display_name,
            avatar: self.avatar,
            created_at: parse_timestamp(&self.created_at)?,
        })
    }
}

pub struct ConversationRow {
    pub id: String,
    pub pair_key: Option<String>,
    pub created_at: String,
    pub last_message_at: String,
}

impl ConversationRow {
    pub fn into_conversation(self, participants: Vec<ParticipantRow>) -> Result<Conversation> {
        Ok(Conversation {
            id: parse_id(&self.id, "conversation id")?,
            participants: participants
                .into_iter()
                .map(ParticipantRow::into_participant)
                .collect::<Result<_>>()?,
            last_message_at: parse_timestamp(&self.last_message_at)?,
            created_at: parse_timestamp(&self.created_at)?,
        })
    }
}

pub struct ParticipantRow {
    pub conversation_id: String,
    pub user_id: String,
    pub role: String,
    pub joined_at: String,
}

impl ParticipantRow {
    pub fn into_participant(self) -> Result<Participant> {
        Ok(Participant {
            conversation_id: parse_id(&self.conversation_id, "conversation id")?,
            user_id: parse_id(&self.user_id, "user id")?,
            role: ParticipantRole::parse(&self.role)
                .ok_or_else(|| anyhow!("Unknown participant role '{}'", self.role))?,
            joined_at: parse_timestamp(&self.joined_at)?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct MessageRow {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub content: String,
    pub image: Option<String>,
    pub edited: bool,
    pub forwarded_from_id: Option<String>,
    pub created_at: String,
}

impl MessageRow {
    pub fn from_message(message: &Message) -> Self {
        Self {
            id: message.id.to_string(),
            conversation_id: message.conversation_id.to_string(),
            sender_id: message.sender_id.to_string(),
            content: message.content.clone(),
            image: message.image.clone(),
            edited: message.edited,
            forwarded_from_id: message.forwarded_from_id.map(|id| id.to_string()),
            created_at: format_timestamp(message.created_at),
        }
    }

    pub fn into_message(self) -> Result<Message> {
        Ok(Message {
            id: parse_id(&self.id, "message id")?,
            conversation_id: parse_id(&self.conversation_id, "conversation id")?,
            sender_id: parse_id(&self.sender_id, "sender id")?,
            content: self.content,
            image: self.image,
            edited: self.edited,
            forwarded_from_id: self
                .forwarded_from_id
                .as_deref()
                .map(|raw| parse_id(raw, "forwarded_from_id"))
                .transpose()?,
            created_at: parse_timestamp(&self.created_at)?,
        })
    }
}

pub struct SeenRow {
    pub message_id: String,
    pub user_id: String,
    pub seen_at: String,
}

impl SeenRow {
    pub fn into_seen(self) -> Result<MessageSeen> {
        Ok(MessageSeen {
            message_id: parse_id(&self.message_id, "message id")?,
            user_id: parse_id(&self.user_id, "user id")?,
            seen_at: parse_timestamp(&self.seen_at)?,
        })
    }
}

pub struct ReactionRow {
    pub id: String,
    pub message_id: String,
    pub user_id: String,
    pub emoji: String,
    pub created_at: String,
}

impl ReactionRow {
    pub fn into_reaction(self) -> Result<Reaction> {
        Ok(Reaction {
            message_id: parse_id(&self.message_id, "message id")?,
            user_id: parse_id(&self.user_id, "user id")?,
            emoji: self.emoji,
            created_at: parse_timestamp(&self.created_at)?,
        })
    }
}

pub struct PinRow {
    pub id: String,
    pub conversation_id: String,
    pub message_id: String,
    pub pinned_by_id: String,
    pub created_at: String,
}

impl PinRow {
    pub fn into_pinned(self, message: MessageRow) -> Result<PinnedMessage> {
        Ok(PinnedMessage {
            id: parse_id(&self.id, "pin id")?,
            conversation_id: parse_id(&self.conversation_id, "conversation id")?,
            message_id: parse_id(&self.message_id, "message id")?,
            pinned_by_id: parse_id(&self.pinned_by_id, "user id")?,
            created_at: parse_timestamp(&self.created_at)?,
            message: message.into_message()?,
        })
    }
}
