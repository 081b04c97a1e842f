//! Conversation operations shared by every HTTP handler.
//!
//! Every write commits to SQLite first and publishes to the relay second.
//! A failed publish is logged and never undoes the write; subscribers that
//! missed it recover from the next snapshot.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, SubsecRound, Timelike, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use courier_db::models::{MessageRow, PinRow, ReactionRow, SeenRow, UserRow};
use courier_db::{Database, format_timestamp, is_unique_violation};
use courier_gateway::presence::PresenceTracker;
use courier_gateway::relay::EventRelay;
use courier_types::api::{
    ConversationStats, ConversationSummary, ForwardedFrom, HourActivity, HourCount,
    MessageResponse, ReactionGroup, UserCount, UserProfile,
};
use courier_types::events::{RelayEvent, Topic};
use courier_types::models::{
    Conversation, MAX_PINS_PER_CONVERSATION, Message, MessageSeen, PinnedMessage, Reaction, User,
};

use crate::error::{ApiError, ApiResult};

/// Current time at the precision stored in the database, so live events and
/// snapshots carry identical timestamps.
fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Canonical key of a two-person conversation, independent of who opened it.
pub fn pair_key(a: Uuid, b: Uuid) -> String {
    let (low, high) = if a <= b { (a, b) } else { (b, a) };
    format!("{}:{}", low, high)
}

#[derive(Clone)]
pub struct ConversationService {
    db: Arc<Database>,
    relay: Arc<dyn EventRelay>,
    presence: PresenceTracker,
}

struct Snapshot {
    messages: Vec<Message>,
    seen: Vec<MessageSeen>,
    reactions: Vec<Reaction>,
    origins: HashMap<Uuid, ForwardedFrom>,
}

impl ConversationService {
    pub fn new(db: Arc<Database>, relay: Arc<dyn EventRelay>, presence: PresenceTracker) -> Self {
        Self {
            db,
            relay,
            presence,
        }
    }

    pub fn db(&self) -> &Arc<Database> {
        &self.db
    }

    pub fn relay(&self) -> &dyn EventRelay {
        self.relay.as_ref()
    }

    pub fn presence(&self) -> &PresenceTracker {
        &self.presence
    }

    /// Run a database call off the async runtime, keeping its error intact
    /// so callers can inspect constraint violations.
    async fn run<T, F>(&self, f: F) -> ApiResult<anyhow::Result<T>>
    where
        F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        Ok(tokio::task::spawn_blocking(move || f(&db)).await?)
    }

    async fn blocking<T, F>(&self, f: F) -> ApiResult<T>
    where
        F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        Ok(self.run(f).await??)
    }

    async fn publish(&self, topic: Topic, event: RelayEvent) {
        let kind = event.kind();
        if let Err(e) = self.relay.publish(topic, event).await {
            warn!("Failed to publish {} on {}: {}", kind, topic, e);
        }
    }

    // -- Users --

    pub async fn user(&self, user_id: Uuid) -> ApiResult<User> {
        self.blocking(move |db| db.get_user_by_id(user_id)?.map(UserRow::into_user).transpose())
            .await?
            .ok_or(ApiError::NotFound("user"))
    }

    pub async fn profile(&self, user_id: Uuid) -> ApiResult<UserProfile> {
        let user = self.user(user_id).await?;
        Ok(self.with_presence(user).await)
    }

    async fn with_presence(&self, user: User) -> UserProfile {
        UserProfile {
            online: self.presence.is_online(user.id).await,
            user,
        }
    }

    pub async fn update_profile(
        &self,
        user_id: Uuid,
        display_name: Option<String>,
        avatar: Option<String>,
    ) -> ApiResult<UserProfile> {
        let display_name = display_name.map(|name| name.trim().to_string());
        if display_name.as_deref().is_some_and(str::is_empty) {
            return Err(ApiError::invalid("displayName must not be blank"));
        }

        let updated = self
            .blocking(move |db| {
                db.update_user_profile(user_id, display_name.as_deref(), avatar.as_deref())
            })
            .await?;
        if !updated {
            return Err(ApiError::NotFound("user"));
        }
        self.profile(user_id).await
    }

    // -- Access checks --

    /// The conversation, provided `requester` takes part in it.
    pub async fn conversation_for(
        &self,
        requester: Uuid,
        conversation_id: Uuid,
    ) -> ApiResult<Conversation> {
        let conversation = self
            .blocking(move |db| db.get_conversation(conversation_id))
            .await?
            .ok_or(ApiError::NotFound("conversation"))?;
        if !conversation.has_participant(requester) {
            return Err(ApiError::Forbidden("not a participant of this conversation"));
        }
        Ok(conversation)
    }

    async fn message(&self, message_id: Uuid) -> ApiResult<Message> {
        self.blocking(move |db| {
            db.get_message(message_id)?
                .map(MessageRow::into_message)
                .transpose()
        })
        .await?
        .ok_or(ApiError::NotFound("message"))
    }

    // -- Conversations --

    /// Return the conversation between `requester` and `other`, creating it
    /// if needed. The flag is true when this call created it.
    pub async fn create_or_get_conversation(
        &self,
        requester: Uuid,
        other: Option<Uuid>,
    ) -> ApiResult<(Conversation, bool)> {
        let other = other.ok_or_else(|| ApiError::invalid("userId is required"))?;
        if other == requester {
            return Err(ApiError::invalid("cannot open a conversation with yourself"));
        }
        let key = pair_key(requester, other);

        let lookup = key.clone();
        if let Some(existing) = self
            .blocking(move |db| db.find_conversation_by_pair(&lookup))
            .await?
        {
            return Ok((existing, false));
        }

        self.user(other).await?;

        let id = Uuid::new_v4();
        let insert_key = key.clone();
        let created = match self
            .run(move |db| {
                db.create_direct_conversation(id, &insert_key, requester, other, now())
            })
            .await?
        {
            Ok(()) => {
                info!("Conversation {} opened between {} and {}", id, requester, other);
                true
            }
            // Lost the race against a concurrent create for the same pair
            Err(e) if is_unique_violation(&e) => {
                debug!("Conversation for {} already exists, returning it", key);
                false
            }
            Err(e) => return Err(e.into()),
        };

        let conversation = self
            .blocking(move |db| db.find_conversation_by_pair(&key))
            .await?
            .ok_or_else(|| anyhow::anyhow!("conversation {} missing after create", id))?;
        Ok((conversation, created))
    }

    /// The requester's conversations, most recently active first.
    pub async fn list_conversations(&self, requester: Uuid) -> ApiResult<Vec<ConversationSummary>> {
        let rows = self
            .blocking(move |db| {
                let mut rows = Vec::new();
                for conversation in db.list_conversations_for_user(requester)? {
                    let companion = match conversation.companion_of(requester) {
                        Some(id) => db.get_user_by_id(id)?.map(UserRow::into_user).transpose()?,
                        None => None,
                    };
                    let last_message = db
                        .get_last_message(conversation.id)?
                        .map(MessageRow::into_message)
                        .transpose()?;
                    let unread = db.count_unseen(conversation.id, requester)?;
                    rows.push((conversation, companion, last_message, unread));
                }
                Ok(rows)
            })
            .await?;

        let mut summaries = Vec::with_capacity(rows.len());
        for (conversation, companion, last_message, unread_count) in rows {
            let companion = match companion {
                Some(user) => Some(self.with_presence(user).await),
                None => None,
            };
            summaries.push(ConversationSummary {
                id: conversation.id,
                companion,
                last_message,
                last_message_at: conversation.last_message_at,
                unread_count,
            });
        }
        Ok(summaries)
    }

    /// The other participant of a conversation.
    pub async fn companion(&self, requester: Uuid, conversation_id: Uuid) -> ApiResult<UserProfile> {
        let conversation = self.conversation_for(requester, conversation_id).await?;
        let companion = conversation
            .companion_of(requester)
            .ok_or(ApiError::NotFound("companion"))?;
        self.profile(companion).await
    }

    /// Mark every message of the conversation as seen by the requester.
    pub async fn mark_seen(&self, requester: Uuid, conversation_id: Uuid) -> ApiResult<usize> {
        self.conversation_for(requester, conversation_id).await?;
        let marked = self
            .blocking(move |db| db.mark_conversation_seen(conversation_id, requester, now()))
            .await?;
        debug!("{} marked {} messages seen in {}", requester, marked, conversation_id);
        Ok(marked)
    }

    pub async fn stats(&self, requester: Uuid, conversation_id: Uuid) -> ApiResult<ConversationStats> {
        let conversation = self.conversation_for(requester, conversation_id).await?;
        let participant_ids: Vec<Uuid> =
            conversation.participants.iter().map(|p| p.user_id).collect();

        let (messages, participants) = self
            .blocking(move |db| {
                let messages = db
                    .get_messages(conversation_id)?
                    .into_iter()
                    .map(MessageRow::into_message)
                    .collect::<anyhow::Result<Vec<_>>>()?;
                let mut participants = Vec::with_capacity(participant_ids.len());
                for id in participant_ids {
                    if let Some(row) = db.get_user_by_id(id)? {
                        participants.push(row.into_user()?);
                    }
                }
                Ok((messages, participants))
            })
            .await?;

        Ok(compute_stats(&messages, &participants))
    }

    // -- Messages --

    /// Authoritative ascending message list with receipts, reactions and
    /// forwarded-from summaries.
    pub async fn messages(
        &self,
        requester: Uuid,
        conversation_id: Uuid,
    ) -> ApiResult<Vec<MessageResponse>> {
        self.conversation_for(requester, conversation_id).await?;

        let snapshot = self
            .blocking(move |db| {
                let rows = db.get_messages(conversation_id)?;
                let ids: Vec<String> = rows.iter().map(|r| r.id.clone()).collect();

                let seen = db
                    .get_seen_for_messages(&ids)?
                    .into_iter()
                    .map(SeenRow::into_seen)
                    .collect::<anyhow::Result<Vec<_>>>()?;
                let reactions = db
                    .get_reactions_for_messages(&ids)?
                    .into_iter()
                    .map(ReactionRow::into_reaction)
                    .collect::<anyhow::Result<Vec<_>>>()?;
                let messages = rows
                    .into_iter()
                    .map(MessageRow::into_message)
                    .collect::<anyhow::Result<Vec<_>>>()?;

                let mut origins = HashMap::new();
                for origin_id in messages.iter().filter_map(|m| m.forwarded_from_id) {
                    if origins.contains_key(&origin_id) {
                        continue;
                    }
                    if let Some(row) = db.get_message(origin_id)? {
                        let origin = row.into_message()?;
                        origins.insert(
                            origin_id,
                            ForwardedFrom {
                                id: origin.id,
                                sender_id: origin.sender_id,
                                created_at: origin.created_at,
                            },
                        );
                    }
                }

                Ok(Snapshot {
                    messages,
                    seen,
                    reactions,
                    origins,
                })
            })
            .await?;

        Ok(assemble_snapshot(snapshot))
    }

    pub async fn send_message(
        &self,
        requester: Uuid,
        conversation_id: Uuid,
        content: String,
        image: Option<String>,
    ) -> ApiResult<Message> {
        let conversation = self.conversation_for(requester, conversation_id).await?;

        let image = image.filter(|i| !i.trim().is_empty());
        if content.trim().is_empty() && image.is_none() {
            return Err(ApiError::invalid("message needs content or an image"));
        }

        let message = Message {
            id: Uuid::new_v4(),
            conversation_id,
            sender_id: requester,
            content,
            image,
            edited: false,
            forwarded_from_id: None,
            created_at: now(),
        };
        self.store_message(&message).await?;
        self.announce_message(&conversation, &message).await;
        Ok(message)
    }

    pub async fn edit_message(
        &self,
        requester: Uuid,
        message_id: Uuid,
        content: String,
    ) -> ApiResult<Message> {
        if content.trim().is_empty() {
            return Err(ApiError::invalid("content must not be blank"));
        }

        let mut message = self.message(message_id).await?;
        if message.sender_id != requester {
            return Err(ApiError::Forbidden("only the sender can edit a message"));
        }

        let new_content = content.clone();
        let updated = self
            .blocking(move |db| db.update_message_content(message_id, &new_content))
            .await?;
        if !updated {
            return Err(ApiError::NotFound("message"));
        }

        message.content = content;
        message.edited = true;
        self.publish(
            Topic::Conversation(message.conversation_id),
            RelayEvent::MessageUpdated {
                id: message.id,
                conversation_id: message.conversation_id,
                content: message.content.clone(),
                edited: true,
            },
        )
        .await;
        Ok(message)
    }

    pub async fn delete_message(&self, requester: Uuid, message_id: Uuid) -> ApiResult<()> {
        let message = self.message(message_id).await?;
        if message.sender_id != requester {
            return Err(ApiError::Forbidden("only the sender can delete a message"));
        }

        if !self.blocking(move |db| db.delete_message(message_id)).await? {
            return Err(ApiError::NotFound("message"));
        }
        info!("Message {} deleted from {}", message_id, message.conversation_id);

        self.publish(
            Topic::Conversation(message.conversation_id),
            RelayEvent::MessageDeleted {
                id: message.id,
                conversation_id: message.conversation_id,
            },
        )
        .await;
        Ok(())
    }

    /// Copy a message into another conversation. The requester must take part
    /// in both the source and the target.
    pub async fn forward_message(
        &self,
        requester: Uuid,
        message_id: Uuid,
        target_conversation_id: Option<Uuid>,
    ) -> ApiResult<Message> {
        let target_id = target_conversation_id
            .ok_or_else(|| ApiError::invalid("targetConversationId is required"))?;

        let original = self.message(message_id).await?;
        self.conversation_for(requester, original.conversation_id).await?;
        let target = self.conversation_for(requester, target_id).await?;

        let copy = Message {
            id: Uuid::new_v4(),
            conversation_id: target.id,
            sender_id: requester,
            content: original.content,
            image: original.image,
            edited: false,
            forwarded_from_id: Some(original.id),
            created_at: now(),
        };
        self.store_message(&copy).await?;
        self.announce_message(&target, &copy).await;
        Ok(copy)
    }

    async fn store_message(&self, message: &Message) -> ApiResult<()> {
        let row = MessageRow::from_message(message);
        self.blocking(move |db| db.insert_message(&row)).await
    }

    /// Conversation topic for open views, personal topics for everyone else's
    /// unread badge.
    async fn announce_message(&self, conversation: &Conversation, message: &Message) {
        self.publish(
            Topic::Conversation(conversation.id),
            RelayEvent::MessageCreated(message.clone()),
        )
        .await;

        for participant in &conversation.participants {
            if participant.user_id != message.sender_id {
                self.publish(
                    Topic::User(participant.user_id),
                    RelayEvent::MessageCreated(message.clone()),
                )
                .await;
            }
        }
    }

    // -- Reactions --

    pub async fn react(&self, requester: Uuid, message_id: Uuid, emoji: &str) -> ApiResult<Reaction> {
        let emoji = normalize_emoji(emoji)?;
        let message = self.message(message_id).await?;
        self.conversation_for(requester, message.conversation_id).await?;

        let reaction = Reaction {
            message_id,
            user_id: requester,
            emoji,
            created_at: now(),
        };
        let (stored_emoji, at) = (reaction.emoji.clone(), reaction.created_at);
        match self
            .run(move |db| db.insert_reaction(Uuid::new_v4(), message_id, requester, &stored_emoji, at))
            .await?
        {
            Ok(()) => {}
            Err(e) if is_unique_violation(&e) => {
                return Err(ApiError::conflict("reaction already exists"));
            }
            Err(e) => return Err(e.into()),
        }

        self.publish(
            Topic::Conversation(message.conversation_id),
            RelayEvent::ReactionAdded {
                message_id,
                conversation_id: message.conversation_id,
                emoji: reaction.emoji.clone(),
                user_id: requester,
            },
        )
        .await;
        Ok(reaction)
    }

    /// Remove a reaction if present. Returns whether a row was deleted; the
    /// removal event goes out either way.
    pub async fn unreact(&self, requester: Uuid, message_id: Uuid, emoji: &str) -> ApiResult<bool> {
        let emoji = normalize_emoji(emoji)?;
        let message = self.message(message_id).await?;
        self.conversation_for(requester, message.conversation_id).await?;

        let stored_emoji = emoji.clone();
        let removed = self
            .blocking(move |db| db.delete_reaction(message_id, requester, &stored_emoji))
            .await?;

        self.publish(
            Topic::Conversation(message.conversation_id),
            RelayEvent::ReactionRemoved {
                message_id,
                conversation_id: message.conversation_id,
                emoji,
                user_id: requester,
            },
        )
        .await;
        Ok(removed)
    }

    // -- Pins --

    pub async fn pin_message(&self, requester: Uuid, message_id: Uuid) -> ApiResult<PinnedMessage> {
        let message = self.message(message_id).await?;
        let conversation_id = message.conversation_id;
        self.conversation_for(requester, conversation_id).await?;

        let pinned = PinnedMessage {
            id: Uuid::new_v4(),
            conversation_id,
            message_id,
            pinned_by_id: requester,
            created_at: now(),
            message,
        };
        let row = PinRow {
            id: pinned.id.to_string(),
            conversation_id: conversation_id.to_string(),
            message_id: message_id.to_string(),
            pinned_by_id: requester.to_string(),
            created_at: format_timestamp(pinned.created_at),
        };

        match self
            .run(move |db| db.insert_pin(&row, MAX_PINS_PER_CONVERSATION))
            .await?
        {
            Ok(true) => {}
            Ok(false) => {
                return Err(ApiError::conflict(format!(
                    "a conversation holds at most {} pinned messages",
                    MAX_PINS_PER_CONVERSATION
                )));
            }
            Err(e) if is_unique_violation(&e) => {
                return Err(ApiError::conflict("message is already pinned"));
            }
            Err(e) => return Err(e.into()),
        }

        self.publish(
            Topic::Conversation(conversation_id),
            RelayEvent::MessagePinned {
                pinned_message: pinned.clone(),
                conversation_id,
            },
        )
        .await;
        Ok(pinned)
    }

    pub async fn list_pins(
        &self,
        requester: Uuid,
        conversation_id: Uuid,
    ) -> ApiResult<Vec<PinnedMessage>> {
        self.conversation_for(requester, conversation_id).await?;
        self.blocking(move |db| db.list_pins(conversation_id)).await
    }
}

fn normalize_emoji(emoji: &str) -> ApiResult<String> {
    let emoji = emoji.trim();
    if emoji.is_empty() {
        return Err(ApiError::invalid("emoji must not be blank"));
    }
    Ok(emoji.to_string())
}

fn assemble_snapshot(snapshot: Snapshot) -> Vec<MessageResponse> {
    let mut seen_by: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
    for receipt in snapshot.seen {
        seen_by
            .entry(receipt.message_id)
            .or_default()
            .push(receipt.user_id);
    }

    let mut reactions = group_reactions(snapshot.reactions);

    snapshot
        .messages
        .into_iter()
        .map(|message| MessageResponse {
            seen_by: seen_by.remove(&message.id).unwrap_or_default(),
            reactions: reactions.remove(&message.id).unwrap_or_default(),
            forwarded_from: message
                .forwarded_from_id
                .and_then(|id| snapshot.origins.get(&id).cloned()),
            message,
        })
        .collect()
}

/// Group reactions per message and emoji, keeping the order in which each
/// emoji was first used.
fn group_reactions(reactions: Vec<Reaction>) -> HashMap<Uuid, Vec<ReactionGroup>> {
    let mut grouped: HashMap<Uuid, Vec<ReactionGroup>> = HashMap::new();
    for reaction in reactions {
        let groups = grouped.entry(reaction.message_id).or_default();
        match groups.iter_mut().find(|g| g.emoji == reaction.emoji) {
            Some(group) => {
                group.count += 1;
                group.user_ids.push(reaction.user_id);
            }
            None => groups.push(ReactionGroup {
                emoji: reaction.emoji,
                count: 1,
                user_ids: vec![reaction.user_id],
            }),
        }
    }
    grouped
}

/// Statistics over an ascending message list. Hours are UTC.
pub fn compute_stats(messages: &[Message], participants: &[User]) -> ConversationStats {
    let message_count = messages.len();

    let mut by_hour = [0usize; 24];
    for message in messages {
        by_hour[message.created_at.hour() as usize] += 1;
    }

    // A response is a message whose predecessor came from someone else
    let gaps: Vec<f64> = messages
        .windows(2)
        .filter(|pair| pair[0].sender_id != pair[1].sender_id)
        .map(|pair| (pair[1].created_at - pair[0].created_at).num_milliseconds() as f64 / 1000.0)
        .collect();
    let average_response_time = if gaps.is_empty() {
        0.0
    } else {
        gaps.iter().sum::<f64>() / gaps.len() as f64
    };

    let messages_by_user = participants
        .iter()
        .map(|user| UserCount {
            user_id: user.id,
            display_name: user.display_name.clone(),
            count: messages.iter().filter(|m| m.sender_id == user.id).count(),
        })
        .collect();

    ConversationStats {
        message_count,
        participant_count: participants.len(),
        average_response_time,
        messages_by_hour: by_hour
            .iter()
            .enumerate()
            .map(|(hour, count)| HourCount {
                hour: hour as u32,
                count: *count,
            })
            .collect(),
        messages_by_user,
        active_hours: by_hour
            .iter()
            .enumerate()
            .map(|(hour, count)| HourActivity {
                hour: hour as u32,
                activity: if message_count == 0 {
                    0.0
                } else {
                    *count as f64 / message_count as f64
                },
            })
            .collect(),
    }
}
