//! Local, ordered copy of one conversation.
//!
//! The view is built from the server snapshot and kept current by relay
//! events. Every event is applied idempotently, so duplicates and events that
//! overlap the snapshot converge on the same state:
//!
//! - `message-created` for an id already present is a no-op;
//! - `message-updated` and reactions for an unknown id are held until the
//!   message shows up;
//! - `message-deleted` leaves a tombstone, so a late `message-created` cannot
//!   bring the message back.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use courier_types::api::{ForwardedFrom, MessageResponse, ReactionGroup};
use courier_types::events::RelayEvent;
use courier_types::models::{Message, PinnedMessage};

type OrderKey = (DateTime<Utc>, Uuid);

#[derive(Debug, Clone, PartialEq)]
pub struct ViewMessage {
    pub message: Message,
    pub seen_by: Vec<Uuid>,
    pub forwarded_from: Option<ForwardedFrom>,
    /// (emoji, user) pairs in the order they were added.
    reactions: Vec<(String, Uuid)>,
}

impl ViewMessage {
    fn new(message: Message) -> Self {
        Self {
            message,
            seen_by: Vec::new(),
            forwarded_from: None,
            reactions: Vec::new(),
        }
    }

    pub fn reactions(&self) -> Vec<ReactionGroup> {
        let mut groups: Vec<ReactionGroup> = Vec::new();
        for (emoji, user_id) in &self.reactions {
            match groups.iter_mut().find(|g| &g.emoji == emoji) {
                Some(group) => {
                    group.count += 1;
                    group.user_ids.push(*user_id);
                }
                None => groups.push(ReactionGroup {
                    emoji: emoji.clone(),
                    count: 1,
                    user_ids: vec![*user_id],
                }),
            }
        }
        groups
    }

    fn add_reaction(&mut self, emoji: &str, user_id: Uuid) -> bool {
        if self.reactions.iter().any(|(e, u)| e == emoji && *u == user_id) {
            return false;
        }
        self.reactions.push((emoji.to_string(), user_id));
        true
    }

    fn remove_reaction(&mut self, emoji: &str, user_id: Uuid) -> bool {
        let before = self.reactions.len();
        self.reactions.retain(|(e, u)| !(e == emoji && *u == user_id));
        self.reactions.len() != before
    }
}

#[derive(Debug, Clone)]
pub struct ConversationView {
    conversation_id: Uuid,
    messages: BTreeMap<OrderKey, ViewMessage>,
    index: HashMap<Uuid, OrderKey>,
    /// Events waiting for their message, keyed by message id.
    pending: HashMap<Uuid, Vec<RelayEvent>>,
    tombstones: HashSet<Uuid>,
    pins: Vec<PinnedMessage>,
}

impl ConversationView {
    pub fn new(conversation_id: Uuid) -> Self {
        Self {
            conversation_id,
            messages: BTreeMap::new(),
            index: HashMap::new(),
            pending: HashMap::new(),
            tombstones: HashSet::new(),
            pins: Vec::new(),
        }
    }

    pub fn conversation_id(&self) -> Uuid {
        self.conversation_id
    }

    /// Replace the contents with an authoritative snapshot. Tombstones and
    /// held events survive: a held update whose message is in the snapshot is
    /// applied now.
    pub fn reset(&mut self, snapshot: Vec<MessageResponse>) {
        self.messages.clear();
        self.index.clear();

        for entry in snapshot {
            if entry.message.conversation_id != self.conversation_id
                || self.tombstones.contains(&entry.message.id)
            {
                continue;
            }
            let mut item = ViewMessage::new(entry.message);
            item.seen_by = entry.seen_by;
            item.forwarded_from = entry.forwarded_from;
            for group in entry.reactions {
                for user_id in group.user_ids {
                    item.add_reaction(&group.emoji, user_id);
                }
            }
            self.insert(item);
        }

        let ready: Vec<Uuid> = self
            .pending
            .keys()
            .filter(|id| self.index.contains_key(id))
            .copied()
            .collect();
        for id in ready {
            self.flush_pending(id);
        }
    }

    pub fn set_pins(&mut self, pins: Vec<PinnedMessage>) {
        self.pins = pins
            .into_iter()
            .filter(|p| !self.tombstones.contains(&p.message_id))
            .collect();
    }

    /// Apply one relay event. Returns true if the view changed. Events for
    /// other conversations are ignored.
    pub fn apply(&mut self, event: &RelayEvent) -> bool {
        if event.conversation_id() != Some(self.conversation_id) {
            return false;
        }

        match event {
            RelayEvent::MessageCreated(message) => {
                if self.tombstones.contains(&message.id) || self.index.contains_key(&message.id) {
                    return false;
                }
                self.insert(ViewMessage::new(message.clone()));
                self.flush_pending(message.id);
                true
            }

            RelayEvent::MessageUpdated { id, content, edited, .. } => {
                if self.tombstones.contains(id) {
                    return false;
                }
                match self.get_mut(*id) {
                    Some(item) => {
                        let changed = item.message.content != *content || item.message.edited != *edited;
                        item.message.content = content.clone();
                        item.message.edited = *edited;
                        changed
                    }
                    None => self.hold(*id, event),
                }
            }

            RelayEvent::MessageDeleted { id, .. } => {
                let inserted = self.tombstones.insert(*id);
                self.pending.remove(id);
                self.pins.retain(|p| p.message_id != *id);
                let removed = match self.index.remove(id) {
                    Some(key) => self.messages.remove(&key).is_some(),
                    None => false,
                };
                inserted || removed
            }

            RelayEvent::MessagePinned { pinned_message, .. } => {
                if self.tombstones.contains(&pinned_message.message_id)
                    || self
                        .pins
                        .iter()
                        .any(|p| p.message_id == pinned_message.message_id)
                {
                    return false;
                }
                self.pins.push(pinned_message.clone());
                true
            }

            RelayEvent::ReactionAdded {
                message_id,
                emoji,
                user_id,
                ..
            } => {
                if self.tombstones.contains(message_id) {
                    return false;
                }
                match self.get_mut(*message_id) {
                    Some(item) => item.add_reaction(emoji, *user_id),
                    None => self.hold(*message_id, event),
                }
            }

            RelayEvent::ReactionRemoved {
                message_id,
                emoji,
                user_id,
                ..
            } => {
                if self.tombstones.contains(message_id) {
                    return false;
                }
                match self.get_mut(*message_id) {
                    Some(item) => item.remove_reaction(emoji, *user_id),
                    None => self.hold(*message_id, event),
                }
            }

            RelayEvent::UserOnline { .. } | RelayEvent::UserOffline { .. } => false,
        }
    }

    /// Messages in (createdAt, id) order.
    pub fn messages(&self) -> impl Iterator<Item = &ViewMessage> {
        self.messages.values()
    }

    pub fn get(&self, id: Uuid) -> Option<&ViewMessage> {
        self.index.get(&id).and_then(|key| self.messages.get(key))
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.index.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn pins(&self) -> &[PinnedMessage] {
        &self.pins
    }

    pub fn is_deleted(&self, id: Uuid) -> bool {
        self.tombstones.contains(&id)
    }

    fn insert(&mut self, item: ViewMessage) {
        let key = (item.message.created_at, item.message.id);
        self.index.insert(item.message.id, key);
        self.messages.insert(key, item);
    }

    fn get_mut(&mut self, id: Uuid) -> Option<&mut ViewMessage> {
        let key = self.index.get(&id)?;
        self.messages.get_mut(key)
    }

    fn hold(&mut self, message_id: Uuid, event: &RelayEvent) -> bool {
        self.pending.entry(message_id).or_default().push(event.clone());
        false
    }

    fn flush_pending(&mut self, message_id: Uuid) {
        if let Some(events) = self.pending.remove(&message_id) {
            for event in events {
                self.apply(&event);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn message(conversation_id: Uuid, sender: Uuid, second: u32, content: &str) -> Message {
        Message {
            id: Uuid::new_v4(),
            conversation_id,
            sender_id: sender,
            content: content.into(),
            image: None,
            edited: false,
            forwarded_from_id: None,
            created_at: Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, second).unwrap(),
        }
    }

    fn snapshot_entry(message: &Message) -> MessageResponse {
        MessageResponse {
            message: message.clone(),
            seen_by: vec![message.sender_id],
            reactions: vec![],
            forwarded_from: None,
        }
    }

    fn contents(view: &ConversationView) -> Vec<String> {
        view.messages().map(|m| m.message.content.clone()).collect()
    }

    #[test]
    fn duplicate_created_renders_once() {
        let cid = Uuid::new_v4();
        let mut view = ConversationView::new(cid);
        let hello = message(cid, Uuid::new_v4(), 0, "hello");

        assert!(view.apply(&RelayEvent::MessageCreated(hello.clone())));
        assert!(!view.apply(&RelayEvent::MessageCreated(hello.clone())));

        // Also idempotent against a snapshot that already holds it
        view.reset(vec![snapshot_entry(&hello)]);
        assert!(!view.apply(&RelayEvent::MessageCreated(hello)));
        assert_eq!(contents(&view), vec!["hello"]);
    }

    #[test]
    fn messages_stay_ordered_by_creation_time() {
        let cid = Uuid::new_v4();
        let sender = Uuid::new_v4();
        let mut view = ConversationView::new(cid);
        let first = message(cid, sender, 1, "first");
        let second = message(cid, sender, 2, "second");
        let third = message(cid, sender, 3, "third");

        view.reset(vec![snapshot_entry(&second)]);
        view.apply(&RelayEvent::MessageCreated(third));
        view.apply(&RelayEvent::MessageCreated(first));

        assert_eq!(contents(&view), vec!["first", "second", "third"]);
    }

    #[test]
    fn update_before_create_is_held() {
        let cid = Uuid::new_v4();
        let mut view = ConversationView::new(cid);
        let original = message(cid, Uuid::new_v4(), 0, "draft");
        let update = RelayEvent::MessageUpdated {
            id: original.id,
            conversation_id: cid,
            content: "final".into(),
            edited: true,
        };

        assert!(!view.apply(&update));
        assert!(view.is_empty());

        view.apply(&RelayEvent::MessageCreated(original.clone()));
        let shown = view.get(original.id).unwrap();
        assert_eq!(shown.message.content, "final");
        assert!(shown.message.edited);
    }

    #[test]
    fn held_update_applies_on_snapshot() {
        let cid = Uuid::new_v4();
        let mut view = ConversationView::new(cid);
        let original = message(cid, Uuid::new_v4(), 0, "draft");

        view.apply(&RelayEvent::MessageUpdated {
            id: original.id,
            conversation_id: cid,
            content: "final".into(),
            edited: true,
        });
        view.reset(vec![snapshot_entry(&original)]);

        assert_eq!(contents(&view), vec!["final"]);
    }

    #[test]
    fn delete_cannot_be_undone_by_a_late_create() {
        let cid = Uuid::new_v4();
        let mut view = ConversationView::new(cid);
        let doomed = message(cid, Uuid::new_v4(), 0, "doomed");
        let deleted = RelayEvent::MessageDeleted {
            id: doomed.id,
            conversation_id: cid,
        };

        assert!(view.apply(&deleted));
        assert!(!view.apply(&RelayEvent::MessageCreated(doomed.clone())));
        view.reset(vec![snapshot_entry(&doomed)]);

        assert!(view.is_empty());
        assert!(view.is_deleted(doomed.id));
    }

    #[test]
    fn react_then_unreact_converges_for_a_bystander() {
        let cid = Uuid::new_v4();
        let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
        let target = message(cid, alice, 0, "nice");
        let added = RelayEvent::ReactionAdded {
            message_id: target.id,
            conversation_id: cid,
            emoji: "👍".into(),
            user_id: bob,
        };
        let removed = RelayEvent::ReactionRemoved {
            message_id: target.id,
            conversation_id: cid,
            emoji: "👍".into(),
            user_id: bob,
        };

        let mut view = ConversationView::new(cid);
        view.reset(vec![snapshot_entry(&target)]);
        view.apply(&added);
        assert_eq!(view.get(target.id).unwrap().reactions()[0].count, 1);
        // Redelivery adds nothing
        view.apply(&added);
        assert_eq!(view.get(target.id).unwrap().reactions()[0].count, 1);
        view.apply(&removed);

        assert!(view.get(target.id).unwrap().reactions().is_empty());
    }

    #[test]
    fn ignores_other_conversations_and_presence() {
        let cid = Uuid::new_v4();
        let mut view = ConversationView::new(cid);
        let elsewhere = message(Uuid::new_v4(), Uuid::new_v4(), 0, "elsewhere");

        assert!(!view.apply(&RelayEvent::MessageCreated(elsewhere)));
        assert!(!view.apply(&RelayEvent::UserOnline {
            user_id: Uuid::new_v4()
        }));
        assert!(view.is_empty());
    }

    #[test]
    fn deleting_a_message_drops_its_pin() {
        let cid = Uuid::new_v4();
        let sender = Uuid::new_v4();
        let pinned = message(cid, sender, 0, "important");
        let mut view = ConversationView::new(cid);
        view.reset(vec![snapshot_entry(&pinned)]);

        let pin = PinnedMessage {
            id: Uuid::new_v4(),
            conversation_id: cid,
            message_id: pinned.id,
            pinned_by_id: sender,
            created_at: pinned.created_at,
            message: pinned.clone(),
        };
        let event = RelayEvent::MessagePinned {
            pinned_message: pin,
            conversation_id: cid,
        };
        assert!(view.apply(&event));
        assert!(!view.apply(&event));
        assert_eq!(view.pins().len(), 1);

        view.apply(&RelayEvent::MessageDeleted {
            id: pinned.id,
            conversation_id: cid,
        });
        assert!(view.pins().is_empty());
    }

    #[test]
    fn resync_with_the_same_snapshot_leaves_messages_unchanged() {
        let cid = Uuid::new_v4();
        let origin = message(Uuid::new_v4(), Uuid::new_v4(), 0, "original");
        let mut copy = message(cid, Uuid::new_v4(), 1, "original");
        copy.forwarded_from_id = Some(origin.id);

        let mut entry = snapshot_entry(&copy);
        entry.forwarded_from = Some(ForwardedFrom {
            id: origin.id,
            sender_id: origin.sender_id,
            created_at: origin.created_at,
        });

        let mut view = ConversationView::new(cid);
        view.reset(vec![entry.clone()]);
        let before = view.get(copy.id).cloned();
        assert_eq!(
            before.as_ref().and_then(|m| m.forwarded_from.as_ref()).map(|f| f.id),
            Some(origin.id)
        );

        view.reset(vec![entry]);
        assert_eq!(view.get(copy.id).cloned(), before);
    }
}
