//! Unread badges, driven by `message-created` events on the personal topic.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use courier_types::api::ConversationSummary;
use courier_types::events::RelayEvent;
use courier_types::models::Message;

#[derive(Debug, Clone)]
pub struct Inbox {
    me: Uuid,
    active: Option<Uuid>,
    unread: HashMap<Uuid, u32>,
    /// Newest message each seeded count already covers.
    seeded: HashMap<Uuid, (DateTime<Utc>, Uuid)>,
    /// Messages badged since the last seed or read, per conversation.
    counted: HashMap<Uuid, HashSet<Uuid>>,
}

impl Inbox {
    pub fn new(me: Uuid) -> Self {
        Self {
            me,
            active: None,
            unread: HashMap::new(),
            seeded: HashMap::new(),
            counted: HashMap::new(),
        }
    }

    /// Start from the server's unread counts. Live events for messages the
    /// counts already include are ignored afterwards.
    pub fn seed(&mut self, summaries: &[ConversationSummary]) {
        self.unread = summaries
            .iter()
            .filter(|s| s.unread_count > 0 && Some(s.id) != self.active)
            .map(|s| (s.id, s.unread_count))
            .collect();
        self.seeded = summaries
            .iter()
            .filter_map(|s| {
                s.last_message
                    .as_ref()
                    .map(|last| (s.id, (last.created_at, last.id)))
            })
            .collect();
        self.counted.clear();
    }

    /// The conversation currently on screen never collects a badge.
    pub fn set_active(&mut self, conversation_id: Option<Uuid>) {
        self.active = conversation_id;
        if let Some(id) = conversation_id {
            self.mark_read(id);
        }
    }

    pub fn active(&self) -> Option<Uuid> {
        self.active
    }

    /// Returns true if a badge changed.
    pub fn apply(&mut self, event: &RelayEvent) -> bool {
        let RelayEvent::MessageCreated(message) = event else {
            return false;
        };
        if message.sender_id == self.me
            || Some(message.conversation_id) == self.active
            || self.covered_by_seed(message)
            || !self
                .counted
                .entry(message.conversation_id)
                .or_default()
                .insert(message.id)
        {
            return false;
        }
        *self.unread.entry(message.conversation_id).or_default() += 1;
        true
    }

    fn covered_by_seed(&self, message: &Message) -> bool {
        match self.seeded.get(&message.conversation_id) {
            Some(&(at, id)) => message.created_at < at || message.id == id,
            None => false,
        }
    }

    pub fn mark_read(&mut self, conversation_id: Uuid) {
        self.unread.remove(&conversation_id);
        self.counted.remove(&conversation_id);
    }

    pub fn unread_count(&self, conversation_id: Uuid) -> u32 {
        self.unread.get(&conversation_id).copied().unwrap_or(0)
    }

    pub fn has_unread(&self, conversation_id: Uuid) -> bool {
        self.unread_count(conversation_id) > 0
    }

    pub fn unread_conversations(&self) -> Vec<Uuid> {
        let mut ids: Vec<Uuid> = self.unread.keys().copied().collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn created(conversation_id: Uuid, sender_id: Uuid) -> RelayEvent {
        RelayEvent::MessageCreated(Message {
            id: Uuid::new_v4(),
            conversation_id,
            sender_id,
            content: "hello".into(),
            image: None,
            edited: false,
            forwarded_from_id: None,
            created_at: Utc::now(),
        })
    }

    #[test]
    fn badges_messages_from_others_outside_the_active_conversation() {
        let (me, alice) = (Uuid::new_v4(), Uuid::new_v4());
        let (open, background) = (Uuid::new_v4(), Uuid::new_v4());
        let mut inbox = Inbox::new(me);
        inbox.set_active(Some(open));

        assert!(!inbox.apply(&created(open, alice)));
        assert!(!inbox.apply(&created(background, me)));

        let hello = created(background, alice);
        assert!(inbox.apply(&hello));
        // Redelivery does not double count
        assert!(!inbox.apply(&hello));

        assert_eq!(inbox.unread_count(background), 1);
        assert!(!inbox.has_unread(open));

        inbox.set_active(Some(background));
        assert!(!inbox.has_unread(background));
    }

    #[test]
    fn mark_read_clears_the_badge() {
        let me = Uuid::new_v4();
        let conversation = Uuid::new_v4();
        let mut inbox = Inbox::new(me);

        inbox.apply(&created(conversation, Uuid::new_v4()));
        inbox.apply(&created(conversation, Uuid::new_v4()));
        assert_eq!(inbox.unread_conversations(), vec![conversation]);
        assert_eq!(inbox.unread_count(conversation), 2);

        inbox.mark_read(conversation);
        assert!(inbox.unread_conversations().is_empty());
    }

    fn summary(conversation_id: Uuid, last: Option<&RelayEvent>, unread_count: u32) -> ConversationSummary {
        let last_message = last.and_then(|event| match event {
            RelayEvent::MessageCreated(message) => Some(message.clone()),
            _ => None,
        });
        ConversationSummary {
            id: conversation_id,
            companion: None,
            last_message_at: last_message
                .as_ref()
                .map_or_else(Utc::now, |m| m.created_at),
            last_message,
            unread_count,
        }
    }

    #[test]
    fn seeded_counts_are_not_repeated_by_queued_events() {
        let (me, alice) = (Uuid::new_v4(), Uuid::new_v4());
        let conversation = Uuid::new_v4();
        let hello = created(conversation, alice);

        let mut inbox = Inbox::new(me);
        inbox.seed(&[summary(conversation, Some(&hello), 1)]);
        assert!(!inbox.apply(&hello));
        assert_eq!(inbox.unread_count(conversation), 1);

        // Something newer than the seed still counts
        let later = created(conversation, alice);
        assert!(inbox.apply(&later));
        assert_eq!(inbox.unread_count(conversation), 2);
    }

    #[test]
    fn reading_forgets_counted_messages() {
        let me = Uuid::new_v4();
        let conversation = Uuid::new_v4();
        let mut inbox = Inbox::new(me);

        inbox.apply(&created(conversation, Uuid::new_v4()));
        assert_eq!(inbox.counted[&conversation].len(), 1);

        inbox.mark_read(conversation);
        assert!(!inbox.counted.contains_key(&conversation));
    }
}
